// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command templates for the external test framework.
//!
//! A [`CommandTemplate`] describes how to invoke the framework for one batch. Arguments may
//! contain placeholders, which are substituted per batch:
//!
//! | placeholder  | value                                                  |
//! |--------------|--------------------------------------------------------|
//! | `{path}`     | the test file                                          |
//! | `{class}`    | the test class                                         |
//! | `{junit}`    | where the framework must write its JUnit log           |
//! | `{coverage}` | where the framework must write coverage data           |
//! | `{filter}`   | a regex selecting the batch's methods                  |
//!
//! The wrapper command ([`WrapperTemplate`]) only accepts `{status}`, the status file path.

use crate::{errors::CommandTemplateError, list::Batch};
use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use std::{io, sync::LazyLock};
use tracing::{debug, warn};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // The pattern is a literal, so compiling it can't fail.
    Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex is valid")
});

const BATCH_PLACEHOLDERS: &[&str] = &["path", "class", "junit", "coverage", "filter"];
const WRAPPER_PLACEHOLDERS: &[&str] = &["status"];

fn validate_args<'a>(
    args: impl IntoIterator<Item = &'a String>,
    known: &[&str],
) -> Result<(), CommandTemplateError> {
    for arg in args {
        for captures in PLACEHOLDER.captures_iter(arg) {
            let name = &captures[1];
            if !known.contains(&name) {
                return Err(CommandTemplateError::UnknownPlaceholder {
                    arg: arg.clone(),
                    placeholder: name.to_owned(),
                });
            }
        }
    }
    Ok(())
}

fn substitute(arg: &str, mut value: impl FnMut(&str) -> String) -> String {
    PLACEHOLDER
        .replace_all(arg, |captures: &Captures<'_>| value(&captures[1]))
        .into_owned()
}

/// The invocation template for a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
    filter_args: Vec<String>,
    coverage_args: Vec<String>,
}

impl CommandTemplate {
    /// Creates a new template, checking that every placeholder is known.
    pub fn new(
        program: &str,
        args: Vec<String>,
        filter_args: Vec<String>,
        coverage_args: Vec<String>,
    ) -> Result<Self, CommandTemplateError> {
        if program.trim().is_empty() {
            return Err(CommandTemplateError::EmptyProgram);
        }
        validate_args(
            args.iter().chain(&filter_args).chain(&coverage_args),
            BATCH_PLACEHOLDERS,
        )?;
        Ok(Self {
            program: program.to_owned(),
            args,
            filter_args,
            coverage_args,
        })
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns true if the template can produce coverage data.
    pub fn has_coverage_args(&self) -> bool {
        !self.coverage_args.is_empty()
    }

    /// Produces the command line for a batch.
    pub fn render(&self, batch: &Batch, files: &BatchFiles) -> BatchCommand {
        let filter = batch.filter();
        let value = |name: &str| match name {
            "path" => batch.file.to_string(),
            "class" => batch.class.clone(),
            "junit" => files.junit.to_string(),
            "coverage" => files
                .coverage
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            "filter" => filter.clone().unwrap_or_default(),
            // Unknown placeholders were rejected in `new`.
            other => format!("{{{other}}}"),
        };

        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().map(|arg| substitute(arg, value)));
        if filter.is_some() {
            argv.extend(self.filter_args.iter().map(|arg| substitute(arg, value)));
        }
        if files.coverage.is_some() {
            argv.extend(self.coverage_args.iter().map(|arg| substitute(arg, value)));
        }
        BatchCommand { argv }
    }
}

/// The invocation template for a persistent wrapper process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WrapperTemplate {
    program: Option<String>,
    args: Vec<String>,
}

impl WrapperTemplate {
    /// Creates a new template. An empty program means the current executable.
    pub fn new(program: &str, args: Vec<String>) -> Result<Self, CommandTemplateError> {
        validate_args(&args, WRAPPER_PLACEHOLDERS)?;
        let program = program.trim();
        Ok(Self {
            program: (!program.is_empty()).then(|| program.to_owned()),
            args,
        })
    }

    /// Returns the default template: this executable's `wrapper` subcommand.
    pub fn current_exe() -> Self {
        Self {
            program: None,
            args: ["wrapper", "--status-file", "{status}"]
                .map(String::from)
                .to_vec(),
        }
    }

    /// Returns the program to spawn, resolving an empty program to the current executable.
    pub fn resolve_program(&self) -> io::Result<String> {
        match &self.program {
            Some(program) => Ok(program.clone()),
            None => {
                let exe = std::env::current_exe()?;
                exe.into_os_string().into_string().map_err(|exe| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("current executable path is not UTF-8: {exe:?}"),
                    )
                })
            }
        }
    }

    /// Returns the arguments for a wrapper writing to `status_file`.
    pub fn render_args(&self, status_file: &Utf8Path) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                substitute(arg, |name| match name {
                    "status" => status_file.to_string(),
                    other => format!("{{{other}}}"),
                })
            })
            .collect()
    }
}

/// A fully rendered command line for a batch. The first element is the program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchCommand {
    argv: Vec<String>,
}

impl BatchCommand {
    /// Creates a new command from an argument vector.
    ///
    /// Returns `None` if `argv` is empty.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        (!argv.is_empty()).then_some(Self { argv })
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Returns the arguments, not including the program.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    /// Returns the whole argument vector.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Serializes the command as a line of the wrapper protocol: a JSON array of strings,
    /// terminated by a newline.
    pub fn to_wrapper_line(&self) -> String {
        let mut line = serde_json::Value::from(self.argv.clone()).to_string();
        line.push('\n');
        line
    }
}

/// The per-batch files the framework writes into.
///
/// Names are derived from the batch index, which is unique within a run directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchFiles {
    /// Where the JUnit log is written.
    pub junit: Utf8PathBuf,

    /// Where coverage data is written, if coverage is enabled.
    pub coverage: Option<Utf8PathBuf>,
}

impl BatchFiles {
    /// Returns the files for batch `index` in `run_dir`.
    pub fn new(run_dir: &Utf8Path, index: usize, coverage: bool) -> Self {
        Self {
            junit: run_dir.join(format!("batch-{index}.xml")),
            coverage: coverage.then(|| run_dir.join(format!("batch-{index}.cov.json"))),
        }
    }

    /// Deletes any of the files that exist.
    pub fn cleanup(&self) {
        for path in std::iter::once(&self.junit).chain(&self.coverage) {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("removed {path}"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => warn!("failed to remove {path}: {error}"),
            }
        }
    }
}
