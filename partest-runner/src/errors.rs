// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by partest.

use crate::worker::WorkerId;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{io, path::PathBuf};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse partest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// Coverage collection is enabled, but the command template has no coverage arguments.
    #[error(
        "coverage is enabled, but `command.coverage-args` is empty \
         (it must contain a `{{coverage}}` placeholder)"
    )]
    CoverageArgsMissing,

    /// The test command is invalid.
    #[error("invalid test command")]
    InvalidCommand(#[source] CommandTemplateError),
}

/// Error returned while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for processes: {input}\n(hint: expected either an integer or \"num-cpus\")"
)]
pub struct TestThreadsParseError {
    /// The input that failed to parse.
    pub input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing a [`WorkerMode`](crate::config::WorkerMode) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for runner: {input}\n(known values: one-shot, wrapper)")]
pub struct WorkerModeParseError {
    /// The input that failed to parse.
    pub input: String,
}

/// An error that occurred while loading the test inventory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InventoryError {
    /// An error occurred while reading an inventory or work list file.
    #[error("error reading `{path}`")]
    ReadFile {
        /// The file that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The inventory file is not valid JSON.
    #[error("error parsing inventory `{path}`")]
    ParseJson {
        /// The file that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An error occurred while scanning a directory for test files.
    #[error("error scanning `{root}` for test files")]
    WalkDir {
        /// The directory being scanned.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A discovered path is not valid UTF-8.
    #[error("test file path is not valid UTF-8: {}", .path.display())]
    NonUtf8Path {
        /// The path that was found.
        path: PathBuf,
    },
}

/// An error that occurred while building a [`TestFilter`](crate::test_filter::TestFilter).
#[derive(Debug, Error)]
#[error("invalid test name filter `{pattern}`")]
pub struct TestFilterBuildError {
    pattern: String,
    #[source]
    error: regex::Error,
}

impl TestFilterBuildError {
    pub(crate) fn new(pattern: impl Into<String>, error: regex::Error) -> Self {
        Self {
            pattern: pattern.into(),
            error,
        }
    }
}

/// An error in a command template.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum CommandTemplateError {
    /// The program is empty.
    #[error("command program is empty")]
    EmptyProgram,

    /// An argument refers to a placeholder that doesn't exist.
    #[error("unknown placeholder `{{{placeholder}}}` in argument `{arg}`")]
    UnknownPlaceholder {
        /// The argument containing the placeholder.
        arg: String,

        /// The placeholder name, without braces.
        placeholder: String,
    },
}

/// An error that occurred while starting a worker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerStartError {
    /// The status file for a wrapper worker couldn't be created.
    #[error("[{worker}] error creating status file `{path}`")]
    CreateStatusFile {
        /// The worker being started.
        worker: WorkerId,

        /// The status file path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The current executable couldn't be determined.
    #[error("[{worker}] error determining the current executable")]
    CurrentExe {
        /// The worker being started.
        worker: WorkerId,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The wrapper process couldn't be spawned.
    #[error("[{worker}] error spawning wrapper `{program}`")]
    Spawn {
        /// The worker being started.
        worker: WorkerId,

        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while sending a batch to a worker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerExecuteError {
    /// The worker is still busy with another batch.
    #[error("[{worker}] worker is busy")]
    Busy {
        /// The worker.
        worker: WorkerId,
    },

    /// The worker is not running.
    #[error("[{worker}] worker is not running")]
    NotRunning {
        /// The worker.
        worker: WorkerId,
    },

    /// The batch process couldn't be spawned.
    #[error("[{worker}] error spawning `{program}`")]
    Spawn {
        /// The worker.
        worker: WorkerId,

        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The command couldn't be written to the wrapper's standard input.
    #[error("[{worker}] error sending command to wrapper")]
    WriteStdin {
        /// The worker.
        worker: WorkerId,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while merging coverage data.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoverageError {
    /// The coverage file does not exist.
    #[error("coverage file `{path}` does not exist")]
    NotFound {
        /// The coverage file.
        path: Utf8PathBuf,
    },

    /// The coverage file is empty.
    ///
    /// This means the process that was supposed to write the file exited before doing so.
    #[error("coverage file `{path}` is empty: the test process likely crashed")]
    Empty {
        /// The coverage file.
        path: Utf8PathBuf,
    },

    /// An I/O error occurred.
    #[error("error accessing coverage file `{path}`")]
    Io {
        /// The coverage file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The coverage data couldn't be decoded or encoded.
    #[error("invalid coverage data in `{path}`")]
    Format {
        /// The coverage file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

impl CoverageError {
    /// Returns true if this error means the producing process crashed before writing its data.
    pub fn indicates_crash(&self) -> bool {
        matches!(self, Self::Empty { .. } | Self::Format { .. })
    }
}

/// An error that occurred while constructing a [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// An error occurred while creating the temporary directory for the run.
    #[error(
        "error creating temporary directory under {}",
        .root.as_ref().map_or("the system temp dir".to_owned(), |root| format!("`{root}`"))
    )]
    CreateTempDir {
        /// The configured temp root, or `None` for the system default.
        root: Option<Utf8PathBuf>,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Coverage is enabled but the command template can't produce coverage files.
    #[error("coverage is enabled, but the command template has no coverage arguments")]
    CoverageArgsMissing,
}

/// An error that aborted a test run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerExecuteError {
    /// A worker couldn't be started.
    #[error("error starting worker")]
    WorkerStart(#[from] WorkerStartError),

    /// A batch couldn't be sent to a worker.
    #[error("error executing batch")]
    WorkerExecute(#[from] WorkerExecuteError),
}

/// An error that occurred while serving wrapper commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WrapperServeError {
    /// Reading commands from standard input failed.
    #[error("error reading wrapper commands")]
    ReadInput(#[source] io::Error),

    /// The status file couldn't be opened.
    #[error("error opening status file `{path}`")]
    OpenStatusFile {
        /// The status file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The status byte couldn't be written.
    #[error("error writing to status file `{path}`")]
    WriteStatus {
        /// The status file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },
}
