// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{CLI_STYLES, OutputContext, OutputOpts},
    reporter::Reporter,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use partest_junit::{SerializeError, TestSuite, write_report};
use partest_runner::{
    config::{PartestConfig, TestThreads, WorkerMode},
    coverage::{CoverageModel, LineCoverage},
    exit_code::PartestExitCode,
    list::{DEFAULT_TEST_SUFFIX, PartitionMode, TestInventory, partition},
    runner::TestRunnerBuilder,
    test_filter::TestFilterBuilder,
    wrapper_server,
};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    num::NonZeroUsize,
};
use supports_color::Stream;
use tracing::{debug, info};

/// Runs the tests of an external test framework in parallel processes, and merges their JUnit
/// results.
#[derive(Debug, Parser)]
#[command(version, styles = CLI_STYLES)]
pub struct PartestApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl PartestApp {
    /// Initializes logging and colors.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output),
            Command::Wrapper { status_file } => {
                wrapper_server::serve(io::stdin().lock(), &status_file)?;
                Ok(PartestExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split tests into batches and run them in parallel
    ///
    /// Test files are discovered under PATH, or read from an inventory or a work list. Each batch
    /// is run through the configured test command, and the JUnit results of all batches are
    /// merged.
    Run(Box<RunOpts>),

    /// Serve batch commands on standard input (used by the wrapper runner)
    ///
    /// Each line is a JSON array holding a program and its arguments. After running it, its exit
    /// code is appended to the status file as one byte. The line `EXIT` stops the wrapper.
    #[command(hide = true)]
    Wrapper {
        /// The file that exit codes are appended to
        #[arg(long, value_name = "PATH")]
        status_file: Utf8PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Directory to scan for test files, or a single test file [default: tests, or the current
    /// directory if it doesn't exist]
    #[arg(value_name = "PATH", conflicts_with_all = ["inventory", "work_list"])]
    path: Option<Utf8PathBuf>,

    /// Config file [default: partest.toml in the current directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[command(flatten)]
    select: SelectOpts,

    #[command(flatten)]
    runner: RunnerOpts,

    /// Write the merged JUnit report to this file
    #[arg(long, value_name = "PATH", help_heading = "OUTPUT OPTIONS")]
    log_junit: Option<Utf8PathBuf>,

    /// Collect coverage from every batch and write the merged data to this file
    #[arg(long, value_name = "PATH", help_heading = "OUTPUT OPTIONS")]
    coverage: Option<Utf8PathBuf>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "SELECTION OPTIONS")]
struct SelectOpts {
    /// Read the test inventory from a JSON file
    #[arg(long, value_name = "PATH", conflicts_with = "work_list")]
    inventory: Option<Utf8PathBuf>,

    /// Read test files from a file, one per line
    #[arg(long, value_name = "PATH")]
    work_list: Option<Utf8PathBuf>,

    /// File name suffix of test files when scanning a directory
    #[arg(long, value_name = "SUFFIX", default_value = DEFAULT_TEST_SUFFIX)]
    suffix: String,

    /// Only run tests in this group (may be repeated)
    #[arg(long = "group", value_name = "GROUP")]
    groups: Vec<String>,

    /// Don't run tests in this group (may be repeated)
    #[arg(long = "exclude-group", value_name = "GROUP")]
    exclude_groups: Vec<String>,

    /// Only run tests whose Class::method name matches this regular expression
    #[arg(long, value_name = "PATTERN")]
    filter: Option<String>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "RUNNER OPTIONS")]
struct RunnerOpts {
    /// Number of worker processes to run in parallel
    #[arg(long, short = 'p', value_name = "COUNT", allow_hyphen_values = true)]
    processes: Option<TestThreads>,

    /// How batches are executed: one-shot, wrapper
    #[arg(long, value_name = "RUNNER")]
    runner: Option<WorkerMode>,

    /// Run every test method as its own batch
    #[arg(long)]
    functional: bool,

    /// In functional mode, the maximum number of methods of a class run in one batch
    #[arg(long, value_name = "COUNT")]
    max_batch_size: Option<NonZeroUsize>,

    /// Stop assigning batches after the first batch that fails
    #[arg(long)]
    stop_on_failure: bool,
}

impl RunnerOpts {
    fn apply(&self, config: &mut PartestConfig) {
        if let Some(processes) = self.processes {
            config.run.processes = processes;
        }
        if let Some(runner) = self.runner {
            config.run.runner = runner;
        }
        if self.functional {
            config.run.functional = true;
        }
        if let Some(max_batch_size) = self.max_batch_size {
            config.run.max_batch_size = max_batch_size;
        }
        if self.stop_on_failure {
            config.run.stop_on_failure = true;
        }
    }
}

impl RunOpts {
    fn exec(self, output: OutputContext) -> Result<i32> {
        let cwd = current_dir()?;
        let config = self.make_config(&cwd)?;

        let inventory = self.make_inventory(&cwd)?;
        let mut filter_builder = TestFilterBuilder::new();
        filter_builder
            .include_groups(&self.select.groups)
            .exclude_groups(&self.select.exclude_groups);
        if let Some(pattern) = &self.select.filter {
            filter_builder.set_name_pattern(pattern.as_str());
        }
        let filter = filter_builder.build()?;

        let mode = if config.run.functional {
            PartitionMode::Functional {
                max_batch_size: config.run.max_batch_size,
            }
        } else {
            PartitionMode::Class
        };
        let batches = partition(&filter.apply(&inventory), mode);
        debug!(
            "partitioned {} test classes into {} batches ({mode:?})",
            inventory.classes.len(),
            batches.len()
        );

        let command = config.command_template()?;
        let mut builder = TestRunnerBuilder::default();
        builder
            .set_test_threads(config.run.processes)
            .set_worker_mode(config.run.runner)
            .set_stop_on_failure(config.run.stop_on_failure)
            .set_coverage(config.coverage.enabled);
        if config.run.runner == WorkerMode::Wrapper {
            builder.set_wrapper(config.wrapper_template()?);
        }
        if let Some(temp_dir) = &config.run.temp_dir {
            builder.set_temp_root(cwd.join(temp_dir));
        }
        let runner = builder.build(&batches, &command)?;

        let mut reporter = Reporter::new(output.verbose);
        if output.color.enabled_for(Stream::Stdout) {
            reporter.colorize();
        }

        let stdout = io::stdout();
        let mut write_error = None;
        let outcome = runner.execute(|event| {
            if write_error.is_none()
                && let Err(err) = reporter.report_event(&event, stdout.lock())
            {
                write_error = Some(err);
            }
        })?;
        if let Some(err) = write_error {
            return Err(ExpectedError::WriteEventError { err });
        }

        let mut writer = stdout.lock();
        if let Some(merged) = &outcome.merged {
            reporter
                .write_results(merged, &mut writer)
                .map_err(|err| ExpectedError::WriteEventError { err })?;
        }
        if let Some(coverage) = &outcome.coverage {
            reporter
                .write_coverage(coverage, &mut writer)
                .map_err(|err| ExpectedError::WriteEventError { err })?;
        }
        writer
            .flush()
            .map_err(|err| ExpectedError::WriteEventError { err })?;

        if let Some(path) = &config.junit.path {
            write_junit(path, outcome.merged.as_ref())?;
        }
        if let Some(path) = &config.coverage.path {
            match &outcome.coverage {
                Some(coverage) => write_coverage(path, coverage)?,
                None => info!("no coverage data was produced, not writing `{path}`"),
            }
        }

        Ok(outcome.exit_code())
    }

    fn make_config(&self, cwd: &Utf8Path) -> Result<PartestConfig> {
        let mut config = PartestConfig::from_sources(cwd, self.config_file.as_deref())?;

        self.runner.apply(&mut config);
        if let Some(path) = &self.log_junit {
            config.junit.path = Some(path.clone());
        }
        if let Some(path) = &self.coverage {
            config.coverage.enabled = true;
            config.coverage.path = Some(path.clone());
        }

        config
            .validate()
            .map_err(ExpectedError::config_override_error)?;
        Ok(config)
    }

    fn make_inventory(&self, cwd: &Utf8Path) -> Result<TestInventory> {
        let inventory = if let Some(path) = &self.select.inventory {
            TestInventory::from_json_file(path)?
        } else if let Some(path) = &self.select.work_list {
            TestInventory::from_work_list(path)?
        } else {
            let root = match &self.path {
                Some(path) => path.clone(),
                None => {
                    let tests = cwd.join("tests");
                    if tests.is_dir() { tests } else { cwd.to_owned() }
                }
            };
            TestInventory::discover(&root, &self.select.suffix)?
        };
        Ok(inventory)
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
        path: err.into_path_buf(),
    })
}

fn create_parent_dir(path: &Utf8Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| ExpectedError::create_output_file_error(parent, err)),
        _ => Ok(()),
    }
}

/// Writes the merged report. A run that merged nothing still gets a valid, empty report.
fn write_junit(path: &Utf8Path, merged: Option<&TestSuite>) -> Result<()> {
    create_parent_dir(path)?;
    let file =
        File::create(path).map_err(|err| ExpectedError::create_output_file_error(path, err))?;

    let empty = TestSuite::default();
    let mut writer = BufWriter::new(file);
    write_report(merged.unwrap_or(&empty), &mut writer)
        .and_then(|()| writer.flush().map_err(SerializeError::Io))
        .map_err(|err| ExpectedError::WriteJunitError {
            path: path.to_owned(),
            err,
        })?;

    debug!("wrote merged JUnit report to {path}");
    Ok(())
}

fn write_coverage(path: &Utf8Path, coverage: &LineCoverage) -> Result<()> {
    create_parent_dir(path)?;
    coverage
        .write(path)
        .map_err(|err| ExpectedError::WriteCoverageError { err })?;

    debug!("wrote merged coverage data to {path}");
    Ok(())
}
