// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use partest_junit::SerializeError;
use partest_runner::{errors::*, exit_code::PartestExitCode};
use std::{error::Error, path::PathBuf};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that partest expects to happen, as opposed to a bug.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("invalid command-line overrides")]
    ConfigOverrideError {
        #[source]
        err: ConfigParseErrorKind,
    },
    #[error("inventory error")]
    InventoryError {
        #[from]
        err: InventoryError,
    },
    #[error("test filter build error")]
    TestFilterBuildError {
        #[from]
        err: TestFilterBuildError,
    },
    #[error("command template error")]
    CommandTemplateError {
        #[from]
        err: CommandTemplateError,
    },
    #[error("building test runner failed")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("test run aborted")]
    TestRunnerExecuteError {
        #[from]
        err: TestRunnerExecuteError,
    },
    #[error("writing progress output failed")]
    WriteEventError {
        #[source]
        err: std::io::Error,
    },
    #[error("creating output file failed")]
    CreateOutputFileError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("writing JUnit report failed")]
    WriteJunitError {
        path: Utf8PathBuf,
        #[source]
        err: SerializeError,
    },
    #[error("writing coverage failed")]
    WriteCoverageError {
        #[source]
        err: CoverageError,
    },
    #[error("wrapper error")]
    WrapperServeError {
        #[from]
        err: WrapperServeError,
    },
}

impl ExpectedError {
    pub(crate) fn config_override_error(err: ConfigParseErrorKind) -> Self {
        Self::ConfigOverrideError { err }
    }

    pub(crate) fn create_output_file_error(
        path: impl Into<Utf8PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::CreateOutputFileError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ConfigOverrideError { .. }
            | Self::InventoryError { .. }
            | Self::TestFilterBuildError { .. }
            | Self::CommandTemplateError { .. }
            | Self::TestRunnerBuildError { .. }
            | Self::TestRunnerExecuteError { .. }
            | Self::WrapperServeError { .. } => PartestExitCode::SETUP_ERROR,
            Self::WriteEventError { .. }
            | Self::CreateOutputFileError { .. }
            | Self::WriteJunitError { .. }
            | Self::WriteCoverageError { .. } => PartestExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.emphasis)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse partest config at `{}`",
                    err.config_file().style(styles.emphasis)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ConfigOverrideError { err } => {
                error!("invalid combination of command-line options and config");
                Some(err as &dyn Error)
            }
            Self::InventoryError { err } => {
                error!("failed to load the test inventory");
                Some(err as &dyn Error)
            }
            Self::TestFilterBuildError { err } => {
                error!("{err}");
                err.source()
            }
            Self::CommandTemplateError { err } => {
                error!("invalid test command in config");
                Some(err as &dyn Error)
            }
            Self::TestRunnerBuildError { err } => {
                error!("failed to set up the test run");
                Some(err as &dyn Error)
            }
            Self::TestRunnerExecuteError { err } => {
                error!(
                    "test run aborted {}",
                    "(batches already running were allowed to finish)".style(styles.note)
                );
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("failed to write progress output");
                Some(err as &dyn Error)
            }
            Self::CreateOutputFileError { path, err } => {
                error!("failed to create `{}`", path.style(styles.emphasis));
                Some(err as &dyn Error)
            }
            Self::WriteJunitError { path, err } => {
                error!(
                    "failed to write merged JUnit report to `{}`",
                    path.style(styles.emphasis)
                );
                Some(err as &dyn Error)
            }
            Self::WriteCoverageError { err } => {
                error!("failed to write merged coverage data");
                Some(err as &dyn Error)
            }
            Self::WrapperServeError { err } => {
                error!("wrapper failed");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\ncaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let write_error = ExpectedError::WriteEventError {
            err: std::io::Error::other("pipe closed"),
        };
        assert_eq!(
            write_error.process_exit_code(),
            PartestExitCode::WRITE_OUTPUT_ERROR
        );

        let build_error = ExpectedError::from(TestRunnerBuildError::CoverageArgsMissing);
        assert_eq!(build_error.process_exit_code(), PartestExitCode::SETUP_ERROR);
    }
}
