// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::WorkerMode,
    list::Batch,
    runner::RunStats,
    worker::{CrashReason, WorkerId},
};
use chrono::{DateTime, FixedOffset};
use partest_junit::Totals;
use std::{fmt, time::Duration};
use uuid::Uuid;

/// A run event.
///
/// Events are produced by a [`TestRunner`](crate::runner::TestRunner) and passed to the callback
/// given to [`TestRunner::execute`](crate::runner::TestRunner::execute).
#[derive(Clone, Debug)]
pub struct RunEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RunEventKind<'a>,
}

/// The kind of run event this is.
///
/// Forms part of [`RunEvent`].
#[derive(Clone, Debug)]
pub enum RunEventKind<'a> {
    /// The run started.
    RunStarted {
        /// The UUID for this run.
        run_id: Uuid,

        /// The number of batches that will be run.
        batch_count: usize,

        /// The number of workers.
        worker_count: usize,

        /// How batches are executed.
        worker_mode: WorkerMode,
    },

    /// A batch was assigned to a worker.
    BatchStarted {
        /// The batch.
        batch: &'a Batch,

        /// The worker running the batch.
        worker: WorkerId,

        /// The number of batches currently running, including this one.
        running: usize,
    },

    /// A batch finished, and its results were folded into the aggregate.
    BatchFinished {
        /// The batch.
        batch: &'a Batch,

        /// The worker that ran the batch.
        worker: WorkerId,

        /// The result of the batch.
        result: BatchResult,

        /// The number of batches still running.
        running: usize,

        /// Statistics for the run so far.
        stats: RunStats,
    },

    /// No new batches will be assigned. Batches already running are allowed to finish.
    RunBeginCancel {
        /// The reason the run is being cancelled.
        reason: CancelReason,

        /// The number of batches still running.
        running: usize,
    },

    /// The run finished.
    RunFinished {
        /// The UUID for this run.
        run_id: Uuid,

        /// The time at which the run started.
        start_time: DateTime<FixedOffset>,

        /// The amount of time it took for the run to complete.
        elapsed: Duration,

        /// Statistics for the run.
        stats: RunStats,
    },
}

/// Why a run was cancelled.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum CancelReason {
    /// A batch failed and stop-on-failure is enabled.
    TestFailure,

    /// An error occurred that prevents batches from being run.
    ReportError,
}

impl CancelReason {
    /// Returns a short description of the reason.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::TestFailure => "test failure",
            Self::ReportError => "error",
        }
    }
}

/// The result of a finished batch.
#[derive(Clone, Debug)]
pub struct BatchResult {
    /// The overall status.
    pub status: BatchStatus,

    /// Progress characters for the batch's test cases, one per test case.
    pub feedback: String,

    /// Counters read from the batch's result file, including any synthetic crash entry.
    pub totals: Totals,

    /// How long the batch took.
    pub duration: Duration,
}

/// The status of a finished batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchStatus {
    /// Every test in the batch passed.
    Passed,

    /// At least one test failed or errored.
    Failed,

    /// The batch didn't produce a usable result.
    Crashed(BatchCrashReason),
}

impl BatchStatus {
    /// Returns true if the batch passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Why a batch is considered crashed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchCrashReason {
    /// The process running the batch died.
    Worker(CrashReason),

    /// The batch exited with a non-zero code, but its result file records no failures or
    /// errors.
    UnexpectedExit {
        /// The exit code of the batch.
        code: i32,
    },

    /// The batch exited without writing a result file.
    MissingResult {
        /// The exit code of the batch, if it exited.
        exit_code: Option<i32>,
    },

    /// The result file is empty or not valid JUnit XML.
    CorruptResult {
        /// A description of the problem.
        message: String,
    },

    /// The coverage file is empty or not valid.
    Coverage {
        /// A description of the problem.
        message: String,
    },
}

impl fmt::Display for BatchCrashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker(reason) => write!(f, "process {reason}"),
            Self::UnexpectedExit { code } => {
                write!(f, "exited with code {code} without reporting a failure")
            }
            Self::MissingResult {
                exit_code: Some(code),
            } => write!(f, "exited with code {code} without writing a result file"),
            Self::MissingResult { exit_code: None } => {
                write!(f, "exited without writing a result file")
            }
            Self::CorruptResult { message } => {
                write!(f, "wrote an unusable result file: {message}")
            }
            Self::Coverage { message } => write!(f, "wrote unusable coverage data: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_reason_display() {
        assert_eq!(
            BatchCrashReason::Worker(CrashReason::Signal(11)).to_string(),
            "process killed by signal 11"
        );
        assert_eq!(
            BatchCrashReason::MissingResult { exit_code: Some(255) }.to_string(),
            "exited with code 255 without writing a result file"
        );
        assert_eq!(
            BatchCrashReason::UnexpectedExit { code: 255 }.to_string(),
            "exited with code 255 without reporting a failure"
        );
    }
}
