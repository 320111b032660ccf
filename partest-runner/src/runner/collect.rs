// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Folding the files left behind by a finished batch into the run's aggregates.

use crate::{
    coverage::{CoverageMerger, LineCoverage},
    list::Batch,
    reporter::events::{BatchCrashReason, BatchResult, BatchStatus},
    test_command::BatchFiles,
    worker::{CrashReason, JobOutcome, JobStatus},
};
use partest_junit::{
    Defect, DefectKind, ReadError, Reader, ResultMerger, TestCase, TestSuite, Totals,
};
use std::time::Duration;
use tracing::{debug, warn};

/// The message type of the synthetic error recorded for a crashed batch.
pub const BATCH_CRASHED_TYPE: &str = "partest\\BatchCrashed";

#[derive(Debug)]
pub(super) struct BatchCollector {
    results: ResultMerger,
    coverage: Option<CoverageMerger<LineCoverage>>,
}

impl BatchCollector {
    pub(super) fn new(coverage: bool) -> Self {
        Self {
            results: ResultMerger::new(),
            coverage: coverage.then(CoverageMerger::new),
        }
    }

    /// Reads the files of a finished batch, folds them into the aggregates and deletes them.
    ///
    /// `outcome` is `None` if the worker had no record of the job.
    pub(super) fn collect(
        &mut self,
        batch: &Batch,
        files: &BatchFiles,
        outcome: Option<JobOutcome>,
    ) -> BatchResult {
        let (status, output_tail, duration) = match outcome {
            Some(outcome) => (outcome.status, outcome.output_tail, outcome.duration),
            None => (
                JobStatus::Crashed(CrashReason::WaitFailed("no batch was in flight".to_owned())),
                Vec::new(),
                Duration::ZERO,
            ),
        };

        let mut crash_reason = match &status {
            JobStatus::Exited { .. } => None,
            JobStatus::Crashed(reason) => Some(BatchCrashReason::Worker(reason.clone())),
        };

        let mut suites = Vec::with_capacity(2);
        match Reader::open(&files.junit) {
            Ok(reader) => {
                debug!(
                    "read {} tests for batch {} from {}",
                    reader.suite().totals.tests,
                    batch.index,
                    reader.path()
                );
                suites.push(reader.into_suite());
            }
            Err(error) => {
                if crash_reason.is_none() {
                    crash_reason = Some(match &error {
                        ReadError::NotFound { .. } => BatchCrashReason::MissingResult {
                            exit_code: match status {
                                JobStatus::Exited { code } => Some(code),
                                JobStatus::Crashed(_) => None,
                            },
                        },
                        other => BatchCrashReason::CorruptResult {
                            message: other.to_string(),
                        },
                    });
                }
                debug!("no usable result for batch {}: {error}", batch.index);
            }
        }

        // Only failing tests account for a non-zero exit.
        if crash_reason.is_none()
            && let JobStatus::Exited { code } = status
            && code != 0
            && suites.iter().all(TestSuite::is_successful)
        {
            crash_reason = Some(BatchCrashReason::UnexpectedExit { code });
        }

        if let (Some(merger), Some(path)) = (&mut self.coverage, &files.coverage) {
            if let Err(error) = merger.add_from_file(path) {
                warn!("coverage for batch {} ({batch}) not merged: {error}", batch.index);
                crash_reason.get_or_insert(BatchCrashReason::Coverage {
                    message: error.to_string(),
                });
            }
        }

        if let Some(reason) = &crash_reason {
            warn!("batch {} ({batch}) crashed: {reason}", batch.index);
            suites.push(crash_suite(batch, reason, &output_tail));
        }

        let mut totals = Totals::default();
        let mut feedback = String::new();
        let mut successful = true;
        for suite in suites {
            totals.add(&suite.totals);
            feedback.push_str(&suite.feedback());
            successful &= suite.is_successful();
            self.results.fold(suite);
        }

        files.cleanup();

        let status = match crash_reason {
            Some(reason) => BatchStatus::Crashed(reason),
            None if successful => BatchStatus::Passed,
            None => BatchStatus::Failed,
        };
        BatchResult {
            status,
            feedback,
            totals,
            duration,
        }
    }

    pub(super) fn finish(self) -> (Option<TestSuite>, Option<LineCoverage>) {
        (
            self.results.finish(),
            self.coverage.and_then(CoverageMerger::finish),
        )
    }
}

/// Builds the suite recorded for a crashed batch: one errored test case describing the crash.
fn crash_suite(batch: &Batch, reason: &BatchCrashReason, output_tail: &[String]) -> TestSuite {
    let mut message = format!("batch {batch} {reason}");
    if !output_tail.is_empty() {
        message.push_str("\n\nlast lines of output:\n");
        message.push_str(&output_tail.join("\n"));
    }

    let mut case = TestCase::new(batch.class.clone(), batch.to_string())
        .with_defect(Defect::new(DefectKind::Error, BATCH_CRASHED_TYPE, message));
    case.file = batch.file.to_string();
    TestSuite::from_cases(batch.to_string(), batch.file.as_str(), [case])
}
