// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner: a pool of workers that runs batches and aggregates their results.
//!
//! The main structure in this module is [`TestRunner`].

mod collect;
mod dispatcher;
mod imp;

use crate::reporter::events::BatchStatus;
use dispatcher::DispatcherContext;
pub use collect::BATCH_CRASHED_TYPE;
pub use imp::*;

/// Statistics for a test run.
///
/// Counts are in batches, not tests: test counts are in the merged result.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of batches that were expected to be run at the beginning.
    ///
    /// If the run is cancelled, this will be more than `finished_count` at the end.
    pub initial_run_count: usize,

    /// The total number of batches that finished running.
    pub finished_count: usize,

    /// The number of batches in which every test passed.
    pub passed: usize,

    /// The number of batches with failed or errored tests.
    pub failed: usize,

    /// The number of batches that crashed.
    pub crashed: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run can be marked as failed if any of the following are true:
    /// * the run was cancelled: the initial run count is greater than the final run count
    /// * any batches failed
    /// * any batches crashed
    pub fn is_success(&self) -> bool {
        self.not_run() == 0 && !self.any_failed()
    }

    /// Returns true if any batches failed or crashed.
    #[inline]
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.crashed > 0
    }

    /// Returns the number of batches that were never assigned to a worker.
    pub fn not_run(&self) -> usize {
        self.initial_run_count.saturating_sub(self.finished_count)
    }

    fn on_batch_finished(&mut self, status: &BatchStatus) {
        self.finished_count += 1;
        match status {
            BatchStatus::Passed => self.passed += 1,
            BatchStatus::Failed => self.failed += 1,
            BatchStatus::Crashed(_) => self.crashed += 1,
        }
    }
}
