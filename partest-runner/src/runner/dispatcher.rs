// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping for a run: statistics, cancellation state, and events sent to the callback.

use super::RunStats;
use crate::{
    config::WorkerMode,
    list::Batch,
    reporter::events::{BatchResult, CancelReason, RunEvent, RunEventKind},
    time::StopwatchStart,
    worker::WorkerId,
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Context for the scheduler loop.
///
/// All events pass through here, so statistics and the running count are always consistent
/// with what the callback saw.
#[derive_where::derive_where(Debug)]
pub(super) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    run_id: Uuid,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
    running: usize,
    stop_on_failure: bool,
    cancel_state: Option<CancelReason>,
}

impl<'a, F> DispatcherContext<F>
where
    F: FnMut(RunEvent<'a>),
{
    pub(super) fn new(
        callback: F,
        run_id: Uuid,
        initial_run_count: usize,
        stop_on_failure: bool,
    ) -> Self {
        Self {
            callback: DebugIgnore(callback),
            run_id,
            stopwatch: crate::time::stopwatch(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            running: 0,
            stop_on_failure,
            cancel_state: None,
        }
    }

    pub(super) fn run_started(&mut self, worker_count: usize, worker_mode: WorkerMode) {
        self.basic_callback(RunEventKind::RunStarted {
            run_id: self.run_id,
            batch_count: self.run_stats.initial_run_count,
            worker_count,
            worker_mode,
        })
    }

    pub(super) fn batch_started(&mut self, batch: &'a Batch, worker: WorkerId) {
        self.running += 1;
        debug!("[{worker}] assigned batch {} ({batch})", batch.index);
        self.basic_callback(RunEventKind::BatchStarted {
            batch,
            worker,
            running: self.running,
        })
    }

    /// Records a finished batch. Begins cancellation if the batch failed and stop-on-failure is
    /// enabled.
    pub(super) fn batch_finished(
        &mut self,
        batch: &'a Batch,
        worker: WorkerId,
        result: BatchResult,
    ) {
        self.running = self.running.saturating_sub(1);
        self.run_stats.on_batch_finished(&result.status);
        let failed = !result.status.is_success();
        self.basic_callback(RunEventKind::BatchFinished {
            batch,
            worker,
            result,
            running: self.running,
            stats: self.run_stats,
        });

        if failed && self.stop_on_failure {
            self.begin_cancel(CancelReason::TestFailure);
        }
    }

    /// Begins cancellation of the run. Reported once per increase of the cancel state.
    pub(super) fn begin_cancel(&mut self, reason: CancelReason) {
        if self.cancel_state < Some(reason) {
            self.cancel_state = Some(reason);
            debug!("cancelling run: {}", reason.to_static_str());
            self.basic_callback(RunEventKind::RunBeginCancel {
                reason,
                running: self.running,
            });
        }
    }

    /// Returns true if no new batches should be assigned.
    pub(super) fn is_cancelled(&self) -> bool {
        self.cancel_state.is_some()
    }

    pub(super) fn run_finished(&mut self) {
        let snapshot = self.stopwatch.snapshot();
        self.basic_callback(RunEventKind::RunFinished {
            run_id: self.run_id,
            start_time: snapshot.start_time.fixed_offset(),
            elapsed: snapshot.duration,
            stats: self.run_stats,
        })
    }

    pub(super) fn run_stats(&self) -> RunStats {
        self.run_stats
    }

    pub(super) fn elapsed(&self) -> Duration {
        self.stopwatch.snapshot().duration
    }

    #[inline]
    fn basic_callback(&mut self, kind: RunEventKind<'a>) {
        let snapshot = self.stopwatch.snapshot();
        let event = RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: snapshot.duration,
            kind,
        };
        (self.callback)(event)
    }
}
