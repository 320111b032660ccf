// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DispatcherContext, RunStats, collect::BatchCollector};
use crate::{
    config::{TestThreads, WorkerMode},
    coverage::LineCoverage,
    errors::{TestRunnerBuildError, TestRunnerExecuteError},
    exit_code::PartestExitCode,
    list::Batch,
    reporter::events::{CancelReason, RunEvent},
    test_command::{BatchFiles, CommandTemplate, WrapperTemplate},
    worker::{JobOutcome, Worker, WorkerFactory},
};
use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use futures::{future, prelude::*, stream::FuturesUnordered};
use partest_junit::TestSuite;
use std::{collections::VecDeque, time::Duration};
use tokio::runtime::Runtime;
use tracing::{debug, warn};
use uuid::Uuid;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    test_threads: Option<TestThreads>,
    worker_mode: WorkerMode,
    wrapper: Option<WrapperTemplate>,
    stop_on_failure: bool,
    coverage: bool,
    temp_root: Option<Utf8PathBuf>,
}

impl TestRunnerBuilder {
    /// Sets the number of workers. Defaults to the number of logical CPUs.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets how workers execute batches.
    pub fn set_worker_mode(&mut self, worker_mode: WorkerMode) -> &mut Self {
        self.worker_mode = worker_mode;
        self
    }

    /// Sets the wrapper command used in [`WorkerMode::Wrapper`].
    ///
    /// Defaults to `partest wrapper` through the current executable.
    pub fn set_wrapper(&mut self, wrapper: WrapperTemplate) -> &mut Self {
        self.wrapper = Some(wrapper);
        self
    }

    /// If true, no new batches are assigned after the first batch that doesn't pass.
    pub fn set_stop_on_failure(&mut self, stop_on_failure: bool) -> &mut Self {
        self.stop_on_failure = stop_on_failure;
        self
    }

    /// Enables collection and merging of coverage data.
    pub fn set_coverage(&mut self, coverage: bool) -> &mut Self {
        self.coverage = coverage;
        self
    }

    /// Sets the directory under which the run's temporary directory is created.
    pub fn set_temp_root(&mut self, temp_root: impl Into<Utf8PathBuf>) -> &mut Self {
        self.temp_root = Some(temp_root.into());
        self
    }

    /// Creates a new test runner for `batches`, each rendered through `command`.
    pub fn build<'a>(
        self,
        batches: &'a [Batch],
        command: &'a CommandTemplate,
    ) -> Result<TestRunner<'a>, TestRunnerBuildError> {
        if self.coverage && !command.has_coverage_args() {
            return Err(TestRunnerBuildError::CoverageArgsMissing);
        }

        let worker_count = self
            .test_threads
            .unwrap_or(TestThreads::NumCpus)
            .compute()
            .min(batches.len());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("partest-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;

        let mut temp_builder = camino_tempfile::Builder::new();
        temp_builder.prefix("partest-run-");
        let run_dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).and_then(|()| temp_builder.tempdir_in(root))
            }
            None => temp_builder.tempdir(),
        }
        .map_err(|error| TestRunnerBuildError::CreateTempDir {
            root: self.temp_root.clone(),
            error,
        })?;
        debug!("created run directory {}", run_dir.path());

        let wrapper = match self.worker_mode {
            WorkerMode::OneShot => None,
            WorkerMode::Wrapper => Some(self.wrapper.unwrap_or_else(WrapperTemplate::current_exe)),
        };
        let factory = WorkerFactory::new(wrapper, run_dir.path().to_owned(), worker_count);

        Ok(TestRunner {
            batches,
            command,
            worker_count,
            stop_on_failure: self.stop_on_failure,
            coverage: self.coverage,
            factory,
            run_dir,
            runtime,
            run_id: Uuid::new_v4(),
        })
    }
}

/// Context for running batches.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner<'a> {
    batches: &'a [Batch],
    command: &'a CommandTemplate,
    worker_count: usize,
    stop_on_failure: bool,
    coverage: bool,
    factory: WorkerFactory,
    run_dir: Utf8TempDir,
    runtime: Runtime,
    run_id: Uuid,
}

impl<'a> TestRunner<'a> {
    /// Returns the number of workers this runner will start.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs every batch, at most one per worker at a time.
    ///
    /// The callback is called with an event for every change of state, on the supervising
    /// thread. Batches are assigned in order, but may finish in any order.
    ///
    /// Returns an error if a worker couldn't be started or couldn't accept a batch. Batches
    /// already running when that happens are allowed to finish first.
    pub fn execute<F>(self, callback: F) -> Result<RunOutcome, TestRunnerExecuteError>
    where
        F: FnMut(RunEvent<'a>),
    {
        let Self {
            batches,
            command,
            worker_count,
            stop_on_failure,
            coverage,
            mut factory,
            run_dir,
            runtime,
            run_id,
        } = self;

        let mut cx = DispatcherContext::new(callback, run_id, batches.len(), stop_on_failure);
        let mut collector = BatchCollector::new(coverage);

        let first_error = runtime.block_on(async {
            let mut first_error: Option<TestRunnerExecuteError> = None;
            cx.run_started(worker_count, factory.mode());

            let mut idle = VecDeque::with_capacity(worker_count);
            for slot in 1..=worker_count {
                match factory.start(slot) {
                    Ok(worker) => idle.push_back(worker),
                    Err(error) => {
                        first_error.get_or_insert(error.into());
                        cx.begin_cancel(CancelReason::ReportError);
                        break;
                    }
                }
            }

            let mut pending: VecDeque<&'a Batch> = batches.iter().collect();
            let mut running = FuturesUnordered::new();

            loop {
                while !cx.is_cancelled() && !pending.is_empty() {
                    let Some(mut worker) = idle.pop_front() else {
                        break;
                    };
                    let Some(batch) = pending.pop_front() else {
                        idle.push_back(worker);
                        break;
                    };

                    let files = BatchFiles::new(run_dir.path(), batch.index, coverage);
                    let batch_command = command.render(batch, &files);
                    match worker.execute(&batch_command).await {
                        Ok(()) => {
                            cx.batch_started(batch, worker.id());
                            running.push(wait_for_job(worker, batch, files));
                        }
                        Err(error) => {
                            warn!("batch {} ({batch}) could not be started: {error}", batch.index);
                            files.cleanup();
                            idle.push_back(worker);
                            first_error.get_or_insert(error.into());
                            cx.begin_cancel(CancelReason::ReportError);
                        }
                    }
                }

                let Some((mut worker, batch, files, outcome)) = running.next().await else {
                    break;
                };
                let id = worker.id();
                let result = collector.collect(batch, &files, outcome);
                cx.batch_finished(batch, id, result);

                if worker.is_crashed() {
                    warn!("[{id}] worker process died, replacing it");
                    worker.stop().await;
                    worker.wait_for_stop().await;
                    match factory.start(id.slot()) {
                        Ok(worker) => idle.push_back(worker),
                        Err(error) => {
                            first_error.get_or_insert(error.into());
                            cx.begin_cancel(CancelReason::ReportError);
                        }
                    }
                } else {
                    idle.push_back(worker);
                }
            }

            for worker in &mut idle {
                worker.stop().await;
            }
            future::join_all(idle.into_iter().map(Worker::wait_for_stop)).await;

            first_error
        });

        let (merged, coverage) = collector.finish();
        let stats = cx.run_stats();
        let elapsed = cx.elapsed();
        cx.run_finished();

        // Workers are all reaped at this point, but the output drains of wrapper processes may
        // still hold pipes open.
        runtime.shutdown_background();

        let run_dir_path = run_dir.path().to_owned();
        match run_dir.close() {
            Ok(()) => debug!("removed run directory {run_dir_path}"),
            Err(error) => warn!("failed to remove run directory {run_dir_path}: {error}"),
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(RunOutcome {
                run_id,
                stats,
                merged,
                coverage,
                elapsed,
            }),
        }
    }
}

async fn wait_for_job(
    mut worker: Worker,
    batch: &Batch,
    files: BatchFiles,
) -> (Worker, &Batch, BatchFiles, Option<JobOutcome>) {
    let outcome = worker.wait_for_finished_job().await;
    (worker, batch, files, outcome)
}

/// The result of a completed run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The UUID for this run.
    pub run_id: Uuid,

    /// Batch statistics.
    pub stats: RunStats,

    /// The merged result of every batch that finished, or `None` if no batch finished.
    pub merged: Option<TestSuite>,

    /// The merged coverage data, if coverage was enabled and any was produced.
    pub coverage: Option<LineCoverage>,

    /// How long the run took.
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Returns true if every batch ran and every test passed.
    pub fn is_success(&self) -> bool {
        self.stats.is_success() && self.merged.as_ref().is_none_or(TestSuite::is_successful)
    }

    /// Returns the process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.stats.crashed > 0 {
            PartestExitCode::BATCH_CRASHED
        } else if self.is_success() {
            PartestExitCode::OK
        } else {
            PartestExitCode::TEST_RUN_FAILED
        }
    }
}
