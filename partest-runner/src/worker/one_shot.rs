// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    CrashReason, JobOutcome, JobStatus, TEST_TOKEN_ENV, UNIQUE_TEST_TOKEN_ENV, WorkerId,
    output::ChildAccumulator,
};
use crate::{
    errors::WorkerExecuteError,
    test_command::BatchCommand,
    time::{StopwatchStart, stopwatch},
};
use debug_ignore::DebugIgnore;
use std::{process::Stdio, time::Duration};
use tokio::process::{Child, Command};
use tracing::debug;
use uuid::Uuid;

/// How long to keep reading output after a batch process exits.
///
/// Grandchildren that inherited the output pipes can keep them open indefinitely.
const LEAK_TIMEOUT: Duration = Duration::from_millis(100);

/// A worker that spawns a fresh process for every batch.
#[derive(Debug)]
pub struct OneShotWorker {
    id: WorkerId,
    job: Option<RunningJob>,
    stopped: bool,
}

#[derive(Debug)]
struct RunningJob {
    child: Child,
    acc: DebugIgnore<ChildAccumulator>,
    stopwatch: StopwatchStart,
}

impl OneShotWorker {
    /// Creates a new worker. No process is spawned until a batch is executed.
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            job: None,
            stopped: false,
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Spawns a process for `command`.
    pub fn execute(&mut self, command: &BatchCommand) -> Result<(), WorkerExecuteError> {
        if self.stopped {
            return Err(WorkerExecuteError::NotRunning { worker: self.id });
        }
        if self.job.is_some() {
            return Err(WorkerExecuteError::Busy { worker: self.id });
        }

        let unique_token = Uuid::new_v4();
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .env(TEST_TOKEN_ENV, self.id.slot().to_string())
            .env(UNIQUE_TEST_TOKEN_ENV, unique_token.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|error| WorkerExecuteError::Spawn {
            worker: self.id,
            program: command.program().to_owned(),
            error,
        })?;
        debug!(
            "[{}] spawned {} (pid {:?}, token {unique_token})",
            self.id,
            command.program(),
            child.id(),
        );

        let acc = ChildAccumulator::new(child.stdout.take(), child.stderr.take());
        self.job = Some(RunningJob {
            child,
            acc: DebugIgnore(acc),
            stopwatch: stopwatch(),
        });
        Ok(())
    }

    /// Returns true if no batch is in flight.
    pub fn is_free(&self) -> bool {
        self.job.is_none()
    }

    /// Returns true unless the worker was stopped.
    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    /// Always false: a crash only affects the batch that was running, and the next batch gets a
    /// fresh process.
    pub fn is_crashed(&self) -> bool {
        false
    }

    /// Waits for the batch process to exit, then collects its remaining output.
    ///
    /// Cancel-safe: if the returned future is dropped, the job stays in flight.
    pub async fn wait_for_finished_job(&mut self) -> Option<JobOutcome> {
        let job = self.job.as_mut()?;

        let res = loop {
            tokio::select! {
                () = job.acc.fill_buf(), if !job.acc.is_done() => {}
                res = job.child.wait() => break res,
            }
        };

        // The process has exited. Give it a short time to close its output.
        let leak_sleep = tokio::time::sleep(LEAK_TIMEOUT);
        tokio::pin!(leak_sleep);
        loop {
            tokio::select! {
                () = job.acc.fill_buf(), if !job.acc.is_done() => {}
                () = &mut leak_sleep, if !job.acc.is_done() => {
                    debug!("[{}] batch output still open after exit", self.id);
                    break;
                }
                else => break,
            }
        }

        let job = self.job.take()?;
        let duration = job.stopwatch.snapshot().duration;
        let status = match res {
            Ok(status) => match (status.code(), CrashReason::from_exit_status(status)) {
                (_, reason @ CrashReason::Signal(_)) => JobStatus::Crashed(reason),
                (Some(code), _) => JobStatus::Exited { code },
                (None, reason) => JobStatus::Crashed(reason),
            },
            Err(error) => JobStatus::Crashed(CrashReason::WaitFailed(error.to_string())),
        };
        for error in &job.acc.errors {
            debug!("[{}] error reading batch output: {error}", self.id);
        }
        debug!("[{}] batch finished in {duration:?}: {status:?}", self.id);

        Some(JobOutcome {
            status,
            output_tail: job.acc.tail(),
            duration,
        })
    }

    /// Kills the batch in flight, if any. No new batches are accepted.
    pub fn stop(&mut self) {
        self.stopped = true;
        if let Some(job) = &mut self.job {
            if let Err(error) = job.child.start_kill() {
                debug!("[{}] error killing batch process: {error}", self.id);
            }
        }
    }

    /// Waits for a killed batch process to exit.
    pub async fn wait_for_stop(mut self) {
        if let Some(mut job) = self.job.take() {
            if let Err(error) = job.child.wait().await {
                debug!("[{}] error waiting for batch process: {error}", self.id);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> BatchCommand {
        BatchCommand::new(vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()])
            .expect("argv is not empty")
    }

    #[tokio::test]
    async fn exit_code_and_output() {
        let mut worker = OneShotWorker::new(WorkerId::new(2, 0));
        assert_eq!(worker.wait_for_finished_job().await.map(|o| o.status), None);

        worker
            .execute(&sh("echo \"token $TEST_TOKEN\"; echo oops >&2; exit 3"))
            .expect("spawned");
        assert!(!worker.is_free());
        let error = worker.execute(&sh("true")).expect_err("worker is busy");
        assert!(matches!(error, WorkerExecuteError::Busy { .. }), "{error:?}");

        let outcome = worker.wait_for_finished_job().await.expect("job was running");
        assert_eq!(outcome.status, JobStatus::Exited { code: 3 });
        assert_eq!(outcome.output_tail, ["token 2", "oops"]);
        assert!(worker.is_free());
    }

    #[tokio::test]
    async fn signal_is_a_crash() {
        let mut worker = OneShotWorker::new(WorkerId::new(1, 0));
        worker.execute(&sh("kill -9 $$")).expect("spawned");
        let outcome = worker.wait_for_finished_job().await.expect("job was running");
        assert_eq!(outcome.status, JobStatus::Crashed(CrashReason::Signal(9)));
        assert!(!worker.is_crashed());
    }

    #[tokio::test]
    async fn spawn_failure() {
        let mut worker = OneShotWorker::new(WorkerId::new(1, 0));
        let command = BatchCommand::new(vec!["/nonexistent/partest-test-binary".to_owned()])
            .expect("argv is not empty");
        let error = worker.execute(&command).expect_err("binary doesn't exist");
        assert!(matches!(error, WorkerExecuteError::Spawn { .. }), "{error:?}");
        assert!(worker.is_free());
    }

    #[tokio::test]
    async fn stop_kills_running_batch() {
        let mut worker = OneShotWorker::new(WorkerId::new(1, 0));
        worker.execute(&sh("sleep 30")).expect("spawned");
        worker.stop();
        assert!(!worker.is_running());
        let error = worker.execute(&sh("true")).expect_err("worker is stopped");
        assert!(matches!(error, WorkerExecuteError::NotRunning { .. }), "{error:?}");

        let outcome = worker.wait_for_finished_job().await.expect("job was running");
        assert!(outcome.status.is_crashed());
        worker.wait_for_stop().await;
    }
}
