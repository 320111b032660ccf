// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    CrashReason, JobOutcome, JobStatus, TEST_TOKEN_ENV, UNIQUE_TEST_TOKEN_ENV, WorkerId,
    output::OutputTail,
};
use crate::{
    errors::{WorkerExecuteError, WorkerStartError},
    test_command::{BatchCommand, WrapperTemplate},
    time::{StopwatchStart, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    io,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, Command},
};
use tracing::{debug, warn};
use uuid::Uuid;

/// The line that asks a wrapper process to exit.
pub const WRAPPER_EXIT_COMMAND: &str = "EXIT";

/// The status byte recorded for a batch that was killed by a signal, couldn't be spawned, or
/// was not a valid command.
pub const WRAPPER_STATUS_ABNORMAL: u8 = 255;

/// The first delay between two checks of the status file.
const POLL_INITIAL: Duration = Duration::from_millis(5);

/// The maximum delay between two checks of the status file.
const POLL_MAX: Duration = Duration::from_millis(100);

/// How long a wrapper gets to exit after being asked to, before it is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A worker backed by a persistent wrapper process.
#[derive(Debug)]
pub struct WrapperWorker {
    id: WorkerId,
    child: Child,
    stdin: Option<ChildStdin>,
    status_file: Utf8PathBuf,
    // The number of status bytes consumed so far.
    observed: u64,
    job: Option<StopwatchStart>,
    stopping: bool,
    exit_status: Option<io::Result<ExitStatus>>,
    tail: OutputTail,
}

enum Poll {
    Exited(io::Result<ExitStatus>),
    Sleep,
}

impl WrapperWorker {
    /// Creates the status file and spawns the wrapper process.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(
        id: WorkerId,
        template: &WrapperTemplate,
        status_file: Utf8PathBuf,
    ) -> Result<Self, WorkerStartError> {
        std::fs::File::create(&status_file).map_err(|error| {
            WorkerStartError::CreateStatusFile {
                worker: id,
                path: status_file.clone(),
                error,
            }
        })?;
        let program = template
            .resolve_program()
            .map_err(|error| WorkerStartError::CurrentExe { worker: id, error })?;

        let unique_token = Uuid::new_v4();
        let mut cmd = Command::new(&program);
        cmd.args(template.render_args(&status_file))
            .env(TEST_TOKEN_ENV, id.slot().to_string())
            .env(UNIQUE_TEST_TOKEN_ENV, unique_token.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|error| WorkerStartError::Spawn {
            worker: id,
            program: program.clone(),
            error,
        })?;
        debug!(
            "[{id}] started wrapper {program} (pid {:?}, status file {status_file})",
            child.id()
        );

        let tail = OutputTail::default();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(tail.clone().drain(stdout, id, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(tail.clone().drain(stderr, id, "stderr"));
        }

        Ok(Self {
            id,
            stdin: child.stdin.take(),
            child,
            status_file,
            observed: 0,
            job: None,
            stopping: false,
            exit_status: None,
            tail,
        })
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns the path of the status file.
    pub fn status_file(&self) -> &Utf8Path {
        &self.status_file
    }

    /// Sends `command` to the wrapper.
    pub async fn execute(&mut self, command: &BatchCommand) -> Result<(), WorkerExecuteError> {
        if self.job.is_some() {
            return Err(WorkerExecuteError::Busy { worker: self.id });
        }
        if !self.is_running() {
            return Err(WorkerExecuteError::NotRunning { worker: self.id });
        }
        let Some(stdin) = &mut self.stdin else {
            return Err(WorkerExecuteError::NotRunning { worker: self.id });
        };

        self.tail.clear();
        let line = command.to_wrapper_line();
        let res = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        res.map_err(|error| WorkerExecuteError::WriteStdin {
            worker: self.id,
            error,
        })?;

        debug!("[{}] sent batch: {}", self.id, line.trim_end());
        self.job = Some(stopwatch());
        Ok(())
    }

    /// Returns true if no batch is in flight.
    pub fn is_free(&self) -> bool {
        self.job.is_none()
    }

    /// Returns true if the wrapper process is alive and was not asked to stop.
    pub fn is_running(&mut self) -> bool {
        !self.stopping && !self.has_exited()
    }

    /// Returns true if the wrapper process exited without being asked to.
    pub fn is_crashed(&mut self) -> bool {
        !self.stopping && self.has_exited()
    }

    fn has_exited(&mut self) -> bool {
        if self.exit_status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(Ok(status));
                true
            }
            Ok(None) => false,
            Err(error) => {
                self.exit_status = Some(Err(error));
                true
            }
        }
    }

    /// Waits until the status file records the batch in flight, or the wrapper exits.
    ///
    /// The status file is checked with an increasing delay. Cancel-safe.
    pub async fn wait_for_finished_job(&mut self) -> Option<JobOutcome> {
        let started = self.job.clone()?;
        let mut delay = POLL_INITIAL;
        let status = loop {
            match self.read_status().await {
                Ok(Some(byte)) => break JobStatus::Exited { code: byte.into() },
                Ok(None) => {}
                Err(error) => break JobStatus::Crashed(CrashReason::WaitFailed(error.to_string())),
            }

            let poll = if self.exit_status.is_some() {
                None
            } else {
                Some(tokio::select! {
                    res = self.child.wait() => Poll::Exited(res),
                    () = tokio::time::sleep(delay) => Poll::Sleep,
                })
            };
            match poll {
                Some(Poll::Sleep) => {
                    delay = (delay * 2).min(POLL_MAX);
                }
                Some(Poll::Exited(res)) => {
                    self.exit_status = Some(res);
                    // The wrapper may have recorded the status just before exiting.
                    continue;
                }
                None => break JobStatus::Crashed(self.crash_reason()),
            }
        };

        self.job = None;
        let duration = started.snapshot().duration;
        if status.is_crashed() {
            warn!("[{}] wrapper crashed: {status:?}", self.id);
        } else {
            debug!("[{}] batch finished in {duration:?}: {status:?}", self.id);
        }
        Some(JobOutcome {
            status,
            output_tail: self.tail.snapshot(),
            duration,
        })
    }

    async fn read_status(&mut self) -> io::Result<Option<u8>> {
        let len = tokio::fs::metadata(&self.status_file).await?.len();
        if len <= self.observed {
            return Ok(None);
        }
        let contents = tokio::fs::read(&self.status_file).await?;
        // The offset is in bounds: the file only grows.
        let byte = usize::try_from(self.observed)
            .ok()
            .and_then(|index| contents.get(index).copied());
        if byte.is_some() {
            self.observed += 1;
        }
        Ok(byte)
    }

    fn crash_reason(&self) -> CrashReason {
        match &self.exit_status {
            Some(Ok(status)) => CrashReason::from_exit_status(*status),
            Some(Err(error)) => CrashReason::WaitFailed(error.to_string()),
            None => CrashReason::UnexpectedExit { code: None },
        }
    }

    /// Asks the wrapper to exit, and closes its standard input.
    pub async fn stop(&mut self) {
        self.stopping = true;
        if let Some(mut stdin) = self.stdin.take() {
            let line = format!("{WRAPPER_EXIT_COMMAND}\n");
            if let Err(error) = stdin.write_all(line.as_bytes()).await {
                // The wrapper is likely gone already.
                debug!("[{}] error sending exit command: {error}", self.id);
            }
        }
    }

    /// Waits for the wrapper to exit, killing it after a timeout, then deletes the status file.
    pub async fn wait_for_stop(mut self) {
        if self.exit_status.is_none() {
            match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
                Ok(res) => self.exit_status = Some(res),
                Err(_) => {
                    warn!(
                        "[{}] wrapper didn't exit within {STOP_TIMEOUT:?}, killing it",
                        self.id
                    );
                    if let Err(error) = self.child.start_kill() {
                        debug!("[{}] error killing wrapper: {error}", self.id);
                    }
                    self.exit_status = Some(self.child.wait().await);
                }
            }
        }
        debug!("[{}] wrapper stopped: {:?}", self.id, self.exit_status);

        match std::fs::remove_file(&self.status_file) {
            Ok(()) => debug!("[{}] removed {}", self.id, self.status_file),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!("[{}] failed to remove {}: {error}", self.id, self.status_file),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    /// A wrapper that runs each line as `sh -c <second array element>`, following the protocol.
    const SH_WRAPPER: &str = indoc! {r#"
        status="$1"
        while IFS= read -r line; do
            if [ "$line" = "EXIT" ]; then exit 0; fi
            script=$(printf '%s' "$line" | sed -e 's/^\["sh","-c","//' -e 's/"\]$//')
            sh -c "$script"
            code=$?
            printf "$(printf '\\%03o' "$code")" >> "$status"
        done
    "#};

    fn start(dir: &Utf8TempDir, slot: usize) -> WrapperWorker {
        let script = dir.path().join("wrapper.sh");
        std::fs::write(&script, SH_WRAPPER).expect("wrote wrapper script");
        let template = WrapperTemplate::new("sh", vec![script.to_string(), "{status}".to_owned()])
            .expect("template is valid");
        let status_file = dir.path().join(format!("worker-{slot}.status"));
        WrapperWorker::start(WorkerId::new(slot, 0), &template, status_file)
            .expect("wrapper started")
    }

    fn sh(script: &str) -> BatchCommand {
        BatchCommand::new(vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()])
            .expect("argv is not empty")
    }

    #[tokio::test]
    async fn runs_batches_and_stops() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut worker = start(&dir, 1);
        let status_file = worker.status_file().to_owned();

        worker.execute(&sh("exit 0")).await.expect("sent batch");
        let error = worker.execute(&sh("exit 0")).await.expect_err("worker is busy");
        assert!(matches!(error, WorkerExecuteError::Busy { .. }), "{error:?}");
        let outcome = worker.wait_for_finished_job().await.expect("job in flight");
        assert_eq!(outcome.status, JobStatus::Exited { code: 0 });

        worker.execute(&sh("echo failing; exit 1")).await.expect("sent batch");
        let outcome = worker.wait_for_finished_job().await.expect("job in flight");
        assert_eq!(outcome.status, JobStatus::Exited { code: 1 });
        assert!(worker.is_running());
        assert!(!worker.is_crashed());
        assert!(worker.wait_for_finished_job().await.is_none());

        worker.stop().await;
        assert!(!worker.is_crashed());
        worker.wait_for_stop().await;
        assert!(!status_file.exists());
    }

    #[tokio::test]
    async fn wrapper_death_is_a_crash() {
        let dir = Utf8TempDir::new().expect("created temp dir");
        let mut worker = start(&dir, 2);

        // Killing the parent shell takes the wrapper down without a status byte.
        worker.execute(&sh("kill -9 $PPID")).await.expect("sent batch");
        let outcome = worker.wait_for_finished_job().await.expect("job in flight");
        assert_eq!(outcome.status, JobStatus::Crashed(CrashReason::Signal(9)));
        assert!(worker.is_crashed());
        assert!(!worker.is_running());

        let error = worker.execute(&sh("exit 0")).await.expect_err("wrapper is dead");
        assert!(matches!(error, WorkerExecuteError::NotRunning { .. }), "{error:?}");
        worker.stop().await;
        worker.wait_for_stop().await;
    }
}
