// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workers: the processes that run batches.
//!
//! A worker runs at most one batch at a time. There are two kinds:
//!
//! * [`OneShotWorker`] spawns a fresh process for every batch, and observes completion through
//!   process exit.
//! * [`WrapperWorker`] keeps a long-lived wrapper process per slot. Batches are sent as lines on
//!   the wrapper's standard input, and completion is observed through a status file that grows
//!   by one byte per finished batch. See [`wrapper_server`](crate::wrapper_server) for the other
//!   side of the protocol.

mod one_shot;
pub(crate) mod output;
mod wrapper;

pub use one_shot::*;
pub use wrapper::*;

use crate::{
    config::WorkerMode,
    errors::{WorkerExecuteError, WorkerStartError},
    test_command::{BatchCommand, WrapperTemplate},
};
use camino::Utf8PathBuf;
use std::{fmt, process::ExitStatus, time::Duration};

/// The environment variable holding the worker slot, starting from 1.
pub const TEST_TOKEN_ENV: &str = "TEST_TOKEN";

/// The environment variable holding a unique token for the process.
pub const UNIQUE_TEST_TOKEN_ENV: &str = "UNIQUE_TEST_TOKEN";

/// Identifies a worker.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct WorkerId {
    slot: usize,
    generation: usize,
}

impl WorkerId {
    /// Creates a new worker ID. `slot` starts from 1, and `generation` counts restarts of the
    /// slot.
    pub fn new(slot: usize, generation: usize) -> Self {
        Self { slot, generation }
    }

    /// Returns the worker slot, starting from 1.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns how many times this slot was restarted.
    pub fn generation(&self) -> usize {
        self.generation
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "worker {}", self.slot)
        } else {
            write!(f, "worker {}.{}", self.slot, self.generation)
        }
    }
}

/// How a job ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// The job ran to completion and reported an exit code.
    ///
    /// A non-zero code is expected when the result file records failures or errors. Otherwise
    /// the batch is treated as crashed.
    Exited {
        /// The exit code.
        code: i32,
    },

    /// The process running the job died.
    Crashed(CrashReason),
}

impl JobStatus {
    /// Returns true if the job crashed.
    pub fn is_crashed(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }
}

/// Why a process died.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CrashReason {
    /// The process was killed by a signal.
    Signal(i32),

    /// A wrapper process exited while a job was in flight.
    UnexpectedExit {
        /// The exit code, if any.
        code: Option<i32>,
    },

    /// Waiting for the process failed.
    WaitFailed(String),
}

impl CrashReason {
    pub(crate) fn from_exit_status(status: ExitStatus) -> Self {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return Self::Signal(signal);
                }
            }
        }
        Self::UnexpectedExit {
            code: status.code(),
        }
    }
}

impl fmt::Display for CrashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "killed by signal {signal}"),
            Self::UnexpectedExit { code: Some(code) } => {
                write!(f, "exited unexpectedly with code {code}")
            }
            Self::UnexpectedExit { code: None } => write!(f, "exited unexpectedly"),
            Self::WaitFailed(error) => write!(f, "error waiting for process: {error}"),
        }
    }
}

/// The outcome of a job observed by a worker.
#[derive(Clone, Debug)]
pub struct JobOutcome {
    /// How the job ended.
    pub status: JobStatus,

    /// The last lines of output of the process.
    pub output_tail: Vec<String>,

    /// How long the job took.
    pub duration: Duration,
}

/// A worker of either kind.
#[derive(Debug)]
pub enum Worker {
    /// A worker that spawns one process per batch.
    OneShot(OneShotWorker),

    /// A worker backed by a persistent wrapper process.
    Wrapper(WrapperWorker),
}

impl Worker {
    /// Returns the worker's ID.
    pub fn id(&self) -> WorkerId {
        match self {
            Self::OneShot(worker) => worker.id(),
            Self::Wrapper(worker) => worker.id(),
        }
    }

    /// Starts running a batch. The worker must be free.
    pub async fn execute(&mut self, command: &BatchCommand) -> Result<(), WorkerExecuteError> {
        match self {
            Self::OneShot(worker) => worker.execute(command),
            Self::Wrapper(worker) => worker.execute(command).await,
        }
    }

    /// Returns true if the worker has no batch in flight.
    pub fn is_free(&self) -> bool {
        match self {
            Self::OneShot(worker) => worker.is_free(),
            Self::Wrapper(worker) => worker.is_free(),
        }
    }

    /// Returns true if the worker can accept batches.
    pub fn is_running(&mut self) -> bool {
        match self {
            Self::OneShot(worker) => worker.is_running(),
            Self::Wrapper(worker) => worker.is_running(),
        }
    }

    /// Returns true if the worker's process died without being asked to stop.
    ///
    /// A crashed worker must be replaced before it is used again.
    pub fn is_crashed(&mut self) -> bool {
        match self {
            Self::OneShot(worker) => worker.is_crashed(),
            Self::Wrapper(worker) => worker.is_crashed(),
        }
    }

    /// Waits until the batch in flight finishes or the worker crashes.
    ///
    /// Returns `None` if no batch is in flight. Cancel-safe.
    pub async fn wait_for_finished_job(&mut self) -> Option<JobOutcome> {
        match self {
            Self::OneShot(worker) => worker.wait_for_finished_job().await,
            Self::Wrapper(worker) => worker.wait_for_finished_job().await,
        }
    }

    /// Asks the worker to shut down.
    pub async fn stop(&mut self) {
        match self {
            Self::OneShot(worker) => worker.stop(),
            Self::Wrapper(worker) => worker.stop().await,
        }
    }

    /// Waits for the worker to shut down, and releases its resources.
    pub async fn wait_for_stop(self) {
        match self {
            Self::OneShot(worker) => worker.wait_for_stop().await,
            Self::Wrapper(worker) => worker.wait_for_stop().await,
        }
    }
}

/// Creates workers for a run, and replaces crashed ones.
#[derive(Debug)]
pub(crate) struct WorkerFactory {
    // Some in wrapper mode.
    wrapper: Option<WrapperTemplate>,
    run_dir: Utf8PathBuf,
    next_generation: Vec<usize>,
}

impl WorkerFactory {
    pub(crate) fn new(
        wrapper: Option<WrapperTemplate>,
        run_dir: Utf8PathBuf,
        worker_count: usize,
    ) -> Self {
        Self {
            wrapper,
            run_dir,
            next_generation: vec![0; worker_count],
        }
    }

    pub(crate) fn mode(&self) -> WorkerMode {
        match self.wrapper {
            Some(_) => WorkerMode::Wrapper,
            None => WorkerMode::OneShot,
        }
    }

    /// Starts a worker for `slot`, starting from 1.
    pub(crate) fn start(&mut self, slot: usize) -> Result<Worker, WorkerStartError> {
        let generation = match self.next_generation.get_mut(slot.saturating_sub(1)) {
            Some(next) => {
                let generation = *next;
                *next += 1;
                generation
            }
            None => 0,
        };
        let id = WorkerId::new(slot, generation);

        match &self.wrapper {
            Some(template) => {
                let status_file = self
                    .run_dir
                    .join(format!("worker-{slot}-{generation}.status"));
                WrapperWorker::start(id, template, status_file).map(Worker::Wrapper)
            }
            None => Ok(Worker::OneShot(OneShotWorker::new(id))),
        }
    }
}
