// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing the output of worker processes.
//!
//! Only the last few lines are kept: they are attached to crash reports.

use super::WorkerId;
use bytes::{Buf, BytesMut};
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{ChildStderr, ChildStdout},
};
use tracing::trace;

/// The number of trailing output lines attached to a crash report.
pub(crate) const OUTPUT_TAIL_LINES: usize = 10;

/// The size of each buffered reader's buffer.
const CHUNK_SIZE: usize = 4 * 1024;

/// The most output kept per stream, for tails made of very long lines.
const MAX_TAIL_BYTES: usize = 16 * CHUNK_SIZE;

/// A `BufReader` over an `AsyncRead` that tracks whether it has reached EOF.
pub(crate) struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    /// Appends available data to `acc`. Cancel-safe.
    pub(crate) async fn fill_buf(&mut self, acc: &mut BytesMut) -> io::Result<()> {
        if self.done {
            return Ok(());
        }

        match self.reader.fill_buf().await {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                if buf.is_empty() {
                    self.done = true;
                }
                let len = buf.len();
                self.reader.consume(len);
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}

async fn fill_buf_opt<R: AsyncRead + Unpin>(
    reader: &mut Option<FusedBufReader<R>>,
    acc: &mut BytesMut,
) -> io::Result<()> {
    match reader {
        Some(reader) => reader.fill_buf(acc).await,
        None => Ok(()),
    }
}

fn is_done_opt<R: AsyncRead + Unpin>(reader: &Option<FusedBufReader<R>>) -> bool {
    reader.as_ref().is_none_or(|r| r.is_done())
}

/// Output accumulator for a one-shot batch process.
pub(crate) struct ChildAccumulator {
    stdout: Option<FusedBufReader<ChildStdout>>,
    stderr: Option<FusedBufReader<ChildStderr>>,
    stdout_buf: BytesMut,
    stderr_buf: BytesMut,
    pub(crate) errors: Vec<io::Error>,
}

impl ChildAccumulator {
    pub(crate) fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Self {
        Self {
            stdout: stdout.map(FusedBufReader::new),
            stderr: stderr.map(FusedBufReader::new),
            stdout_buf: BytesMut::with_capacity(CHUNK_SIZE),
            stderr_buf: BytesMut::with_capacity(CHUNK_SIZE),
            errors: Vec::new(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        is_done_opt(&self.stdout) && is_done_opt(&self.stderr)
    }

    /// Waits until either stream makes progress. Cancel-safe.
    pub(crate) async fn fill_buf(&mut self) {
        let res = tokio::select! {
            res = fill_buf_opt(&mut self.stdout, &mut self.stdout_buf), if !is_done_opt(&self.stdout) => res,
            res = fill_buf_opt(&mut self.stderr, &mut self.stderr_buf), if !is_done_opt(&self.stderr) => res,
            else => Ok(()),
        };
        if let Err(error) = res {
            self.errors.push(error);
        }
        trim_to_tail(&mut self.stdout_buf, OUTPUT_TAIL_LINES);
        trim_to_tail(&mut self.stderr_buf, OUTPUT_TAIL_LINES);
    }

    /// Returns the last lines of output, standard output first.
    pub(crate) fn tail(&self) -> Vec<String> {
        let stdout = String::from_utf8_lossy(&self.stdout_buf);
        let stderr = String::from_utf8_lossy(&self.stderr_buf);
        last_lines(stdout.lines().chain(stderr.lines()), OUTPUT_TAIL_LINES)
    }
}

/// Drops everything before the last `count` non-blank lines of `buf`, keeping at most
/// [`MAX_TAIL_BYTES`].
fn trim_to_tail(buf: &mut BytesMut, count: usize) {
    let mut cut = 0;
    let mut seen = 0;
    let mut end = buf.len();
    while end > 0 {
        let start = buf[..end]
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        if !buf[start..end].trim_ascii().is_empty() {
            seen += 1;
            if seen == count {
                cut = start;
                break;
            }
        }
        end = start.saturating_sub(1);
    }

    let cut = cut.max(buf.len().saturating_sub(MAX_TAIL_BYTES));
    if cut > 0 {
        buf.advance(cut);
    }
}

fn last_lines<'a>(lines: impl Iterator<Item = &'a str>, count: usize) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(count);
    for line in lines.map(str::trim_end).filter(|line| !line.is_empty()) {
        if tail.len() == count {
            tail.pop_front();
        }
        tail.push_back(line.to_owned());
    }
    tail.into()
}

/// The trailing lines of a long-lived process's output, shared with the tasks draining it.
#[derive(Clone, Debug, Default)]
pub(crate) struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == OUTPUT_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub(crate) fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Reads `reader` line by line until EOF, logging each line and keeping the last ones.
    pub(crate) async fn drain<R: AsyncRead + Unpin>(
        self,
        reader: R,
        worker: WorkerId,
        stream: &'static str,
    ) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    trace!(target: "partest_runner::worker::output", "[{worker}] {stream}: {line}");
                    if !line.trim().is_empty() {
                        self.push(line);
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    trace!("[{worker}] error reading {stream}: {error}");
                    break;
                }
            }
        }
    }
}
