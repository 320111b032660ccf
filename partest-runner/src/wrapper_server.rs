// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The wrapper side of the persistent worker protocol.
//!
//! A wrapper process reads one command per line from standard input. Each command is a JSON
//! array of strings: the program followed by its arguments. The wrapper runs the command with
//! inherited standard streams, then appends a single byte to the status file: the exit code
//! truncated to a byte, or [`WRAPPER_STATUS_ABNORMAL`] if the command was killed by a signal,
//! couldn't be started, or was not valid. The line `EXIT`, or end of input, makes the wrapper
//! exit.
//!
//! The supervisor learns that a batch finished by watching the status file grow, which leaves
//! standard output and standard error free for the test framework's own use.

use crate::{
    errors::WrapperServeError,
    worker::{WRAPPER_EXIT_COMMAND, WRAPPER_STATUS_ABNORMAL},
};
use camino::Utf8Path;
use std::{
    fs::OpenOptions,
    io::{BufRead, Write},
    process::Command,
};
use tracing::{debug, warn};

/// Serves wrapper commands from `input` until `EXIT` or end of input.
pub fn serve(input: impl BufRead, status_path: &Utf8Path) -> Result<(), WrapperServeError> {
    let mut status_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(status_path)
        .map_err(|error| WrapperServeError::OpenStatusFile {
            path: status_path.to_owned(),
            error,
        })?;

    for line in input.lines() {
        let line = line.map_err(WrapperServeError::ReadInput)?;
        let line = line.trim();
        if line == WRAPPER_EXIT_COMMAND {
            debug!("received exit command");
            return Ok(());
        }

        let status = run_line(line);
        status_file
            .write_all(&[status])
            .and_then(|()| status_file.flush())
            .map_err(|error| WrapperServeError::WriteStatus {
                path: status_path.to_owned(),
                error,
            })?;
    }

    debug!("input closed");
    Ok(())
}

fn run_line(line: &str) -> u8 {
    let argv: Vec<String> = match serde_json::from_str(line) {
        Ok(argv) => argv,
        Err(error) => {
            warn!("ignoring malformed command `{line}`: {error}");
            return WRAPPER_STATUS_ABNORMAL;
        }
    };
    let Some((program, args)) = argv.split_first() else {
        warn!("ignoring empty command");
        return WRAPPER_STATUS_ABNORMAL;
    };

    debug!("running {program} with {} arguments", args.len());
    match Command::new(program).args(args).status() {
        // Truncation to a byte is part of the protocol.
        Ok(status) => match status.code() {
            Some(code) => code as u8,
            None => WRAPPER_STATUS_ABNORMAL,
        },
        Err(error) => {
            warn!("failed to run {program}: {error}");
            WRAPPER_STATUS_ABNORMAL
        }
    }
}
