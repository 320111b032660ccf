// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `partest` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum PartestExitCode {}

impl PartestExitCode {
    /// No errors occurred and every test passed. Also returned if no batches were selected.
    pub const OK: i32 = 0;

    /// One or more tests failed or errored, or the run was cancelled before every batch ran.
    pub const TEST_RUN_FAILED: i32 = 1;

    /// One or more batches crashed without producing a usable result.
    pub const BATCH_CRASHED: i32 = 2;

    /// A user issue happened while setting up a partest invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout, stderr or an output file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
