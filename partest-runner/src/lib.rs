// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for partest: running the tests of an external framework in parallel
//! processes, and aggregating their JUnit results.
//!
//! The basic flow is:
//!
//! 1. Load a [`TestInventory`](list::TestInventory) and narrow it down with a
//!    [`TestFilter`](test_filter::TestFilter).
//! 2. [`partition`](list::partition) the selected tests into batches.
//! 3. Build a [`TestRunner`](runner::TestRunner) and execute it. Each batch is run by a
//!    [`Worker`](worker::Worker), and its result file is folded into the aggregate as soon as the
//!    batch finishes.

pub mod config;
pub mod coverage;
pub mod errors;
pub mod exit_code;
pub mod list;
pub mod reporter;
pub mod runner;
pub mod test_command;
pub mod test_filter;
mod time;
pub mod worker;
pub mod wrapper_server;
