// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the tests of an external test framework in parallel processes, and merges their JUnit
//! results into a single report.
//!
//! This crate is the command-line front end. The machinery lives in `partest-runner` and
//! `partest-junit`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, StderrStyles};
