// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced during a test run.
//!
//! Rendering events is left to the caller: see the `partest` binary for a reporter.

pub mod events;
