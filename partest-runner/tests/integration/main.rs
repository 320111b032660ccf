// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the scheduler, driving a shell script that stands in for a test
//! framework.

#[cfg(unix)]
mod basic;
#[cfg(unix)]
mod fixtures;
