// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for partest.
//!
//! See the default config (`default-config.toml`) for the list of keys.

mod core;
mod test_threads;

pub use self::core::*;
pub use test_threads::*;
