// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for building and querying lists of tests, and splitting them into batches.
//!
//! The inventory of tests is produced by the test framework's discovery step, and is
//! represented by [`TestInventory`]. After filtering, [`partition`] turns it into an ordered
//! list of [`Batch`]es.

mod batch;
mod inventory;

pub use batch::*;
pub use inventory::*;
