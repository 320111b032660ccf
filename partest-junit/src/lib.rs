// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Read, merge and write JUnit-style XML result trees.
//!
//! Test frameworks that run in separate processes each write their own result file. This crate
//! reads those files into [`TestSuite`] trees, merges them into a single tree with correct
//! totals, and writes the merged tree back out.
//!
//! # Examples
//!
//! ```
//! use partest_junit::{Metric, Reader, ResultMerger};
//!
//! let a = Reader::from_xml(
//!     "a.xml",
//!     r#"<testsuite name="ATest" tests="1" failures="1"><testcase name="t" class="ATest"><failure>x</failure></testcase></testsuite>"#,
//! ).unwrap();
//! let b = Reader::from_xml(
//!     "b.xml",
//!     r#"<testsuite name="BTest" tests="1"><testcase name="t" class="BTest"/></testsuite>"#,
//! ).unwrap();
//!
//! let mut merger = ResultMerger::new();
//! merger.fold_reader(a);
//! merger.fold_reader(b);
//! let merged = merger.finish().unwrap();
//! assert_eq!(merged.total(Metric::Tests), 2);
//! assert!(!merged.is_successful());
//! ```

mod errors;
mod merge;
mod reader;
mod report;
mod serialize;

pub use errors::*;
pub use merge::{ResultMerger, merge_all};
pub use reader::Reader;
pub use report::*;
pub use serialize::{report_to_string, write_report};
