// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Combining result trees from independent processes.

use crate::{Reader, TestSuite};
use indexmap::IndexMap;

impl TestSuite {
    /// Merges two suites into one.
    ///
    /// * Suites with the same name are combined directly: counters and time are summed, nested
    ///   suites are unioned by name (merging recursively on collision) and case lists are
    ///   concatenated.
    /// * Otherwise, if either side is an anonymous root (empty name), the other side is added to
    ///   it as a keyed child.
    /// * Otherwise a new anonymous root is created with both suites as children.
    ///
    /// The result does not depend on argument order, up to the order of nested suites and cases.
    /// See [`TestSuite::equivalent`].
    pub fn merge(self, other: TestSuite) -> TestSuite {
        if self.name == other.name {
            return self.combine(other);
        }

        match (self.name.is_empty(), other.name.is_empty()) {
            (true, _) => self.absorb(other),
            (_, true) => other.absorb(self),
            (false, false) => TestSuite::default().absorb(self).absorb(other),
        }
    }

    fn combine(mut self, other: TestSuite) -> TestSuite {
        self.file = match (self.file.is_empty(), other.file.is_empty()) {
            (true, _) => other.file,
            (_, true) => self.file,
            // Pick deterministically so merge order doesn't matter.
            (false, false) => std::cmp::min(self.file, other.file),
        };
        self.totals.add(&other.totals);
        self.time += other.time;
        for (_, child) in other.suites {
            self.insert_child(child);
        }
        self.cases.extend(other.cases);
        self
    }

    // Adds `child` as a keyed child of `self`, updating counters.
    fn absorb(mut self, child: TestSuite) -> TestSuite {
        self.totals.add(&child.totals);
        self.time += child.time;
        self.insert_child(child);
        self
    }

    // Inserts a child without touching counters: the caller has already accounted for them.
    fn insert_child(&mut self, child: TestSuite) {
        insert_or_merge(&mut self.suites, child);
    }
}

/// Inserts `child` into `suites`, combining it with an existing suite of the same name.
pub(crate) fn insert_or_merge(suites: &mut IndexMap<String, TestSuite>, child: TestSuite) {
    match suites.get_mut(&child.name) {
        Some(existing) => {
            let taken = std::mem::take(existing);
            *existing = taken.combine(child);
        }
        None => {
            suites.insert(child.name.clone(), child);
        }
    }
}

/// Merges every suite into one, returning `None` if there are no suites.
pub fn merge_all(suites: impl IntoIterator<Item = TestSuite>) -> Option<TestSuite> {
    suites.into_iter().reduce(TestSuite::merge)
}

/// Accumulates results as they arrive.
///
/// Results may be folded in any order. The accumulated suite is only handed out by
/// [`finish`](Self::finish), so observers never see a partially merged tree.
#[derive(Clone, Debug, Default)]
pub struct ResultMerger {
    acc: Option<TestSuite>,
    folded: usize,
}

impl ResultMerger {
    /// Creates a new, empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a suite into the accumulator.
    pub fn fold(&mut self, suite: TestSuite) {
        self.acc = Some(match self.acc.take() {
            Some(acc) => acc.merge(suite),
            None => suite,
        });
        self.folded += 1;
    }

    /// Folds the suite read by `reader` into the accumulator.
    pub fn fold_reader(&mut self, reader: Reader) {
        self.fold(reader.into_suite());
    }

    /// Returns the number of suites folded so far.
    pub fn folded(&self) -> usize {
        self.folded
    }

    /// Returns true if nothing has been folded.
    pub fn is_empty(&self) -> bool {
        self.folded == 0
    }

    /// Returns the merged suite, or `None` if nothing was folded.
    pub fn finish(self) -> Option<TestSuite> {
        self.acc
    }
}
