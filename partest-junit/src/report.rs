// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::map::IndexMap;
use std::fmt;

/// A numeric category tracked for every [`TestSuite`].
///
/// Time is tracked separately since it is a float.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Metric {
    /// The number of tests.
    Tests,
    /// The number of assertions.
    Assertions,
    /// The number of failed tests.
    Failures,
    /// The number of errored tests, not counting risky tests.
    Errors,
    /// The number of tests that produced warnings.
    Warnings,
    /// The number of risky tests.
    Risky,
    /// The number of skipped tests.
    Skipped,
}

impl Metric {
    /// All metrics, in display order.
    pub const ALL: [Metric; 7] = [
        Metric::Tests,
        Metric::Assertions,
        Metric::Failures,
        Metric::Errors,
        Metric::Warnings,
        Metric::Risky,
        Metric::Skipped,
    ];

    /// Returns the lowercase name of this metric, as used by the XML attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Tests => "tests",
            Metric::Assertions => "assertions",
            Metric::Failures => "failures",
            Metric::Errors => "errors",
            Metric::Warnings => "warnings",
            Metric::Risky => "risky",
            Metric::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of counters carried by a [`TestSuite`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Totals {
    /// The number of tests.
    pub tests: u64,
    /// The number of assertions.
    pub assertions: u64,
    /// The number of failed tests.
    pub failures: u64,
    /// The number of errored tests, not counting risky tests.
    pub errors: u64,
    /// The number of tests that produced warnings.
    pub warnings: u64,
    /// The number of risky tests.
    pub risky: u64,
    /// The number of skipped tests.
    pub skipped: u64,
}

impl Totals {
    /// Returns the value for the given metric.
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::Tests => self.tests,
            Metric::Assertions => self.assertions,
            Metric::Failures => self.failures,
            Metric::Errors => self.errors,
            Metric::Warnings => self.warnings,
            Metric::Risky => self.risky,
            Metric::Skipped => self.skipped,
        }
    }

    /// Returns a mutable reference to the value for the given metric.
    pub fn get_mut(&mut self, metric: Metric) -> &mut u64 {
        match metric {
            Metric::Tests => &mut self.tests,
            Metric::Assertions => &mut self.assertions,
            Metric::Failures => &mut self.failures,
            Metric::Errors => &mut self.errors,
            Metric::Warnings => &mut self.warnings,
            Metric::Risky => &mut self.risky,
            Metric::Skipped => &mut self.skipped,
        }
    }

    /// Adds every counter in `other` to `self`.
    pub fn add(&mut self, other: &Totals) {
        for metric in Metric::ALL {
            *self.get_mut(metric) += other.get(metric);
        }
    }
}

/// The kind of defect recorded against a test case that did not pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DefectKind {
    /// An assertion failed.
    Failure,
    /// The test raised an unexpected error.
    Error,
    /// The test produced a warning.
    Warning,
    /// The test was flagged as risky, e.g. it performed no assertions.
    Risky,
    /// The test was skipped or marked incomplete.
    Skipped,
}

impl DefectKind {
    /// All defect kinds.
    pub const ALL: [DefectKind; 5] = [
        DefectKind::Failure,
        DefectKind::Error,
        DefectKind::Warning,
        DefectKind::Risky,
        DefectKind::Skipped,
    ];

    /// The XML element name for this defect.
    pub fn tag(self) -> &'static str {
        match self {
            DefectKind::Failure => "failure",
            DefectKind::Error => "error",
            DefectKind::Warning => "warning",
            DefectKind::Risky => "risky",
            DefectKind::Skipped => "skipped",
        }
    }

    /// The counter that a test case with this defect contributes to.
    pub fn metric(self) -> Metric {
        match self {
            DefectKind::Failure => Metric::Failures,
            DefectKind::Error => Metric::Errors,
            DefectKind::Warning => Metric::Warnings,
            DefectKind::Risky => Metric::Risky,
            DefectKind::Skipped => Metric::Skipped,
        }
    }

    /// The progress character for a test case with this defect.
    pub fn feedback(self) -> char {
        match self {
            DefectKind::Failure => 'F',
            DefectKind::Error => 'E',
            DefectKind::Warning => 'W',
            DefectKind::Risky => 'R',
            DefectKind::Skipped => 'S',
        }
    }
}

/// Details about why a test case did not pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Defect {
    /// The kind of defect.
    pub kind: DefectKind,

    /// The free-form type of the defect, typically an exception class name.
    pub message_type: String,

    /// The message text, which may include a stack trace.
    pub message: String,
}

impl Defect {
    /// Creates a new defect.
    pub fn new(
        kind: DefectKind,
        message_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message_type: message_type.into(),
            message: message.into(),
        }
    }
}

/// The result of a single executed test method.
///
/// Test cases are immutable once read.
#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    /// The name of the test method.
    pub name: String,

    /// The name of the class that owns the test method.
    pub class: String,

    /// The source file the test was defined in.
    pub file: String,

    /// The source line the test was defined on.
    pub line: u64,

    /// The number of assertions performed.
    pub assertions: u64,

    /// Elapsed time in seconds.
    pub time: f64,

    /// The defect for this test case. `None` means the test passed.
    pub defect: Option<Defect>,
}

impl TestCase {
    /// Creates a new passing test case with no location information.
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            file: String::new(),
            line: 0,
            assertions: 0,
            time: 0.0,
            defect: None,
        }
    }

    /// Sets the defect for this test case.
    pub fn with_defect(mut self, defect: Defect) -> Self {
        self.defect = Some(defect);
        self
    }

    /// Returns the kind of defect, or `None` if the test passed.
    pub fn defect_kind(&self) -> Option<DefectKind> {
        self.defect.as_ref().map(|defect| defect.kind)
    }

    /// Returns true if this test case passed.
    pub fn is_pass(&self) -> bool {
        self.defect.is_none()
    }

    /// The progress character for this test case.
    pub fn feedback(&self) -> char {
        self.defect_kind().map_or('.', DefectKind::feedback)
    }

    /// Formats the defect message as `Class::name`, message and location.
    ///
    /// Returns `None` for passing tests.
    pub fn formatted_message(&self) -> Option<String> {
        self.defect.as_ref().map(|defect| {
            format!(
                "{}::{}\n{}\n\n{}:{}",
                self.class, self.name, defect.message, self.file, self.line
            )
        })
    }

    // Total order used for multiset comparisons of case lists.
    fn cmp_for_equivalence(&self, other: &TestCase) -> std::cmp::Ordering {
        self.equivalence_key()
            .cmp(&other.equivalence_key())
            .then_with(|| self.time.total_cmp(&other.time))
    }

    fn equivalence_key(&self) -> (&str, &str, &str, u64, u64, Option<(DefectKind, &str, &str)>) {
        (
            &self.class,
            &self.name,
            &self.file,
            self.line,
            self.assertions,
            self.defect
                .as_ref()
                .map(|d| (d.kind, d.message_type.as_str(), d.message.as_str())),
        )
    }
}

/// Aggregated statistics for a group of test cases and nested suites.
///
/// Suites read from disk are never mutated. Merging (see [`TestSuite::merge`]) consumes its inputs
/// and produces a new suite.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestSuite {
    /// The name of this suite. Empty for a synthetic root.
    pub name: String,

    /// The source file for this suite. May be empty.
    pub file: String,

    /// Counters for this suite, including all descendants.
    pub totals: Totals,

    /// Elapsed time in seconds, including all descendants.
    pub time: f64,

    /// Nested suites, keyed by name.
    pub suites: IndexMap<String, TestSuite>,

    /// Test cases directly within this suite.
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    /// Creates a new, empty suite with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a suite from a list of test cases, computing the counters from the cases.
    ///
    /// This is used for results that don't come from an XML file, e.g. crashed batches.
    pub fn from_cases(
        name: impl Into<String>,
        file: impl Into<String>,
        cases: impl IntoIterator<Item = TestCase>,
    ) -> Self {
        let mut suite = Self::new(name);
        suite.file = file.into();
        for case in cases {
            suite.totals.tests += 1;
            suite.totals.assertions += case.assertions;
            if let Some(kind) = case.defect_kind() {
                *suite.totals.get_mut(kind.metric()) += 1;
            }
            suite.time += case.time;
            suite.cases.push(case);
        }
        suite
    }

    /// Returns true if this is a synthetic root suite with no name or file.
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty() && self.file.is_empty()
    }

    /// Returns the counter for the given metric.
    pub fn total(&self, metric: Metric) -> u64 {
        self.totals.get(metric)
    }

    /// Returns true if no test in this suite failed or errored.
    ///
    /// Warnings, risky and skipped tests do not count against success.
    pub fn is_successful(&self) -> bool {
        self.totals.failures == 0 && self.totals.errors == 0
    }

    /// Iterates over every test case in this suite and its descendants, depth-first, with nested
    /// suites visited before this suite's own cases.
    pub fn iter_cases(&self) -> Box<dyn Iterator<Item = &TestCase> + '_> {
        Box::new(
            self.suites
                .values()
                .flat_map(|suite| suite.iter_cases())
                .chain(self.cases.iter()),
        )
    }

    /// Returns formatted messages for every test case with the given defect kind.
    pub fn messages(&self, kind: DefectKind) -> Vec<String> {
        self.iter_cases()
            .filter(|case| case.defect_kind() == Some(kind))
            .filter_map(TestCase::formatted_message)
            .collect()
    }

    /// Returns the progress characters for every test case.
    pub fn feedback(&self) -> String {
        self.iter_cases().map(TestCase::feedback).collect()
    }

    /// Compares two suites field by field, ignoring the order of nested suites and test cases.
    ///
    /// Two results merged in different orders are equivalent but not necessarily equal.
    pub fn equivalent(&self, other: &TestSuite) -> bool {
        const TIME_EPSILON: f64 = 1e-9;

        if self.name != other.name
            || self.file != other.file
            || self.totals != other.totals
            || (self.time - other.time).abs() > TIME_EPSILON
            || self.suites.len() != other.suites.len()
            || self.cases.len() != other.cases.len()
        {
            return false;
        }

        let children_match = self.suites.iter().all(|(name, suite)| {
            other
                .suites
                .get(name)
                .is_some_and(|other_suite| suite.equivalent(other_suite))
        });
        if !children_match {
            return false;
        }

        let mut ours: Vec<_> = self.cases.iter().collect();
        let mut theirs: Vec<_> = other.cases.iter().collect();
        ours.sort_by(|a, b| a.cmp_for_equivalence(b));
        theirs.sort_by(|a, b| a.cmp_for_equivalence(b));
        ours.iter().zip(&theirs).all(|(a, b)| {
            (a.class == b.class && a.name == b.name && a.file == b.file && a.line == b.line)
                && a.assertions == b.assertions
                && a.defect == b.defect
                && (a.time - b.time).abs() <= TIME_EPSILON
        })
    }
}
