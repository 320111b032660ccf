// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read a JUnit result file into a [`TestSuite`] tree.

use crate::{
    Defect, DefectKind, Metric, ReadError, TestCase, TestSuite, Totals, merge::insert_or_merge,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use std::{
    borrow::Cow,
    fs::File,
    io::{self, BufRead, BufReader},
    str::FromStr,
};
use tracing::debug;

const TAG_TESTSUITES: &[u8] = b"testsuites";
const TAG_TESTSUITE: &[u8] = b"testsuite";
const TAG_TESTCASE: &[u8] = b"testcase";

/// Error types containing this marker are risky tests that the producer folded into errors.
const RISKY_ERROR_MARKER: &str = "RiskyTest";

/// A parsed JUnit result file.
///
/// A `Reader` binds one result file to its parsed [`TestSuite`] tree. If the file wraps a single
/// suite in a `testsuites` element, that suite becomes the root; otherwise the root is a synthetic
/// suite with an empty name.
#[derive(Clone, Debug)]
pub struct Reader {
    path: Utf8PathBuf,
    suite: TestSuite,
}

impl Reader {
    /// Reads and parses the result file at `path`.
    ///
    /// Fails with [`ReadError::NotFound`] or [`ReadError::NotAFile`] if the path is not a regular
    /// file, and with [`ReadError::Empty`] or [`ReadError::Malformed`] if the file exists but
    /// doesn't hold a complete result.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, ReadError> {
        let path = path.into();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(ReadError::NotFound { path });
            }
            Err(error) => return Err(ReadError::Io { path, error }),
        };
        if !metadata.is_file() {
            return Err(ReadError::NotAFile { path });
        }
        if metadata.len() == 0 {
            return Err(ReadError::Empty { path });
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) => return Err(ReadError::Io { path, error }),
        };
        let suite = match parse(BufReader::new(file)) {
            Ok(suite) => suite,
            Err(message) => return Err(ReadError::Malformed { path, message }),
        };
        debug!(
            path = %path,
            tests = suite.totals.tests,
            "read result file",
        );

        Ok(Self { path, suite })
    }

    /// Parses `xml` as if it had been read from `path`.
    ///
    /// `path` is only used for error reporting.
    pub fn from_xml(path: impl Into<Utf8PathBuf>, xml: &str) -> Result<Self, ReadError> {
        let path = path.into();
        if xml.is_empty() {
            return Err(ReadError::Empty { path });
        }
        match parse(xml.as_bytes()) {
            Ok(suite) => Ok(Self { path, suite }),
            Err(message) => Err(ReadError::Malformed { path, message }),
        }
    }

    /// Returns the path this result was read from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the root suite.
    pub fn suite(&self) -> &TestSuite {
        &self.suite
    }

    /// Consumes the reader, returning the root suite.
    pub fn into_suite(self) -> TestSuite {
        self.suite
    }

    /// Returns the total for the given metric, as recorded on the root suite.
    pub fn total(&self, metric: Metric) -> u64 {
        self.suite.total(metric)
    }

    /// Returns the total time in seconds recorded on the root suite.
    pub fn total_time(&self) -> f64 {
        self.suite.time
    }

    /// Returns formatted messages for every test case with the given defect kind.
    pub fn messages(&self, kind: DefectKind) -> Vec<String> {
        self.suite.messages(kind)
    }

    /// Returns one progress character per test case, in document order.
    pub fn feedback(&self) -> String {
        self.suite.feedback()
    }

    /// Returns true if no test failed or errored.
    pub fn is_successful(&self) -> bool {
        self.suite.is_successful()
    }
}

// ---
// Parsing
// ---

/// A suite whose start tag has been seen but whose end tag hasn't.
#[derive(Debug)]
struct SuiteBuilder {
    name: String,
    file: String,
    // Counters read from attributes. `None` means the attribute was absent.
    attrs: [Option<u64>; 7],
    time: Option<f64>,
    suites: IndexMap<String, TestSuite>,
    cases: Vec<TestCase>,
}

impl SuiteBuilder {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let mut attrs = [None; 7];
        for (slot, metric) in attrs.iter_mut().zip(Metric::ALL) {
            *slot = parse_attr(e, metric.as_str());
        }
        Self {
            name: string_attr(e, "name").unwrap_or_default(),
            file: string_attr(e, "file").unwrap_or_default(),
            attrs,
            time: parse_attr(e, "time"),
            suites: IndexMap::new(),
            cases: Vec::new(),
        }
    }

    fn attr(&self, metric: Metric) -> Option<u64> {
        // Metric::ALL is in declaration order.
        self.attrs[metric as usize]
    }

    fn add_suite(&mut self, suite: TestSuite) {
        insert_or_merge(&mut self.suites, suite);
    }

    fn finish(self) -> TestSuite {
        // Counters computed from the contents, used when an attribute is missing.
        let mut computed = Totals::default();
        let mut computed_time = 0.0;
        for child in self.suites.values() {
            computed.add(&child.totals);
            computed_time += child.time;
        }
        for case in &self.cases {
            computed.tests += 1;
            computed.assertions += case.assertions;
            if let Some(kind) = case.defect_kind() {
                *computed.get_mut(kind.metric()) += 1;
            }
            computed_time += case.time;
        }

        // Risky tests are always derived from the contents. Producers fold them into the error
        // counter, so the error attribute is corrected by the risky count.
        let risky = computed.risky;
        let mut totals = Totals::default();
        for metric in Metric::ALL {
            let value = match metric {
                Metric::Risky => risky,
                Metric::Errors => match self.attr(Metric::Errors) {
                    Some(raw) => raw.saturating_sub(risky),
                    None => computed.errors,
                },
                _ => self.attr(metric).unwrap_or(computed.get(metric)),
            };
            *totals.get_mut(metric) = value;
        }

        TestSuite {
            name: self.name,
            file: self.file,
            totals,
            time: self.time.unwrap_or(computed_time),
            suites: self.suites,
            cases: self.cases,
        }
    }
}

/// A defect element whose end tag hasn't been seen yet.
#[derive(Debug)]
struct PendingDefect {
    kind: DefectKind,
    message_type: String,
    message: String,
}

impl PendingDefect {
    fn from_start(kind: DefectKind, e: &BytesStart<'_>) -> Self {
        let message_type = string_attr(e, "type").unwrap_or_default();
        let kind = if kind == DefectKind::Error && message_type.contains(RISKY_ERROR_MARKER) {
            DefectKind::Risky
        } else {
            kind
        };
        Self {
            kind,
            message_type,
            // Some producers only set a message attribute. The body, if any, replaces it.
            message: string_attr(e, "message").unwrap_or_default(),
        }
    }

    fn push_text(&mut self, text: &str, seen_text: &mut bool) {
        if !*seen_text {
            self.message.clear();
            *seen_text = true;
        }
        self.message.push_str(text);
    }

    fn finish(self) -> Defect {
        Defect::new(self.kind, self.message_type, self.message)
    }
}

#[derive(Debug, Default)]
struct ParseState {
    saw_root: bool,
    stack: Vec<SuiteBuilder>,
    top_level: Vec<TestSuite>,
    current_case: Option<TestCase>,
    current_defect: Option<PendingDefect>,
    defect_has_text: bool,
}

impl ParseState {
    fn open_suite(&mut self, e: &BytesStart<'_>) {
        self.saw_root = true;
        self.stack.push(SuiteBuilder::from_start(e));
    }

    fn close_suite(&mut self) -> Result<(), String> {
        let builder = self
            .stack
            .pop()
            .ok_or_else(|| "testsuite end tag without start tag".to_owned())?;
        let suite = builder.finish();
        match self.stack.last_mut() {
            Some(parent) => parent.add_suite(suite),
            None => self.top_level.push(suite),
        }
        Ok(())
    }

    fn open_case(&mut self, e: &BytesStart<'_>) -> Result<(), String> {
        if self.stack.is_empty() {
            return Err("testcase found outside of a testsuite".to_owned());
        }
        let mut case = TestCase::new(
            string_attr(e, "class")
                .or_else(|| string_attr(e, "classname"))
                .unwrap_or_default(),
            string_attr(e, "name").unwrap_or_default(),
        );
        case.file = string_attr(e, "file").unwrap_or_default();
        case.line = parse_attr(e, "line").unwrap_or(0);
        case.assertions = parse_attr(e, "assertions").unwrap_or(0);
        case.time = parse_attr(e, "time").unwrap_or(0.0);
        self.current_case = Some(case);
        Ok(())
    }

    fn close_case(&mut self) -> Result<(), String> {
        let case = self
            .current_case
            .take()
            .ok_or_else(|| "testcase end tag without start tag".to_owned())?;
        let suite = self
            .stack
            .last_mut()
            .ok_or_else(|| "testcase found outside of a testsuite".to_owned())?;
        suite.cases.push(case);
        Ok(())
    }

    fn open_defect(&mut self, kind: DefectKind, e: &BytesStart<'_>) {
        if self.current_case.is_some() {
            self.current_defect = Some(PendingDefect::from_start(kind, e));
            self.defect_has_text = false;
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(defect) = &mut self.current_defect {
            defect.push_text(text, &mut self.defect_has_text);
        }
    }

    fn close_defect(&mut self) {
        let (Some(defect), Some(case)) = (self.current_defect.take(), &mut self.current_case)
        else {
            return;
        };
        // At most one defect per case is expected: the first one wins.
        if case.defect.is_none() {
            case.defect = Some(defect.finish());
        }
    }

    fn finish(mut self) -> Result<TestSuite, String> {
        if !self.stack.is_empty() || self.current_case.is_some() {
            return Err("unexpected end of file inside a testsuite".to_owned());
        }
        if !self.saw_root {
            return Err("no testsuites or testsuite element found".to_owned());
        }

        if self.top_level.len() == 1
            && let Some(suite) = self.top_level.pop()
        {
            return Ok(suite);
        }

        let mut root = SuiteBuilder {
            name: String::new(),
            file: String::new(),
            attrs: [None; 7],
            time: None,
            suites: IndexMap::new(),
            cases: Vec::new(),
        };
        for suite in self.top_level {
            root.add_suite(suite);
        }
        Ok(root.finish())
    }
}

fn defect_kind(tag: &[u8]) -> Option<DefectKind> {
    DefectKind::ALL
        .into_iter()
        .find(|kind| kind.tag().as_bytes() == tag)
}

/// Parses a JUnit XML document. Errors are returned as human-readable messages.
pub(crate) fn parse(input: impl BufRead) -> Result<TestSuite, String> {
    let mut reader = quick_xml::Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut state = ParseState::default();
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|error| format!("{error} (at byte {})", reader.buffer_position()))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => match e.name().as_ref() {
                TAG_TESTSUITES => state.saw_root = true,
                TAG_TESTSUITE => state.open_suite(&e),
                TAG_TESTCASE => state.open_case(&e)?,
                other => {
                    if let Some(kind) = defect_kind(other) {
                        state.open_defect(kind, &e);
                    }
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                TAG_TESTSUITES => state.saw_root = true,
                TAG_TESTSUITE => {
                    state.open_suite(&e);
                    state.close_suite()?;
                }
                TAG_TESTCASE => {
                    state.open_case(&e)?;
                    state.close_case()?;
                }
                other => {
                    if let Some(kind) = defect_kind(other) {
                        state.open_defect(kind, &e);
                        state.close_defect();
                    }
                }
            },
            Event::End(e) => match e.name().as_ref() {
                TAG_TESTSUITES => {}
                TAG_TESTSUITE => state.close_suite()?,
                TAG_TESTCASE => state.close_case()?,
                other => {
                    if defect_kind(other).is_some() {
                        state.close_defect();
                    }
                }
            },
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|error| format!("invalid text: {error}"))?;
                state.push_text(&text);
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                state.push_text(&String::from_utf8_lossy(&bytes));
            }
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
        }
        buf.clear();
    }

    state.finish()
}

fn string_attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(Cow::into_owned)
}

fn parse_attr<T: FromStr>(e: &BytesStart<'_>, name: &str) -> Option<T> {
    string_attr(e, name).and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parse_str(xml: &str) -> TestSuite {
        parse(xml.as_bytes()).expect("valid JUnit XML")
    }

    #[test]
    fn single_suite_is_flattened() {
        let suite = parse_str(indoc! {r#"
            <?xml version="1.0" encoding="UTF-8"?>
            <testsuites>
              <testsuite name="FooTest" file="tests/FooTest.php" tests="2" assertions="3"
                         errors="0" warnings="0" failures="1" skipped="0" time="0.25">
                <testcase name="testA" class="FooTest" file="tests/FooTest.php" line="10"
                          assertions="2" time="0.125"/>
                <testcase name="testB" class="FooTest" file="tests/FooTest.php" line="20"
                          assertions="1" time="0.125">
                  <failure type="PHPUnit\Framework\ExpectationFailedException">Failed asserting that false is true.</failure>
                </testcase>
              </testsuite>
            </testsuites>
        "#});

        assert_eq!(suite.name, "FooTest");
        assert_eq!(suite.file, "tests/FooTest.php");
        assert_eq!(suite.totals.tests, 2);
        assert_eq!(suite.totals.assertions, 3);
        assert_eq!(suite.totals.failures, 1);
        assert_eq!(suite.time, 0.25);
        assert_eq!(suite.cases.len(), 2);
        assert_eq!(suite.feedback(), ".F");

        let defect = suite.cases[1].defect.as_ref().expect("testB failed");
        assert_eq!(defect.kind, DefectKind::Failure);
        assert_eq!(
            defect.message_type,
            "PHPUnit\\Framework\\ExpectationFailedException"
        );
        assert_eq!(defect.message, "Failed asserting that false is true.");
        assert_eq!(suite.cases[1].line, 20);
    }

    #[test]
    fn multiple_top_level_suites_get_anonymous_root() {
        let suite = parse_str(indoc! {r#"
            <testsuites>
              <testsuite name="A" tests="1" assertions="1" failures="0" errors="0" time="1.5">
                <testcase name="t" class="A" assertions="1" time="1.5"/>
              </testsuite>
              <testsuite name="B" tests="1" assertions="0" failures="0" errors="1" time="0.5">
                <testcase name="t" class="B" time="0.5"><error type="RuntimeException">boom</error></testcase>
              </testsuite>
            </testsuites>
        "#});

        assert!(suite.is_anonymous());
        assert_eq!(suite.suites.keys().collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(suite.totals.tests, 2);
        assert_eq!(suite.totals.errors, 1);
        assert_eq!(suite.time, 2.0);
    }

    #[test]
    fn errors_are_corrected_for_risky_tests() {
        // Three raw errors, two of which are risky tests nested one level down.
        let suite = parse_str(indoc! {r#"
            <testsuites>
              <testsuite name="Root" tests="4" assertions="1" failures="0" errors="3" time="0">
                <testsuite name="Inner" tests="3" assertions="0" failures="0" errors="2" time="0">
                  <testcase name="a" class="Inner"><error type="PHPUnit\Framework\RiskyTestError">no assertions</error></testcase>
                  <testcase name="b" class="Inner"><risky type="Risky">no assertions</risky></testcase>
                  <testcase name="c" class="Inner"/>
                </testsuite>
                <testcase name="d" class="Root" assertions="1"><error type="Exception">real</error></testcase>
              </testsuite>
            </testsuites>
        "#});

        assert_eq!(suite.totals.errors, 1);
        assert_eq!(suite.totals.risky, 2);
        let inner = &suite.suites["Inner"];
        assert_eq!(inner.totals.errors, 0);
        assert_eq!(inner.totals.risky, 2);
        assert_eq!(suite.feedback(), "RR.E");
    }

    #[test]
    fn missing_attributes_are_computed() {
        let suite = parse_str(indoc! {r#"
            <testsuite name="Bare">
              <testcase name="a" classname="Bare" time="0.5" assertions="4"/>
              <testcase name="b" classname="Bare" time="0.5"><skipped/></testcase>
            </testsuite>
        "#});

        assert_eq!(
            suite.totals,
            Totals {
                tests: 2,
                assertions: 4,
                skipped: 1,
                ..Totals::default()
            }
        );
        assert_eq!(suite.time, 1.0);
        assert_eq!(suite.cases[0].class, "Bare");
    }

    #[test]
    fn message_attribute_is_used_without_body() {
        let suite = parse_str(indoc! {r#"
            <testsuite name="S">
              <testcase name="a" class="S"><warning type="W" message="careful"/></testcase>
            </testsuite>
        "#});
        let defect = suite.cases[0].defect.as_ref().expect("warning recorded");
        assert_eq!(defect.kind, DefectKind::Warning);
        assert_eq!(defect.message, "careful");
    }

    #[test]
    fn empty_testsuites_is_an_empty_root() {
        let suite = parse_str("<testsuites/>");
        assert!(suite.is_anonymous());
        assert_eq!(suite.totals, Totals::default());
    }

    #[test_case("" ; "empty input")]
    #[test_case("   \n" ; "whitespace only")]
    #[test_case("<testsuites><testsuite name=\"x\">" ; "truncated")]
    #[test_case("<testsuites><testcase name=\"x\"/></testsuites>" ; "case outside suite")]
    #[test_case("<testsuite name=\"x\"></testsuites>" ; "mismatched end tag")]
    #[test_case("<html/>" ; "not junit")]
    fn malformed_documents(xml: &str) {
        parse(xml.as_bytes()).expect_err("document is malformed");
    }

    #[test]
    fn reader_from_xml_distinguishes_empty() {
        let err = Reader::from_xml("junit.xml", "").expect_err("empty input fails");
        assert!(matches!(err, ReadError::Empty { .. }), "{err:?}");
        assert!(err.indicates_crash());

        let err = Reader::from_xml("junit.xml", "<nope").expect_err("bad input fails");
        assert!(matches!(err, ReadError::Malformed { .. }), "{err:?}");
        assert!(err.indicates_crash());
    }
}
