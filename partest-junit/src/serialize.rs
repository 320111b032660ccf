// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialize a `TestSuite` tree.

use crate::{DefectKind, Metric, SerializeError, TestCase, TestSuite};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io;

static TESTSUITES_TAG: &str = "testsuites";
static TESTSUITE_TAG: &str = "testsuite";
static TESTCASE_TAG: &str = "testcase";

/// Writes `suite` as a JUnit XML document.
///
/// An anonymous root is written as the `testsuites` element itself; a named root is wrapped in
/// one. Reading the output back yields an equivalent tree, except that an anonymous root with a
/// single child reads back as that child.
pub fn write_report(suite: &TestSuite, writer: impl io::Write) -> Result<(), SerializeError> {
    let mut writer = Writer::new_with_indent(writer, b' ', 2);

    let decl = BytesDecl::new("1.0", Some("UTF-8"), None);
    writer.write_event(Event::Decl(decl))?;

    let testsuites_tag = BytesStart::new(TESTSUITES_TAG);
    if suite.is_anonymous() && suite.cases.is_empty() {
        if suite.suites.is_empty() {
            writer.write_event(Event::Empty(testsuites_tag))?;
        } else {
            writer.write_event(Event::Start(testsuites_tag))?;
            for child in suite.suites.values() {
                serialize_testsuite(child, &mut writer)?;
            }
            serialize_end_tag(TESTSUITES_TAG, &mut writer)?;
        }
    } else {
        writer.write_event(Event::Start(testsuites_tag))?;
        serialize_testsuite(suite, &mut writer)?;
        serialize_end_tag(TESTSUITES_TAG, &mut writer)?;
    }

    // Add a trailing newline.
    writer.write_indent()?;
    Ok(())
}

/// Serializes `suite` to a string. See [`write_report`].
pub fn report_to_string(suite: &TestSuite) -> Result<String, SerializeError> {
    let mut buf = Vec::new();
    write_report(suite, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

fn serialize_testsuite(
    suite: &TestSuite,
    writer: &mut Writer<impl io::Write>,
) -> Result<(), SerializeError> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let TestSuite {
        name,
        file,
        totals,
        time,
        suites,
        cases,
    } = suite;

    let mut testsuite_tag = BytesStart::new(TESTSUITE_TAG);
    testsuite_tag.push_attribute(("name", name.as_str()));
    if !file.is_empty() {
        testsuite_tag.push_attribute(("file", file.as_str()));
    }
    for metric in Metric::ALL {
        let value = match metric {
            // Risky tests are reported as errors, the way test frameworks write them.
            Metric::Errors => totals.errors + totals.risky,
            Metric::Risky => continue,
            _ => totals.get(metric),
        };
        testsuite_tag.push_attribute((metric.as_str(), value.to_string().as_str()));
    }
    testsuite_tag.push_attribute(("time", serialize_time(*time).as_str()));

    if suites.is_empty() && cases.is_empty() {
        writer.write_event(Event::Empty(testsuite_tag))?;
        return Ok(());
    }

    writer.write_event(Event::Start(testsuite_tag))?;
    for child in suites.values() {
        serialize_testsuite(child, writer)?;
    }
    for case in cases {
        serialize_testcase(case, writer)?;
    }
    serialize_end_tag(TESTSUITE_TAG, writer)?;
    Ok(())
}

fn serialize_testcase(
    case: &TestCase,
    writer: &mut Writer<impl io::Write>,
) -> Result<(), SerializeError> {
    let TestCase {
        name,
        class,
        file,
        line,
        assertions,
        time,
        defect,
    } = case;

    let mut testcase_tag = BytesStart::new(TESTCASE_TAG);
    testcase_tag.extend_attributes([
        ("name", name.as_str()),
        ("class", class.as_str()),
        ("classname", class.as_str()),
        ("file", file.as_str()),
        ("line", line.to_string().as_str()),
        ("assertions", assertions.to_string().as_str()),
        ("time", serialize_time(*time).as_str()),
    ]);

    let Some(defect) = defect else {
        writer.write_event(Event::Empty(testcase_tag))?;
        return Ok(());
    };

    writer.write_event(Event::Start(testcase_tag))?;
    let tag = defect.kind.tag();
    let mut defect_tag = BytesStart::new(tag);
    if !defect.message_type.is_empty() {
        defect_tag.push_attribute(("type", defect.message_type.as_str()));
    }
    if defect.message.is_empty() {
        writer.write_event(Event::Empty(defect_tag))?;
    } else if defect.kind == DefectKind::Skipped {
        // Frameworks write skipped tests as empty elements with a message attribute.
        defect_tag.push_attribute(("message", defect.message.as_str()));
        writer.write_event(Event::Empty(defect_tag))?;
    } else {
        writer.write_event(Event::Start(defect_tag))?;
        writer.write_event(Event::Text(BytesText::new(&defect.message)))?;
        serialize_end_tag(tag, writer)?;
    }
    serialize_end_tag(TESTCASE_TAG, writer)?;
    Ok(())
}

fn serialize_end_tag(tag: &str, writer: &mut Writer<impl io::Write>) -> Result<(), SerializeError> {
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn serialize_time(time: f64) -> String {
    // Display for f64 is the shortest representation that round-trips.
    format!("{time}")
}
