// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Renders run events as progress characters, and the merged result as a summary.

use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use partest_junit::{DefectKind, Metric, TestSuite, Totals};
use partest_runner::{
    coverage::LineCoverage,
    reporter::events::{RunEvent, RunEventKind},
    runner::RunStats,
};
use std::{io, io::Write, time::Duration};

/// The number of progress characters printed per line.
const PROGRESS_WIDTH: usize = 80;

/// Defect kinds listed in the summary, in order. Skipped tests are only listed when verbose.
const SUMMARY_KINDS: [DefectKind; 4] = [
    DefectKind::Error,
    DefectKind::Failure,
    DefectKind::Warning,
    DefectKind::Risky,
];

#[derive(Debug, Default)]
pub(crate) struct Reporter {
    styles: Styles,
    verbose: bool,
    column: usize,
}

impl Reporter {
    pub(crate) fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub(crate) fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes a run event to `writer`.
    pub(crate) fn report_event(
        &mut self,
        event: &RunEvent<'_>,
        mut writer: impl Write,
    ) -> io::Result<()> {
        match &event.kind {
            RunEventKind::RunStarted {
                batch_count,
                worker_count,
                worker_mode,
                ..
            } => {
                writeln!(
                    writer,
                    "{:>12} {} {} across {} {} ({worker_mode})",
                    "Starting".style(self.styles.pass),
                    batch_count.style(self.styles.count),
                    plural(*batch_count, "batch", "batches"),
                    worker_count.style(self.styles.count),
                    plural(*worker_count, "worker", "workers"),
                )?;
            }
            RunEventKind::BatchStarted { .. } => {}
            RunEventKind::BatchFinished { result, .. } => {
                self.write_feedback(&result.feedback, &mut writer)?;
                writer.flush()?;
            }
            RunEventKind::RunBeginCancel { reason, running } => {
                self.end_progress_line(&mut writer)?;
                writeln!(
                    writer,
                    "{:>12} due to {}: {} {} still running",
                    "Cancelling".style(self.styles.fail),
                    reason.to_static_str().style(self.styles.fail),
                    running.style(self.styles.count),
                    plural(*running, "batch", "batches"),
                )?;
            }
            RunEventKind::RunFinished { elapsed, stats, .. } => {
                self.end_progress_line(&mut writer)?;
                self.write_stats(*elapsed, stats, &mut writer)?;
            }
        }

        Ok(())
    }

    /// Writes every defect message in `merged`, followed by the overall verdict.
    pub(crate) fn write_results(
        &self,
        merged: &TestSuite,
        mut writer: impl Write,
    ) -> io::Result<()> {
        let skipped = self.verbose.then_some(DefectKind::Skipped);
        for kind in SUMMARY_KINDS.into_iter().chain(skipped) {
            let messages = merged.messages(kind);
            if messages.is_empty() {
                continue;
            }

            let (singular, plural_noun) = kind_nouns(kind);
            writeln!(
                writer,
                "\nThere {} {} {}:",
                plural(messages.len(), "was", "were"),
                messages.len(),
                plural(messages.len(), singular, plural_noun),
            )?;
            for (n, message) in messages.iter().enumerate() {
                writeln!(writer, "\n{}) {message}", n + 1)?;
            }
        }

        writeln!(writer)?;
        let totals = &merged.totals;
        if !merged.is_successful() {
            writeln!(writer, "{}", "FAILURES!".style(self.styles.fail))?;
            writeln!(writer, "{}", totals_line(totals))?;
        } else if totals.warnings + totals.risky + totals.skipped > 0 {
            writeln!(writer, "{}", "OK, but some tests have issues!".style(self.styles.skip))?;
            writeln!(writer, "{}", totals_line(totals))?;
        } else {
            writeln!(
                writer,
                "{}",
                format!(
                    "OK ({} {}, {} {})",
                    totals.tests,
                    plural(totals.tests, "test", "tests"),
                    totals.assertions,
                    plural(totals.assertions, "assertion", "assertions"),
                )
                .style(self.styles.pass)
            )?;
        }

        Ok(())
    }

    /// Writes a one-line summary of merged coverage data.
    pub(crate) fn write_coverage(
        &self,
        coverage: &LineCoverage,
        mut writer: impl Write,
    ) -> io::Result<()> {
        writeln!(
            writer,
            "{:>12} {}/{} lines covered across {} {}",
            "Coverage".style(self.styles.pass),
            coverage.covered_lines().style(self.styles.count),
            coverage.total_lines().style(self.styles.count),
            coverage.files.len().style(self.styles.count),
            plural(coverage.files.len(), "file", "files"),
        )
    }

    // ---
    // Helper methods
    // ---

    fn write_feedback(&mut self, feedback: &str, mut writer: impl Write) -> io::Result<()> {
        for ch in feedback.chars() {
            let style = match ch {
                '.' => Style::new(),
                'F' | 'E' => self.styles.fail,
                _ => self.styles.skip,
            };
            write!(writer, "{}", ch.style(style))?;

            self.column += 1;
            if self.column == PROGRESS_WIDTH {
                writeln!(writer)?;
                self.column = 0;
            }
        }
        Ok(())
    }

    fn end_progress_line(&mut self, mut writer: impl Write) -> io::Result<()> {
        if self.column > 0 {
            writeln!(writer)?;
            self.column = 0;
        }
        Ok(())
    }

    fn write_stats(
        &self,
        elapsed: Duration,
        stats: &RunStats,
        mut writer: impl Write,
    ) -> io::Result<()> {
        let summary_style = if stats.any_failed() {
            self.styles.fail
        } else {
            self.styles.pass
        };
        write!(
            writer,
            "{:>12} [{:>8.3?}s] ",
            "Summary".style(summary_style),
            elapsed.as_secs_f64(),
        )?;

        let count_style = self.styles.count;
        write!(
            writer,
            "{} {} run: {} passed",
            stats.finished_count.style(count_style),
            plural(stats.finished_count, "batch", "batches"),
            stats.passed.style(self.styles.pass),
        )?;
        if stats.failed > 0 {
            write!(writer, ", {} failed", stats.failed.style(self.styles.fail))?;
        }
        if stats.crashed > 0 {
            write!(writer, ", {} crashed", stats.crashed.style(self.styles.fail))?;
        }
        let not_run = stats.not_run();
        if not_run > 0 {
            write!(writer, ", {} not run", not_run.style(self.styles.skip))?;
        }
        writeln!(writer)
    }
}

fn plural<'a, N: PartialEq + From<u8>>(count: N, singular: &'a str, plural: &'a str) -> &'a str {
    if count == N::from(1) { singular } else { plural }
}

fn kind_nouns(kind: DefectKind) -> (&'static str, &'static str) {
    match kind {
        DefectKind::Failure => ("failure", "failures"),
        DefectKind::Error => ("error", "errors"),
        DefectKind::Warning => ("warning", "warnings"),
        DefectKind::Risky => ("risky test", "risky tests"),
        DefectKind::Skipped => ("skipped test", "skipped tests"),
    }
}

/// Formats non-zero counters as `Tests: 3, Assertions: 5, Failures: 1.`
fn totals_line(totals: &Totals) -> String {
    let counters = Metric::ALL
        .into_iter()
        .filter(|metric| {
            matches!(metric, Metric::Tests | Metric::Assertions) || totals.get(*metric) > 0
        })
        .map(|metric| format!("{}: {}", metric_label(metric), totals.get(metric)))
        .join(", ");
    format!("{counters}.")
}

fn metric_label(metric: Metric) -> &'static str {
    match metric {
        Metric::Tests => "Tests",
        Metric::Assertions => "Assertions",
        Metric::Failures => "Failures",
        Metric::Errors => "Errors",
        Metric::Warnings => "Warnings",
        Metric::Risky => "Risky",
        Metric::Skipped => "Skipped",
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use indoc::indoc;
    use partest_junit::{Defect, TestCase};
    use partest_runner::reporter::events::CancelReason;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn event(kind: RunEventKind<'static>) -> RunEvent<'static> {
        RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: Duration::ZERO,
            kind,
        }
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).expect("writing to a Vec succeeds");
        String::from_utf8(buf).expect("output is UTF-8")
    }

    #[test]
    fn progress_wraps_and_ends_before_summary() {
        let mut reporter = Reporter::new(false);
        let output = render(|buf| {
            reporter.write_feedback(&".".repeat(PROGRESS_WIDTH + 2), &mut *buf)?;
            reporter.write_feedback("FE", &mut *buf)?;
            reporter.report_event(
                &event(RunEventKind::RunBeginCancel {
                    reason: CancelReason::TestFailure,
                    running: 1,
                }),
                &mut *buf,
            )?;
            reporter.report_event(
                &event(RunEventKind::RunFinished {
                    run_id: Uuid::nil(),
                    start_time: Local::now().fixed_offset(),
                    elapsed: Duration::from_millis(1500),
                    stats: RunStats {
                        initial_run_count: 4,
                        finished_count: 3,
                        passed: 2,
                        failed: 1,
                        crashed: 0,
                    },
                }),
                &mut *buf,
            )
        });

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], ".".repeat(PROGRESS_WIDTH));
        assert_eq!(lines[1], "..FE");
        assert_eq!(
            lines[2],
            "  Cancelling due to test failure: 1 batch still running"
        );
        assert_eq!(
            lines[3],
            "     Summary [   1.500s] 3 batches run: 2 passed, 1 failed, 1 not run"
        );
        assert_eq!(reporter.column, 0);
    }

    #[test]
    fn results_list_messages_by_kind() {
        let mut failed = TestCase::new("ATest", "testOne").with_defect(Defect::new(
            DefectKind::Failure,
            "AssertionFailed",
            "1 is not 2",
        ));
        failed.file = "tests/ATest.php".to_owned();
        failed.line = 7;
        let mut passed = TestCase::new("ATest", "testTwo");
        passed.assertions = 3;
        let suite = TestSuite::from_cases("ATest", "tests/ATest.php", [failed, passed]);

        let output = render(|buf| Reporter::new(false).write_results(&suite, buf));
        assert_eq!(
            output,
            indoc! {"

                There was 1 failure:

                1) ATest::testOne
                1 is not 2

                tests/ATest.php:7

                FAILURES!
                Tests: 2, Assertions: 3, Failures: 1.
            "}
        );
    }

    #[test]
    fn skipped_tests_are_listed_when_verbose() {
        let skipped = TestCase::new("ATest", "testLater").with_defect(Defect::new(
            DefectKind::Skipped,
            "",
            "not ready",
        ));
        let suite = TestSuite::from_cases("ATest", "", [skipped]);

        let quiet = render(|buf| Reporter::new(false).write_results(&suite, buf));
        assert!(!quiet.contains("skipped test"), "{quiet}");
        assert!(quiet.contains("OK, but some tests have issues!"), "{quiet}");
        assert!(quiet.contains("Tests: 1, Assertions: 0, Skipped: 1."), "{quiet}");

        let verbose = render(|buf| Reporter::new(true).write_results(&suite, buf));
        assert!(verbose.contains("There was 1 skipped test:"), "{verbose}");
    }

    #[test]
    fn all_passing() {
        let mut case = TestCase::new("ATest", "testOne");
        case.assertions = 1;
        let suite = TestSuite::from_cases("ATest", "", [case]);
        let output = render(|buf| Reporter::new(false).write_results(&suite, buf));
        assert_eq!(output, "\nOK (1 test, 1 assertion)\n");
    }
}
