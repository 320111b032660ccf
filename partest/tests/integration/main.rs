// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests that run the partest binary against a project using a fake test framework.
//!
//! The fake framework is a shell script, so these tests only run on Unix.

#![cfg(unix)]

mod fixtures;

use color_eyre::eyre::Result;
use fixtures::{PartestCli, TempProject};
use indoc::indoc;
use partest_junit::{DefectKind, Reader};
use partest_runner::exit_code::PartestExitCode;
use pretty_assertions::assert_eq;

#[test]
fn all_tests_pass() -> Result<()> {
    let project = TempProject::new(&["PassOneTest", "PassTwoTest", "PassThreeTest"])?;
    let output = PartestCli::new()
        .args(["run"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(output.exit_code(), Some(PartestExitCode::OK), "{output}");
    let stdout = output.stdout_as_str();
    assert!(stdout.contains("Starting 3 batches across 2 workers (one-shot)"), "{output}");
    assert!(stdout.contains("\n...\n"), "{output}");
    assert!(stdout.contains("OK (3 tests, 3 assertions)"), "{output}");
    Ok(())
}

#[test]
fn failures_are_reported_and_merged() -> Result<()> {
    let project = TempProject::new(&["PassOneTest", "FailTest", "PassTwoTest"])?;
    let output = PartestCli::new()
        .args(["run", "--log-junit", "out/junit.xml"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(
        output.exit_code(),
        Some(PartestExitCode::TEST_RUN_FAILED),
        "{output}"
    );
    let stdout = output.stdout_as_str();
    assert!(stdout.contains("There was 1 failure:"), "{output}");
    assert!(stdout.contains("1) FailTest::testIt\nexpected true, got false"), "{output}");
    assert!(stdout.contains("FAILURES!\nTests: 3, Assertions: 3, Failures: 1."), "{output}");

    let reader = Reader::open(project.path().join("out/junit.xml"))?;
    assert_eq!(reader.suite().totals.tests, 3);
    assert_eq!(reader.suite().totals.failures, 1);
    assert_eq!(reader.messages(DefectKind::Failure).len(), 1);
    assert!(!reader.is_successful());
    Ok(())
}

#[test]
fn wrapper_runner() -> Result<()> {
    let project = TempProject::new(&["PassOneTest", "PassTwoTest", "FailTest"])?;
    let output = PartestCli::new()
        .args(["run", "--runner", "wrapper", "--log-junit", "junit.xml"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(
        output.exit_code(),
        Some(PartestExitCode::TEST_RUN_FAILED),
        "{output}"
    );
    assert!(
        output
            .stdout_as_str()
            .contains("Starting 3 batches across 2 workers (wrapper)"),
        "{output}"
    );

    let reader = Reader::open(project.path().join("junit.xml"))?;
    assert_eq!(reader.suite().totals.tests, 3);
    assert_eq!(reader.suite().totals.failures, 1);
    Ok(())
}

#[test]
fn crashed_batch() -> Result<()> {
    let project = TempProject::new(&["CrashTest", "PassTest"])?;
    let output = PartestCli::new()
        .args(["run"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(
        output.exit_code(),
        Some(PartestExitCode::BATCH_CRASHED),
        "{output}"
    );
    let stdout = output.stdout_as_str();
    assert!(stdout.contains("There was 1 error:"), "{output}");
    assert!(stdout.contains("killed by signal 9"), "{output}");
    assert!(stdout.contains("about to crash"), "{output}");
    assert!(stdout.contains("1 crashed"), "{output}");
    Ok(())
}

#[test]
fn stop_on_failure() -> Result<()> {
    let project = TempProject::new(&["AFailTest", "BPassTest", "CPassTest"])?;
    let output = PartestCli::new()
        .args(["run", "-p", "1", "--stop-on-failure"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(
        output.exit_code(),
        Some(PartestExitCode::TEST_RUN_FAILED),
        "{output}"
    );
    let stdout = output.stdout_as_str();
    assert!(stdout.contains("Cancelling due to test failure"), "{output}");
    assert!(stdout.contains("1 batch run: 0 passed, 1 failed, 2 not run"), "{output}");
    Ok(())
}

#[test]
fn coverage_is_written() -> Result<()> {
    let project = TempProject::new(&["PassOneTest", "PassTwoTest"])?;
    let output = PartestCli::new()
        .args(["run", "--coverage", "out/coverage.json"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(output.exit_code(), Some(PartestExitCode::OK), "{output}");
    assert!(
        output
            .stdout_as_str()
            .contains("Coverage 2/4 lines covered across 2 files"),
        "{output}"
    );

    let coverage = std::fs::read_to_string(project.path().join("out/coverage.json"))?;
    assert!(coverage.contains("src/PassOneTest.php"), "{coverage}");
    assert!(coverage.contains("src/PassTwoTest.php"), "{coverage}");
    Ok(())
}

#[test]
fn work_list() -> Result<()> {
    let project = TempProject::new(&["PassOneTest", "FailTest"])?;
    std::fs::write(
        project.path().join("work-list.txt"),
        indoc! {"
            # only the passing test
            tests/PassOneTest.php
        "},
    )?;
    let output = PartestCli::new()
        .args(["run", "--work-list", "work-list.txt"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(output.exit_code(), Some(PartestExitCode::OK), "{output}");
    assert!(output.stdout_as_str().contains("OK (1 test, 1 assertion)"), "{output}");
    Ok(())
}

#[test]
fn invalid_config() -> Result<()> {
    let project = TempProject::new(&["PassTest"])?;
    std::fs::write(
        project.path().join("bad.toml"),
        indoc! {r#"
            [run]
            runner = "forked"
        "#},
    )?;
    let output = PartestCli::new()
        .args(["run", "--config-file", "bad.toml"])
        .current_dir(project.path())
        .output()?;

    assert_eq!(
        output.exit_code(),
        Some(PartestExitCode::SETUP_ERROR),
        "{output}"
    );
    assert!(
        output
            .stderr_as_str()
            .contains("error: failed to parse partest config at `bad.toml`"),
        "{output}"
    );
    Ok(())
}

#[test]
fn wrapper_subcommand() -> Result<()> {
    let dir = camino_tempfile::Utf8TempDir::new()?;
    let status_file = dir.path().join("status");
    let output = PartestCli::new()
        .args(["wrapper", "--status-file", status_file.as_str()])
        .stdin(indoc! {r#"
            ["sh", "-c", "exit 3"]
            ["sh", "-c", "exit 0"]
            not json
            EXIT
            ["sh", "-c", "exit 4"]
        "#})
        .output()?;

    assert_eq!(output.exit_code(), Some(PartestExitCode::OK), "{output}");
    assert_eq!(std::fs::read(&status_file)?, [3, 0, 255]);
    Ok(())
}
