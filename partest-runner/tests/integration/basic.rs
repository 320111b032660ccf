// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{OptionExt, Result};
use partest_junit::DefectKind;
use partest_runner::{
    config::{TestThreads, WorkerMode},
    exit_code::PartestExitCode,
    reporter::events::{BatchCrashReason, BatchStatus, CancelReason},
    runner::{BATCH_CRASHED_TYPE, RunStats},
    worker::{CrashReason, WorkerId},
};
use pretty_assertions::assert_eq;
use test_case::test_case;

#[test_case(WorkerMode::OneShot ; "one-shot")]
#[test_case(WorkerMode::Wrapper ; "wrapper")]
fn all_batches_pass(mode: WorkerMode) -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["PassOneTest", "PassTwoTest", "PassThreeTest", "PassFourTest"]);
    let command = match mode {
        WorkerMode::OneShot => fixture.one_shot_command()?,
        WorkerMode::Wrapper => fixture.wrapper_command()?,
    };

    let mut builder = fixture.builder();
    builder
        .set_test_threads(TestThreads::Count(2))
        .set_worker_mode(mode)
        .set_wrapper(fixture.wrapper_template()?);
    let runner = builder.build(&batches, &command)?;
    assert_eq!(runner.worker_count(), 2);

    let (outcome, events) = execute(runner)?;
    assert_eq!(
        outcome.stats,
        RunStats {
            initial_run_count: 4,
            finished_count: 4,
            passed: 4,
            ..RunStats::default()
        }
    );
    assert_eq!(outcome.exit_code(), PartestExitCode::OK);
    assert_eq!(started(&events), [0, 1, 2, 3]);
    assert_eq!(events.last(), Some(&Recorded::RunFinished(outcome.stats)));

    let merged = outcome.merged.ok_or_eyre("results were merged")?;
    assert_eq!(merged.totals.tests, 4);
    assert_eq!(merged.feedback(), "....");

    fixture.ensure_no_residue()
}

#[test]
fn crashed_batch_is_an_error() -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["CrashTest", "PassTest"]);
    let command = fixture.one_shot_command()?;

    let mut builder = fixture.builder();
    builder.set_test_threads(TestThreads::Count(2));
    let (outcome, events) = execute(builder.build(&batches, &command)?)?;

    assert_eq!(outcome.stats.crashed, 1);
    assert_eq!(outcome.stats.passed, 1);
    assert_eq!(outcome.exit_code(), PartestExitCode::BATCH_CRASHED);
    let crashed = events.iter().find_map(|event| match event {
        Recorded::Finished {
            index: 0, status, ..
        } => Some(status.clone()),
        _ => None,
    });
    assert_eq!(
        crashed,
        Some(BatchStatus::Crashed(BatchCrashReason::Worker(
            CrashReason::Signal(9)
        )))
    );

    let merged = outcome.merged.ok_or_eyre("results were merged")?;
    assert_eq!(merged.totals.tests, 2, "the crash counts as a test");
    assert_eq!(merged.totals.errors, 1);
    assert!(!merged.is_successful());
    let messages = merged.messages(DefectKind::Error);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("killed by signal 9"), "{messages:?}");
    assert!(messages[0].contains("about to crash"), "{messages:?}");
    assert!(merged.iter_cases().any(|case| {
        case.defect
            .as_ref()
            .is_some_and(|defect| defect.message_type == BATCH_CRASHED_TYPE)
    }));

    fixture.ensure_no_residue()
}

#[test]
fn missing_result_is_an_error() -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["NoResultTest"]);
    let command = fixture.one_shot_command()?;

    let (outcome, events) = execute(fixture.builder().build(&batches, &command)?)?;
    assert_eq!(outcome.exit_code(), PartestExitCode::BATCH_CRASHED);
    assert!(events.contains(&Recorded::Finished {
        index: 0,
        worker: WorkerId::new(1, 0),
        status: BatchStatus::Crashed(BatchCrashReason::MissingResult {
            exit_code: Some(255)
        }),
    }));

    fixture.ensure_no_residue()
}

#[test_case(WorkerMode::OneShot ; "one-shot")]
#[test_case(WorkerMode::Wrapper ; "wrapper")]
fn nonzero_exit_after_passing_result_is_a_crash(mode: WorkerMode) -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["FatalTest"]);
    let command = match mode {
        WorkerMode::OneShot => fixture.one_shot_command()?,
        WorkerMode::Wrapper => fixture.wrapper_command()?,
    };

    let mut builder = fixture.builder();
    builder
        .set_worker_mode(mode)
        .set_wrapper(fixture.wrapper_template()?);
    let (outcome, events) = execute(builder.build(&batches, &command)?)?;

    assert_eq!(outcome.stats.crashed, 1);
    assert_eq!(outcome.exit_code(), PartestExitCode::BATCH_CRASHED);
    assert!(
        events.contains(&Recorded::Finished {
            index: 0,
            worker: WorkerId::new(1, 0),
            status: BatchStatus::Crashed(BatchCrashReason::UnexpectedExit { code: 255 }),
        }),
        "{events:?}"
    );

    let merged = outcome.merged.ok_or_eyre("results were merged")?;
    assert_eq!(merged.totals.tests, 2, "the passing test and the crash");
    assert_eq!(merged.totals.errors, 1);
    assert!(!merged.is_successful());

    fixture.ensure_no_residue()
}

#[test]
fn stop_on_failure_leaves_batches_unassigned() -> Result<()> {
    let fixture = Fixture::new()?;
    // The slow batch keeps worker 1 busy until after the failure is seen.
    let batches = batches(&["SlowPassTest", "FailTest", "PassOneTest", "PassTwoTest"]);
    let command = fixture.one_shot_command()?;

    let mut builder = fixture.builder();
    builder
        .set_test_threads(TestThreads::Count(2))
        .set_stop_on_failure(true);
    let (outcome, events) = execute(builder.build(&batches, &command)?)?;

    assert_eq!(started(&events), [0, 1]);
    assert_eq!(
        outcome.stats,
        RunStats {
            initial_run_count: 4,
            finished_count: 2,
            passed: 1,
            failed: 1,
            crashed: 0,
        }
    );
    assert_eq!(outcome.stats.not_run(), 2);
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, Recorded::Cancel(_)))
            .collect::<Vec<_>>(),
        [&Recorded::Cancel(CancelReason::TestFailure)]
    );
    assert_eq!(outcome.exit_code(), PartestExitCode::TEST_RUN_FAILED);

    let merged = outcome.merged.ok_or_eyre("results were merged")?;
    assert_eq!(merged.totals.tests, 2);
    assert_eq!(merged.totals.failures, 1);

    fixture.ensure_no_residue()
}

#[test]
fn crashed_wrapper_is_replaced() -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["KillWrapperTest", "PassTest"]);
    let command = fixture.wrapper_command()?;

    let mut builder = fixture.builder();
    builder
        .set_test_threads(TestThreads::Count(1))
        .set_worker_mode(WorkerMode::Wrapper)
        .set_wrapper(fixture.wrapper_template()?);
    let (outcome, events) = execute(builder.build(&batches, &command)?)?;

    assert_eq!(outcome.stats.crashed, 1);
    assert_eq!(outcome.stats.passed, 1);
    assert!(events.contains(&Recorded::Started {
        index: 0,
        worker: WorkerId::new(1, 0),
    }));
    assert!(
        events.contains(&Recorded::Started {
            index: 1,
            worker: WorkerId::new(1, 1),
        }),
        "the second batch runs on a fresh wrapper: {events:?}"
    );
    assert_eq!(outcome.exit_code(), PartestExitCode::BATCH_CRASHED);

    fixture.ensure_no_residue()
}

#[test]
fn coverage_is_merged() -> Result<()> {
    let fixture = Fixture::new()?;
    let batches = batches(&["PassOneTest", "PassTwoTest"]);
    let command = fixture.one_shot_command()?;

    let mut builder = fixture.builder();
    builder
        .set_test_threads(TestThreads::Count(2))
        .set_coverage(true);
    let (outcome, _) = execute(builder.build(&batches, &command)?)?;
    assert_eq!(outcome.exit_code(), PartestExitCode::OK);

    let coverage = outcome.coverage.ok_or_eyre("coverage was merged")?;
    assert_eq!(coverage.files.len(), 2);
    assert_eq!(coverage.covered_lines(), 2);

    fixture.ensure_no_residue()
}

#[test]
fn no_batches() -> Result<()> {
    let fixture = Fixture::new()?;
    let command = fixture.one_shot_command()?;

    let runner = fixture.builder().build(&[], &command)?;
    assert_eq!(runner.worker_count(), 0);
    let (outcome, events) = execute(runner)?;
    assert_eq!(events, [Recorded::RunFinished(RunStats::default())]);
    assert!(outcome.merged.is_none());
    assert_eq!(outcome.exit_code(), PartestExitCode::OK);
    assert!(fixture.temp_root().exists());

    fixture.ensure_no_residue()
}
