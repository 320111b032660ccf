// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use partest_runner::{
    list::{Batch, PartitionMode, TestInventory, partition},
    reporter::events::{BatchStatus, CancelReason, RunEventKind},
    runner::{RunOutcome, RunStats, TestRunner, TestRunnerBuilder},
    test_command::{CommandTemplate, WrapperTemplate},
    test_filter::TestFilter,
    worker::WorkerId,
};

/// A stand-in for a test framework. The behavior is picked by the class name:
///
/// * `*KillWrapper*` kills the wrapper process running it, then itself.
/// * `*Crash*` kills itself before writing results.
/// * `*NoResult*` exits with 255 before writing results.
/// * `*Fatal*` writes one passing test, then exits with 255.
/// * `*Slow*` sleeps for a second, then passes.
/// * `*Fail*` writes one failing test.
/// * anything else writes one passing test.
const FAKE_FRAMEWORK: &str = indoc! {r#"
    junit="$1"
    class="$2"
    coverage=""
    if [ "$3" = "--coverage" ]; then coverage="$4"; fi
    echo "running $class"
    case "$class" in
        *KillWrapper*) kill -9 "$PARTEST_TEST_WRAPPER_PID"; kill -9 $$ ;;
        *Crash*) echo "about to crash" >&2; kill -9 $$ ;;
        *NoResult*) echo "bootstrap failed" >&2; exit 255 ;;
        *Slow*) sleep 1 ;;
    esac
    if [ -n "$coverage" ]; then
        printf '{"files": {"src/%s.php": {"1": 1}}}' "$class" > "$coverage"
    fi
    failures=0
    body=""
    case "$class" in
        *Fail*) failures=1; body='<failure type="AssertionFailedError">expected true, got false</failure>' ;;
    esac
    cat > "$junit" <<XML
    <?xml version="1.0" encoding="UTF-8"?>
    <testsuites>
      <testsuite name="$class" file="tests/$class.php" tests="1" assertions="1" errors="0" failures="$failures" skipped="0" time="0.01">
        <testcase name="testIt" class="$class" file="tests/$class.php" line="3" assertions="1" time="0.01">$body</testcase>
      </testsuite>
    </testsuites>
    XML
    case "$class" in
        *Fatal*) echo "fatal error after logging" >&2; exit 255 ;;
    esac
    exit "$failures"
"#};

/// A wrapper that runs `sh -c` commands, one per line, following the wrapper protocol.
const SH_WRAPPER: &str = indoc! {r#"
    status="$1"
    PARTEST_TEST_WRAPPER_PID=$$
    export PARTEST_TEST_WRAPPER_PID
    while IFS= read -r line; do
        if [ "$line" = "EXIT" ]; then exit 0; fi
        script=$(printf '%s' "$line" | sed -e 's/^\["sh","-c","//' -e 's/"\]$//')
        sh -c "$script"
        code=$?
        printf "$(printf '\\%03o' "$code")" >> "$status"
    done
"#};

pub(crate) struct Fixture {
    dir: Utf8TempDir,
    framework: Utf8PathBuf,
    wrapper: Utf8PathBuf,
    temp_root: Utf8PathBuf,
}

impl Fixture {
    pub(crate) fn new() -> Result<Self> {
        let dir = Utf8TempDir::new()?;
        let framework = dir.path().join("fake-framework.sh");
        std::fs::write(&framework, FAKE_FRAMEWORK)?;
        let wrapper = dir.path().join("wrapper.sh");
        std::fs::write(&wrapper, SH_WRAPPER)?;
        let temp_root = dir.path().join("tmp");
        std::fs::create_dir(&temp_root)?;
        Ok(Self {
            dir,
            framework,
            wrapper,
            temp_root,
        })
    }

    /// The command for one-shot workers, which can also write coverage.
    pub(crate) fn one_shot_command(&self) -> Result<CommandTemplate> {
        Ok(CommandTemplate::new(
            "sh",
            vec![
                self.framework.to_string(),
                "{junit}".to_owned(),
                "{class}".to_owned(),
            ],
            Vec::new(),
            vec!["--coverage".to_owned(), "{coverage}".to_owned()],
        )?)
    }

    /// The command for wrapper workers: a single `sh -c` script, as understood by `wrapper.sh`.
    pub(crate) fn wrapper_command(&self) -> Result<CommandTemplate> {
        Ok(CommandTemplate::new(
            "sh",
            vec![
                "-c".to_owned(),
                format!("sh {} {{junit}} {{class}}", self.framework),
            ],
            Vec::new(),
            Vec::new(),
        )?)
    }

    pub(crate) fn wrapper_template(&self) -> Result<WrapperTemplate> {
        Ok(WrapperTemplate::new(
            "sh",
            vec![self.wrapper.to_string(), "{status}".to_owned()],
        )?)
    }

    pub(crate) fn builder(&self) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        builder.set_temp_root(&self.temp_root);
        builder
    }

    pub(crate) fn temp_root(&self) -> &Utf8Path {
        &self.temp_root
    }

    /// Checks that nothing was left behind in the temp root.
    pub(crate) fn ensure_no_residue(&self) -> Result<()> {
        let leftover: Vec<_> = std::fs::read_dir(&self.temp_root)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<_, _>>()?;
        ensure!(
            leftover.is_empty(),
            "temp root {} under {} is not empty: {leftover:?}",
            self.temp_root,
            self.dir.path(),
        );
        Ok(())
    }
}

/// Builds one batch per test file, named after the classes.
pub(crate) fn batches(classes: &[&str]) -> Vec<Batch> {
    let inventory =
        TestInventory::from_files(classes.iter().map(|class| format!("tests/{class}.php")));
    partition(&TestFilter::all().apply(&inventory), PartitionMode::Class)
}

/// A run event, without borrows or timestamps.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Recorded {
    Started { index: usize, worker: WorkerId },
    Finished { index: usize, worker: WorkerId, status: BatchStatus },
    Cancel(CancelReason),
    RunFinished(RunStats),
}

pub(crate) fn execute(runner: TestRunner<'_>) -> Result<(RunOutcome, Vec<Recorded>)> {
    let mut events = Vec::new();
    let outcome = runner.execute(|event| {
        let recorded = match event.kind {
            RunEventKind::RunStarted { .. } => return,
            RunEventKind::BatchStarted { batch, worker, .. } => Recorded::Started {
                index: batch.index,
                worker,
            },
            RunEventKind::BatchFinished {
                batch,
                worker,
                result,
                ..
            } => Recorded::Finished {
                index: batch.index,
                worker,
                status: result.status,
            },
            RunEventKind::RunBeginCancel { reason, .. } => Recorded::Cancel(reason),
            RunEventKind::RunFinished { stats, .. } => Recorded::RunFinished(stats),
        };
        events.push(recorded);
    })?;
    Ok((outcome, events))
}

pub(crate) fn started(events: &[Recorded]) -> Vec<usize> {
    let mut indexes: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Recorded::Started { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    indexes.sort_unstable();
    indexes
}
