// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, WrapErr};
use indoc::indoc;
use std::{
    borrow::Cow,
    fmt,
    io::Write,
    process::{Command, ExitStatus, Stdio},
};

/// A stand-in for a test framework, invoked as `sh fake-framework.sh JUNIT CLASS [COVERAGE]`.
///
/// Classes named `*Crash*` kill themselves, `*Fail*` write a failing test, and anything else
/// writes a passing test.
const FAKE_FRAMEWORK: &str = indoc! {r#"
    junit="$1"
    class="$2"
    coverage="$3"
    case "$class" in
        *Crash*) echo "about to crash" >&2; kill -9 $$ ;;
    esac
    if [ -n "$coverage" ]; then
        printf '{"files": {"src/%s.php": {"1": 1, "2": 0}}}' "$class" > "$coverage"
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
    exit "$failures"
"#};

const CONFIG: &str = indoc! {r#"
    [run]
    processes = 2

    [command]
    program = "sh"
    args = ["fake-framework.sh", "{junit}", "{class}"]
    coverage-args = ["{coverage}"]
"#};

/// A project directory with a config, the fake framework and a `tests` directory.
pub(crate) struct TempProject {
    dir: Utf8TempDir,
}

impl TempProject {
    pub(crate) fn new(test_classes: &[&str]) -> Result<Self> {
        let dir = Utf8TempDir::new()?;
        std::fs::write(dir.path().join("partest.toml"), CONFIG)?;
        std::fs::write(dir.path().join("fake-framework.sh"), FAKE_FRAMEWORK)?;

        let tests = dir.path().join("tests");
        std::fs::create_dir(&tests)?;
        for class in test_classes {
            std::fs::write(tests.join(format!("{class}.php")), "<?php\n")?;
        }
        Ok(Self { dir })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        self.dir.path()
    }
}

pub(crate) struct PartestCli {
    bin: Utf8PathBuf,
    args: Vec<String>,
    current_dir: Option<Utf8PathBuf>,
    stdin: Option<Vec<u8>>,
}

impl PartestCli {
    pub(crate) fn new() -> Self {
        Self {
            bin: env!("CARGO_BIN_EXE_partest").into(),
            args: vec!["--color".to_owned(), "never".to_owned()],
            current_dir: None,
            stdin: None,
        }
    }

    pub(crate) fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn current_dir(&mut self, dir: impl Into<Utf8PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub(crate) fn stdin(&mut self, stdin: impl Into<Vec<u8>>) -> &mut Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub(crate) fn output(&self) -> Result<PartestOutput> {
        let mut command = Command::new(&self.bin);
        command
            .args(&self.args)
            .env_remove("PARTEST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().wrap_err("failed to spawn partest")?;
        // Dropping stdin closes it, so that the wrapper subcommand sees end of input.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.stdin.as_deref().unwrap_or_default())?;
        }
        let output = child.wait_with_output()?;

        Ok(PartestOutput {
            command: format!("{command:?}"),
            exit_status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub(crate) struct PartestOutput {
    command: String,
    pub(crate) exit_status: ExitStatus,
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: Vec<u8>,
}

impl PartestOutput {
    pub(crate) fn exit_code(&self) -> Option<i32> {
        self.exit_status.code()
    }

    pub(crate) fn stdout_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub(crate) fn stderr_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl fmt::Display for PartestOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command: {}\nexit code: {:?}\n\
                   --- stdout ---\n{}\n\n--- stderr ---\n{}\n\n",
            self.command,
            self.exit_status.code(),
            self.stdout_as_str(),
            self.stderr_as_str(),
        )
    }
}

// Make Debug output the same as Display output, so failed assertions are readable.
impl fmt::Debug for PartestOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
