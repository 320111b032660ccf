// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::TestThreads;
use crate::{
    errors::{
        CommandTemplateError, ConfigParseError, ConfigParseErrorKind, WorkerModeParseError,
    },
    test_command::{CommandTemplate, WrapperTemplate},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{
    Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState,
};
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, num::NonZeroUsize, str::FromStr, sync::LazyLock};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// How batches are executed by workers.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerMode {
    /// Every batch runs in a fresh process.
    #[default]
    OneShot,

    /// Every worker keeps a long-lived wrapper process that runs the batches sent to it.
    Wrapper,
}

impl WorkerMode {
    /// Returns the config value for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneShot => "one-shot",
            Self::Wrapper => "wrapper",
        }
    }
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerMode {
    type Err = WorkerModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one-shot" => Ok(Self::OneShot),
            "wrapper" => Ok(Self::Wrapper),
            other => Err(WorkerModeParseError {
                input: other.to_owned(),
            }),
        }
    }
}

/// Overall configuration for partest.
///
/// The configuration is read from several layered sources, in increasing order of priority:
///
/// 1. the default config, embedded in the binary ([`Self::DEFAULT_CONFIG`])
/// 2. `partest.toml` in the working directory, or the file passed in explicitly
/// 3. environment variables prefixed with `PARTEST__`, with `__` separating keys, e.g.
///    `PARTEST__RUN__PROCESSES=4`
///
/// Command-line options are applied on top by the caller.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartestConfig {
    /// The `[run]` section.
    pub run: RunConfig,

    /// The `[command]` section.
    pub command: CommandConfig,

    /// The `[wrapper]` section.
    pub wrapper: WrapperConfig,

    /// The `[junit]` section.
    #[serde(default)]
    pub junit: JunitConfig,

    /// The `[coverage]` section.
    #[serde(default)]
    pub coverage: CoverageConfig,
}

/// The `[run]` section of the config.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// The number of workers.
    pub processes: TestThreads,

    /// How batches are executed.
    pub runner: WorkerMode,

    /// Whether every test method is its own batch.
    pub functional: bool,

    /// The maximum number of methods grouped into a batch in functional mode.
    #[serde(alias = "max_batch_size")]
    pub max_batch_size: NonZeroUsize,

    /// Whether to stop assigning batches after the first failure.
    #[serde(alias = "stop_on_failure")]
    pub stop_on_failure: bool,

    /// The directory under which per-run temporary files are created.
    #[serde(default, alias = "temp_dir")]
    pub temp_dir: Option<Utf8PathBuf>,
}

/// The `[command]` section of the config.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandConfig {
    /// The test framework program.
    pub program: String,

    /// Arguments passed to every batch.
    pub args: Vec<String>,

    /// Arguments appended when a batch selects specific methods.
    #[serde(alias = "filter_args")]
    pub filter_args: Vec<String>,

    /// Arguments appended when coverage is enabled.
    #[serde(alias = "coverage_args")]
    pub coverage_args: Vec<String>,
}

/// The `[wrapper]` section of the config.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WrapperConfig {
    /// The wrapper program. Empty means the current executable.
    pub program: String,

    /// Arguments passed to the wrapper.
    pub args: Vec<String>,
}

/// The `[junit]` section of the config.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JunitConfig {
    /// Where to write the merged JUnit report.
    pub path: Option<Utf8PathBuf>,
}

/// The `[coverage]` section of the config.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoverageConfig {
    /// Whether coverage is collected.
    #[serde(default)]
    pub enabled: bool,

    /// Where to write the merged coverage data.
    pub path: Option<Utf8PathBuf>,
}

impl PartestConfig {
    /// The default location of the config within a directory.
    pub const CONFIG_PATH: &'static str = "partest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Environment configuration uses this prefix, plus `__`.
    pub const ENVIRONMENT_PREFIX: &'static str = "PARTEST";

    /// Reads the config from the given file, or if not specified from `partest.toml` in `dir`.
    ///
    /// Unknown keys are reported as warnings.
    pub fn from_sources(
        dir: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let environment = Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        Self::from_sources_impl(dir, config_file, environment, |config_file, unknown| {
            let mut unknown_str = String::new();
            for ignored_key in unknown {
                unknown_str.push_str("\n  - ");
                unknown_str.push_str(ignored_key);
            }
            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}");
        })
    }

    // A custom environment and unknown_callback can be passed in while testing.
    fn from_sources_impl(
        dir: &Utf8Path,
        config_file: Option<&Utf8Path>,
        environment: Environment,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config()
            .add_source(source)
            .add_source(environment);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        config
            .validate()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        Ok(config)
    }

    /// Returns the default config.
    #[cfg(test)]
    pub(crate) fn default_config() -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        serde_ignored::deserialize(config, |path: serde_ignored::Path| {
            panic!("found unknown key in default config: {path}");
        })
        .expect("default config is always valid")
    }

    /// Returns the command template for test batches.
    ///
    /// The template is validated when the config is read, so this only fails for configs that
    /// were modified after reading.
    pub fn command_template(&self) -> Result<CommandTemplate, CommandTemplateError> {
        CommandTemplate::new(
            &self.command.program,
            self.command.args.clone(),
            self.command.filter_args.clone(),
            self.command.coverage_args.clone(),
        )
    }

    /// Returns the command template for wrapper processes.
    pub fn wrapper_template(&self) -> Result<WrapperTemplate, CommandTemplateError> {
        WrapperTemplate::new(&self.wrapper.program, self.wrapper.args.clone())
    }

    /// Checks for invalid combinations of settings.
    ///
    /// Called when the config is read, and again by callers that apply overrides.
    pub fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        self.command_template()
            .map_err(ConfigParseErrorKind::InvalidCommand)?;
        self.wrapper_template()
            .map_err(ConfigParseErrorKind::InvalidCommand)?;
        if self.coverage.enabled && self.command.coverage_args.is_empty() {
            return Err(ConfigParseErrorKind::CoverageArgsMissing);
        }
        Ok(())
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // Both serde_path_to_error and the config crate report the key. Drop the key from the
            // config error for consistency.
            let path = error.path().clone();
            let config_error = error.into_inner();
            let error = match config_error {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }

    #[cfg(test)]
    pub(crate) fn from_str_for_test(contents: &str) -> Result<Self, ConfigParseError> {
        Self::from_str_with_env_for_test(contents, Default::default()).map(|(config, _)| config)
    }

    #[cfg(test)]
    pub(crate) fn from_str_with_env_for_test(
        contents: &str,
        env: config::Map<String, String>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseError> {
        let dir = camino_tempfile::tempdir().expect("created temp dir");
        let config_file = dir.path().join(Self::CONFIG_PATH);
        std::fs::write(&config_file, contents).expect("wrote config file");

        let environment = Environment::with_prefix(Self::ENVIRONMENT_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(Some(env));
        let mut unknown_keys = BTreeSet::new();
        let config = Self::from_sources_impl(dir.path(), None, environment, |_, unknown| {
            unknown_keys.extend(unknown.iter().cloned());
        })?;
        Ok((config, unknown_keys))
    }
}
