// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::get_num_cpus, errors::TestThreadsParseError};
use serde::Deserialize;
use std::{cmp::Ordering, fmt, str::FromStr};

/// Type for the `run.processes` config key: the number of workers to run in parallel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run with a specified number of workers.
    Count(usize),

    /// Run with a number of workers equal to the logical CPU count.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of workers computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
        }
    }

    fn from_signed(count: i64) -> Option<Self> {
        match count.cmp(&0) {
            Ordering::Greater => Some(Self::Count(count as usize)),
            Ordering::Less => Some(Self::Count((get_num_cpus() as i64 + count).max(1) as usize)),
            Ordering::Equal => None,
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        s.parse::<i64>()
            .ok()
            .and_then(Self::from_signed)
            .ok_or_else(|| TestThreadsParseError::new(s))
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a non-zero integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(|_| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Str(v), &self)
                })
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                TestThreads::from_signed(v).ok_or_else(|| {
                    serde::de::Error::invalid_value(serde::de::Unexpected::Signed(v), &self)
                })
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match i64::try_from(v) {
                    Ok(v) => self.visit_i64(v),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartestConfig;
    use indoc::indoc;
    use test_case::test_case;

    #[test_case(
        indoc! {r#"
            [run]
            processes = -1
        "#},
        Some((get_num_cpus() - 1).max(1))

        ; "negative"
    )]
    #[test_case(
        indoc! {r#"
            [run]
            processes = 2
        "#},
        Some(2)

        ; "positive"
    )]
    #[test_case(
        indoc! {r#"
            [run]
            processes = 0
        "#},
        None

        ; "zero"
    )]
    #[test_case(
        indoc! {r#"
            [run]
            processes = "num-cpus"
        "#},
        Some(get_num_cpus())

        ; "num-cpus"
    )]
    fn parse_processes(config_contents: &str, n_threads: Option<usize>) {
        let config = PartestConfig::from_str_for_test(config_contents);
        match n_threads {
            None => assert!(config.is_err()),
            Some(n) => assert_eq!(
                config.expect("config is valid").run.processes.compute(),
                n
            ),
        }
    }

    #[test_case("4", Some(TestThreads::Count(4)); "count")]
    #[test_case("num-cpus", Some(TestThreads::NumCpus); "num cpus")]
    #[test_case("0", None; "zero")]
    #[test_case("many", None; "garbage")]
    fn from_str(input: &str, expected: Option<TestThreads>) {
        assert_eq!(input.parse::<TestThreads>().ok(), expected);
    }
}
