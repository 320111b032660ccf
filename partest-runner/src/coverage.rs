// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging coverage data produced by individual batches.
//!
//! Coverage models are external to partest: [`CoverageModel`] is the seam where one plugs in.
//! [`LineCoverage`] is a simple model of per-line hit counts, stored as JSON.

use crate::errors::CoverageError;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io};
use tracing::{debug, warn};

/// A coverage model that can be loaded from a batch's coverage file and merged.
pub trait CoverageModel: Sized {
    /// Decodes coverage data from the contents of a file.
    fn load(path: &Utf8Path, contents: &[u8]) -> Result<Self, CoverageError>;

    /// Folds `other` into `self`.
    fn merge(&mut self, other: Self);

    /// Writes the model to `path`.
    fn write(&self, path: &Utf8Path) -> Result<(), CoverageError>;
}

/// Line hit counts per source file.
///
/// The serialized form is `{"files": {"<path>": {"<line>": <hits>}}}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LineCoverage {
    /// Hit counts by file, then by line number.
    pub files: BTreeMap<String, BTreeMap<u32, u64>>,
}

impl LineCoverage {
    /// Returns the number of lines with at least one hit.
    pub fn covered_lines(&self) -> usize {
        self.files
            .values()
            .flat_map(|lines| lines.values())
            .filter(|hits| **hits > 0)
            .count()
    }

    /// Returns the number of lines known to the model.
    pub fn total_lines(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }
}

impl CoverageModel for LineCoverage {
    fn load(path: &Utf8Path, contents: &[u8]) -> Result<Self, CoverageError> {
        serde_json::from_slice(contents).map_err(|error| CoverageError::Format {
            path: path.to_owned(),
            error,
        })
    }

    fn merge(&mut self, other: Self) {
        for (file, lines) in other.files {
            let target = self.files.entry(file).or_default();
            for (line, hits) in lines {
                let entry = target.entry(line).or_default();
                *entry = entry.saturating_add(hits);
            }
        }
    }

    fn write(&self, path: &Utf8Path) -> Result<(), CoverageError> {
        let contents = serde_json::to_vec_pretty(self).map_err(|error| CoverageError::Format {
            path: path.to_owned(),
            error,
        })?;
        std::fs::write(path, contents).map_err(|error| CoverageError::Io {
            path: path.to_owned(),
            error,
        })
    }
}

/// Accumulates the coverage files of all batches of a run.
#[derive(Debug)]
pub struct CoverageMerger<M = LineCoverage> {
    acc: Option<M>,
    merged_files: usize,
}

impl<M> Default for CoverageMerger<M> {
    fn default() -> Self {
        Self {
            acc: None,
            merged_files: 0,
        }
    }
}

impl<M: CoverageModel> CoverageMerger<M> {
    /// Creates an empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the coverage file at `path`, folds it into the accumulator, and deletes the file.
    ///
    /// A missing file and an empty file are reported as distinct errors: an empty file means the
    /// producing process was interrupted.
    pub fn add_from_file(&mut self, path: &Utf8Path) -> Result<(), CoverageError> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(CoverageError::NotFound {
                    path: path.to_owned(),
                });
            }
            Err(error) => {
                return Err(CoverageError::Io {
                    path: path.to_owned(),
                    error,
                });
            }
        };
        if contents.is_empty() {
            return Err(CoverageError::Empty {
                path: path.to_owned(),
            });
        }

        let model = M::load(path, &contents)?;
        self.add(model);
        match std::fs::remove_file(path) {
            Ok(()) => debug!("merged and removed coverage file {path}"),
            Err(error) => warn!("failed to remove coverage file {path}: {error}"),
        }
        Ok(())
    }

    /// Folds an already loaded model into the accumulator.
    pub fn add(&mut self, model: M) {
        match &mut self.acc {
            Some(acc) => acc.merge(model),
            None => self.acc = Some(model),
        }
        self.merged_files += 1;
    }

    /// Returns the number of models folded so far.
    pub fn merged_files(&self) -> usize {
        self.merged_files
    }

    /// Returns the merged model, or `None` if nothing was folded.
    pub fn finish(self) -> Option<M> {
        self.acc
    }

    /// Writes the merged model to `path`. Does nothing if nothing was folded.
    pub fn write_to(&self, path: &Utf8Path) -> Result<bool, CoverageError> {
        match &self.acc {
            Some(acc) => acc.write(path).map(|()| true),
            None => Ok(false),
        }
    }
}
