// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::test_filter::FilteredClass;
use camino::Utf8PathBuf;
use itertools::Itertools;
use std::{collections::HashMap, fmt, num::NonZeroUsize};

/// How filtered tests are split into batches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PartitionMode {
    /// One batch per test class.
    #[default]
    Class,

    /// Batches of individual methods.
    Functional {
        /// The maximum number of methods in a batch. Dependency chains longer than this are
        /// still kept together.
        max_batch_size: NonZeroUsize,
    },
}

/// One or more tests that run together in a single process invocation.
///
/// Every batch covers methods of exactly one class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Batch {
    /// The position of this batch in assignment order, starting from 0.
    pub index: usize,

    /// The test class.
    pub class: String,

    /// The test file.
    pub file: Utf8PathBuf,

    /// The selected methods. Empty means the whole class.
    pub methods: Vec<String>,
}

impl Batch {
    /// Returns true if this batch runs every method of its class.
    pub fn is_whole_class(&self) -> bool {
        self.methods.is_empty()
    }

    /// Returns a regular expression that selects exactly this batch's methods from a list of
    /// `Class::method` names, or `None` for whole-class batches.
    ///
    /// Data-provider variants such as `method with data set #1` are matched as well.
    pub fn filter(&self) -> Option<String> {
        if self.methods.is_empty() {
            return None;
        }
        let alternatives = self.methods.iter().map(|m| regex::escape(m)).join("|");
        Some(format!("::(?:{alternatives})(?:\\s|$)"))
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.methods.as_slice() {
            [] => write!(f, "{}", self.class),
            [method] => write!(f, "{}::{method}", self.class),
            methods => write!(f, "{}::{{{}}}", self.class, methods.join(",")),
        }
    }
}

/// Splits filtered classes into an ordered list of batches.
///
/// Batch order follows class order, and method order within a class.
pub fn partition(classes: &[FilteredClass<'_>], mode: PartitionMode) -> Vec<Batch> {
    let mut batches = Vec::new();
    for filtered in classes {
        let class = filtered.class;
        let mut push = |methods: Vec<String>| {
            batches.push(Batch {
                index: batches.len(),
                class: class.name.clone(),
                file: class.file.clone(),
                methods,
            });
        };

        match mode {
            PartitionMode::Class => {
                if filtered.is_whole() {
                    push(Vec::new());
                } else {
                    push(filtered.methods.iter().map(|m| m.name.clone()).collect());
                }
            }
            PartitionMode::Functional { max_batch_size } => {
                if filtered.methods.is_empty() {
                    // Methods are unknown: the class can only run as a whole.
                    push(Vec::new());
                    continue;
                }
                for chunk in pack_chains(filtered, max_batch_size.get()) {
                    push(chunk);
                }
            }
        }
    }
    batches
}

/// Groups methods into dependency chains and packs whole chains into batches of at most
/// `max_batch_size` methods. A chain longer than the limit gets a batch of its own.
fn pack_chains(filtered: &FilteredClass<'_>, max_batch_size: usize) -> Vec<Vec<String>> {
    let methods = &filtered.methods;
    let position: HashMap<&str, usize> = methods
        .iter()
        .enumerate()
        .map(|(index, method)| (method.name.as_str(), index))
        .collect();

    // Union-find over the selected methods.
    let mut parent: Vec<usize> = (0..methods.len()).collect();
    fn find(parent: &mut [usize], mut index: usize) -> usize {
        while parent[index] != index {
            parent[index] = parent[parent[index]];
            index = parent[index];
        }
        index
    }
    for (index, method) in methods.iter().enumerate() {
        for depends in filtered.class.local_depends(method) {
            if let Some(&other) = position.get(depends) {
                let (a, b) = (find(&mut parent, index), find(&mut parent, other));
                // Keep the earliest method as the root so chains are ordered by first member.
                let (root, child) = if a < b { (a, b) } else { (b, a) };
                parent[child] = root;
            }
        }
    }

    // Chains ordered by their first method; methods within a chain keep declaration order.
    let mut chains: Vec<(usize, Vec<String>)> = Vec::new();
    let mut chain_of_root: HashMap<usize, usize> = HashMap::new();
    for (index, method) in methods.iter().enumerate() {
        let root = find(&mut parent, index);
        let chain = *chain_of_root.entry(root).or_insert_with(|| {
            chains.push((root, Vec::new()));
            chains.len() - 1
        });
        chains[chain].1.push(method.name.clone());
    }

    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for (_, chain) in chains {
        if !current.is_empty() && current.len() + chain.len() > max_batch_size {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(chain);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
