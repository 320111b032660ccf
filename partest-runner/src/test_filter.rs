// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering tests based on user-specified parameters.
//!
//! The main structure in this module is [`TestFilter`], which is created by a
//! [`TestFilterBuilder`].

use crate::{
    errors::TestFilterBuildError,
    list::{TestClass, TestInventory, TestMethod},
};
use regex::Regex;
use std::collections::BTreeSet;

/// Builder for a [`TestFilter`].
#[derive(Clone, Debug, Default)]
pub struct TestFilterBuilder {
    include_groups: BTreeSet<String>,
    exclude_groups: BTreeSet<String>,
    name_pattern: Option<String>,
}

impl TestFilterBuilder {
    /// Creates a new builder that matches every test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only run tests in at least one of these groups.
    pub fn include_groups(
        &mut self,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.include_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Don't run tests in any of these groups.
    pub fn exclude_groups(
        &mut self,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.exclude_groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Only run tests whose `Class::method` name matches this regular expression.
    pub fn set_name_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// Builds the filter.
    pub fn build(&self) -> Result<TestFilter, TestFilterBuildError> {
        let name_pattern = self
            .name_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|error| TestFilterBuildError::new(pattern, error))
            })
            .transpose()?;
        Ok(TestFilter {
            include_groups: self.include_groups.clone(),
            exclude_groups: self.exclude_groups.clone(),
            name_pattern,
        })
    }
}

/// A pure, order-preserving filter over a [`TestInventory`].
///
/// Filtering happens before batches are formed.
#[derive(Clone, Debug)]
pub struct TestFilter {
    include_groups: BTreeSet<String>,
    exclude_groups: BTreeSet<String>,
    name_pattern: Option<Regex>,
}

/// A test class that survived filtering.
#[derive(Clone, Debug)]
pub struct FilteredClass<'a> {
    /// The class.
    pub class: &'a TestClass,

    /// The methods that matched, in declaration order.
    ///
    /// Empty if the class's methods are unknown.
    pub methods: Vec<&'a TestMethod>,
}

impl FilteredClass<'_> {
    /// Returns true if every method of the class is selected.
    pub fn is_whole(&self) -> bool {
        self.methods.len() == self.class.methods.len()
    }
}

impl TestFilter {
    /// Returns a filter that matches every test.
    pub fn all() -> Self {
        Self {
            include_groups: BTreeSet::new(),
            exclude_groups: BTreeSet::new(),
            name_pattern: None,
        }
    }

    /// Applies the filter to an inventory, preserving the order of the surviving classes and
    /// methods.
    pub fn apply<'a>(&self, inventory: &'a TestInventory) -> Vec<FilteredClass<'a>> {
        inventory
            .classes
            .iter()
            .filter_map(|class| self.filter_class(class))
            .collect()
    }

    fn filter_class<'a>(&self, class: &'a TestClass) -> Option<FilteredClass<'a>> {
        if !class.has_methods() {
            // Only class-level information is available.
            let groups = class.groups.iter();
            return self
                .matches(groups, &class.name)
                .then(|| FilteredClass {
                    class,
                    methods: Vec::new(),
                });
        }

        let methods: Vec<_> = class
            .methods
            .iter()
            .filter(|method| {
                let groups = class.groups.iter().chain(&method.groups);
                self.matches(groups, &format!("{}::{}", class.name, method.name))
            })
            .collect();
        (!methods.is_empty()).then_some(FilteredClass { class, methods })
    }

    fn matches<'g>(&self, groups: impl Iterator<Item = &'g String> + Clone, name: &str) -> bool {
        let included = self.include_groups.is_empty()
            || groups.clone().any(|group| self.include_groups.contains(group));
        let excluded = groups
            .into_iter()
            .any(|group| self.exclude_groups.contains(group));
        let name_matches = self
            .name_pattern
            .as_ref()
            .is_none_or(|pattern| pattern.is_match(name));
        included && !excluded && name_matches
    }
}
