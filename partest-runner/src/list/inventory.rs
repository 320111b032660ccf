// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::InventoryError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// The default suffix used to recognize test files when scanning a directory.
pub const DEFAULT_TEST_SUFFIX: &str = "Test.php";

/// The set of discovered tests handed over by the discovery step.
///
/// Discovery itself (reflection over test classes) is done by the test framework. An inventory
/// is either read from a JSON file that the framework produced, or built from a list of test
/// files, in which case nothing is known about individual methods.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestInventory {
    /// Test classes, in discovery order.
    pub classes: Vec<TestClass>,
}

/// A test class.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestClass {
    /// The fully qualified class name.
    pub name: String,

    /// The file the class is defined in.
    pub file: Utf8PathBuf,

    /// Groups that apply to every method of the class.
    #[serde(default)]
    pub groups: Vec<String>,

    /// The test methods, in declaration order.
    ///
    /// An empty list means the methods are unknown and the class always runs as a whole.
    #[serde(default)]
    pub methods: Vec<TestMethod>,
}

/// A test method.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestMethod {
    /// The method name.
    pub name: String,

    /// Groups for this method, in addition to the class groups.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Methods of the same class whose results this method depends on.
    ///
    /// Entries may be written as `method` or `Class::method`.
    #[serde(default)]
    pub depends: Vec<String>,
}

impl TestMethod {
    /// Creates a new method with no groups or dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            depends: Vec::new(),
        }
    }
}

impl TestClass {
    /// Creates a class for a test file, with the class name taken from the file name.
    pub fn from_file(file: impl Into<Utf8PathBuf>) -> Self {
        let file = file.into();
        Self {
            name: file.file_stem().unwrap_or(file.as_str()).to_owned(),
            file,
            groups: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Returns true if this class's methods are known.
    pub fn has_methods(&self) -> bool {
        !self.methods.is_empty()
    }

    /// Returns the names of the same-class methods that `method` depends on.
    pub(crate) fn local_depends<'a>(
        &'a self,
        method: &'a TestMethod,
    ) -> impl Iterator<Item = &'a str> + 'a {
        method.depends.iter().filter_map(move |depends| {
            match depends.split_once("::") {
                Some((class, name)) if class == self.name => Some(name),
                // Dependencies on other classes can't be honored within a batch.
                Some(_) => None,
                None => Some(depends.as_str()),
            }
        })
    }
}

impl TestInventory {
    /// Reads an inventory from a JSON file.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, InventoryError> {
        let contents = std::fs::read_to_string(path).map_err(|error| InventoryError::ReadFile {
            path: path.to_owned(),
            error,
        })?;
        let inventory: Self =
            serde_json::from_str(&contents).map_err(|error| InventoryError::ParseJson {
                path: path.to_owned(),
                error,
            })?;
        debug!(
            "read inventory from {path}: {} classes",
            inventory.classes.len()
        );
        Ok(inventory)
    }

    /// Reads a work list: one test file per line.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_work_list(path: &Utf8Path) -> Result<Self, InventoryError> {
        let contents = std::fs::read_to_string(path).map_err(|error| InventoryError::ReadFile {
            path: path.to_owned(),
            error,
        })?;
        Ok(Self::from_files(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        ))
    }

    /// Scans `root` recursively for files whose names end with `suffix`.
    ///
    /// If `root` is itself a file, the inventory contains just that file. Files are sorted by path
    /// so that the result doesn't depend on directory iteration order.
    pub fn discover(root: &Utf8Path, suffix: &str) -> Result<Self, InventoryError> {
        if root.is_file() {
            return Ok(Self::from_files([root]));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|error| InventoryError::WalkDir {
                root: root.to_owned(),
                error,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path())
                .map_err(|path| InventoryError::NonUtf8Path { path })?;
            if path.as_str().ends_with(suffix) {
                files.push(path);
            }
        }
        files.sort();

        debug!("discovered {} test files under {root}", files.len());
        Ok(Self::from_files(files))
    }

    /// Builds an inventory with one class per file, with no known methods.
    pub fn from_files(files: impl IntoIterator<Item = impl Into<Utf8PathBuf>>) -> Self {
        Self {
            classes: files.into_iter().map(TestClass::from_file).collect(),
        }
    }

    /// Returns the total number of known methods.
    pub fn method_count(&self) -> usize {
        self.classes.iter().map(|class| class.methods.len()).sum()
    }
}
