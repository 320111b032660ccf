// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurs while reading a JUnit result file.
///
/// Returned by [`Reader::open`](crate::Reader::open).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadError {
    /// The result file does not exist.
    #[error("result file `{path}` does not exist")]
    NotFound {
        /// The path that was read.
        path: Utf8PathBuf,
    },

    /// The path exists but is not a regular file.
    #[error("result path `{path}` is not a regular file")]
    NotAFile {
        /// The path that was read.
        path: Utf8PathBuf,
    },

    /// The result file is empty.
    ///
    /// This means the process that was supposed to write the file exited before doing so.
    #[error("result file `{path}` is empty: the test process likely crashed")]
    Empty {
        /// The path that was read.
        path: Utf8PathBuf,
    },

    /// The result file is not well-formed JUnit XML.
    #[error("result file `{path}` is not valid JUnit XML: {message}")]
    Malformed {
        /// The path that was read.
        path: Utf8PathBuf,

        /// A description of what went wrong.
        message: String,
    },

    /// An I/O error occurred while reading the file.
    #[error("error reading result file `{path}`")]
    Io {
        /// The path that was read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

impl ReadError {
    /// Returns true if this error means the producing process crashed before writing a complete
    /// result.
    pub fn indicates_crash(&self) -> bool {
        matches!(self, Self::Empty { .. } | Self::Malformed { .. })
    }

    /// Returns the path of the result file that failed to read.
    pub fn path(&self) -> &Utf8PathBuf {
        match self {
            Self::NotFound { path }
            | Self::NotAFile { path }
            | Self::Empty { path }
            | Self::Malformed { path, .. }
            | Self::Io { path, .. } => path,
        }
    }
}

/// An error that occurs while serializing a [`TestSuite`](crate::TestSuite) to XML.
///
/// Returned by [`write_report`](crate::write_report) and
/// [`report_to_string`](crate::report_to_string).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SerializeError {
    /// The XML writer reported an error.
    #[error("error serializing JUnit report")]
    Xml(#[from] quick_xml::Error),

    /// The underlying writer reported an error.
    #[error("error writing JUnit report")]
    Io(#[from] std::io::Error),

    /// The serialized report was not valid UTF-8.
    #[error("serialized JUnit report is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}
