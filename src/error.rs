//! Project space error type.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ProjectError> = std::result::Result<T, E>;

/// Error type for project space operations.
///
/// Errors fall into four groups:
///
/// - **Configuration**: [`InvalidLocation`](Self::InvalidLocation),
///   [`UnsupportedFormat`](Self::UnsupportedFormat),
///   [`InvalidFormat`](Self::InvalidFormat), [`Config`](Self::Config).
///   Reported immediately, never retried.
/// - **Stale handles**: [`Stale`](Self::Stale). Recovered internally by
///   reopening the archive and retrying once; only seen by callers when
///   wrapped in [`Unrecoverable`](Self::Unrecoverable).
/// - **Usage**: invalid paths, missing entries, wrong entry kind.
/// - **I/O**: everything coming from the disk or the archive codec.
///
/// # Example
///
/// ```ignore
/// match writer.write_string("a/info.tsv", "k\tv") {
///     Ok(()) => {}
///     Err(ProjectError::Closed) => eprintln!("project already closed"),
///     Err(e) => eprintln!("{e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The project location exists but is not of the expected kind.
    #[error("invalid project location '{}': {reason}", path.display())]
    InvalidLocation {
        /// The configured location.
        path: PathBuf,
        /// What was expected.
        reason: &'static str,
    },

    /// More than one compression level was requested.
    #[error("multi-level compression is not supported (levels {levels:?})")]
    UnsupportedFormat {
        /// The rejected levels.
        levels: Vec<usize>,
    },

    /// A compression format could not be parsed.
    #[error("invalid compression format: {0}")]
    InvalidFormat(String),

    /// A configuration document could not be read.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// An archive handle was closed underneath an operation.
    #[error("archive handle for '{location}' is closed")]
    Stale {
        /// Node location, relative to the project root.
        location: String,
    },

    /// The single recovery attempt for a stale handle failed as well.
    #[error("could not recover archive '{location}': {source}")]
    Unrecoverable {
        /// Node location, relative to the project root.
        location: String,
        /// Error of the retried operation.
        #[source]
        source: Box<ProjectError>,
    },

    /// The project space has been closed.
    #[error("project space is closed")]
    Closed,

    /// A logical path is malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A path does not exist.
    #[error("no such file or directory: '{0}'")]
    NotFound(String),

    /// A file was used where a directory is required.
    #[error("not a directory: '{0}'")]
    NotADirectory(String),

    /// A directory was used where a file is required.
    #[error("is a directory: '{0}'")]
    IsADirectory(String),

    /// File content could not be decoded.
    #[error("invalid data in '{path}': {reason}")]
    InvalidData {
        /// The file being decoded.
        path: String,
        /// Decoder message.
        reason: String,
    },

    /// Archive codec failure.
    #[error("archive error in '{location}': {source}")]
    Archive {
        /// Archive location, relative to the project root.
        location: String,
        /// The codec error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Invalid glob pattern.
    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        /// The glob as given.
        pattern: String,
        /// Regex compilation error of the translated pattern.
        #[source]
        source: regex::Error,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProjectError {
    /// Create a stale-handle error.
    pub(crate) fn stale(location: impl Into<String>) -> Self {
        Self::Stale {
            location: location.into(),
        }
    }

    /// Create an archive codec error.
    pub(crate) fn archive(location: impl Into<String>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            location: location.into(),
            source,
        }
    }

    /// Create an invalid path error.
    pub(crate) fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Check if this error signals a closed archive handle.
    ///
    /// Stale errors are the only ones retried by the tree.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Check if this error is a configuration mistake.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidLocation { .. }
                | Self::UnsupportedFormat { .. }
                | Self::InvalidFormat(_)
                | Self::Config(_)
        )
    }

    /// Check if this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
