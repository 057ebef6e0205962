//! Compression policy for the project tree.
//!
//! A [`CompressionFormat`] decides which directory depths ("levels") are
//! mounted as nested archives and which method is used for their entries.
//!
//! ```text
//! level 0   project root            (archive root only)
//! level 1   root/<compound>         ← typical compressed level
//! level 2   root/<compound>/<result>
//! ```
//!
//! Only the deepest configured level carries the compressing method; every
//! other level is stored uncompressed so navigation stays cheap.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, Result};

// =============================================================================
// CompressionMethod
// =============================================================================

/// Method applied to archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionMethod {
    /// Entries are stored without compression.
    Stored,
    /// Entries are deflate-compressed.
    #[default]
    Deflated,
}

impl CompressionMethod {
    /// The matching `zip` crate method.
    pub(crate) fn to_zip(self) -> zip::CompressionMethod {
        match self {
            Self::Stored => zip::CompressionMethod::Stored,
            Self::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => f.write_str("STORED"),
            Self::Deflated => f.write_str("DEFLATED"),
        }
    }
}

impl FromStr for CompressionMethod {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STORED" => Ok(Self::Stored),
            "DEFLATED" => Ok(Self::Deflated),
            other => Err(ProjectError::InvalidFormat(format!(
                "unknown compression method '{other}'"
            ))),
        }
    }
}

// =============================================================================
// CompressionFormat
// =============================================================================

/// Which depths are compressed, and how.
///
/// Levels are kept sorted and deduplicated. An empty level set means the
/// whole project lives in the root node without any nesting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompressionFormat {
    levels: Vec<usize>,
    method: CompressionMethod,
}

impl CompressionFormat {
    /// Create a format from configured depths and the method of the deepest one.
    pub fn new(levels: impl IntoIterator<Item = usize>, method: CompressionMethod) -> Self {
        let mut levels: Vec<usize> = levels.into_iter().collect();
        levels.sort_unstable();
        levels.dedup();
        Self { levels, method }
    }

    /// A format without any compressed level.
    pub fn none(method: CompressionMethod) -> Self {
        Self::new([], method)
    }

    /// Parse levels from a comma separated list (`"1"`, `"1,2"`, `""`) and a method name.
    pub fn parse(levels: &str, method: &str) -> Result<Self> {
        let levels = levels
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<usize>().map_err(|_| {
                    ProjectError::InvalidFormat(format!("invalid compression level '{s}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(levels, method.parse()?))
    }

    /// All configured levels, ascending.
    pub fn compression_levels(&self) -> &[usize] {
        &self.levels
    }

    /// True if no level is configured.
    pub fn has_no_levels(&self) -> bool {
        self.levels.is_empty()
    }

    /// True if more than one level is configured.
    pub fn is_multi_level(&self) -> bool {
        self.levels.len() > 1
    }

    /// The deepest configured level, `None` if there is none.
    pub fn compressed_level(&self) -> Option<usize> {
        self.levels.last().copied()
    }

    /// Method of the deepest level.
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Method for entries of the root itself.
    pub fn root_compression(&self) -> CompressionMethod {
        self.compression(0)
    }

    /// Method for entries of an archive mounted at `level`.
    pub fn compression(&self, level: usize) -> CompressionMethod {
        if self.compressed_level() == Some(level) {
            self.method
        } else {
            CompressionMethod::Stored
        }
    }

    /// Depth at which nested archives are mounted, if nesting is enabled.
    pub(crate) fn mount_level(&self) -> Option<usize> {
        self.compressed_level().filter(|&level| level >= 1)
    }
}

impl Default for CompressionFormat {
    fn default() -> Self {
        Self::new([1], CompressionMethod::Deflated)
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<String> = self.levels.iter().map(ToString::to_string).collect();
        write!(f, "[{}] {}", levels.join(","), self.method)
    }
}
