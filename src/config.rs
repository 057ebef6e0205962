//! Configuration for project spaces.
//!
//! Use [`ConfigBuilder`] to describe where a project lives and how it is
//! compressed. Settings can also come from a JSON document or be
//! overridden from the environment:
//!
//! | Variable | Setting |
//! |---|---|
//! | `PROJECT_SPACE_MAX_WRITES` | writes per nested archive before it is cycled |
//! | `PROJECT_SPACE_BUFFER_SIZE` | nested archives kept open |
//! | `PROJECT_SPACE_COMPRESSION_LEVELS` | comma separated levels, empty for none |
//! | `PROJECT_SPACE_COMPRESSION` | `STORED` or `DEFLATED` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProjectError, Result};
use crate::format::{CompressionFormat, CompressionMethod};

/// Default number of nested archives kept open.
pub const DEFAULT_BUFFER_SIZE: usize = 125;

/// Default number of writes before a nested archive is persisted and reopened.
pub const DEFAULT_MAX_WRITES: usize = 25;

const ENV_MAX_WRITES: &str = "PROJECT_SPACE_MAX_WRITES";
const ENV_BUFFER_SIZE: &str = "PROJECT_SPACE_BUFFER_SIZE";
const ENV_LEVELS: &str = "PROJECT_SPACE_COMPRESSION_LEVELS";
const ENV_METHOD: &str = "PROJECT_SPACE_COMPRESSION";

/// Settings of one project space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project directory, or the archive file when `archive` is set.
    pub location: PathBuf,
    /// Store the whole project in a single archive file.
    pub archive: bool,
    /// Compressed levels. `None` uses level 1.
    pub compression_levels: Option<Vec<usize>>,
    /// Method of the compressed level.
    pub compression: CompressionMethod,
    /// Nested archives kept open at once.
    pub buffer_size: usize,
    /// Writes per archive before it is persisted and reopened, 0 to disable.
    pub max_writes: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::new(),
            archive: false,
            compression_levels: None,
            compression: CompressionMethod::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_writes: DEFAULT_MAX_WRITES,
        }
    }
}

impl ProjectConfig {
    /// Start building a configuration for `location`.
    pub fn builder(location: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(location)
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use project_space::config::ProjectConfig;
    ///
    /// let config = ProjectConfig::from_json(r#"{"location": "/data/p1", "buffer_size": 10}"#).unwrap();
    /// assert_eq!(config.buffer_size, 10);
    /// assert_eq!(config.max_writes, 25);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_MAX_WRITES) {
            self.max_writes = parse_count(ENV_MAX_WRITES, &value)?;
        }
        if let Some(value) = lookup(ENV_BUFFER_SIZE) {
            self.buffer_size = parse_count(ENV_BUFFER_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_LEVELS) {
            let format = CompressionFormat::parse(&value, &self.compression.to_string())?;
            self.compression_levels = Some(format.compression_levels().to_vec());
        }
        if let Some(value) = lookup(ENV_METHOD) {
            self.compression = value.parse()?;
        }
        Ok(self)
    }

    /// The effective compression format.
    ///
    /// An archive root without levels compresses its own entries.
    pub fn compression_format(&self) -> CompressionFormat {
        match &self.compression_levels {
            None => CompressionFormat::new([1], self.compression),
            Some(levels) if levels.is_empty() && self.archive => {
                CompressionFormat::new([0], self.compression)
            }
            Some(levels) => CompressionFormat::new(levels.iter().copied(), self.compression),
        }
    }

    /// Format without nesting for a directory or archive root.
    pub fn unnested_format(archive: bool) -> CompressionFormat {
        if archive {
            CompressionFormat::new([0], CompressionMethod::Deflated)
        } else {
            CompressionFormat::none(CompressionMethod::Stored)
        }
    }

    /// The configured location.
    pub fn location(&self) -> &Path {
        &self.location
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ProjectError::InvalidFormat(format!("{key} must be a number, got '{value}'")))
}

/// Configuration builder for fluent API.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: ProjectConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder for `location`.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            config: ProjectConfig {
                location: location.into(),
                ..ProjectConfig::default()
            },
        }
    }

    /// Store the project as a single archive file.
    pub fn archive(mut self, archive: bool) -> Self {
        self.config.archive = archive;
        self
    }

    /// Set levels and method from a format.
    ///
    /// # Example
    ///
    /// ```
    /// use project_space::config::ConfigBuilder;
    /// use project_space::format::{CompressionFormat, CompressionMethod};
    ///
    /// let config = ConfigBuilder::new("/data/p1")
    ///     .format(CompressionFormat::new([1], CompressionMethod::Stored))
    ///     .build();
    /// assert_eq!(config.compression, CompressionMethod::Stored);
    /// ```
    pub fn format(mut self, format: CompressionFormat) -> Self {
        self.config.compression_levels = Some(format.compression_levels().to_vec());
        self.config.compression = format.method();
        self
    }

    /// Set the compression method.
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.config.compression = method;
        self
    }

    /// Number of nested archives kept open.
    ///
    /// Default: 125
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Writes before a nested archive is persisted and reopened, 0 to disable.
    ///
    /// Default: 25
    pub fn max_writes(mut self, writes: usize) -> Self {
        self.config.max_writes = writes;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> ProjectConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProjectConfig::builder("/tmp/p").build();
        assert_eq!(config.buffer_size, 125);
        assert_eq!(config.max_writes, 25);
        assert_eq!(config.compression_format(), CompressionFormat::default());
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new("/tmp/p")
            .archive(true)
            .buffer_size(4)
            .max_writes(0)
            .compression(CompressionMethod::Stored)
            .build();
        assert!(config.archive);
        assert_eq!(config.buffer_size, 4);
        assert_eq!(config.max_writes, 0);
        assert_eq!(config.compression_format().method(), CompressionMethod::Stored);
    }

    #[test]
    fn test_archive_without_levels_compresses_root() {
        let config = ConfigBuilder::new("/tmp/p.zip")
            .archive(true)
            .format(CompressionFormat::none(CompressionMethod::Deflated))
            .build();
        let format = config.compression_format();
        assert_eq!(format.root_compression(), CompressionMethod::Deflated);
        assert_eq!(format.mount_level(), None);
    }

    #[test]
    fn test_overrides() {
        let config = ProjectConfig::builder("/tmp/p")
            .build()
            .with_overrides(|key| match key {
                "PROJECT_SPACE_MAX_WRITES" => Some("7".into()),
                "PROJECT_SPACE_COMPRESSION_LEVELS" => Some("2".into()),
                "PROJECT_SPACE_COMPRESSION" => Some("stored".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_writes, 7);
        assert_eq!(config.buffer_size, 125);
        assert_eq!(
            config.compression_format(),
            CompressionFormat::new([2], CompressionMethod::Stored)
        );
    }

    #[test]
    fn test_bad_override() {
        let err = ProjectConfig::default()
            .with_overrides(|key| (key == "PROJECT_SPACE_BUFFER_SIZE").then(|| "many".into()))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_json() {
        let config = ProjectConfig::from_json(
            r#"{"location": "/data/p1", "archive": true, "compression": "STORED", "compression_levels": []}"#,
        )
        .unwrap();
        assert!(config.archive);
        assert_eq!(config.compression, CompressionMethod::Stored);
        assert_eq!(config.compression_format(), CompressionFormat::new([0], CompressionMethod::Stored));

        let back = ProjectConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);

        assert!(ProjectConfig::from_json("{").unwrap_err().is_config());
    }
}
