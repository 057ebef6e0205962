//! Project space provider.
//!
//! A [`ProjectSpace`] owns the [`FsTree`] of one project and hands out
//! façades that share it. Cloned façades stay valid until the space is
//! closed; afterwards every operation fails with
//! [`ProjectError::Closed`](crate::ProjectError::Closed).
//!
//! # Example
//!
//! ```no_run
//! use project_space::{ProjectConfig, ProjectSpace};
//!
//! let space = ProjectSpace::open(ProjectConfig::builder("/data/project").build())?;
//! let mut writer = space.writer();
//! writer.in_directory("compound-1", |w| w.write_string("info.tsv", "name\tglucose\n"))?;
//! space.close()?;
//! # Ok::<(), project_space::ProjectError>(())
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::format::CompressionFormat;
use crate::io::{ProjectIo, ProjectReader, ProjectWriter};
use crate::tree::{FsTree, MountInfo};

/// One open project.
#[derive(Debug)]
pub struct ProjectSpace {
    config: ProjectConfig,
    tree: Arc<FsTree>,
}

impl ProjectSpace {
    /// Open the project described by `config`.
    ///
    /// A missing directory is created; a missing archive is written on
    /// first persist. An existing location must match the configured kind.
    pub fn open(config: ProjectConfig) -> Result<Self> {
        let tree = Arc::new(FsTree::open(&config)?);
        Ok(Self { config, tree })
    }

    /// Read-only access rooted at the project root.
    pub fn reader(&self) -> ProjectReader {
        ProjectReader::new(Arc::clone(&self.tree))
    }

    /// Read and write access rooted at the project root.
    pub fn writer(&self) -> ProjectWriter {
        ProjectWriter::new(self.reader())
    }

    /// Full access rooted at the project root.
    pub fn io(&self) -> ProjectIo {
        ProjectIo::new(self.writer())
    }

    /// Real location of the project.
    pub fn location(&self) -> &Path {
        self.tree.location()
    }

    /// The configuration the space was opened with.
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// The shared tree.
    pub fn tree(&self) -> &Arc<FsTree> {
        &self.tree
    }

    /// The active compression format.
    pub fn compression_format(&self) -> CompressionFormat {
        self.tree.compression_format()
    }

    /// Replace the compression format; `None` disables nesting.
    pub fn set_compression_format(&self, format: Option<CompressionFormat>) -> Result<()> {
        self.tree.set_compression_format(format)
    }

    /// Currently mounted nested archives.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.tree.mounts()
    }

    /// Persist all open nested archives.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }

    /// Persist everything and close the project.
    pub fn close(&self) -> Result<()> {
        self.tree.close()
    }
}
