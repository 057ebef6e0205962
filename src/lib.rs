//! # project-space
//!
//! A project store for many small files, grouped into compressed nested
//! archives below a configurable directory depth.
//!
//! A project is a directory (or a single archive file). Every entry at the
//! compressed level, e.g. one directory per compound, is kept as its own
//! zip archive. Callers see one hierarchical file system:
//!
//! - **Transparent nesting**: paths like `c1/scores/a.tsv` are routed into
//!   the archive `c1` without the caller noticing
//! - **Bounded open handles**: at most `buffer_size` nested archives stay
//!   open; the least recently used are persisted and closed
//! - **Recovery**: an archive closed underneath an operation is reopened
//!   and the operation retried once
//! - **Façades**: typed readers and writers for text, binary, key-value
//!   and table files, scoped to a current directory
//!
//! ## Quick Start
//!
//! ```no_run
//! use project_space::prelude::*;
//!
//! let space = ProjectSpace::open(ProjectConfig::builder("/data/project").build())?;
//!
//! let mut writer = space.writer();
//! writer.in_directory("compound-1", |w| {
//!     w.write_key_values("info.tsv", [("name", "glucose")])?;
//!     w.write_table("scores.tsv", Some(&["rank", "score"]), [["1", "0.93"]])
//! })?;
//!
//! let name = space.reader().key_values("compound-1/info.tsv")?["name"].clone();
//! assert_eq!(name, "glucose");
//!
//! space.close()?;
//! # Ok::<(), ProjectError>(())
//! ```
//!
//! ## Modules
//!
//! - [`space`]: Opening a project and handing out façades
//! - [`io`]: Reader, writer and io façades
//! - [`tree`]: Path resolution, node cache and recovery
//! - [`fs`]: Directory and archive file systems
//! - [`config`]: Configuration, JSON and environment overrides
//! - [`format`]: Compression levels and methods

#![forbid(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "batch")]
pub mod batch;
pub mod config;
pub mod error;
pub mod format;
pub mod fs;
pub mod io;
pub mod path;
pub mod space;
pub mod tree;

// =============================================================================
// Prelude - import commonly used items with a single `use`
// =============================================================================

/// Prelude module for convenient imports.
///
/// ```ignore
/// use project_space::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CompressionFormat, CompressionMethod, ConfigBuilder, ListOptions, ProjectConfig,
        ProjectError, ProjectIo, ProjectReader, ProjectSpace, ProjectWriter, Result,
    };
}

// =============================================================================
// Project API
// =============================================================================

pub use io::{DEFAULT_DELIMITER, ProjectIo, ProjectReader, ProjectWriter};
pub use space::ProjectSpace;

// =============================================================================
// Infrastructure
// =============================================================================

pub use config::{ConfigBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_WRITES, ProjectConfig};
pub use error::{ProjectError, Result};
pub use format::{CompressionFormat, CompressionMethod};
pub use fs::{ArchiveFs, DirEntry, DirFs, EntryKind, NodeFs};
pub use path::LogicalPath;
pub use tree::{FsNode, FsTree, ListOptions, MountInfo, PathClass, PathHint};
