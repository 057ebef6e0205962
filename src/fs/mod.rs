//! Node filesystems: the handles owned by tree nodes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Node Handles                         │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  FsNode (root) ──► DirFs      real directory, never stale│
//! │        or      ──► ArchiveFs  archive file on disk       │
//! │                                                          │
//! │  FsNode (mount) ─► ArchiveFs  bytes of an entry stored   │
//! │                               inside the root node       │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Paths handed to a [`NodeFs`] are relative to that node's root, `/`
//! separated, with `""` naming the root itself.

mod archive;
mod dir;

pub use archive::ArchiveFs;
pub use dir::DirFs;

use crate::error::Result;

/// Extensions of files at the compressed depth that are never archives.
const PLAIN_EXTENSIONS: &[&str] = &["ms", "tsv", "csv", "info", "config"];

/// Leading signatures of ZIP archives (local header, empty archive, spanned).
const ARCHIVE_SIGNATURES: &[[u8; 4]] = &[
    [0x50, 0x4B, 0x03, 0x04],
    [0x50, 0x4B, 0x05, 0x06],
    [0x50, 0x4B, 0x07, 0x08],
];

// =============================================================================
// Entries
// =============================================================================

/// Kind of an entry inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (single component).
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
}

impl DirEntry {
    pub(crate) fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// =============================================================================
// NodeFs Trait
// =============================================================================

/// Filesystem operations a node handle provides.
///
/// Reads take `&self` and may run concurrently under a node's read lock;
/// mutations take `&mut self` and run under its write lock.
pub trait NodeFs: Send + Sync {
    /// False once the handle has been closed or invalidated.
    fn is_open(&self) -> bool;

    /// Kind of the entry at `path`, `None` if missing.
    fn kind(&self, path: &str) -> Result<Option<EntryKind>>;

    /// Check whether `path` exists.
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.kind(path)?.is_some())
    }

    /// Read a whole file.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Read at most `len` leading bytes of a file.
    fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>> {
        let mut data = self.read(path)?;
        data.truncate(len);
        Ok(data)
    }

    /// Replace a file, creating parent directories as needed.
    fn write(&mut self, path: &str, data: &[u8]) -> Result<()>;

    /// Create a directory and its parents.
    fn create_dir_all(&mut self, path: &str) -> Result<()>;

    /// List direct children of a directory, sorted by name.
    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Delete a file or directory. Returns false if nothing existed.
    fn delete(&mut self, path: &str, recursive: bool) -> Result<bool>;

    /// Rename a file or directory within this node.
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// All entries below `path` as node-relative paths, parents first.
    fn walk(&self, path: &str) -> Result<Vec<(String, EntryKind)>> {
        let mut out = Vec::new();
        let mut pending = vec![path.to_string()];
        while let Some(dir) = pending.pop() {
            for entry in self.list_dir(&dir)? {
                let child = join(&dir, &entry.name);
                if entry.kind == EntryKind::Directory {
                    pending.push(child.clone());
                }
                out.push((child, entry.kind));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Join node-relative path segments.
pub(crate) fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{name}"),
    }
}

/// Content sniffing: does `head` start with an archive signature?
pub fn is_archive(head: &[u8]) -> bool {
    head.len() >= 4 && ARCHIVE_SIGNATURES.iter().any(|sig| head[..4] == sig[..])
}

/// True for names whose extension marks a plain data file.
pub fn has_plain_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| PLAIN_EXTENSIONS.iter().any(|p| p.eq_ignore_ascii_case(ext)))
}
