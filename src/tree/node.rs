//! Tree nodes: one owned filesystem handle each.
//!
//! # Storage
//!
//! ```text
//! Storage::Directory        DirFs over the project directory (never stale)
//! Storage::ArchiveFile(p)   ArchiveFs read from and persisted to file `p`
//! Storage::Entry(prefix)    ArchiveFs whose bytes are the entry `prefix`
//!                           inside the root node
//! ```
//!
//! A nested node never holds a reference to the root. Operations that
//! need it (open, persist) take the root as a parameter, and the prefix
//! doubles as the key back into the tree's cache.
//!
//! Lock nesting is always child node first, then root node.
//!
//! A node removed from the cache is retired for good. Its handle is never
//! opened again; holders of a stale `Arc` must resolve the path anew.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Local};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::{ProjectError, Result};
use crate::format::CompressionMethod;
use crate::fs::{ArchiveFs, DirFs, EntryKind, NodeFs};
use crate::path::LogicalPath;

// =============================================================================
// NodeHandle
// =============================================================================

/// The filesystem handle owned by a node.
#[derive(Debug)]
pub(crate) enum NodeHandle {
    Dir(DirFs),
    Archive(ArchiveFs),
}

impl NodeHandle {
    pub(crate) fn fs(&self) -> &dyn NodeFs {
        match self {
            Self::Dir(fs) => fs,
            Self::Archive(fs) => fs,
        }
    }

    pub(crate) fn fs_mut(&mut self) -> &mut dyn NodeFs {
        match self {
            Self::Dir(fs) => fs,
            Self::Archive(fs) => fs,
        }
    }
}

/// Where a node's content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Storage {
    Directory,
    ArchiveFile(PathBuf),
    Entry(LogicalPath),
}

// =============================================================================
// FsNode
// =============================================================================

/// One mounted filesystem: the project root or a nested archive.
#[derive(Debug)]
pub struct FsNode {
    storage: Storage,
    location: PathBuf,
    method: CompressionMethod,
    max_writes: usize,
    writes: AtomicUsize,
    reopens: AtomicUsize,
    last_access: AtomicU64,
    retired: AtomicBool,
    mounted_at: DateTime<Local>,
    handle: RwLock<NodeHandle>,
}

impl FsNode {
    /// The default root: a real directory.
    pub(crate) fn directory(root: &Path) -> Result<Self> {
        let fs = DirFs::open(root)?;
        Ok(Self::with_handle(
            Storage::Directory,
            root.to_path_buf(),
            CompressionMethod::Stored,
            0,
            NodeHandle::Dir(fs),
        ))
    }

    /// A root stored as a single archive file.
    pub(crate) fn archive_file(path: &Path, method: CompressionMethod, max_writes: usize) -> Result<Self> {
        let fs = ArchiveFs::from_file(path, "/", method)?;
        Ok(Self::with_handle(
            Storage::ArchiveFile(path.to_path_buf()),
            path.to_path_buf(),
            method,
            max_writes,
            NodeHandle::Archive(fs),
        ))
    }

    /// Mount the archive stored at `prefix` inside `root`.
    ///
    /// A missing entry gives an empty archive that is written on first close.
    pub(crate) fn mount(
        prefix: &LogicalPath,
        root: &FsNode,
        method: CompressionMethod,
        max_writes: usize,
    ) -> Result<Self> {
        let storage = Storage::Entry(prefix.clone());
        let handle = Self::open_entry(prefix, root, method)?;
        debug!(prefix = %prefix, method = %method, "mounted nested archive");
        Ok(Self::with_handle(
            storage,
            root.location.join(prefix.as_str()),
            method,
            max_writes,
            handle,
        ))
    }

    fn with_handle(
        storage: Storage,
        location: PathBuf,
        method: CompressionMethod,
        max_writes: usize,
        handle: NodeHandle,
    ) -> Self {
        Self {
            storage,
            location,
            method,
            max_writes,
            writes: AtomicUsize::new(0),
            reopens: AtomicUsize::new(0),
            last_access: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            mounted_at: Local::now(),
            handle: RwLock::new(handle),
        }
    }

    fn open_entry(prefix: &LogicalPath, root: &FsNode, method: CompressionMethod) -> Result<NodeHandle> {
        let fs = match root.load(prefix)? {
            Some(bytes) => ArchiveFs::from_bytes(bytes, prefix.as_str(), method)?,
            None => ArchiveFs::empty(prefix.as_str(), method),
        };
        Ok(NodeHandle::Archive(fs))
    }

    fn open_handle(&self, root: &FsNode) -> Result<NodeHandle> {
        match &self.storage {
            Storage::Directory => Ok(NodeHandle::Dir(DirFs::open(&self.location)?)),
            Storage::ArchiveFile(path) => Ok(NodeHandle::Archive(ArchiveFs::from_file(
                path,
                "/",
                self.method,
            )?)),
            Storage::Entry(prefix) => Self::open_entry(prefix, root, self.method),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Real location this node was mounted from.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Mount prefix inside the root, `None` for the root itself.
    pub fn prefix(&self) -> Option<&LogicalPath> {
        match &self.storage {
            Storage::Entry(prefix) => Some(prefix),
            _ => None,
        }
    }

    /// True for the root node.
    pub fn is_root(&self) -> bool {
        self.prefix().is_none()
    }

    /// True if this node is the real directory filesystem.
    pub fn is_default(&self) -> bool {
        self.storage == Storage::Directory
    }

    /// Compression method used when (re)opening.
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Writes since the last open.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Times the handle was reopened after being found closed.
    pub fn reopens(&self) -> usize {
        self.reopens.load(Ordering::Acquire)
    }

    /// When the node was created.
    pub fn mounted_at(&self) -> DateTime<Local> {
        self.mounted_at
    }

    /// True while the handle is usable.
    pub fn is_open(&self) -> bool {
        self.handle.read().fs().is_open()
    }

    /// Map a node-relative path to the handle's path form. Blank or `/` is the node root.
    pub fn resolve_current_path(&self, relative: &str) -> String {
        relative.trim_matches('/').to_string()
    }

    /// True once the node was removed from the cache.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Mark the node as removed from the cache. Called before it is closed.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, generation: u64) {
        self.last_access.fetch_max(generation, Ordering::Relaxed);
    }

    /// Total lock order: nested nodes by location first, the root last.
    pub(crate) fn lock_key(&self) -> (bool, &Path) {
        (self.is_root(), &self.location)
    }

    pub(crate) fn read_handle(&self) -> RwLockReadGuard<'_, NodeHandle> {
        self.handle.read()
    }

    pub(crate) fn write_handle(&self) -> RwLockWriteGuard<'_, NodeHandle> {
        self.handle.write()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Reopen the handle if it was closed underneath us.
    ///
    /// Returns true if a reopen happened. Content is reloaded from storage,
    /// not recreated. A retired node fails with [`ProjectError::Stale`].
    pub fn ensure_open(&self, root: &FsNode) -> Result<bool> {
        if self.handle.read().fs().is_open() {
            return Ok(false);
        }
        let mut handle = self.handle.write();
        self.ensure_open_locked(&mut handle, root)
    }

    /// [`ensure_open`](Self::ensure_open) under a write guard the caller keeps.
    pub(crate) fn ensure_open_locked(&self, handle: &mut NodeHandle, root: &FsNode) -> Result<bool> {
        if handle.fs().is_open() {
            return Ok(false);
        }
        if self.is_retired() {
            return Err(ProjectError::stale(self.location.display().to_string()));
        }
        warn!(location = %self.location.display(), "archive handle was closed, reopening");
        *handle = self.open_handle(root)?;
        self.writes.store(0, Ordering::Release);
        self.reopens.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    /// Count a write and cycle the handle once the threshold is reached.
    ///
    /// Cycling persists buffered entries and starts a fresh handle. A
    /// threshold of 0 disables it; the default root never cycles. A node
    /// closed by the cache in the meantime only has its counter reset, its
    /// content was persisted by that close.
    pub fn ensure_write(&self, root: &FsNode) -> Result<()> {
        if self.is_default() || self.max_writes == 0 {
            return Ok(());
        }
        if self.writes.fetch_add(1, Ordering::AcqRel) + 1 < self.max_writes {
            return Ok(());
        }
        let mut handle = self.handle.write();
        if self.writes.load(Ordering::Acquire) < self.max_writes {
            return Ok(());
        }
        if self.is_retired() || !handle.fs().is_open() {
            self.writes.store(0, Ordering::Release);
            return Ok(());
        }
        debug!(location = %self.location.display(), "write threshold reached, cycling handle");
        self.reopen_locked(&mut handle, root)
    }

    /// Persist and reopen the handle. A failing close is logged and the reopen goes ahead.
    pub fn reopen(&self, root: &FsNode) -> Result<()> {
        let mut handle = self.handle.write();
        self.reopen_locked(&mut handle, root)
    }

    fn reopen_locked(&self, handle: &mut NodeHandle, root: &FsNode) -> Result<()> {
        if handle.fs().is_open()
            && let Err(e) = self.persist_locked(handle, root)
        {
            warn!(location = %self.location.display(), error = %e, "closing archive before reopen failed");
        }
        *handle = self.open_handle(root)?;
        self.writes.store(0, Ordering::Release);
        Ok(())
    }

    /// Persist pending changes and close the handle.
    ///
    /// Removing the node from the cache is the caller's job. The default
    /// root has nothing to close.
    pub fn close(&self, root: &FsNode) -> Result<()> {
        if self.is_default() {
            return Ok(());
        }
        let mut handle = self.handle.write();
        if handle.fs().is_open() {
            self.persist_locked(&mut handle, root)?;
            debug!(location = %self.location.display(), "closed archive");
        }
        Ok(())
    }

    /// Write the handle back to its storage and close it.
    ///
    /// On failure the handle stays open with its buffered entries.
    fn persist_locked(&self, handle: &mut NodeHandle, root: &FsNode) -> Result<()> {
        let NodeHandle::Archive(archive) = handle else {
            return Ok(());
        };
        match &self.storage {
            Storage::ArchiveFile(path) => archive.finish_file(path),
            Storage::Entry(prefix) => {
                if let Some(bytes) = archive.encode()? {
                    root.store(prefix, &bytes)?;
                }
                archive.close();
                Ok(())
            }
            Storage::Directory => Ok(()),
        }
    }

    /// True if the node is open and holds no entries.
    pub(crate) fn is_empty(&self) -> Result<bool> {
        let handle = self.handle.read();
        if !handle.fs().is_open() {
            return Ok(false);
        }
        Ok(handle.fs().list_dir("")?.is_empty())
    }

    // =========================================================================
    // Root-side storage of nested archives
    // =========================================================================

    /// Bytes of the nested archive at `prefix`, `None` if there is none yet.
    fn load(&self, prefix: &LogicalPath) -> Result<Option<Vec<u8>>> {
        self.ensure_open(self)?;
        let handle = self.handle.read();
        match handle.fs().kind(prefix.as_str())? {
            Some(EntryKind::File) => Ok(Some(handle.fs().read(prefix.as_str())?)),
            Some(EntryKind::Directory) => Err(ProjectError::IsADirectory(prefix.to_string())),
            None => Ok(None),
        }
    }

    /// Store nested archive bytes at `prefix`.
    fn store(&self, prefix: &LogicalPath, bytes: &[u8]) -> Result<()> {
        self.ensure_open(self)?;
        self.handle.write().fs_mut().write(prefix.as_str(), bytes)?;
        self.ensure_write(self)
    }

    /// Remove the nested archive entry at `prefix`.
    pub(crate) fn remove_entry(&self, prefix: &LogicalPath) -> Result<bool> {
        self.ensure_open(self)?;
        let removed = self.handle.write().fs_mut().delete(prefix.as_str(), false)?;
        self.ensure_write(self)?;
        Ok(removed)
    }

    /// Close the handle without persisting, as an interrupted channel would.
    #[cfg(test)]
    pub(crate) fn invalidate(&self) {
        if let NodeHandle::Archive(archive) = &mut *self.handle.write() {
            archive.close();
        }
    }
}
