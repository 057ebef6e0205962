//! The filesystem manager: one root node plus lazily mounted nested archives.
//!
//! # Resolution
//!
//! ```text
//! logical path ──► resolve ──► ResolvedPath { node, inner }
//!                    │
//!                    ├── depth <  L   root node, path unchanged
//!                    ├── depth == L   classify(prefix, hint)
//!                    │                  PlainFile / Directory  → root node
//!                    │                  ArchiveMount           → nested node, inner ""
//!                    └── depth >  L   classify(first L components, Directory)
//!                                       ArchiveMount           → nested node, rest
//!                                       Directory (legacy)     → root node
//! ```
//!
//! `L` is the compressed level. Nested nodes live in a bounded
//! node cache; a cached prefix skips classification entirely.
//!
//! # Locking
//!
//! Lock order is cache, then nested node, then root node. Reads hold a
//! node's read lock, mutations its write lock, and every lock is released
//! before the next resolution.
//!
//! # Recovery
//!
//! Every operation checks, under the node lock, that the cache has not
//! retired the node since resolution; a retired node is dropped and the
//! path resolved again. Retired nodes are never reopened, so nothing can
//! write into a node the cache no longer tracks.
//!
//! A handle closed any other way surfaces as [`ProjectError::Stale`]. The
//! operation takes the node's write lock, reopens the handle and retries
//! once under that same lock. A second stale failure becomes
//! [`ProjectError::Unrecoverable`].

mod cache;
mod lock;
mod node;

pub use node::FsNode;

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use self::cache::NodeCache;
use self::lock::{LockedPair, lock_pair};
use crate::config::ProjectConfig;
use crate::error::{ProjectError, Result};
use crate::format::CompressionFormat;
use crate::fs::{EntryKind, NodeFs, has_plain_extension, is_archive, join};
use crate::path::{GlobMatcher, LogicalPath, normalize_location};

// =============================================================================
// Types
// =============================================================================

/// What the caller knows about a path before it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathHint {
    /// The path names a file.
    File,
    /// The path names a directory.
    Directory,
    /// Inspect the storage to find out.
    Unknown,
}

/// Classification of a path at the compressed depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// A regular entry of the root node.
    PlainFile,
    /// A plain directory of the root node (uncompressed legacy layout).
    Directory,
    /// A nested archive, mounted as its own node.
    ArchiveMount {
        /// False if the archive has not been written yet.
        exists: bool,
    },
}

/// Whether resolution may mount a nested archive that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    Create,
}

/// The node responsible for a path and the path inside that node.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPath {
    node: Arc<FsNode>,
    inner: String,
}

impl ResolvedPath {
    fn new(node: Arc<FsNode>, inner: &LogicalPath) -> Self {
        let inner = node.resolve_current_path(inner.as_str());
        Self { node, inner }
    }
}

/// Summary of a mounted nested archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Mount prefix relative to the project root.
    pub prefix: String,
    /// Real location of the archive.
    pub location: PathBuf,
    /// True while the handle is usable.
    pub open: bool,
    /// Writes since the handle was last opened.
    pub writes: usize,
    /// Reopens after the handle was found closed.
    pub reopens: usize,
    /// When the node was mounted.
    pub mounted_at: DateTime<Local>,
}

/// Filters for [`FsTree::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Glob matched against entry names.
    pub glob: Option<String>,
    /// Descend into directories and nested archives.
    pub recursive: bool,
    /// Report files.
    pub include_files: bool,
    /// Report directories (nested archives count as directories).
    pub include_dirs: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            glob: None,
            recursive: false,
            include_files: true,
            include_dirs: true,
        }
    }
}

impl ListOptions {
    /// Only report entries whose name matches `glob`.
    pub fn glob(mut self, glob: impl Into<String>) -> Self {
        self.glob = Some(glob.into());
        self
    }

    /// Walk the whole subtree.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Report files only.
    pub fn files_only(mut self) -> Self {
        self.include_files = true;
        self.include_dirs = false;
        self
    }

    /// Report directories only.
    pub fn dirs_only(mut self) -> Self {
        self.include_files = false;
        self.include_dirs = true;
        self
    }
}

// =============================================================================
// FsTree
// =============================================================================

/// Virtual project tree over a root node and a bounded set of nested archives.
///
/// Safe to share between threads; every call resolves its path anew.
#[derive(Debug)]
pub struct FsTree {
    location: PathBuf,
    root: Arc<FsNode>,
    cache: NodeCache,
    format: RwLock<CompressionFormat>,
    max_writes: usize,
    closed: AtomicBool,
}

impl FsTree {
    /// Open the tree described by `config`.
    ///
    /// An existing location must match the configured kind: a directory,
    /// or a regular file for an archive root. A missing one is created.
    pub fn open(config: &ProjectConfig) -> Result<Self> {
        check_location(config)?;
        let format = config.compression_format();
        check_format(&format)?;

        let location = normalize_location(&config.location);
        let root = if config.archive {
            FsNode::archive_file(&location, format.root_compression(), config.max_writes)?
        } else {
            FsNode::directory(&location)?
        };

        info!(
            location = %location.display(),
            format = %format,
            buffer_size = config.buffer_size,
            max_writes = config.max_writes,
            "opened project tree"
        );

        Ok(Self {
            location,
            root: Arc::new(root),
            cache: NodeCache::new(config.buffer_size),
            format: RwLock::new(format),
            max_writes: config.max_writes,
            closed: AtomicBool::new(false),
        })
    }

    /// Real location of the project.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The active compression format.
    pub fn compression_format(&self) -> CompressionFormat {
        self.format.read().clone()
    }

    /// Replace the compression format.
    ///
    /// `None` selects the format without nesting for the root kind. Open
    /// nested archives are closed first since their prefixes may no longer
    /// be mount points.
    pub fn set_compression_format(&self, format: Option<CompressionFormat>) -> Result<()> {
        self.check_open()?;
        let format = format.unwrap_or_else(|| ProjectConfig::unnested_format(!self.root.is_default()));
        check_format(&format)?;

        self.cache.drain_and_close(&self.root)?;
        debug!(format = %format, "changed compression format");
        *self.format.write() = format;
        Ok(())
    }

    /// Snapshot of the mounted nested archives, sorted by prefix.
    pub fn mounts(&self) -> Vec<MountInfo> {
        let mut mounts: Vec<MountInfo> = self
            .cache
            .snapshot()
            .iter()
            .filter_map(|node| {
                Some(MountInfo {
                    prefix: node.prefix()?.to_string(),
                    location: node.location().to_path_buf(),
                    open: node.is_open(),
                    writes: node.writes(),
                    reopens: node.reopens(),
                    mounted_at: node.mounted_at(),
                })
            })
            .collect();
        mounts.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        mounts
    }

    /// Number of mounted nested archives.
    pub fn mount_count(&self) -> usize {
        self.cache.len()
    }

    /// Evict nested archives if the cache is over capacity.
    pub fn evict_if_over_capacity(&self) -> usize {
        self.cache.evict_if_over_capacity(&self.root)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ProjectError::Closed)
        } else {
            Ok(())
        }
    }

    fn mount_level(&self) -> Option<usize> {
        self.format.read().mount_level()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn in_root(&self, path: &LogicalPath) -> ResolvedPath {
        ResolvedPath::new(Arc::clone(&self.root), path)
    }

    /// Find the node responsible for `path`.
    ///
    /// Returns `None` only for [`Access::ReadOnly`] when the nested archive
    /// the path lives in does not exist.
    fn resolve(&self, path: &LogicalPath, hint: PathHint, access: Access) -> Result<Option<ResolvedPath>> {
        self.check_open()?;
        let Some(level) = self.mount_level() else {
            return Ok(Some(self.in_root(path)));
        };
        let depth = path.depth();
        if depth < level {
            return Ok(Some(self.in_root(path)));
        }

        let prefix = path.prefix(level);
        let inner = path.suffix(level);
        let hint = if depth > level { PathHint::Directory } else { hint };

        if hint != PathHint::File
            && let Some(node) = self.cache.get(&prefix)
        {
            return Ok(Some(ResolvedPath::new(node, &inner)));
        }

        match self.classify(&prefix, hint)? {
            PathClass::ArchiveMount { exists: false } if access == Access::ReadOnly => Ok(None),
            PathClass::ArchiveMount { .. } => {
                let node = self.mount(&prefix, level)?;
                Ok(Some(ResolvedPath::new(node, &inner)))
            }
            PathClass::PlainFile | PathClass::Directory => Ok(Some(self.in_root(path))),
        }
    }

    /// Decide what the entry at the compressed depth is.
    pub(crate) fn classify(&self, prefix: &LogicalPath, hint: PathHint) -> Result<PathClass> {
        if hint == PathHint::File {
            return Ok(PathClass::PlainFile);
        }

        self.root.ensure_open(&self.root)?;
        let name = prefix.file_name().unwrap_or_default();
        let sniffed = {
            let handle = self.root.read_handle();
            let fs = handle.fs();
            match fs.kind(prefix.as_str())? {
                Some(EntryKind::File) if !has_plain_extension(name) => {
                    let head = fs.read_head(prefix.as_str(), 4)?;
                    Some((EntryKind::File, is_archive(&head)))
                }
                other => other.map(|kind| (kind, false)),
            }
        };

        // root lock released: the cache ranks above it
        Ok(match sniffed {
            Some((EntryKind::Directory, _)) => PathClass::Directory,
            Some((EntryKind::File, true)) => PathClass::ArchiveMount { exists: true },
            Some((EntryKind::File, false)) => PathClass::PlainFile,
            // mounted but not persisted yet
            None if self.cache.contains(prefix) => PathClass::ArchiveMount { exists: true },
            None if hint == PathHint::Directory => PathClass::ArchiveMount { exists: false },
            None => PathClass::PlainFile,
        })
    }

    fn mount(&self, prefix: &LogicalPath, level: usize) -> Result<Arc<FsNode>> {
        let method = self.format.read().compression(level);
        self.cache.get_or_create(prefix, &self.root, || {
            FsNode::mount(prefix, &self.root, method, self.max_writes)
        })
    }

    fn unrecoverable(node: &FsNode, err: ProjectError) -> ProjectError {
        if err.is_stale() {
            error!(location = %node.location().display(), "archive handle stale after reopen");
            ProjectError::Unrecoverable {
                location: node.location().display().to_string(),
                source: Box::new(err),
            }
        } else {
            err
        }
    }

    // =========================================================================
    // Locked execution
    // =========================================================================

    /// Run a read under the node's read lock, recovering once from a stale handle.
    ///
    /// A node the cache retired before the lock was taken is dropped and the
    /// path resolved again. A handle closed any other way is reopened under
    /// the write lock and the read retried once under that same lock.
    fn read_op<T>(
        &self,
        path: &LogicalPath,
        hint: PathHint,
        op: impl Fn(&dyn NodeFs, &str) -> Result<T>,
    ) -> Result<Option<T>> {
        loop {
            let Some(resolved) = self.resolve(path, hint, Access::ReadOnly)? else {
                return Ok(None);
            };
            let node = &resolved.node;
            let result = {
                let handle = node.read_handle();
                if node.is_retired() {
                    continue;
                }
                op(handle.fs(), &resolved.inner)
            };

            match result {
                Err(e) if e.is_stale() => {
                    warn!(path = %path, error = %e, "recovering stale archive handle");
                    let mut handle = node.write_handle();
                    if node.is_retired() {
                        continue;
                    }
                    node.ensure_open_locked(&mut handle, &self.root)?;
                    return op(handle.fs(), &resolved.inner)
                        .map(Some)
                        .map_err(|e| Self::unrecoverable(node, e));
                }
                result => return result.map(Some),
            }
        }
    }

    /// Run a mutation under the node's write lock, then count the write.
    ///
    /// Retired nodes and stale handles are handled as in [`read_op`](Self::read_op),
    /// except that the whole recovery happens under the one write guard.
    fn write_op<T>(
        &self,
        path: &LogicalPath,
        hint: PathHint,
        access: Access,
        op: impl Fn(&mut dyn NodeFs, &str) -> Result<T>,
    ) -> Result<Option<(ResolvedPath, T)>> {
        loop {
            let Some(resolved) = self.resolve(path, hint, access)? else {
                return Ok(None);
            };
            let node = &resolved.node;
            let value = {
                let mut handle = node.write_handle();
                if node.is_retired() {
                    continue;
                }
                match op(handle.fs_mut(), &resolved.inner) {
                    Err(e) if e.is_stale() => {
                        warn!(path = %path, error = %e, "recovering stale archive handle");
                        node.ensure_open_locked(&mut handle, &self.root)?;
                        op(handle.fs_mut(), &resolved.inner).map_err(|e| Self::unrecoverable(node, e))?
                    }
                    result => result?,
                }
            };

            node.ensure_write(&self.root)?;
            return Ok(Some((resolved, value)));
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Read a whole file.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = LogicalPath::parse(path)?;
        self.read_op(&path, PathHint::File, |fs, inner| fs.read(inner))?
            .ok_or_else(|| ProjectError::NotFound(path.to_string()))
    }

    /// Replace a file, creating parents and nested archives as needed.
    pub fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = LogicalPath::parse(path)?;
        if path.is_root() {
            return Err(ProjectError::IsADirectory(path.to_string()));
        }
        self.write_op(&path, PathHint::File, Access::Create, |fs, inner| fs.write(inner, data))?;
        Ok(())
    }

    /// Create a directory. At the compressed depth this creates a nested archive.
    pub fn create_dir(&self, path: &str) -> Result<()> {
        let path = LogicalPath::parse(path)?;
        self.write_op(&path, PathHint::Directory, Access::Create, |fs, inner| {
            fs.create_dir_all(inner)
        })?;
        Ok(())
    }

    /// Kind of the entry at `path`. Nested archives report as directories.
    pub fn kind(&self, path: &str) -> Result<Option<EntryKind>> {
        let path = LogicalPath::parse(path)?;
        Ok(self
            .read_op(&path, PathHint::Unknown, |fs, inner| fs.kind(inner))?
            .flatten())
    }

    /// Check whether `path` exists.
    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.kind(path)?.is_some())
    }

    /// Check whether `path` is a directory or nested archive.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.kind(path)? == Some(EntryKind::Directory))
    }

    /// Delete a file or directory. Returns false if nothing existed.
    ///
    /// Nested archives at or below `path` are closed first. Removing the
    /// last entry of a nested archive removes the archive itself.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
        let path = LogicalPath::parse(path)?;
        if path.is_root() {
            return Err(ProjectError::invalid_path("/", "cannot delete the project root"));
        }
        self.check_open()?;
        self.retire_mounts_under(&path)?;

        let Some((resolved, deleted)) = self.write_op(&path, PathHint::File, Access::ReadOnly, |fs, inner| {
            fs.delete(inner, recursive)
        })?
        else {
            return Ok(false);
        };
        if deleted {
            self.remove_if_empty(&resolved.node)?;
        }
        Ok(deleted)
    }

    /// Move a file or directory, across nested archives if needed.
    pub fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let from = LogicalPath::parse(from)?;
        let to = LogicalPath::parse(to)?;
        if from.is_root() || to.is_root() {
            return Err(ProjectError::invalid_path("/", "cannot move the project root"));
        }
        if from == to {
            return Ok(());
        }
        if to.starts_with(&from) {
            return Err(ProjectError::invalid_path(to.as_str(), "cannot move a path into itself"));
        }
        self.check_open()?;
        self.retire_mounts_under(&from)?;
        self.retire_mounts_under(&to)?;

        self.move_entries(&from, &to)
    }

    /// Move under both node locks, re-resolving retired nodes and
    /// recovering once from a stale handle.
    ///
    /// Reopening a nested node needs the root lock, which the pair may
    /// already hold, so recovery releases both locks, reopens and retries.
    fn move_entries(&self, from: &LogicalPath, to: &LogicalPath) -> Result<()> {
        let mut recovering = false;
        loop {
            let source = self
                .resolve(from, PathHint::File, Access::ReadOnly)?
                .ok_or_else(|| ProjectError::NotFound(from.to_string()))?;
            let target = self
                .resolve(to, PathHint::File, Access::Create)?
                .ok_or_else(|| ProjectError::NotFound(to.to_string()))?;
            if recovering {
                self.root.ensure_open(&self.root)?;
                for node in [&source.node, &target.node] {
                    if let Err(e) = node.ensure_open(&self.root)
                        && !node.is_retired()
                    {
                        return Err(e);
                    }
                }
            }

            let moved = {
                let pair = lock_pair(&source.node, &target.node);
                if source.node.is_retired() || target.node.is_retired() {
                    continue;
                }
                match pair {
                    LockedPair::Same(mut handle) => handle.fs_mut().rename(&source.inner, &target.inner),
                    LockedPair::Split {
                        source: mut src,
                        target: mut dst,
                    } => transfer(src.fs_mut(), &source.inner, dst.fs_mut(), &target.inner),
                }
            };

            match moved {
                Err(e) if e.is_stale() && !recovering => {
                    warn!(from = %from, to = %to, error = %e, "recovering stale archive handle");
                    recovering = true;
                    continue;
                }
                Err(e) => {
                    return Err(if recovering { Self::unrecoverable(&source.node, e) } else { e });
                }
                Ok(()) => {}
            }

            source.node.ensure_write(&self.root)?;
            if !Arc::ptr_eq(&source.node, &target.node) {
                target.node.ensure_write(&self.root)?;
            }
            return self.remove_if_empty(&source.node);
        }
    }

    /// Close nested archives mounted at or below `path`.
    fn retire_mounts_under(&self, path: &LogicalPath) -> Result<()> {
        if let Some(level) = self.mount_level()
            && path.depth() <= level
        {
            let retired = self.cache.retire(&self.root, |prefix| prefix.starts_with(path))?;
            if retired > 0 {
                debug!(path = %path, retired, "closed nested archives below path");
            }
        }
        Ok(())
    }

    /// Drop a nested archive that no longer has entries.
    fn remove_if_empty(&self, node: &FsNode) -> Result<()> {
        let Some(prefix) = node.prefix() else {
            return Ok(());
        };
        self.cache
            .retire_if_empty(prefix, &self.root, || self.root.remove_entry(prefix))?;
        Ok(())
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// List entries below `scope`, as paths relative to the project root.
    ///
    /// The scope itself is reported first when directories are included and
    /// its name matches. Nested archives are reported as directories and
    /// walked like them. Missing or non-directory scopes list nothing.
    pub fn list(&self, scope: &str, options: &ListOptions) -> Result<Vec<LogicalPath>> {
        let scope = LogicalPath::parse(scope)?;
        let glob = options.glob.as_deref().map(GlobMatcher::new).transpose()?;
        let matches = |name: &str| glob.as_ref().is_none_or(|glob| glob.is_match(name));

        if self
            .read_op(&scope, PathHint::Directory, |fs, inner| fs.kind(inner))?
            .flatten()
            != Some(EntryKind::Directory)
        {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        if options.include_dirs
            && let Some(name) = scope.file_name()
            && matches(name)
        {
            found.push(scope.clone());
        }

        let mut pending = VecDeque::from([scope]);
        while let Some(dir) = pending.pop_front() {
            for (child, kind) in self.children(&dir)? {
                let name = child.file_name().unwrap_or_default();
                let wanted = match kind {
                    EntryKind::Directory => options.include_dirs,
                    EntryKind::File => options.include_files,
                };
                if wanted && matches(name) {
                    found.push(child.clone());
                }
                if options.recursive && kind == EntryKind::Directory {
                    pending.push_back(child);
                }
            }
        }
        Ok(found)
    }

    /// Direct children of a directory, nested archives reported as directories.
    fn children(&self, dir: &LogicalPath) -> Result<Vec<(LogicalPath, EntryKind)>> {
        let Some(entries) = self.read_op(dir, PathHint::Directory, |fs, inner| fs.list_dir(inner))? else {
            return Ok(Vec::new());
        };
        let boundary = self.mount_level().is_some_and(|level| dir.depth() + 1 == level);

        let mut children = entries
            .into_iter()
            .map(|entry| {
                let child = dir.child(&entry.name);
                let kind = match entry.kind {
                    EntryKind::File if boundary => match self.classify(&child, PathHint::Unknown)? {
                        PathClass::ArchiveMount { .. } => EntryKind::Directory,
                        _ => EntryKind::File,
                    },
                    kind => kind,
                };
                Ok((child, kind))
            })
            .collect::<Result<Vec<_>>>()?;

        if boundary {
            // mounts that have not been persisted yet
            for node in self.cache.snapshot() {
                if let Some(prefix) = node.prefix()
                    && prefix.parent().as_ref() == Some(dir)
                    && !children.iter().any(|(child, _)| child == prefix)
                {
                    children.push((prefix.clone(), EntryKind::Directory));
                }
            }
            children.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(children)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist every nested archive and, for an archive root, the root itself.
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        self.cache.drain_and_close(&self.root)?;
        if !self.root.is_default() {
            self.root.reopen(&self.root)?;
        }
        debug!(location = %self.location.display(), "flushed project tree");
        Ok(())
    }

    /// Persist everything and close the tree. Later calls fail with [`ProjectError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let children = self.cache.drain_and_close(&self.root);
        let root = self.root.close(&self.root);
        info!(location = %self.location.display(), "closed project tree");
        children.and(root)
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for FsTree {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(location = %self.location.display(), error = %e, "closing project tree on drop failed");
        }
    }
}

fn check_location(config: &ProjectConfig) -> Result<()> {
    let meta = match std::fs::metadata(&config.location) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let reason = match (config.archive, meta.is_file(), meta.is_dir()) {
        (true, true, _) | (false, _, true) => return Ok(()),
        (true, ..) => "expected an archive file",
        (false, ..) => "expected a directory",
    };
    Err(ProjectError::InvalidLocation {
        path: config.location.clone(),
        reason,
    })
}

fn check_format(format: &CompressionFormat) -> Result<()> {
    if format.is_multi_level() {
        return Err(ProjectError::UnsupportedFormat {
            levels: format.compression_levels().to_vec(),
        });
    }
    Ok(())
}

/// Copy `from` out of one node into another, then delete the source.
fn transfer(src: &mut dyn NodeFs, from: &str, dst: &mut dyn NodeFs, to: &str) -> Result<()> {
    match src.kind(from)? {
        None => return Err(ProjectError::NotFound(from.to_string())),
        Some(EntryKind::File) => {
            let data = src.read(from)?;
            dst.write(to, &data)?;
        }
        Some(EntryKind::Directory) => {
            dst.create_dir_all(to)?;
            for (child, kind) in src.walk(from)? {
                let relative = if from.is_empty() { &child[..] } else { &child[from.len() + 1..] };
                let target = join(to, relative);
                match kind {
                    EntryKind::Directory => dst.create_dir_all(&target)?,
                    EntryKind::File => dst.write(&target, &src.read(&child)?)?,
                }
            }
        }
    }
    src.delete(from, true)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CompressionMethod;
    use std::sync::Barrier;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tree(dir: &TempDir, buffer_size: usize) -> FsTree {
        let config = ProjectConfig::builder(dir.path())
            .buffer_size(buffer_size)
            .max_writes(0)
            .build();
        FsTree::open(&config).unwrap()
    }

    fn archive_tree(dir: &TempDir) -> FsTree {
        let config = ProjectConfig::builder(dir.path().join("project.zip"))
            .archive(true)
            .build();
        FsTree::open(&config).unwrap()
    }

    fn lp(path: &str) -> LogicalPath {
        LogicalPath::parse(path).unwrap()
    }

    fn paths(list: Vec<LogicalPath>) -> Vec<String> {
        list.iter().map(|p| p.as_str().to_string()).collect()
    }

    #[test]
    fn test_round_trip_through_flush() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);

        tree.write("c1/spectrum.ms", b"peaks").unwrap();
        tree.write("c1/scores/formula.tsv", b"C6H12O6\t0.9").unwrap();
        assert_eq!(tree.read("c1/spectrum.ms").unwrap(), b"peaks");

        tree.flush().unwrap();
        assert_eq!(tree.mount_count(), 0);
        assert!(is_archive(&std::fs::read(dir.path().join("c1")).unwrap()));
        assert_eq!(tree.read("c1/scores/formula.tsv").unwrap(), b"C6H12O6\t0.9");
    }

    #[test]
    fn test_round_trip_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let tree = archive_tree(&dir);
            tree.write("c1/a.txt", b"one").unwrap();
            tree.write("version.info", b"1").unwrap();
            tree.close().unwrap();
        }
        let tree = archive_tree(&dir);
        assert_eq!(tree.read("c1/a.txt").unwrap(), b"one");
        assert_eq!(tree.read("version.info").unwrap(), b"1");
        assert!(tree.is_dir("c1").unwrap());
    }

    #[test]
    fn test_depth_routing() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);

        tree.write("top.config", b"x").unwrap();
        tree.write("c1/inner/file", b"y").unwrap();
        assert_eq!(tree.mount_count(), 1);
        assert!(dir.path().join("top.config").is_file());

        // a plain file at the compressed depth stays in the root
        tree.write("summary.tsv", b"z").unwrap();
        assert_eq!(tree.mount_count(), 1);

        let resolved = tree.resolve(&lp("c1/inner/file"), PathHint::File, Access::Create).unwrap().unwrap();
        assert_eq!(resolved.inner, "inner/file");
        assert_eq!(resolved.node.prefix(), Some(&lp("c1")));

        let resolved = tree.resolve(&lp("top.config"), PathHint::File, Access::Create).unwrap().unwrap();
        assert!(resolved.node.is_root());
        assert_eq!(resolved.inner, "top.config");
    }

    #[test]
    fn test_legacy_directory_resolves_in_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("old")).unwrap();
        std::fs::write(dir.path().join("old/file"), b"legacy").unwrap();
        let tree = tree(&dir, 8);

        assert_eq!(tree.classify(&lp("old"), PathHint::Unknown).unwrap(), PathClass::Directory);
        assert_eq!(tree.read("old/file").unwrap(), b"legacy");
        assert_eq!(tree.mount_count(), 0);
    }

    #[test]
    fn test_classify() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/x", b"1").unwrap();
        tree.flush().unwrap();
        std::fs::write(dir.path().join("plain"), b"text").unwrap();
        std::fs::write(dir.path().join("fake.tsv"), b"PK\x03\x04").unwrap();

        assert_eq!(tree.classify(&lp("c1"), PathHint::Unknown).unwrap(), PathClass::ArchiveMount { exists: true });
        assert_eq!(tree.classify(&lp("c1"), PathHint::File).unwrap(), PathClass::PlainFile);
        assert_eq!(tree.classify(&lp("plain"), PathHint::Unknown).unwrap(), PathClass::PlainFile);
        assert_eq!(tree.classify(&lp("fake.tsv"), PathHint::Unknown).unwrap(), PathClass::PlainFile);
        assert_eq!(tree.classify(&lp("new"), PathHint::Directory).unwrap(), PathClass::ArchiveMount { exists: false });
        assert_eq!(tree.classify(&lp("new"), PathHint::Unknown).unwrap(), PathClass::PlainFile);
    }

    #[test]
    fn test_read_only_access_does_not_mount() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);

        assert!(!tree.exists("missing/file").unwrap());
        assert!(tree.read("missing/file").unwrap_err().is_not_found());
        assert!(tree.list("missing", &ListOptions::default()).unwrap().is_empty());
        assert!(!tree.delete("missing/file", false).unwrap());
        assert_eq!(tree.mount_count(), 0);
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_single_mount_under_concurrent_resolution() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        let barrier = Barrier::new(16);

        let nodes: Vec<Arc<FsNode>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let (tree, barrier) = (&tree, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        tree.write(&format!("shared/file{i}"), b"x").unwrap();
                        tree.resolve(&lp("shared/file0"), PathHint::File, Access::Create)
                            .unwrap()
                            .unwrap()
                            .node
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(nodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(tree.mount_count(), 1);
        for i in 0..16 {
            assert!(tree.exists(&format!("shared/file{i}")).unwrap());
        }
    }

    #[test]
    fn test_eviction_count_and_closure() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 10);

        let mut nodes = Vec::new();
        for i in 0..10 {
            tree.write(&format!("c{i}/f"), b"x").unwrap();
            nodes.push(tree.resolve(&lp(&format!("c{i}/f")), PathHint::File, Access::Create).unwrap().unwrap().node);
        }
        assert_eq!(tree.mount_count(), 10);

        tree.write("c10/f", b"x").unwrap();
        // ceil(0.2 * 10) = 2 oldest nodes closed
        assert_eq!(tree.mount_count(), 9);
        assert!(!nodes[0].is_open());
        assert!(!nodes[1].is_open());
        assert!(nodes[2].is_open());
        assert!(dir.path().join("c0").is_file());
        assert_eq!(tree.read("c0/f").unwrap(), b"x");
    }

    #[test]
    fn test_capacity_two_scenario() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 2);

        tree.write("a/f1", b"A").unwrap();
        tree.write("b/f1", b"B").unwrap();
        tree.write("c/f1", b"C").unwrap();
        let mounted: Vec<String> = tree.mounts().into_iter().map(|m| m.prefix).collect();
        assert_eq!(mounted, vec!["b", "c"]);
        assert!(dir.path().join("a").is_file());

        assert_eq!(tree.read("a/f1").unwrap(), b"A");
        let mounted: Vec<String> = tree.mounts().into_iter().map(|m| m.prefix).collect();
        assert_eq!(mounted, vec!["a", "c"]);
        assert_eq!(tree.read("b/f1").unwrap(), b"B");
    }

    #[test]
    fn test_recovery_is_transparent() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/data", b"content").unwrap();
        tree.flush().unwrap();

        let before = tree.read("c1/data").unwrap();
        let node = tree.resolve(&lp("c1/data"), PathHint::File, Access::ReadOnly).unwrap().unwrap().node;
        node.invalidate();

        assert_eq!(tree.read("c1/data").unwrap(), before);
        assert_eq!(node.reopens(), 1);
        assert_eq!(tree.mounts()[0].reopens, 1);

        node.invalidate();
        tree.write("c1/more", b"x").unwrap();
        assert_eq!(node.reopens(), 2);
        assert_eq!(tree.read("c1/more").unwrap(), b"x");
    }

    #[test]
    fn test_archive_root_recovers() {
        let dir = TempDir::new().unwrap();
        let tree = archive_tree(&dir);
        tree.write("notes.txt", b"n").unwrap();
        tree.flush().unwrap();

        tree.root.invalidate();
        assert_eq!(tree.read("notes.txt").unwrap(), b"n");
        assert_eq!(tree.root.reopens(), 1);
    }

    #[test]
    fn test_delete_last_entry_removes_archive() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/a", b"1").unwrap();
        tree.write("c1/b", b"2").unwrap();
        tree.flush().unwrap();

        assert!(tree.delete("c1/a", false).unwrap());
        assert!(dir.path().join("c1").exists());
        assert!(tree.delete("c1/b", false).unwrap());
        assert_eq!(tree.mount_count(), 0);
        assert!(!dir.path().join("c1").exists());
        assert!(!tree.exists("c1").unwrap());
    }

    #[test]
    fn test_delete_mount_boundary() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/a", b"1").unwrap();

        assert!(tree.delete("c1", false).unwrap());
        assert_eq!(tree.mount_count(), 0);
        assert!(!dir.path().join("c1").exists());
        assert!(tree.delete("/", true).is_err());
    }

    #[test]
    fn test_move_within_and_across_nodes() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("a/x", b"1").unwrap();
        tree.write("a/dir/y", b"2").unwrap();
        tree.write("a/keep", b"3").unwrap();

        tree.move_path("a/x", "a/z").unwrap();
        assert_eq!(tree.read("a/z").unwrap(), b"1");

        tree.move_path("a/dir", "b/moved").unwrap();
        assert_eq!(tree.read("b/moved/y").unwrap(), b"2");
        assert!(!tree.exists("a/dir").unwrap());

        tree.move_path("a/keep", "kept.txt").unwrap();
        assert_eq!(tree.read("kept.txt").unwrap(), b"3");
        assert!(tree.move_path("a", "a/inside").is_err());
    }

    #[test]
    fn test_move_whole_archive() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("a/x", b"1").unwrap();

        tree.move_path("a", "b").unwrap();
        assert!(!dir.path().join("a").exists());
        assert_eq!(tree.read("b/x").unwrap(), b"1");
    }

    #[test]
    fn test_opposite_moves_make_progress() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        for i in 0..50 {
            tree.write(&format!("a/x{i}"), b"a").unwrap();
            tree.write(&format!("b/y{i}"), b"b").unwrap();
        }
        let (done, finished) = mpsc::channel();

        std::thread::scope(|s| {
            let (t1, d1) = (&tree, done.clone());
            s.spawn(move || {
                for i in 0..50 {
                    t1.move_path(&format!("a/x{i}"), &format!("b/x{i}")).unwrap();
                }
                d1.send(()).unwrap();
            });
            let (t2, d2) = (&tree, done);
            s.spawn(move || {
                for i in 0..50 {
                    t2.move_path(&format!("b/y{i}"), &format!("a/y{i}")).unwrap();
                }
                d2.send(()).unwrap();
            });
            for _ in 0..2 {
                finished
                    .recv_timeout(Duration::from_secs(60))
                    .expect("opposite moves deadlocked");
            }
        });

        assert_eq!(tree.read("b/x49").unwrap(), b"a");
        assert_eq!(tree.read("a/y49").unwrap(), b"b");
    }

    #[test]
    fn test_list() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/spectrum.ms", b"").unwrap();
        tree.write("c1/scores/a.tsv", b"").unwrap();
        tree.write("c2/spectrum.ms", b"").unwrap();
        tree.write("summary.tsv", b"").unwrap();
        tree.flush().unwrap();

        let top = paths(tree.list("", &ListOptions::default()).unwrap());
        assert_eq!(top, vec!["c1", "c2", "summary.tsv"]);

        let dirs = paths(tree.list("", &ListOptions::default().dirs_only()).unwrap());
        assert_eq!(dirs, vec!["c1", "c2"]);

        let all = paths(tree.list("", &ListOptions::default().recursive(true).files_only()).unwrap());
        assert_eq!(all, vec!["summary.tsv", "c1/spectrum.ms", "c2/spectrum.ms", "c1/scores/a.tsv"]);

        let tsv = paths(tree.list("", &ListOptions::default().recursive(true).glob("*.tsv")).unwrap());
        assert_eq!(tsv, vec!["summary.tsv", "c1/scores/a.tsv"]);

        let scoped = paths(tree.list("c1", &ListOptions::default()).unwrap());
        assert_eq!(scoped, vec!["c1", "c1/scores", "c1/spectrum.ms"]);
    }

    #[test]
    fn test_flush_and_close() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/x", b"1").unwrap();

        tree.close().unwrap();
        assert!(tree.is_closed());
        assert!(dir.path().join("c1").is_file());
        assert!(matches!(tree.read("c1/x"), Err(ProjectError::Closed)));
        assert!(matches!(tree.flush(), Err(ProjectError::Closed)));
        tree.close().unwrap();
    }

    #[test]
    fn test_drop_persists() {
        let dir = TempDir::new().unwrap();
        {
            let tree = tree(&dir, 8);
            tree.write("c1/x", b"1").unwrap();
        }
        assert!(dir.path().join("c1").is_file());
    }

    #[test]
    fn test_set_compression_format() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("c1/x", b"1").unwrap();

        let err = tree
            .set_compression_format(Some(CompressionFormat::new([1, 2], CompressionMethod::Deflated)))
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(tree.compression_format(), CompressionFormat::default());

        tree.set_compression_format(None).unwrap();
        assert_eq!(tree.mount_count(), 0);
        assert!(tree.compression_format().has_no_levels());

        // without nesting the persisted archive is just a file
        tree.write("c2/x", b"2").unwrap();
        assert!(dir.path().join("c2").is_dir());
        assert!(is_archive(&tree.read("c1").unwrap()));
    }

    #[test]
    fn test_write_threshold_cycles_handle() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::builder(dir.path()).max_writes(3).build();
        let tree = FsTree::open(&config).unwrap();

        tree.write("c1/a", b"1").unwrap();
        tree.write("c1/b", b"2").unwrap();
        assert!(!dir.path().join("c1").exists());
        tree.write("c1/c", b"3").unwrap();
        assert!(dir.path().join("c1").is_file());
        assert_eq!(tree.mounts()[0].writes, 0);
        assert_eq!(tree.read("c1/a").unwrap(), b"1");
    }

    #[test]
    fn test_concurrent_writes_with_small_cache_and_cycling() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::builder(dir.path()).buffer_size(2).max_writes(2).build();
        let tree = FsTree::open(&config).unwrap();
        let threads = 8;
        let per_thread = 100;

        let failures: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let tree = &tree;
                    s.spawn(move || {
                        (0..per_thread)
                            .filter_map(|i| {
                                let path = format!("c{}/t{t}_{i}", i % 4);
                                tree.write(&path, path.as_bytes()).err().map(|e| format!("{path}: {e}"))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        assert!(failures.is_empty(), "{failures:?}");

        tree.flush().unwrap();
        for t in 0..threads {
            for i in 0..per_thread {
                let path = format!("c{}/t{t}_{i}", i % 4);
                assert_eq!(tree.read(&path).unwrap(), path.as_bytes());
            }
        }
    }

    #[test]
    fn test_evicted_node_does_not_swallow_writes() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::builder(dir.path()).buffer_size(1).max_writes(2).build();
        let tree = FsTree::open(&config).unwrap();
        tree.write("c1/a", b"1").unwrap();
        let node = tree.resolve(&lp("c1/a"), PathHint::File, Access::ReadOnly).unwrap().unwrap().node;

        tree.write("c2/a", b"2").unwrap();
        assert!(node.is_retired());
        node.ensure_write(&tree.root).unwrap();
        assert!(!node.is_open());

        tree.write("c1/b", b"3").unwrap();
        tree.flush().unwrap();
        assert_eq!(tree.read("c1/a").unwrap(), b"1");
        assert_eq!(tree.read("c1/b").unwrap(), b"3");
        assert_eq!(node.reopens(), 0);
    }

    #[test]
    fn test_open_rejects_wrong_location_kind() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("p.zip");
        std::fs::write(&file, b"").unwrap();

        let err = FsTree::open(&ProjectConfig::builder(&file).build()).unwrap_err();
        assert!(matches!(err, ProjectError::InvalidLocation { reason: "expected a directory", .. }));
        assert!(err.is_config());

        let config = ProjectConfig::builder(dir.path()).archive(true).build();
        assert!(FsTree::open(&config).unwrap_err().is_config());
    }

    #[test]
    fn test_path_below_file_does_not_exist() {
        let dir = TempDir::new().unwrap();
        let tree = tree(&dir, 8);
        tree.write("summary.tsv", b"k\tv\n").unwrap();

        assert!(!tree.exists("summary.tsv/x").unwrap());
        assert_eq!(tree.kind("summary.tsv/x").unwrap(), None);
    }
}
