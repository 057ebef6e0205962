//! ZIP archive filesystem with buffered modifications.
//!
//! # Layout
//!
//! ```text
//! ArchiveFs
//! ├── reader: ZipArchive over a file or in-memory bytes (lazy entry reads)
//! └── entries: BTreeMap<name, Entry>
//!     ├── Dir              explicit directory entry
//!     ├── Stored(index)    unchanged entry, raw-copied on persist
//!     └── Buffered(bytes)  written since open, encoded on persist
//! ```
//!
//! Nothing touches the backing store until the handle is persisted. Closing
//! or invalidating the handle makes every further call fail with a stale
//! handle error so the owning node can reopen it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::{DirEntry, EntryKind, NodeFs};
use crate::error::{ProjectError, Result};
use crate::format::CompressionMethod;

/// Reader backing an archive.
trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

type Reader = ZipArchive<Box<dyn ReadSeek>>;

#[derive(Debug, Clone)]
enum Entry {
    Dir,
    Stored(usize),
    Buffered(Vec<u8>),
}

impl Entry {
    fn kind(&self) -> EntryKind {
        match self {
            Self::Dir => EntryKind::Directory,
            Self::Stored(_) | Self::Buffered(_) => EntryKind::File,
        }
    }
}

/// An open ZIP archive.
pub struct ArchiveFs {
    location: String,
    method: CompressionMethod,
    reader: Mutex<Option<Reader>>,
    entries: BTreeMap<String, Entry>,
    open: bool,
    dirty: bool,
}

impl std::fmt::Debug for ArchiveFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveFs")
            .field("location", &self.location)
            .field("method", &self.method)
            .field("entries", &self.entries.len())
            .field("open", &self.open)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl ArchiveFs {
    /// A new archive without entries. It is written on first persist.
    pub fn empty(location: impl Into<String>, method: CompressionMethod) -> Self {
        Self {
            location: location.into(),
            method,
            reader: Mutex::new(None),
            entries: BTreeMap::new(),
            open: true,
            dirty: true,
        }
    }

    /// Open an archive file, or start an empty one if it does not exist.
    pub fn from_file(path: &Path, location: impl Into<String>, method: CompressionMethod) -> Result<Self> {
        let location = location.into();
        match fs::File::open(path) {
            Ok(file) => Self::from_reader(Box::new(file), location, method),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty(location, method)),
            Err(e) => Err(e.into()),
        }
    }

    /// Open an archive held in memory.
    pub fn from_bytes(bytes: Vec<u8>, location: impl Into<String>, method: CompressionMethod) -> Result<Self> {
        Self::from_reader(Box::new(Cursor::new(bytes)), location.into(), method)
    }

    fn from_reader(reader: Box<dyn ReadSeek>, location: String, method: CompressionMethod) -> Result<Self> {
        let mut archive =
            ZipArchive::new(reader).map_err(|e| ProjectError::archive(&location, e))?;

        let mut entries = BTreeMap::new();
        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|e| ProjectError::archive(&location, e))?;
            let name = file.name().trim_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            let entry = if file.is_dir() {
                Entry::Dir
            } else {
                Entry::Stored(index)
            };
            entries.insert(name, entry);
        }

        Ok(Self {
            location,
            method,
            reader: Mutex::new(Some(archive)),
            entries,
            open: true,
            dirty: false,
        })
    }

    /// Location used in error messages.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// True if the archive has changes that are not persisted yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode the archive to bytes, `None` when nothing changed since open.
    ///
    /// The handle stays open; call [`close`](Self::close) once the bytes are stored.
    pub fn encode(&self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        if !self.dirty {
            return Ok(None);
        }
        Ok(Some(self.write_to(Cursor::new(Vec::new()))?.into_inner()))
    }

    /// Encode the archive to bytes and close the handle.
    pub fn finish_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let bytes = self.encode()?;
        self.close();
        Ok(bytes)
    }

    /// Write the archive to `path` (atomically) and close the handle.
    pub fn finish_file(&mut self, path: &Path) -> Result<()> {
        self.check_open()?;
        if self.dirty {
            let parent = path.parent().unwrap_or(Path::new("."));
            fs::create_dir_all(parent)?;
            let mut tmp = NamedTempFile::new_in(parent)?;
            self.write_to(tmp.as_file_mut())?;
            tmp.as_file().sync_all()?;
            // drop the reader before replacing the file it reads from
            self.release();
            tmp.persist(path).map_err(|e| ProjectError::Io(e.error))?;
        } else {
            self.release();
        }
        Ok(())
    }

    /// Close the handle, dropping unpersisted changes.
    pub fn close(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        *self.reader.get_mut() = None;
        self.open = false;
        self.dirty = false;
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ProjectError::stale(&self.location))
        }
    }

    fn write_to<W: Write + Seek>(&self, sink: W) -> Result<W> {
        let err = |e| ProjectError::archive(&self.location, e);
        let options = SimpleFileOptions::default().compression_method(self.method.to_zip());
        let mut reader = self.reader.lock();
        let mut writer = ZipWriter::new(sink);

        for (name, entry) in &self.entries {
            match entry {
                Entry::Dir => writer.add_directory(format!("{name}/"), options).map_err(err)?,
                Entry::Stored(index) => {
                    let archive = reader
                        .as_mut()
                        .ok_or_else(|| ProjectError::stale(&self.location))?;
                    let file = archive.by_index_raw(*index).map_err(err)?;
                    writer.raw_copy_file_rename(file, name.as_str()).map_err(err)?;
                }
                Entry::Buffered(data) => {
                    writer.start_file(name.as_str(), options).map_err(err)?;
                    writer.write_all(data)?;
                }
            }
        }
        writer.finish().map_err(err)
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(name, _)| name.starts_with(&prefix))
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reject writes below an existing file.
    fn check_ancestors(&self, path: &str) -> Result<()> {
        let mut ancestor = String::new();
        let parts: Vec<&str> = path.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(part);
            if matches!(self.entries.get(&ancestor), Some(Entry::Stored(_) | Entry::Buffered(_))) {
                return Err(ProjectError::NotADirectory(ancestor));
            }
        }
        Ok(())
    }

    /// Keep a parent directory visible after its last child went away.
    fn keep_parent(&mut self, path: &str) {
        if let Some((parent, _)) = path.rsplit_once('/')
            && !self.entries.contains_key(parent)
            && !self.has_children(parent)
        {
            self.entries.insert(parent.to_string(), Entry::Dir);
        }
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl NodeFs for ArchiveFs {
    fn is_open(&self) -> bool {
        self.open
    }

    fn kind(&self, path: &str) -> Result<Option<EntryKind>> {
        self.check_open()?;
        let path = normalize(path);
        if path.is_empty() {
            return Ok(Some(EntryKind::Directory));
        }
        Ok(match self.entries.get(path) {
            Some(entry) => Some(entry.kind()),
            None if self.has_children(path) => Some(EntryKind::Directory),
            None => None,
        })
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.check_open()?;
        let path = normalize(path);
        match self.entries.get(path) {
            Some(Entry::Buffered(data)) => Ok(data.clone()),
            Some(Entry::Stored(index)) => {
                let mut reader = self.reader.lock();
                let archive = reader
                    .as_mut()
                    .ok_or_else(|| ProjectError::stale(&self.location))?;
                let mut file = archive
                    .by_index(*index)
                    .map_err(|e| ProjectError::archive(&self.location, e))?;
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                Ok(data)
            }
            Some(Entry::Dir) => Err(ProjectError::IsADirectory(path.to_string())),
            None if path.is_empty() || self.has_children(path) => {
                Err(ProjectError::IsADirectory(path.to_string()))
            }
            None => Err(ProjectError::NotFound(path.to_string())),
        }
    }

    fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let path = normalize(path);
        match self.entries.get(path) {
            Some(Entry::Buffered(data)) => Ok(data[..len.min(data.len())].to_vec()),
            Some(Entry::Stored(index)) => {
                let mut reader = self.reader.lock();
                let archive = reader
                    .as_mut()
                    .ok_or_else(|| ProjectError::stale(&self.location))?;
                let file = archive
                    .by_index(*index)
                    .map_err(|e| ProjectError::archive(&self.location, e))?;
                let mut head = Vec::with_capacity(len.min(file.size() as usize));
                file.take(len as u64).read_to_end(&mut head)?;
                Ok(head)
            }
            _ => self.read(path),
        }
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let path = normalize(path);
        if path.is_empty() || self.kind(path)? == Some(EntryKind::Directory) {
            return Err(ProjectError::IsADirectory(path.to_string()));
        }
        self.check_ancestors(path)?;
        self.entries.insert(path.to_string(), Entry::Buffered(data.to_vec()));
        self.dirty = true;
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        self.check_open()?;
        let path = normalize(path);
        if path.is_empty() {
            return Ok(());
        }
        self.check_ancestors(path)?;
        match self.kind(path)? {
            Some(EntryKind::Directory) => Ok(()),
            Some(EntryKind::File) => Err(ProjectError::NotADirectory(path.to_string())),
            None => {
                self.entries.insert(path.to_string(), Entry::Dir);
                self.dirty = true;
                Ok(())
            }
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path);
        match self.kind(path)? {
            None => return Err(ProjectError::NotFound(path.to_string())),
            Some(EntryKind::File) => return Err(ProjectError::NotADirectory(path.to_string())),
            Some(EntryKind::Directory) => {}
        }

        let skip = if path.is_empty() { 0 } else { path.len() + 1 };
        let mut found: BTreeMap<String, EntryKind> = BTreeMap::new();
        for name in self.children(path) {
            let rest = &name[skip..];
            let (first, nested) = match rest.split_once('/') {
                Some((first, _)) => (first, true),
                None => (rest, false),
            };
            let kind = if nested {
                EntryKind::Directory
            } else {
                self.entries[&name].kind()
            };
            let slot = found.entry(first.to_string()).or_insert(kind);
            if kind == EntryKind::Directory {
                *slot = EntryKind::Directory;
            }
        }
        Ok(found
            .into_iter()
            .map(|(name, kind)| DirEntry::new(name, kind))
            .collect())
    }

    fn delete(&mut self, path: &str, recursive: bool) -> Result<bool> {
        let path = normalize(path);
        match self.kind(path)? {
            None => Ok(false),
            Some(EntryKind::File) => {
                self.entries.remove(path);
                self.keep_parent(path);
                self.dirty = true;
                Ok(true)
            }
            Some(EntryKind::Directory) => {
                let children = self.children(path);
                if !children.is_empty() && !recursive {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        format!("directory '{path}' is not empty"),
                    )
                    .into());
                }
                for child in children {
                    self.entries.remove(&child);
                }
                if !path.is_empty() {
                    self.entries.remove(path);
                    self.keep_parent(path);
                }
                self.dirty = true;
                Ok(true)
            }
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (normalize(from), normalize(to));
        let kind = self
            .kind(from)?
            .ok_or_else(|| ProjectError::NotFound(from.to_string()))?;
        if from == to {
            return Ok(());
        }
        self.check_ancestors(to)?;

        let mut moved = Vec::new();
        if let Some(entry) = self.entries.remove(from) {
            moved.push((to.to_string(), entry));
        }
        if kind == EntryKind::Directory {
            for child in self.children(from) {
                if let Some(entry) = self.entries.remove(&child) {
                    moved.push((format!("{to}{}", &child[from.len()..]), entry));
                }
            }
        }
        self.keep_parent(from);
        self.entries.extend(moved);
        self.dirty = true;
        Ok(())
    }
}
