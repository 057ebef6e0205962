//! The default filesystem: a real directory on disk.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{DirEntry, EntryKind, NodeFs};
use crate::error::{ProjectError, Result};

/// A real directory used as the project root.
///
/// Writes go through a temporary file in the target directory and are
/// renamed into place, so a nested archive on disk is never half-written.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// Use `root` as the filesystem root, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The real directory backing this filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a node-relative path to the real path. Blank or `/` maps to the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    fn not_found(path: &str, err: io::Error) -> ProjectError {
        if is_missing(&err) {
            ProjectError::NotFound(path.to_string())
        } else {
            ProjectError::Io(err)
        }
    }
}

/// A path below a regular file does not exist either.
fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

impl NodeFs for DirFs {
    fn is_open(&self) -> bool {
        true
    }

    fn kind(&self, path: &str) -> Result<Option<EntryKind>> {
        match fs::metadata(self.resolve(path)) {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let real = self.resolve(path);
        let meta = fs::metadata(&real).map_err(|e| Self::not_found(path, e))?;
        if meta.is_dir() {
            return Err(ProjectError::IsADirectory(path.to_string()));
        }
        fs::read(&real).map_err(|e| Self::not_found(path, e))
    }

    fn read_head(&self, path: &str, len: usize) -> Result<Vec<u8>> {
        let file = fs::File::open(self.resolve(path)).map_err(|e| Self::not_found(path, e))?;
        let mut head = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut head)?;
        Ok(head)
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let real = self.resolve(path);
        if real.is_dir() {
            return Err(ProjectError::IsADirectory(path.to_string()));
        }
        let parent = real.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&real).map_err(|e| ProjectError::Io(e.error))?;
        Ok(())
    }

    fn create_dir_all(&mut self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let real = self.resolve(path);
        match self.kind(path)? {
            None => return Err(ProjectError::NotFound(path.to_string())),
            Some(EntryKind::File) => return Err(ProjectError::NotADirectory(path.to_string())),
            Some(EntryKind::Directory) => {}
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(real)? {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), kind));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete(&mut self, path: &str, recursive: bool) -> Result<bool> {
        let real = self.resolve(path);
        match self.kind(path)? {
            None => Ok(false),
            Some(EntryKind::File) => {
                fs::remove_file(real)?;
                Ok(true)
            }
            Some(EntryKind::Directory) if recursive => {
                fs::remove_dir_all(real)?;
                Ok(true)
            }
            Some(EntryKind::Directory) => {
                fs::remove_dir(real)?;
                Ok(true)
            }
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from);
        if !source.exists() {
            return Err(ProjectError::NotFound(from.to_string()));
        }
        let target = self.resolve(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(source, target)?;
        Ok(())
    }
}
