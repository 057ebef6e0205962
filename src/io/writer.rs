//! Write side of the façade.

use std::io::Write;
use std::ops::{Deref, DerefMut};

use super::reader::ProjectReader;
use crate::error::{ProjectError, Result};
use crate::path::LogicalPath;

/// Writes project files relative to a current directory.
///
/// Content is buffered in memory by the callbacks and handed to the tree
/// in a single write, so a failing callback leaves the file untouched.
#[derive(Debug, Clone)]
pub struct ProjectWriter {
    reader: ProjectReader,
}

impl Deref for ProjectWriter {
    type Target = ProjectReader;

    fn deref(&self) -> &ProjectReader {
        &self.reader
    }
}

impl DerefMut for ProjectWriter {
    fn deref_mut(&mut self) -> &mut ProjectReader {
        &mut self.reader
    }
}

impl ProjectWriter {
    pub(crate) fn new(reader: ProjectReader) -> Self {
        Self { reader }
    }

    /// Use another column delimiter for tables.
    pub fn with_delimiter(self, delimiter: char) -> Self {
        Self::new(self.reader.with_delimiter(delimiter))
    }

    pub(crate) fn scope_mut(&mut self) -> &mut LogicalPath {
        self.reader.scope_mut()
    }

    /// Run `action` with `dir` as the current directory.
    ///
    /// The previous directory is restored whether `action` fails or not.
    pub fn in_directory<T>(&mut self, dir: &str, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        super::rebased(self, dir, Self::scope_mut, action)
    }

    fn store(&self, path: &str, data: &[u8]) -> Result<()> {
        self.reader.tree.write(self.absolute(path)?.as_str(), data)
    }

    /// Write a text file through a writer.
    pub fn write_text_file(&self, path: &str, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
        let mut buffer = Vec::new();
        write(&mut buffer)?;
        self.store(path, &buffer)
    }

    /// Write a binary file through a writer.
    pub fn write_binary_file(&self, path: &str, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
        self.write_text_file(path, write)
    }

    /// Replace a text file.
    pub fn write_string(&self, path: &str, content: &str) -> Result<()> {
        self.store(path, content.as_bytes())
    }

    /// Replace a binary file.
    pub fn write_bytes(&self, path: &str, content: &[u8]) -> Result<()> {
        self.store(path, content)
    }

    /// Write `key<TAB>value` lines, one per entry.
    ///
    /// Keys and values are written as given; tabs or line breaks inside
    /// them are not escaped.
    pub fn write_key_values<K, V>(&self, path: &str, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.write_text_file(path, |out| {
            for (key, value) in entries {
                writeln!(out, "{}\t{}", key.as_ref(), value.as_ref())?;
            }
            Ok(())
        })
    }

    /// Write a delimited table with an optional header row.
    pub fn write_table<R, S>(&self, path: &str, header: Option<&[&str]>, rows: impl IntoIterator<Item = R>) -> Result<()>
    where
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let delimiter = self.delimiter().to_string();
        self.write_text_file(path, |out| {
            if let Some(header) = header {
                writeln!(out, "{}", header.join(delimiter.as_str()))?;
            }
            for row in rows {
                let cells: Vec<S> = row.into_iter().collect();
                let cells: Vec<&str> = cells.iter().map(|cell| cell.as_ref()).collect();
                writeln!(out, "{}", cells.join(delimiter.as_str()))?;
            }
            Ok(())
        })
    }

    /// Create a directory. At the compressed depth this starts a nested archive.
    pub fn create_dir(&self, path: &str) -> Result<()> {
        self.reader.tree.create_dir(self.absolute(path)?.as_str())
    }

    /// Delete a file or directory tree. Fails if nothing exists at `path`.
    pub fn delete(&self, path: &str) -> Result<()> {
        if self.delete_if_exists(path)? {
            Ok(())
        } else {
            Err(ProjectError::NotFound(self.absolute(path)?.to_string()))
        }
    }

    /// Delete a file or directory tree if it exists.
    pub fn delete_if_exists(&self, path: &str) -> Result<bool> {
        self.reader.tree.delete(self.absolute(path)?.as_str(), true)
    }

    /// Move a file or directory tree.
    pub fn move_path(&self, from: &str, to: &str) -> Result<()> {
        self.reader
            .tree
            .move_path(self.absolute(from)?.as_str(), self.absolute(to)?.as_str())
    }
}
