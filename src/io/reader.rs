//! Read side of the façade.

use std::collections::BTreeMap;
use std::io::{BufRead, Cursor, Read};
use std::sync::Arc;

use crate::error::Result;
use crate::fs::EntryKind;
use crate::path::{LogicalPath, decode_utf8};
use crate::tree::{FsTree, ListOptions};

/// Default column delimiter of tables.
pub const DEFAULT_DELIMITER: char = '\t';

/// Reads project files relative to a current directory.
///
/// Every call resolves its path against the tree anew, so a reader never
/// holds a nested archive open between calls.
#[derive(Debug, Clone)]
pub struct ProjectReader {
    pub(crate) tree: Arc<FsTree>,
    pub(crate) scope: LogicalPath,
    delimiter: char,
}

impl ProjectReader {
    pub(crate) fn new(tree: Arc<FsTree>) -> Self {
        Self {
            tree,
            scope: LogicalPath::root(),
            delimiter: DEFAULT_DELIMITER,
        }
    }

    /// Use another column delimiter for tables.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Column delimiter of tables.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// The current directory, relative to the project root.
    pub fn current_dir(&self) -> &LogicalPath {
        &self.scope
    }

    /// Resolve `path` against the current directory.
    pub(crate) fn absolute(&self, path: &str) -> Result<LogicalPath> {
        Ok(self.scope.join(&LogicalPath::parse(path)?))
    }

    pub(crate) fn scope_mut(&mut self) -> &mut LogicalPath {
        &mut self.scope
    }

    /// Run `action` with `dir` as the current directory.
    ///
    /// The previous directory is restored whether `action` fails or not.
    pub fn in_directory<T>(&mut self, dir: &str, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        super::rebased(self, dir, Self::scope_mut, action)
    }

    /// Check whether `path` exists.
    pub fn exists(&self, path: &str) -> Result<bool> {
        self.tree.exists(self.absolute(path)?.as_str())
    }

    /// Check whether `path` is a directory.
    pub fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.tree.kind(self.absolute(path)?.as_str())? == Some(EntryKind::Directory))
    }

    /// List entries below `path`, relative to the current directory.
    pub fn list(&self, path: &str, options: &ListOptions) -> Result<Vec<String>> {
        let listed = self.tree.list(self.absolute(path)?.as_str(), options)?;
        Ok(listed
            .iter()
            .filter_map(|entry| entry.strip_prefix(&self.scope))
            .filter(|entry| !entry.is_root())
            .map(|entry| entry.as_str().to_string())
            .collect())
    }

    /// Read a UTF-8 text file through a buffered reader. A leading BOM is skipped.
    pub fn text_file<T>(&self, path: &str, read: impl FnOnce(&mut dyn BufRead) -> Result<T>) -> Result<T> {
        let bytes = self.tree.read(self.absolute(path)?.as_str())?;
        let text = decode_utf8(path, &bytes)?;
        read(&mut Cursor::new(text.as_bytes()))
    }

    /// Read a binary file through a reader.
    pub fn binary_file<T>(&self, path: &str, read: impl FnOnce(&mut dyn Read) -> Result<T>) -> Result<T> {
        let bytes = self.tree.read(self.absolute(path)?.as_str())?;
        read(&mut Cursor::new(bytes))
    }

    /// Read a whole text file.
    pub fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.tree.read(self.absolute(path)?.as_str())?;
        Ok(decode_utf8(path, &bytes)?.to_string())
    }

    /// Read a whole binary file.
    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.tree.read(self.absolute(path)?.as_str())
    }

    /// Read `key<TAB>value` lines.
    ///
    /// Lines split at the first tab; blank lines are skipped and a line
    /// without a tab maps its key to an empty value.
    pub fn key_values(&self, path: &str) -> Result<BTreeMap<String, String>> {
        self.text_file(path, |reader| {
            let mut map = BTreeMap::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let (key, value) = line.split_once('\t').unwrap_or((line.as_str(), ""));
                map.insert(key.to_string(), value.to_string());
            }
            Ok(map)
        })
    }

    /// Read rows `[from_line, to_line)` of a delimited table.
    ///
    /// Rows are counted after the header (when `skip_header` is set);
    /// blank lines are ignored.
    pub fn table(
        &self,
        path: &str,
        skip_header: bool,
        from_line: usize,
        to_line: usize,
        mut row: impl FnMut(Vec<String>) -> Result<()>,
    ) -> Result<()> {
        let delimiter = self.delimiter;
        self.text_file(path, |reader| {
            let lines = reader
                .lines()
                .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
                .skip(usize::from(skip_header));
            for (index, line) in lines.enumerate() {
                if index >= to_line {
                    break;
                }
                let line = line?;
                if index >= from_line {
                    row(line.split(delimiter).map(str::to_string).collect())?;
                }
            }
            Ok(())
        })
    }

    /// Read a whole table as rows.
    pub fn table_rows(&self, path: &str, skip_header: bool) -> Result<Vec<Vec<String>>> {
        let mut rows = Vec::new();
        self.table(path, skip_header, 0, usize::MAX, |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }
}
