//! Domain-level access to a project: text, binary, key-value and table files.
//!
//! ```text
//! ProjectIo ──deref──► ProjectWriter ──deref──► ProjectReader ──► Arc<FsTree>
//!   location, flush      write_*, delete,         exists, list, text_file,
//!                        move_path                key_values, table, ...
//! ```
//!
//! Each façade carries a current directory. Paths are resolved against it
//! and [`ProjectReader::in_directory`] (and its writer and io versions)
//! rebase it for the duration of a closure.

mod reader;
mod writer;

pub use reader::{DEFAULT_DELIMITER, ProjectReader};
pub use writer::ProjectWriter;

use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::Result;
use crate::path::LogicalPath;

/// Full access: writer operations plus project-level flush.
#[derive(Debug, Clone)]
pub struct ProjectIo {
    writer: ProjectWriter,
}

impl Deref for ProjectIo {
    type Target = ProjectWriter;

    fn deref(&self) -> &ProjectWriter {
        &self.writer
    }
}

impl DerefMut for ProjectIo {
    fn deref_mut(&mut self) -> &mut ProjectWriter {
        &mut self.writer
    }
}

impl ProjectIo {
    pub(crate) fn new(writer: ProjectWriter) -> Self {
        Self { writer }
    }

    fn scope_mut(&mut self) -> &mut LogicalPath {
        self.writer.scope_mut()
    }

    /// Run `action` with `dir` as the current directory.
    pub fn in_directory<T>(&mut self, dir: &str, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        rebased(self, dir, Self::scope_mut, action)
    }

    /// Real location of the project.
    pub fn location(&self) -> &Path {
        self.tree.location()
    }

    /// Persist all open nested archives.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }

    /// Persist everything and close the project for every façade sharing it.
    pub fn close(&self) -> Result<()> {
        self.tree.close()
    }
}

/// Run `action` with the scope of `owner` moved to `dir`, then restore it.
fn rebased<S, T>(
    owner: &mut S,
    dir: &str,
    scope: fn(&mut S) -> &mut LogicalPath,
    action: impl FnOnce(&mut S) -> Result<T>,
) -> Result<T> {
    let target = scope(owner).join(&LogicalPath::parse(dir)?);
    let previous = std::mem::replace(scope(owner), target);
    let mut guard = ScopeGuard { owner, scope, previous: Some(previous) };
    action(&mut *guard.owner)
}

/// Restores the previous scope on drop, also when the action panics.
struct ScopeGuard<'a, S> {
    owner: &'a mut S,
    scope: fn(&mut S) -> &mut LogicalPath,
    previous: Option<LogicalPath>,
}

impl<S> Drop for ScopeGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *(self.scope)(&mut *self.owner) = previous;
        }
    }
}
