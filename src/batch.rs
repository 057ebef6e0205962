//! Parallel writes into many directories of one project.
//!
//! Each directory usually lives in its own nested archive, so writers
//! working on different directories only meet at the node cache and
//! proceed in parallel on the `rayon` pool.
//!
//! # Example
//!
//! ```no_run
//! use project_space::{ProjectConfig, ProjectSpace};
//!
//! let space = ProjectSpace::open(ProjectConfig::builder("/data/project").build())?;
//! let ids = ["c1", "c2", "c3"];
//! let results = space.batch_write(&ids, |w| w.write_string("info.tsv", "state\tdone\n"));
//! assert!(results.iter().all(|r| r.is_ok()));
//! # Ok::<(), project_space::ProjectError>(())
//! ```

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::io::{ProjectReader, ProjectWriter};
use crate::space::ProjectSpace;

impl ProjectSpace {
    /// Run `f` once per directory in parallel, each with its own writer
    /// scoped to that directory.
    ///
    /// Returns results in the same order as `dirs`.
    pub fn batch_write<D, T, F>(&self, dirs: &[D], f: F) -> Vec<Result<T>>
    where
        D: AsRef<str> + Sync,
        T: Send,
        F: Fn(&mut ProjectWriter) -> Result<T> + Sync,
    {
        if dirs.is_empty() {
            return vec![];
        }
        debug!(count = dirs.len(), "starting batch write");

        dirs.par_iter()
            .map(|dir| {
                let mut writer = self.writer();
                writer.in_directory(dir.as_ref(), &f)
            })
            .collect()
    }

    /// Like [`batch_write`](Self::batch_write) but with read-only access.
    pub fn batch_read<D, T, F>(&self, dirs: &[D], f: F) -> Vec<Result<T>>
    where
        D: AsRef<str> + Sync,
        T: Send,
        F: Fn(&mut ProjectReader) -> Result<T> + Sync,
    {
        dirs.par_iter()
            .map(|dir| {
                let mut reader = self.reader();
                reader.in_directory(dir.as_ref(), &f)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ProjectConfig;
    use crate::space::ProjectSpace;
    use tempfile::TempDir;

    #[test]
    fn test_batch_write_keeps_order() {
        let dir = TempDir::new().unwrap();
        let space = ProjectSpace::open(ProjectConfig::builder(dir.path()).buffer_size(4).build()).unwrap();
        let ids: Vec<String> = (0..32).map(|i| format!("c{i}")).collect();

        let results = space.batch_write(&ids, |w| {
            let id = w.current_dir().to_string();
            w.write_string("info.tsv", &format!("id\t{id}\n"))?;
            Ok(id)
        });
        let written: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(written, ids);

        space.flush().unwrap();
        let read = space.batch_read(&ids, |r| Ok(r.key_values("info.tsv")?["id"].clone()));
        for (id, value) in ids.iter().zip(read) {
            assert_eq!(&value.unwrap(), id);
        }
    }

    #[test]
    fn test_batch_write_reports_per_directory_errors() {
        let dir = TempDir::new().unwrap();
        let space = ProjectSpace::open(ProjectConfig::builder(dir.path()).build()).unwrap();
        let results = space.batch_write(&["c1", "../bad"], |w| w.write_string("x", "1"));
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(space.batch_write::<&str, (), _>(&[], |_| Ok(())).is_empty());
    }
}
