//! Bounded cache of mounted nested archives.
//!
//! # Locking
//!
//! ```text
//! NodeCache (RwLock<FxHashMap<prefix, Arc<FsNode>>>)
//! ├── get              read section, touches the access generation
//! ├── get_or_create    read → upgradable read → recheck → write
//! └── evict / retire   write section; nodes are removed, then closed
//! ```
//!
//! Closing a node persists it into the root, so every removal happens
//! while the write section is held. Removed nodes are retired first and
//! never reopened. A concurrent mount of the same
//! prefix therefore always sees the persisted bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::node::FsNode;
use crate::error::Result;
use crate::path::LogicalPath;

/// Share of the capacity evicted at once, in percent.
const EVICT_PERCENT: usize = 20;

/// The eviction buffer: mount prefix to open node.
#[derive(Debug)]
pub(crate) struct NodeCache {
    nodes: RwLock<FxHashMap<LogicalPath, Arc<FsNode>>>,
    capacity: usize,
    /// Access generation, bumped on every lookup.
    generation: AtomicU64,
}

impl NodeCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            nodes: RwLock::new(FxHashMap::default()),
            capacity: capacity.max(1),
            generation: AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of nodes evicted when the capacity is exceeded.
    pub(crate) fn evict_count(&self) -> usize {
        (self.capacity * EVICT_PERCENT).div_ceil(100).max(1)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub(crate) fn contains(&self, prefix: &LogicalPath) -> bool {
        self.nodes.read().contains_key(prefix)
    }

    /// Look up a mounted node and mark it as recently used.
    pub(crate) fn get(&self, prefix: &LogicalPath) -> Option<Arc<FsNode>> {
        let nodes = self.nodes.read();
        let node = nodes.get(prefix)?;
        node.touch(self.next_generation());
        Some(Arc::clone(node))
    }

    /// Return the node for `prefix`, mounting it with `create` if needed.
    ///
    /// Concurrent callers for the same prefix all get the first node
    /// created. A failing `create` leaves the cache unchanged.
    pub(crate) fn get_or_create(
        &self,
        prefix: &LogicalPath,
        root: &FsNode,
        create: impl FnOnce() -> Result<FsNode>,
    ) -> Result<Arc<FsNode>> {
        if let Some(node) = self.get(prefix) {
            return Ok(node);
        }

        let nodes = self.nodes.upgradable_read();
        if let Some(node) = nodes.get(prefix) {
            node.touch(self.next_generation());
            return Ok(Arc::clone(node));
        }

        let mut nodes = RwLockUpgradableReadGuard::upgrade(nodes);
        let node = Arc::new(create()?);
        node.touch(self.next_generation());
        nodes.insert(prefix.clone(), Arc::clone(&node));
        self.evict_locked(&mut nodes, root);
        Ok(node)
    }

    /// Evict least recently used nodes if the cache is over capacity.
    pub(crate) fn evict_if_over_capacity(&self, root: &FsNode) -> usize {
        let mut nodes = self.nodes.write();
        self.evict_locked(&mut nodes, root)
    }

    fn evict_locked(&self, nodes: &mut FxHashMap<LogicalPath, Arc<FsNode>>, root: &FsNode) -> usize {
        if nodes.len() <= self.capacity {
            return 0;
        }

        let mut by_age: Vec<(u64, LogicalPath)> = nodes
            .iter()
            .map(|(prefix, node)| (node.last_access(), prefix.clone()))
            .collect();
        by_age.sort_unstable();

        let mut evicted = 0;
        for (_, prefix) in by_age.into_iter().take(self.evict_count()) {
            if let Some(node) = nodes.remove(&prefix) {
                node.retire();
                if let Err(e) = node.close(root) {
                    warn!(prefix = %prefix, error = %e, "closing evicted archive failed");
                }
                evicted += 1;
            }
        }
        debug!(evicted, remaining = nodes.len(), "evicted nested archives");
        evicted
    }

    /// Remove and close every node whose prefix matches.
    ///
    /// All matching nodes are closed; the first failure is returned.
    pub(crate) fn retire(&self, root: &FsNode, mut matches: impl FnMut(&LogicalPath) -> bool) -> Result<usize> {
        let mut nodes = self.nodes.write();
        let prefixes: Vec<LogicalPath> = nodes.keys().filter(|p| matches(*p)).cloned().collect();

        let mut first_error = None;
        for prefix in &prefixes {
            let Some(node) = nodes.remove(prefix) else {
                continue;
            };
            node.retire();
            if let Err(e) = node.close(root) {
                warn!(prefix = %prefix, error = %e, "closing retired archive failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(prefixes.len()),
        }
    }

    /// Retire the node at `prefix` if it holds no entries, then run `remove`.
    ///
    /// Both steps happen in one write section so nobody can remount the
    /// prefix in between.
    pub(crate) fn retire_if_empty(
        &self,
        prefix: &LogicalPath,
        root: &FsNode,
        remove: impl FnOnce() -> Result<bool>,
    ) -> Result<bool> {
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get(prefix) else {
            return Ok(false);
        };
        if !node.is_empty()? {
            return Ok(false);
        }
        if let Some(node) = nodes.remove(prefix) {
            node.retire();
            node.close(root)?;
        }
        debug!(prefix = %prefix, "removing empty nested archive");
        remove()
    }

    /// Close and forget every node.
    pub(crate) fn drain_and_close(&self, root: &FsNode) -> Result<()> {
        self.retire(root, |_| true).map(|_| ())
    }

    /// All cached nodes, unordered.
    pub(crate) fn snapshot(&self) -> Vec<Arc<FsNode>> {
        self.nodes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CompressionMethod;
    use tempfile::TempDir;

    fn prefix(s: &str) -> LogicalPath {
        LogicalPath::parse(s).unwrap()
    }

    fn mount(cache: &NodeCache, root: &FsNode, name: &str) -> Arc<FsNode> {
        let p = prefix(name);
        cache
            .get_or_create(&p, root, || FsNode::mount(&p, root, CompressionMethod::Stored, 0))
            .unwrap()
    }

    #[test]
    fn test_evict_count() {
        assert_eq!(NodeCache::new(1).evict_count(), 1);
        assert_eq!(NodeCache::new(2).evict_count(), 1);
        assert_eq!(NodeCache::new(10).evict_count(), 2);
        assert_eq!(NodeCache::new(11).evict_count(), 3);
        assert_eq!(NodeCache::new(125).evict_count(), 25);
    }

    #[test]
    fn test_get_or_create_reuses_node() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let cache = NodeCache::new(4);

        let a = mount(&cache, &root, "a");
        let again = cache
            .get_or_create(&prefix("a"), &root, || panic!("must not mount twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let cache = NodeCache::new(4);

        let err = cache.get_or_create(&prefix("a"), &root, || {
            Err(crate::error::ProjectError::NotFound("a".into()))
        });
        assert!(err.is_err());
        assert!(!cache.contains(&prefix("a")));
    }

    #[test]
    fn test_eviction_closes_least_recent() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let cache = NodeCache::new(2);

        let a = mount(&cache, &root, "a");
        let b = mount(&cache, &root, "b");
        a.write_handle().fs_mut().write("f1", b"1").unwrap();
        cache.get(&prefix("b"));

        let c = mount(&cache, &root, "c");
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&prefix("a")));
        assert!(!a.is_open() && a.is_retired());
        assert!(b.is_open() && c.is_open());
        // evicted content was persisted
        assert!(dir.path().join("a").is_file());
    }

    #[test]
    fn test_retire_and_drain() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let cache = NodeCache::new(8);
        let a = mount(&cache, &root, "a");
        mount(&cache, &root, "b");

        assert_eq!(cache.retire(&root, |p| p.as_str() == "a").unwrap(), 1);
        assert!(!a.is_open());
        assert_eq!(cache.len(), 1);

        cache.drain_and_close(&root).unwrap();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_retire_if_empty() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let cache = NodeCache::new(8);
        let a = mount(&cache, &root, "a");
        a.write_handle().fs_mut().write("f", b"1").unwrap();

        assert!(!cache.retire_if_empty(&prefix("a"), &root, || Ok(true)).unwrap());
        a.write_handle().fs_mut().delete("f", false).unwrap();
        assert!(cache
            .retire_if_empty(&prefix("a"), &root, || root.remove_entry(&prefix("a")))
            .unwrap());
        assert!(!cache.contains(&prefix("a")));
        assert!(!dir.path().join("a").exists());
    }
}
