//! Ordered write locking for operations spanning two nodes.
//!
//! Locks are always taken in [`FsNode::lock_key`] order (nested nodes by
//! location, the root last, ties broken by address), so two operations
//! over the same pair of nodes can never wait on each other in a cycle.

use std::ptr;

use parking_lot::RwLockWriteGuard;

use super::node::{FsNode, NodeHandle};

type Guard<'a> = RwLockWriteGuard<'a, NodeHandle>;

/// Write guards over a source and a target node.
pub(crate) enum LockedPair<'a> {
    /// Both ends live in the same node.
    Same(Guard<'a>),
    /// Distinct nodes, each locked once.
    Split { source: Guard<'a>, target: Guard<'a> },
}

/// Lock `source` and `target` for writing in the global order.
pub(crate) fn lock_pair<'a>(source: &'a FsNode, target: &'a FsNode) -> LockedPair<'a> {
    if ptr::eq(source, target) {
        return LockedPair::Same(source.write_handle());
    }

    let source_first = (source.lock_key(), ptr::from_ref(source) as usize)
        < (target.lock_key(), ptr::from_ref(target) as usize);
    if source_first {
        let source = source.write_handle();
        let target = target.write_handle();
        LockedPair::Split { source, target }
    } else {
        let target = target.write_handle();
        let source = source.write_handle();
        LockedPair::Split { source, target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CompressionMethod;
    use crate::path::LogicalPath;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_same_node_locks_once() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        assert!(matches!(lock_pair(&root, &root), LockedPair::Same(_)));
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let root = FsNode::directory(dir.path()).unwrap();
        let a = FsNode::mount(&LogicalPath::parse("a").unwrap(), &root, CompressionMethod::Stored, 0).unwrap();
        let b = FsNode::mount(&LogicalPath::parse("b").unwrap(), &root, CompressionMethod::Stored, 0).unwrap();
        let (done, finished) = mpsc::channel();

        std::thread::scope(|s| {
            for flip in [false, true] {
                let (a, b, done) = (&a, &b, done.clone());
                s.spawn(move || {
                    for _ in 0..2_000 {
                        let (x, y) = if flip { (b, a) } else { (a, b) };
                        let _pair = lock_pair(x, y);
                    }
                    done.send(()).unwrap();
                });
            }
            for _ in 0..2 {
                finished
                    .recv_timeout(Duration::from_secs(30))
                    .expect("two-node locking deadlocked");
            }
        });
    }
}
