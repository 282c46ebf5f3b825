//! Inode numbers for virtual paths.
//!
//! The dispatcher is path-addressed; kernel frontends address entries by
//! inode. The table hands out a number per [`VirtualPath`] on lookup, keeps
//! the kernel's lookup count, and drops the entry once the kernel forgets it.
//! The root is always [`ROOT_INODE`] and is never forgotten.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::vpath::VirtualPath;

/// Inode number of the mount root.
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct Entry {
    path: VirtualPath,
    lookups: u64,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<u64, Entry>,
    by_path: HashMap<VirtualPath, u64>,
    next: u64,
}

/// Bidirectional inode/path map.
///
/// # Example
///
/// ```
/// use rbacfs_vfs::{InodeTable, VirtualPath, ROOT_INODE};
///
/// let inodes = InodeTable::new();
/// assert_eq!(inodes.path(ROOT_INODE), Some(VirtualPath::root()));
///
/// let docs = VirtualPath::parse("/docs").unwrap();
/// let ino = inodes.lookup(&docs);
/// assert_eq!(inodes.lookup(&docs), ino);
/// assert_eq!(inodes.path(ino), Some(docs));
/// ```
#[derive(Debug)]
pub struct InodeTable {
    inner: RwLock<Inner>,
}

impl InodeTable {
    /// Create a table holding only the root.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        let mut by_path = HashMap::new();
        entries.insert(
            ROOT_INODE,
            Entry {
                path: VirtualPath::root(),
                lookups: 0,
            },
        );
        by_path.insert(VirtualPath::root(), ROOT_INODE);
        Self {
            inner: RwLock::new(Inner {
                entries,
                by_path,
                next: ROOT_INODE + 1,
            }),
        }
    }

    /// The path an inode currently names.
    pub fn path(&self, ino: u64) -> Option<VirtualPath> {
        self.inner.read().entries.get(&ino).map(|e| e.path.clone())
    }

    /// The inode of `path`, if the kernel knows it.
    pub fn get(&self, path: &VirtualPath) -> Option<u64> {
        self.inner.read().by_path.get(path).copied()
    }

    /// Record one kernel lookup of `path` and return its inode, allocating
    /// a new one on first sight.
    pub fn lookup(&self, path: &VirtualPath) -> u64 {
        let mut inner = self.inner.write();
        if let Some(&ino) = inner.by_path.get(path) {
            if let Some(entry) = inner.entries.get_mut(&ino) {
                entry.lookups += 1;
            }
            return ino;
        }

        let ino = inner.next;
        inner.next += 1;
        inner.entries.insert(
            ino,
            Entry {
                path: path.clone(),
                lookups: 1,
            },
        );
        inner.by_path.insert(path.clone(), ino);
        ino
    }

    /// Drop `count` kernel references; the inode is released at zero.
    pub fn forget(&self, ino: u64, count: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let mut inner = self.inner.write();
        let released = match inner.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookups = entry.lookups.saturating_sub(count);
                entry.lookups == 0
            }
            None => false,
        };
        if released {
            if let Some(entry) = inner.entries.remove(&ino) {
                if inner.by_path.get(&entry.path) == Some(&ino) {
                    inner.by_path.remove(&entry.path);
                }
            }
        }
    }

    /// Detach `path` after it was removed. Its inode stays valid until
    /// forgotten but no longer resolves by path.
    pub fn remove(&self, path: &VirtualPath) {
        self.inner.write().by_path.remove(path);
    }

    /// Move `from` and everything beneath it to `to`.
    ///
    /// Any inode previously known at `to` is detached first, matching
    /// rename's replace semantics.
    pub fn rename(&self, from: &VirtualPath, to: &VirtualPath) {
        let mut inner = self.inner.write();
        inner.by_path.retain(|path, _| !path.starts_with(to));

        let moved: Vec<(u64, VirtualPath)> = inner
            .entries
            .iter()
            .filter_map(|(&ino, entry)| entry.path.rebase(from, to).map(|path| (ino, path)))
            .collect();

        for (ino, path) in moved {
            if let Some(entry) = inner.entries.get_mut(&ino) {
                let old = std::mem::replace(&mut entry.path, path.clone());
                if inner.by_path.get(&old) == Some(&ino) {
                    inner.by_path.remove(&old);
                }
                inner.by_path.insert(path, ino);
            }
        }
    }

    /// Number of live inodes, root included.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if only the root is known.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(s: &str) -> VirtualPath {
        VirtualPath::parse(s).unwrap()
    }

    #[test]
    fn test_lookup_is_stable() {
        let inodes = InodeTable::new();
        let a = inodes.lookup(&vp("/a"));
        let b = inodes.lookup(&vp("/a/b"));
        assert_ne!(a, b);
        assert_ne!(a, ROOT_INODE);
        assert_eq!(inodes.lookup(&vp("/a")), a);
        assert_eq!(inodes.get(&vp("/a/b")), Some(b));
        assert_eq!(inodes.path(b), Some(vp("/a/b")));
        assert_eq!(inodes.len(), 3);
    }

    #[test]
    fn test_forget_releases_at_zero() {
        let inodes = InodeTable::new();
        let a = inodes.lookup(&vp("/a"));
        inodes.lookup(&vp("/a"));

        inodes.forget(a, 1);
        assert_eq!(inodes.path(a), Some(vp("/a")));

        inodes.forget(a, 1);
        assert_eq!(inodes.path(a), None);
        assert_eq!(inodes.get(&vp("/a")), None);
        assert!(inodes.is_empty());

        // the root is pinned
        inodes.forget(ROOT_INODE, 100);
        assert_eq!(inodes.path(ROOT_INODE), Some(VirtualPath::root()));
    }

    #[test]
    fn test_remove_detaches_path() {
        let inodes = InodeTable::new();
        let a = inodes.lookup(&vp("/a"));
        inodes.remove(&vp("/a"));
        assert_eq!(inodes.get(&vp("/a")), None);
        assert_eq!(inodes.path(a), Some(vp("/a")));

        let again = inodes.lookup(&vp("/a"));
        assert_ne!(again, a);
        inodes.forget(a, 1);
        assert_eq!(inodes.get(&vp("/a")), Some(again));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let inodes = InodeTable::new();
        let dir = inodes.lookup(&vp("/a"));
        let file = inodes.lookup(&vp("/a/f"));
        let other = inodes.lookup(&vp("/ab"));
        let replaced = inodes.lookup(&vp("/x"));

        inodes.rename(&vp("/a"), &vp("/x"));

        assert_eq!(inodes.path(dir), Some(vp("/x")));
        assert_eq!(inodes.path(file), Some(vp("/x/f")));
        assert_eq!(inodes.path(other), Some(vp("/ab")));
        assert_eq!(inodes.get(&vp("/x")), Some(dir));
        assert_eq!(inodes.get(&vp("/a")), None);
        assert_eq!(inodes.get(&vp("/a/f")), None);
        // the replaced inode lingers until forgotten
        assert_eq!(inodes.path(replaced), Some(vp("/x")));
        inodes.forget(replaced, 1);
        assert_eq!(inodes.get(&vp("/x")), Some(dir));
    }
}
