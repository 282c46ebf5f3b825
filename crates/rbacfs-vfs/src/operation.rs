//! Filesystem operations and the permissions they require.
//!
//! The mapping is fixed. Every operation the mount serves is listed here,
//! and each one names the exact `(path, permission)` pairs that must all
//! be allowed before the backing store is touched.

use std::fmt;

use rbacfs_policy::Permission;

use crate::types::{AccessMask, OpenFlags, SetAttr};
use crate::vpath::VirtualPath;

/// One filesystem operation, with the virtual paths it acts on.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// Resolve a directory entry.
    Lookup(&'a VirtualPath),
    /// Read attributes.
    Getattr(&'a VirtualPath),
    /// Read a symlink target.
    Readlink(&'a VirtualPath),
    /// Check access.
    Access(&'a VirtualPath, AccessMask),
    /// Open a file.
    Open(&'a VirtualPath, OpenFlags),
    /// Read file data.
    Read(&'a VirtualPath),
    /// Write file data.
    Write(&'a VirtualPath),
    /// Create and open a new file.
    Create(&'a VirtualPath),
    /// Create a directory.
    Mkdir(&'a VirtualPath),
    /// Create a special or regular file node.
    Mknod(&'a VirtualPath),
    /// Create a symlink at the path.
    Symlink(&'a VirtualPath),
    /// Create a hard link: `(existing, new)`.
    Link(&'a VirtualPath, &'a VirtualPath),
    /// Remove a file.
    Unlink(&'a VirtualPath),
    /// Remove a directory.
    Rmdir(&'a VirtualPath),
    /// Move an entry onto a free name: `(from, to)`.
    Rename(&'a VirtualPath, &'a VirtualPath),
    /// Move an entry over an existing one, destroying it: `(from, to)`.
    Replace(&'a VirtualPath, &'a VirtualPath),
    /// Open a directory.
    Opendir(&'a VirtualPath),
    /// List a directory.
    Readdir(&'a VirtualPath),
    /// Change attributes.
    Setattr(&'a VirtualPath, &'a SetAttr),
    /// Filesystem statistics.
    Statfs,
}

/// A single permission check on a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement<'a> {
    /// Normalized segments of the path checked
    pub segments: &'a [String],
    /// Permission needed on it
    pub permission: Permission,
}

impl<'a> Requirement<'a> {
    fn on(path: &'a VirtualPath, permission: Permission) -> Self {
        Self {
            segments: path.segments(),
            permission,
        }
    }

    fn on_parent(path: &'a VirtualPath, permission: Permission) -> Self {
        Self {
            segments: path.parent_segments(),
            permission,
        }
    }

    /// The checked path, as text.
    pub fn path(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments.iter().fold(String::new(), |mut out, s| {
            out.push('/');
            out.push_str(s);
            out
        })
    }
}

impl Operation<'_> {
    /// Get the operation name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Lookup(_) => "lookup",
            Operation::Getattr(_) => "getattr",
            Operation::Readlink(_) => "readlink",
            Operation::Access(..) => "access",
            Operation::Open(..) => "open",
            Operation::Read(_) => "read",
            Operation::Write(_) => "write",
            Operation::Create(_) => "create",
            Operation::Mkdir(_) => "mkdir",
            Operation::Mknod(_) => "mknod",
            Operation::Symlink(_) => "symlink",
            Operation::Link(..) => "link",
            Operation::Unlink(_) => "unlink",
            Operation::Rmdir(_) => "rmdir",
            Operation::Rename(..) | Operation::Replace(..) => "rename",
            Operation::Opendir(_) => "opendir",
            Operation::Readdir(_) => "readdir",
            Operation::Setattr(..) => "setattr",
            Operation::Statfs => "statfs",
        }
    }

    /// The primary path the operation acts on.
    pub fn path(&self) -> Option<&VirtualPath> {
        match *self {
            Operation::Lookup(p)
            | Operation::Getattr(p)
            | Operation::Readlink(p)
            | Operation::Access(p, _)
            | Operation::Open(p, _)
            | Operation::Read(p)
            | Operation::Write(p)
            | Operation::Create(p)
            | Operation::Mkdir(p)
            | Operation::Mknod(p)
            | Operation::Symlink(p)
            | Operation::Unlink(p)
            | Operation::Rmdir(p)
            | Operation::Opendir(p)
            | Operation::Readdir(p)
            | Operation::Setattr(p, _) => Some(p),
            Operation::Link(_, p) | Operation::Rename(p, _) | Operation::Replace(p, _) => Some(p),
            Operation::Statfs => None,
        }
    }
}

impl<'a> Operation<'a> {
    /// Every permission check the operation needs, in evaluation order.
    ///
    /// # Example
    ///
    /// ```
    /// use rbacfs_policy::Permission;
    /// use rbacfs_vfs::{Operation, VirtualPath};
    ///
    /// let src = VirtualPath::parse("/inbox/a.txt").unwrap();
    /// let dst = VirtualPath::parse("/archive/a.txt").unwrap();
    /// let reqs = Operation::Rename(&src, &dst).requirements();
    ///
    /// assert_eq!(reqs[0].path(), "/inbox/a.txt");
    /// assert_eq!(reqs[0].permission, Permission::Delete);
    /// assert_eq!(reqs[1].path(), "/archive");
    /// assert_eq!(reqs[1].permission, Permission::Create);
    /// ```
    pub fn requirements(&self) -> Vec<Requirement<'a>> {
        use Permission::*;

        match *self {
            // The mount root has to be stat-able for the mount to work at all.
            Operation::Getattr(p) if p.is_root() => vec![],
            Operation::Lookup(p) | Operation::Getattr(p) | Operation::Readlink(p) | Operation::Read(p) => {
                vec![Requirement::on(p, Read)]
            }
            Operation::Access(p, mask) => {
                if mask.is_exists_only() {
                    return vec![Requirement::on(p, Read)];
                }
                let mut reqs = Vec::with_capacity(3);
                if mask.contains(AccessMask::READ) {
                    reqs.push(Requirement::on(p, Read));
                }
                if mask.contains(AccessMask::WRITE) {
                    reqs.push(Requirement::on(p, Write));
                }
                if mask.contains(AccessMask::EXECUTE) {
                    reqs.push(Requirement::on(p, Execute));
                }
                reqs
            }
            Operation::Open(p, flags) => {
                let mut reqs = Vec::with_capacity(2);
                if flags.read {
                    reqs.push(Requirement::on(p, Read));
                }
                if flags.write || flags.truncate {
                    reqs.push(Requirement::on(p, Write));
                }
                reqs
            }
            Operation::Write(p) => vec![Requirement::on(p, Write)],
            Operation::Create(p) => vec![Requirement::on_parent(p, Create), Requirement::on(p, Write)],
            Operation::Mkdir(p) | Operation::Mknod(p) | Operation::Symlink(p) => {
                vec![Requirement::on_parent(p, Create)]
            }
            // A new name reaches the same inode, so it must not grant more
            // than the existing one does.
            Operation::Link(src, dst) => vec![
                Requirement::on(src, Read),
                Requirement::on(src, Write),
                Requirement::on(src, Execute),
                Requirement::on(src, Chmod),
                Requirement::on_parent(dst, Create),
            ],
            Operation::Unlink(p) | Operation::Rmdir(p) => vec![Requirement::on(p, Delete)],
            Operation::Rename(src, dst) => vec![Requirement::on(src, Delete), Requirement::on_parent(dst, Create)],
            Operation::Replace(src, dst) => vec![
                Requirement::on(src, Delete),
                Requirement::on_parent(dst, Create),
                Requirement::on(dst, Delete),
            ],
            Operation::Opendir(p) | Operation::Readdir(p) => vec![Requirement::on(p, List)],
            Operation::Setattr(p, attr) => {
                if attr.is_empty() {
                    return vec![Requirement::on(p, Read)];
                }
                let mut reqs = Vec::with_capacity(2);
                if attr.size.is_some() {
                    reqs.push(Requirement::on(p, Write));
                }
                if attr.changes_metadata() {
                    reqs.push(Requirement::on(p, Chmod));
                }
                reqs
            }
            Operation::Statfs => vec![],
        }
    }
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Link(a, b) | Operation::Rename(a, b) | Operation::Replace(a, b) => write!(f, "{} {} -> {}", self.name(), a, b),
            _ => match self.path() {
                Some(p) => write!(f, "{} {}", self.name(), p),
                None => f.write_str(self.name()),
            },
        }
    }
}
