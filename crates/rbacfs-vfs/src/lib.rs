//! # rbacfs VFS
//!
//! Operation dispatch for the rbacfs passthrough filesystem.
//!
//! ## Overview
//!
//! - **Operations**: every filesystem operation and the fixed set of
//!   `(path, permission)` requirements it needs
//! - **Identity**: mapping an OS caller to a policy subject
//! - **Dispatcher**: authorize, then forward or deny
//! - **Inodes**: stable inode numbers for inode-addressed frontends
//! - **Backends**: the path-based backing store trait and the passthrough
//!   implementation over a local directory
//!
//! Nothing here depends on FUSE: the dispatcher can be driven directly,
//! which is how the tests exercise it.
//!
//! ## Permission table
//!
//! | operation | requirements |
//! |---|---|
//! | lookup, getattr, readlink, read | `read` on the path (`getattr /` needs nothing) |
//! | access | `read`/`write`/`execute` per mask bit |
//! | open | `read` if readable, `write` if writable or truncating |
//! | write | `write` |
//! | create | `create` on the parent and `write` on the path |
//! | mkdir, mknod, symlink | `create` on the parent |
//! | link | `read`, `write`, `execute` and `chmod` on the source, `create` on the new parent |
//! | unlink, rmdir | `delete` |
//! | rename | `delete` on the source and `create` on the new parent, plus `delete` on an existing destination |
//! | opendir, readdir | `list` |
//! | setattr | `write` for size, `chmod` for mode, owner or times |
//! | statfs | nothing |

pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod inodes;
pub mod operation;
pub mod passthrough;
pub mod types;
pub mod vpath;

// Re-export main types for convenience
pub use backend::Backend;
pub use dispatcher::Dispatcher;
pub use error::{FsError, FsResult};
pub use identity::{BindingResolver, Caller, FixedRoles, SubjectResolver};
pub use inodes::{InodeTable, ROOT_INODE};
pub use operation::{Operation, Requirement};
pub use passthrough::Passthrough;
pub use types::{AccessMask, DirEntry, FileAttr, FileType, OpenFlags, SetAttr, SetTime, StatFs};
pub use vpath::VirtualPath;
