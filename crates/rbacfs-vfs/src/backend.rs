//! Backing store operations trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::FsResult;
use crate::types::{AccessMask, DirEntry, FileAttr, OpenFlags, SetAttr, StatFs};
use crate::vpath::VirtualPath;

/// Backing store operations.
///
/// Path-based (no inode numbers), taking already normalized
/// [`VirtualPath`]s. A backend performs no authorization of its own: the
/// [`Dispatcher`](crate::Dispatcher) only calls it after every requirement
/// of the operation was allowed. Errors are returned as the backing store
/// reported them.
#[async_trait]
pub trait Backend: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get attributes, without following a final symlink.
    async fn getattr(&self, path: &VirtualPath) -> FsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &VirtualPath) -> FsResult<Vec<DirEntry>>;

    /// Check that a file can be opened with `flags`, truncating it if asked.
    async fn open(&self, path: &VirtualPath, flags: OpenFlags) -> FsResult<()>;

    /// Read up to `size` bytes at `offset`. Fewer bytes are returned at EOF.
    async fn read(&self, path: &VirtualPath, offset: u64, size: u32) -> FsResult<Vec<u8>>;

    /// Read a symbolic link target.
    async fn readlink(&self, path: &VirtualPath) -> FsResult<PathBuf>;

    /// Check access to a path.
    async fn access(&self, path: &VirtualPath, mask: AccessMask) -> FsResult<()>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, path: &VirtualPath, offset: u64, data: &[u8]) -> FsResult<u32>;

    /// Create a new regular file. Fails if it exists.
    async fn create(&self, path: &VirtualPath, mode: u32) -> FsResult<FileAttr>;

    /// Create a directory.
    async fn mkdir(&self, path: &VirtualPath, mode: u32) -> FsResult<FileAttr>;

    /// Create a file node (regular, FIFO, socket or device).
    async fn mknod(&self, path: &VirtualPath, mode: u32, rdev: u32) -> FsResult<FileAttr>;

    /// Remove a file.
    async fn unlink(&self, path: &VirtualPath) -> FsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &VirtualPath) -> FsResult<()>;

    /// Rename a file or directory.
    ///
    /// Without `replace`, an existing `to` fails the call with `EEXIST`
    /// instead of being overwritten.
    async fn rename(&self, from: &VirtualPath, to: &VirtualPath, replace: bool) -> FsResult<()>;

    /// Set attributes. Returns the attributes afterwards.
    async fn setattr(&self, path: &VirtualPath, attr: &SetAttr) -> FsResult<FileAttr>;

    /// Create a symlink at `path` pointing to `target`.
    ///
    /// `target` is stored verbatim; it is not a virtual path.
    async fn symlink(&self, path: &VirtualPath, target: &Path) -> FsResult<FileAttr>;

    /// Create a hard link at `newpath` to `oldpath`.
    async fn link(&self, oldpath: &VirtualPath, newpath: &VirtualPath) -> FsResult<FileAttr>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Get filesystem statistics.
    async fn statfs(&self) -> FsResult<StatFs>;

    /// Returns true if writes are refused.
    fn read_only(&self) -> bool;
}
