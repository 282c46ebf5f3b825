//! # Operation dispatcher
//!
//! The single point every filesystem request passes through. Each method
//! maps its operation to permission requirements, authorizes all of them
//! against the policy, and only then forwards to the backend. A denied
//! request never reaches the backing store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rbacfs_policy::{engine, Policy};

use crate::backend::Backend;
use crate::error::{FsError, FsResult};
use crate::identity::{BindingResolver, Caller, SubjectResolver};
use crate::operation::{Operation, Requirement};
use crate::types::{AccessMask, DirEntry, FileAttr, OpenFlags, SetAttr, StatFs};
use crate::vpath::VirtualPath;

/// Authorizing front of a [`Backend`].
///
/// Holds the compiled policy by `Arc`; a dispatcher is cheap to share
/// between tasks and never mutates the policy.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use rbacfs_vfs::{Caller, Dispatcher, Passthrough, VirtualPath};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = Arc::new(rbacfs_policy::load("/etc/rbacfs/rbac.defs")?);
/// let dispatcher = Dispatcher::new(policy, Passthrough::new("/srv/data")?);
///
/// let caller = Caller::new(1000, 1000, 4242);
/// let data = dispatcher.read(&caller, &VirtualPath::parse("/docs/readme.txt")?, 0, 4096).await?;
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<B> {
    policy: Arc<Policy>,
    backend: B,
    resolver: Box<dyn SubjectResolver>,
}

impl<B: Backend> Dispatcher<B> {
    /// Create a dispatcher resolving callers through the policy's bindings.
    pub fn new(policy: Arc<Policy>, backend: B) -> Self {
        Self {
            policy,
            backend,
            resolver: Box::new(BindingResolver),
        }
    }

    /// Replace the subject resolver.
    pub fn with_resolver(mut self, resolver: impl SubjectResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Get the policy.
    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Get the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Authorize every requirement of `op` for `caller`.
    ///
    /// All-or-nothing: the first denied requirement fails the whole
    /// operation.
    ///
    /// # Errors
    ///
    /// `FsError::AccessDenied` naming the denied path and permission.
    pub fn authorize(&self, caller: &Caller, op: &Operation<'_>) -> FsResult<()> {
        let requirements = op.requirements();
        if requirements.is_empty() {
            return Ok(());
        }

        let subject = self.resolver.resolve(&self.policy, caller);
        let mut denied = None;
        let decision = engine::authorize_all_with(
            &self.policy,
            &subject,
            requirements.iter().map(|req| (req.segments, req.permission)),
            |segments, permission, decision| {
                let req = Requirement { segments, permission };
                tracing::debug!(
                    op = op.name(),
                    uid = caller.uid,
                    gid = caller.gid,
                    pid = caller.pid,
                    path = %req.path(),
                    permission = %permission,
                    decision = %decision,
                    "Authorization decision"
                );
                if !decision.is_allowed() {
                    denied = Some(req);
                }
            },
        );

        match denied {
            None => Ok(()),
            Some(req) => {
                tracing::warn!(
                    op = %op,
                    uid = caller.uid,
                    gid = caller.gid,
                    pid = caller.pid,
                    path = %req.path(),
                    permission = %req.permission,
                    reason = %decision,
                    "Access denied"
                );
                Err(FsError::AccessDenied {
                    path: req.path(),
                    permission: req.permission,
                    reason: decision.to_string(),
                })
            }
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Resolve `name` inside `parent`.
    pub async fn lookup(&self, caller: &Caller, parent: &VirtualPath, name: &str) -> FsResult<(VirtualPath, FileAttr)> {
        let path = parent.join(name)?;
        self.authorize(caller, &Operation::Lookup(&path))?;
        let attr = self.backend.getattr(&path).await?;
        Ok((path, attr))
    }

    /// Get attributes.
    pub async fn getattr(&self, caller: &Caller, path: &VirtualPath) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Getattr(path))?;
        self.backend.getattr(path).await
    }

    /// Read a symlink target.
    pub async fn readlink(&self, caller: &Caller, path: &VirtualPath) -> FsResult<PathBuf> {
        self.authorize(caller, &Operation::Readlink(path))?;
        self.backend.readlink(path).await
    }

    /// Check access.
    pub async fn access(&self, caller: &Caller, path: &VirtualPath, mask: AccessMask) -> FsResult<()> {
        self.authorize(caller, &Operation::Access(path, mask))?;
        self.backend.access(path, mask).await
    }

    /// Open a file.
    pub async fn open(&self, caller: &Caller, path: &VirtualPath, flags: OpenFlags) -> FsResult<()> {
        self.authorize(caller, &Operation::Open(path, flags))?;
        self.backend.open(path, flags).await
    }

    /// Read file data.
    pub async fn read(&self, caller: &Caller, path: &VirtualPath, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        self.authorize(caller, &Operation::Read(path))?;
        self.backend.read(path, offset, size).await
    }

    /// Open a directory.
    pub async fn opendir(&self, caller: &Caller, path: &VirtualPath) -> FsResult<()> {
        self.authorize(caller, &Operation::Opendir(path))?;
        let attr = self.backend.getattr(path).await?;
        if attr.is_dir() {
            Ok(())
        } else {
            Err(FsError::from_errno(libc::ENOTDIR))
        }
    }

    /// List a directory.
    pub async fn readdir(&self, caller: &Caller, path: &VirtualPath) -> FsResult<Vec<DirEntry>> {
        self.authorize(caller, &Operation::Readdir(path))?;
        self.backend.readdir(path).await
    }

    /// Filesystem statistics.
    pub async fn statfs(&self, caller: &Caller) -> FsResult<StatFs> {
        self.authorize(caller, &Operation::Statfs)?;
        self.backend.statfs().await
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write file data.
    pub async fn write(&self, caller: &Caller, path: &VirtualPath, offset: u64, data: &[u8]) -> FsResult<u32> {
        self.authorize(caller, &Operation::Write(path))?;
        self.backend.write(path, offset, data).await
    }

    /// Create a new regular file.
    pub async fn create(&self, caller: &Caller, path: &VirtualPath, mode: u32) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Create(path))?;
        self.backend.create(path, mode).await
    }

    /// Create a directory.
    pub async fn mkdir(&self, caller: &Caller, path: &VirtualPath, mode: u32) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Mkdir(path))?;
        self.backend.mkdir(path, mode).await
    }

    /// Create a file node.
    pub async fn mknod(&self, caller: &Caller, path: &VirtualPath, mode: u32, rdev: u32) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Mknod(path))?;
        self.backend.mknod(path, mode, rdev).await
    }

    /// Create a symlink at `path` pointing to `target`.
    pub async fn symlink(&self, caller: &Caller, path: &VirtualPath, target: &Path) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Symlink(path))?;
        self.backend.symlink(path, target).await
    }

    /// Create a hard link at `newpath` to `oldpath`.
    pub async fn link(&self, caller: &Caller, oldpath: &VirtualPath, newpath: &VirtualPath) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Link(oldpath, newpath))?;
        self.backend.link(oldpath, newpath).await
    }

    /// Remove a file.
    pub async fn unlink(&self, caller: &Caller, path: &VirtualPath) -> FsResult<()> {
        self.authorize(caller, &Operation::Unlink(path))?;
        self.backend.unlink(path).await
    }

    /// Remove a directory.
    pub async fn rmdir(&self, caller: &Caller, path: &VirtualPath) -> FsResult<()> {
        self.authorize(caller, &Operation::Rmdir(path))?;
        self.backend.rmdir(path).await
    }

    /// Move an entry.
    ///
    /// Replacing an existing destination destroys it, so that also needs
    /// `delete` on the destination. A move onto a name that did not exist
    /// at check time is performed without replacement: if the name appears
    /// in between, the backend fails with `EEXIST`.
    pub async fn rename(&self, caller: &Caller, from: &VirtualPath, to: &VirtualPath) -> FsResult<()> {
        self.authorize(caller, &Operation::Rename(from, to))?;
        match self.backend.getattr(to).await {
            Ok(_) => {
                self.authorize(caller, &Operation::Replace(from, to))?;
                self.backend.rename(from, to, true).await
            }
            Err(err) if err.errno() == libc::ENOENT => self.backend.rename(from, to, false).await,
            Err(err) => Err(err),
        }
    }

    /// Change attributes: size needs `write`, mode, owner and times need `chmod`.
    pub async fn setattr(&self, caller: &Caller, path: &VirtualPath, attr: &SetAttr) -> FsResult<FileAttr> {
        self.authorize(caller, &Operation::Setattr(path, attr))?;
        self.backend.setattr(path, attr).await
    }
}

impl<B: std::fmt::Debug> std::fmt::Debug for Dispatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("rules", &self.policy.rule_count())
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
