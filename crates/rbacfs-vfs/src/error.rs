//! Filesystem error types.

use rbacfs_policy::Permission;
use std::io;
use thiserror::Error;

/// Errors returned by dispatcher operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The policy denied the operation.
    #[error("access denied: {permission} on {path}: {reason}")]
    AccessDenied {
        /// Virtual path the denied requirement was checked on
        path: String,
        /// The permission that was refused
        permission: Permission,
        /// Human readable decision, naming the governing rule if any
        reason: String,
    },

    /// The request path cannot be mapped to a virtual path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// No such file, directory or inode.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backing store error, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an I/O error from a raw OS error code.
    pub fn from_errno(errno: i32) -> Self {
        Self::Io(io::Error::from_raw_os_error(errno))
    }

    /// Check if this error is a policy denial.
    pub fn is_denial(&self) -> bool {
        matches!(self, FsError::AccessDenied { .. })
    }

    /// Get the OS error code to report to the kernel.
    ///
    /// Denials are `EACCES`. Backing store errors keep their own code, so a
    /// caller sees exactly what the backing filesystem returned.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::AccessDenied { .. } => libc::EACCES,
            FsError::InvalidPath(_) => libc::EINVAL,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Io(e) => e,
            FsError::AccessDenied { .. } => io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()),
            FsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
