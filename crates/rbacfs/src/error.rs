//! Startup errors.

use std::io;
use std::path::PathBuf;

use rbacfs_policy::PolicyError;
use thiserror::Error;

use crate::config::ConfigError;

/// Fatal conditions detected before or while mounting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The definitions file could not be read, parsed or compiled.
    #[error("invalid definitions file: {}: {source}", path.display())]
    Definitions {
        /// Definitions file path.
        path: PathBuf,
        /// Underlying error.
        source: PolicyError,
    },

    /// The backing root is missing or not a directory.
    #[error("invalid backing directory: {}: {source}", path.display())]
    Root {
        /// Backing root path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The `--check` summary could not be rendered.
    #[error("failed to render policy summary: {0}")]
    Summary(#[source] serde_json::Error),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The async runtime could not start.
    #[cfg(feature = "fuse")]
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The mount loop failed.
    #[cfg(feature = "fuse")]
    #[error("mount failed: {0}")]
    Mount(#[source] io::Error),

    /// Built without kernel mount support.
    #[cfg(not(feature = "fuse"))]
    #[error("this build has no FUSE support; rebuild with `--features fuse` to mount")]
    FuseUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_error_display() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StartupError::Summary(source);
        assert!(err.to_string().starts_with("failed to render policy summary: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
