//! Mount configuration.
//!
//! Configuration is loaded from environment variables, then overridden by
//! `-o` mount options and command-line flags.

use thiserror::Error;

/// Largest accepted runtime worker count.
pub const MAX_WORKERS: usize = 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },

    /// Unrecognized `-o` mount option.
    #[error("unknown mount option: {0}")]
    UnknownOption(String),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Mount-time settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Runtime worker threads.
    pub workers: usize,

    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,

    /// Refuse every modification with `EROFS`.
    pub read_only: bool,

    /// Also let the kernel check mode bits before rbacfs sees a request.
    pub default_permissions: bool,

    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            allow_other: false,
            read_only: false,
            default_permissions: false,
            auto_unmount: false,
        }
    }
}

impl MountConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RBACFS_WORKERS`: runtime worker threads (default: available CPUs)
    /// - `RBACFS_ALLOW_OTHER`: allow other users (default: false)
    /// - `RBACFS_READ_ONLY`: mount read-only (default: false)
    /// - `RBACFS_AUTO_UNMOUNT`: unmount on exit (default: false)
    ///
    /// `RBACFS_LOG` is read by the log filter, not here.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` for a variable that is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let workers = match lookup("RBACFS_WORKERS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("RBACFS_WORKERS", format!("not a number: {value}")))?,
            None => default.workers,
        };

        Ok(Self {
            workers,
            allow_other: env_flag(&lookup, "RBACFS_ALLOW_OTHER")?.unwrap_or(default.allow_other),
            read_only: env_flag(&lookup, "RBACFS_READ_ONLY")?.unwrap_or(default.read_only),
            default_permissions: default.default_permissions,
            auto_unmount: env_flag(&lookup, "RBACFS_AUTO_UNMOUNT")?.unwrap_or(default.auto_unmount),
        })
    }

    /// Apply one `-o` argument, which may be a comma-separated list.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownOption` for anything but `allow_other`, `ro`,
    /// `rw`, `default_permissions` and `auto_unmount`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// let mut config = MountConfig::default();
    /// config.apply_mount_option("ro,allow_other")?;
    /// assert!(config.read_only && config.allow_other);
    /// ```
    pub fn apply_mount_option(&mut self, option: &str) -> Result<(), ConfigError> {
        for opt in option.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt {
                "allow_other" => self.allow_other = true,
                "ro" => self.read_only = true,
                "rw" => self.read_only = false,
                "default_permissions" => self.default_permissions = true,
                "auto_unmount" => self.auto_unmount = true,
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }
        Ok(())
    }

    /// Check the combined configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` for a worker count outside
    /// `1..=MAX_WORKERS`, or `auto_unmount` without `allow_other`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::invalid(
                "workers",
                format!("must be between 1 and {MAX_WORKERS}, got {}", self.workers),
            ));
        }
        // fusermount only honors auto_unmount together with allow_other
        if self.auto_unmount && !self.allow_other {
            return Err(ConfigError::invalid("auto_unmount", "requires allow_other"));
        }
        Ok(())
    }
}

fn env_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(key, format!("expected a boolean, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<MountConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        MountConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = MountConfig::default();
        assert!(config.workers >= 1);
        assert!(!config.allow_other);
        assert!(!config.read_only);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        assert_eq!(from_vars(&[]).unwrap(), MountConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_vars() {
        let config = from_vars(&[
            ("RBACFS_WORKERS", "8"),
            ("RBACFS_ALLOW_OTHER", "true"),
            ("RBACFS_READ_ONLY", "1"),
            ("RBACFS_AUTO_UNMOUNT", "yes"),
        ])
        .unwrap();
        assert_eq!(config.workers, 8);
        assert!(config.allow_other);
        assert!(config.read_only);
        assert!(config.auto_unmount);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_malformed() {
        let err = from_vars(&[("RBACFS_WORKERS", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RBACFS_WORKERS"));

        let err = from_vars(&[("RBACFS_READ_ONLY", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("RBACFS_READ_ONLY"));
    }

    #[test]
    fn test_mount_options() {
        let mut config = MountConfig::default();
        config.apply_mount_option("ro, allow_other").unwrap();
        config.apply_mount_option("default_permissions").unwrap();
        assert!(config.read_only);
        assert!(config.allow_other);
        assert!(config.default_permissions);

        config.apply_mount_option("rw").unwrap();
        assert!(!config.read_only);

        assert!(matches!(
            config.apply_mount_option("noexec"),
            Err(ConfigError::UnknownOption(ref o)) if o == "noexec"
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = MountConfig {
            workers: 0,
            ..MountConfig::default()
        };
        assert!(config.validate().is_err());

        config.workers = MAX_WORKERS + 1;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.auto_unmount = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("allow_other"));

        config.allow_other = true;
        assert!(config.validate().is_ok());
    }
}
