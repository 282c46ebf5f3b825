//! # Permissions
//!
//! The closed permission vocabulary used by rules, and the compact set type
//! rules carry. A rule grants (or denies) a set of permissions; every
//! filesystem operation is translated into one or more single permissions
//! before it reaches the authorization engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single filesystem permission.
///
/// - **Read**: read file contents, stat a path, read a symlink
/// - **Write**: modify file contents, truncate
/// - **Execute**: execute a file (checked through `access(X_OK)`)
/// - **Create**: create entries beneath a directory
/// - **Delete**: remove an entry, or move it away
/// - **List**: enumerate directory entries
/// - **Chmod**: change mode, ownership or timestamps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read file data and metadata.
    Read,

    /// Modify file data.
    Write,

    /// Execute a file.
    Execute,

    /// Create a new entry beneath a directory.
    Create,

    /// Remove an entry.
    Delete,

    /// List directory entries.
    List,

    /// Change mode, owner or timestamps.
    Chmod,
}

impl Permission {
    /// Every permission, in bit order.
    pub const ALL: [Permission; 7] = [
        Permission::Read,
        Permission::Write,
        Permission::Execute,
        Permission::Create,
        Permission::Delete,
        Permission::List,
        Permission::Chmod,
    ];

    /// Get the canonical token of the permission, as written in definitions files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Execute => "execute",
            Permission::Create => "create",
            Permission::Delete => "delete",
            Permission::List => "list",
            Permission::Chmod => "chmod",
        }
    }

    /// Parse a permission token.
    ///
    /// # Arguments
    ///
    /// * `s` - Token to parse (case-insensitive, supports aliases)
    ///
    /// # Returns
    ///
    /// `Some(Permission)` if valid, `None` otherwise
    ///
    /// # Example
    ///
    /// ```
    /// use rbacfs_policy::Permission;
    ///
    /// assert_eq!(Permission::parse("read"), Some(Permission::Read));
    /// assert_eq!(Permission::parse("exec"), Some(Permission::Execute));
    /// assert_eq!(Permission::parse("readdir"), Some(Permission::List));
    /// assert_eq!(Permission::parse("fly"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" | "r" => Some(Permission::Read),
            "write" | "w" | "modify" => Some(Permission::Write),
            "execute" | "exec" | "x" => Some(Permission::Execute),
            "create" | "add" => Some(Permission::Create),
            "delete" | "remove" | "unlink" => Some(Permission::Delete),
            "list" | "ls" | "readdir" => Some(Permission::List),
            "chmod" | "setattr" | "chown" => Some(Permission::Chmod),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of permissions, stored as a bit mask.
///
/// # Example
///
/// ```
/// use rbacfs_policy::{Permission, PermissionSet};
///
/// let set = PermissionSet::from_iter([Permission::Read, Permission::List]);
/// assert!(set.contains(Permission::Read));
/// assert!(!set.contains(Permission::Write));
/// assert_eq!(set.to_string(), "read,list");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "Vec<Permission>")]
pub struct PermissionSet {
    bits: u8,
}

impl PermissionSet {
    /// Create a new empty permission set.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// A set holding every permission.
    pub fn all() -> Self {
        Permission::ALL.into_iter().collect()
    }

    /// Add a permission to the set.
    pub fn add(&mut self, permission: Permission) {
        self.bits |= permission.bit();
    }

    /// Check if the set contains a permission.
    pub fn contains(&self, permission: Permission) -> bool {
        self.bits & permission.bit() != 0
    }

    /// Union of two sets.
    pub fn union(self, other: PermissionSet) -> PermissionSet {
        PermissionSet {
            bits: self.bits | other.bits,
        }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Get the count of permissions.
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterate the permissions in the set, in bit order.
    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        Permission::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    /// Parse a comma separated permission list such as `read,list`.
    ///
    /// `all` and `*` expand to every permission. Empty items are rejected so
    /// that `read,,write` is reported rather than silently accepted.
    ///
    /// # Returns
    ///
    /// The parsed set, or the offending token
    pub fn parse_list(s: &str) -> Result<Self, String> {
        let mut set = PermissionSet::empty();
        for token in s.split(',') {
            let token = token.trim();
            if token == "all" || token == "*" {
                set = set.union(PermissionSet::all());
                continue;
            }
            match Permission::parse(token) {
                Some(p) => set.add(p),
                None => return Err(token.to_string()),
            }
        }
        Ok(set)
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut set = PermissionSet::empty();
        for perm in iter {
            set.add(perm);
        }
        set
    }
}

impl From<PermissionSet> for Vec<Permission> {
    fn from(set: PermissionSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for perm in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(perm.as_str())?;
            first = false;
        }
        Ok(())
    }
}

/// Whether a rule grants or withholds its permissions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Explicit denial. Ordered first so deny rules sort ahead of allows.
    Deny,

    /// Grant.
    Allow,
}

impl Effect {
    /// Get the keyword for this effect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Deny => "deny",
            Effect::Allow => "allow",
        }
    }

    /// Parse an effect keyword.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Effect::Allow),
            "deny" => Some(Effect::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
