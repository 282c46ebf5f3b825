//! # rbacfs policy
//!
//! Declarative role-based access control over filesystem paths.
//!
//! ## Overview
//!
//! The rbacfs-policy crate handles:
//! - **Definitions**: parsing `rbac.defs` text into declarations
//! - **Compilation**: resolving roles and inheritance, validating rules,
//!   and building an immutable path trie
//! - **Authorization**: answering allow/deny for a subject, path and
//!   permission in time proportional to the path depth
//!
//! ## Definitions format
//!
//! ```text
//! # roles, with optional inheritance
//! role reader
//! role editor : reader
//!
//! # rules: effect, role, permissions, path prefix
//! allow reader read,list /docs
//! allow editor write,create,delete /docs
//! deny  reader read /docs/secret
//!
//! # which OS callers hold which roles
//! bind gid:100 reader
//! bind uid:1000 editor
//! ```
//!
//! ## Resolution
//!
//! - Nothing applies: **deny**
//! - The deepest path with an applicable rule decides
//! - At that path, deny beats allow
//!
//! ## Usage
//!
//! ```rust
//! use rbacfs_policy::{compile, defs, Permission};
//!
//! let text = "role reader\n\
//!             allow reader read /docs\n\
//!             deny reader read /docs/secret\n";
//! let policy = compile(defs::parse(text).unwrap()).unwrap();
//! let reader = policy.subject(["reader"]);
//!
//! assert!(policy.authorize(&reader, "/docs/readme.txt", Permission::Read).is_allowed());
//! assert!(!policy.authorize(&reader, "/docs/secret/notes.txt", Permission::Read).is_allowed());
//! assert!(!policy.authorize(&reader, "/docs/readme.txt", Permission::Write).is_allowed());
//! ```

pub mod compiler;
pub mod defs;
pub mod engine;
pub mod error;
pub mod loader;
pub mod path;
pub mod permissions;
pub mod policy;
pub mod roles;

// Re-export main types for convenience
pub use compiler::compile;
pub use defs::{Declaration, Selector};
pub use engine::{authorize, authorize_all, authorize_all_with, authorize_segments, Decision, Reason};
pub use error::{CompileError, CompileErrorKind, ParseError, PolicyError, PolicyResult};
pub use loader::{load, load_str};
pub use path::PathPattern;
pub use permissions::{Effect, Permission, PermissionSet};
pub use policy::{Policy, PolicySummary, Rule, Subject};
pub use roles::{RoleId, RoleSet, RoleTable};

/// Maximum number of segments in a rule path pattern.
pub const MAX_PATH_DEPTH: usize = 256;

/// Maximum length of a rule path pattern, in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;
