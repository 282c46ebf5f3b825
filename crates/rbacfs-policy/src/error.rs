//! Error types for policy loading
//!
//! Three stages can fail before a filesystem is ever exposed: reading the
//! definitions file, parsing it, and compiling the parsed declarations.
//! All of them are fatal at startup; no partial policy is ever produced.

use std::path::PathBuf;
use thiserror::Error;

/// A malformed line in a definitions file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number of the offending line
    pub line: usize,
    /// What was wrong with it
    pub message: String,
}

impl ParseError {
    /// Create a parse error for the given line.
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Compilation error kinds.
///
/// Used by callers that need to branch on the failure without matching on
/// the payload of every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    /// Role inheritance contains a cycle
    CyclicRoleDefinition,
    /// A rule, binding or parent list names a role that is never declared
    UnknownRole,
    /// A rule path pattern is not absolute and normalized
    InvalidPath,
    /// The same role is declared twice
    DuplicateRole,
    /// A rule is structurally unusable
    InvalidRule,
}

impl CompileErrorKind {
    /// Get the kind name, as used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileErrorKind::CyclicRoleDefinition => "CyclicRoleDefinition",
            CompileErrorKind::UnknownRole => "UnknownRole",
            CompileErrorKind::InvalidPath => "InvalidPath",
            CompileErrorKind::DuplicateRole => "DuplicateRole",
            CompileErrorKind::InvalidRule => "InvalidRule",
        }
    }
}

/// Policy compilation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Role inheritance contains a cycle
    #[error("cyclic role definition: {}", .cycle.join(" -> "))]
    CyclicRoleDefinition {
        /// Roles along the cycle, first role repeated at the end
        cycle: Vec<String>,
    },

    /// Reference to an undeclared role
    #[error("line {line}: unknown role `{role}`")]
    UnknownRole {
        /// The undeclared role name
        role: String,
        /// Line of the declaration holding the reference
        line: usize,
    },

    /// Malformed path pattern
    #[error("line {line}: invalid path `{path}`: {reason}")]
    InvalidPath {
        /// The pattern as written
        path: String,
        /// Why it was rejected
        reason: String,
        /// Line of the rule
        line: usize,
    },

    /// Role declared more than once
    #[error("line {line}: role `{role}` already declared on line {first_line}")]
    DuplicateRole {
        /// The role name
        role: String,
        /// Line of the second declaration
        line: usize,
        /// Line of the first declaration
        first_line: usize,
    },

    /// Structurally unusable rule
    #[error("line {line}: invalid rule: {reason}")]
    InvalidRule {
        /// Why it was rejected
        reason: String,
        /// Line of the rule
        line: usize,
    },
}

impl CompileError {
    /// Get the kind of this error.
    pub fn kind(&self) -> CompileErrorKind {
        match self {
            CompileError::CyclicRoleDefinition { .. } => CompileErrorKind::CyclicRoleDefinition,
            CompileError::UnknownRole { .. } => CompileErrorKind::UnknownRole,
            CompileError::InvalidPath { .. } => CompileErrorKind::InvalidPath,
            CompileError::DuplicateRole { .. } => CompileErrorKind::DuplicateRole,
            CompileError::InvalidRule { .. } => CompileErrorKind::InvalidRule,
        }
    }
}

/// Errors raised while loading a definitions file into a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The definitions file could not be read
    #[error("failed to read definitions file `{}`: {source}", .path.display())]
    Io {
        /// Path of the definitions file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The definitions file is malformed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The declarations do not form a valid policy
    #[error("compile error ({}): {0}", .0.kind().as_str())]
    Compile(#[from] CompileError),
}

/// Result type for policy loading.
pub type PolicyResult<T> = Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(7, "unknown keyword `grant`");
        assert_eq!(err.to_string(), "line 7: unknown keyword `grant`");
    }

    #[test]
    fn test_compile_error_kind() {
        let err = CompileError::UnknownRole {
            role: "ghost".into(),
            line: 3,
        };
        assert_eq!(err.kind(), CompileErrorKind::UnknownRole);
        assert_eq!(err.to_string(), "line 3: unknown role `ghost`");
    }

    #[test]
    fn test_cycle_display() {
        let err = CompileError::CyclicRoleDefinition {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic role definition: a -> b -> a");
    }

    #[test]
    fn test_policy_error_names_kind() {
        let err = PolicyError::from(CompileError::InvalidRule {
            reason: "empty permission set".into(),
            line: 2,
        });
        assert_eq!(
            err.to_string(),
            "compile error (InvalidRule): line 2: invalid rule: empty permission set"
        );
    }
}
