//! # Authorization engine
//!
//! Answers "may this subject perform this permission on this path?" by a
//! single walk down the policy trie. The walk visits at most one node per
//! path segment, so the cost of a decision depends on the depth of the path
//! and the number of rules anchored along it, never on the total number of
//! rules in the policy.
//!
//! ## Conflict resolution
//!
//! 1. Only rules whose role is in the subject's effective set, and whose
//!    permission set contains the requested permission, apply.
//! 2. The deepest node holding an applicable rule decides.
//! 3. At that node an applicable deny beats any applicable allow.
//! 4. No applicable rule anywhere on the path: deny.

use serde::Serialize;
use std::fmt;

use crate::path;
use crate::permissions::{Effect, Permission};
use crate::policy::{Policy, Rule, Subject};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "rule", rename_all = "snake_case")]
pub enum Reason<'p> {
    /// The rule that governed the decision
    Rule(&'p Rule),
    /// Nothing on the path applied to the subject (default deny)
    NoMatchingRule,
    /// The request path could not be normalized
    InvalidPath,
    /// Nothing needed checking
    NoRequirements,
}

/// The outcome of one authorization query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision<'p> {
    /// Allow or deny
    pub effect: Effect,
    /// What produced the effect
    pub reason: Reason<'p>,
}

impl<'p> Decision<'p> {
    fn deny(reason: Reason<'p>) -> Self {
        Self {
            effect: Effect::Deny,
            reason,
        }
    }

    /// Check if the decision allows the operation.
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// The governing rule, if one matched.
    pub fn rule(&self) -> Option<&'p Rule> {
        match self.reason {
            Reason::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

impl fmt::Display for Decision<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            Reason::Rule(rule) => write!(f, "{} by rule `{}`", self.effect, rule),
            Reason::NoMatchingRule => write!(f, "{}: no matching rule", self.effect),
            Reason::InvalidPath => write!(f, "{}: invalid path", self.effect),
            Reason::NoRequirements => write!(f, "{}: no requirements", self.effect),
        }
    }
}

/// Authorize `permission` on `path` for `subject`.
///
/// `path` is normalized first (see [`path::normalize`]); a path containing
/// `..` or NUL is denied with [`Reason::InvalidPath`].
///
/// # Example
///
/// ```
/// use rbacfs_policy::{compile, defs, engine, Permission};
///
/// let policy = compile(defs::parse("role reader\nallow reader read /docs").unwrap()).unwrap();
/// let reader = policy.subject(["reader"]);
///
/// assert!(engine::authorize(&policy, &reader, "/docs/readme.txt", Permission::Read).is_allowed());
/// assert!(!engine::authorize(&policy, &reader, "/other", Permission::Read).is_allowed());
/// ```
pub fn authorize<'p>(policy: &'p Policy, subject: &Subject, path: &str, permission: Permission) -> Decision<'p> {
    match path::normalize(path) {
        Some(segments) => authorize_segments(policy, subject, &segments, permission),
        None => Decision::deny(Reason::InvalidPath),
    }
}

/// Authorize `permission` on an already-normalized path.
///
/// Callers that keep paths as segment lists use this to decide on exactly
/// the segments they will later act on. Segments are matched verbatim.
pub fn authorize_segments<'p, S>(
    policy: &'p Policy,
    subject: &Subject,
    segments: &[S],
    permission: Permission,
) -> Decision<'p>
where
    S: AsRef<str>,
{
    if subject.is_empty() {
        return Decision::deny(Reason::NoMatchingRule);
    }

    let mut node = policy.root();
    let mut deciding = node.decide(subject, permission);

    for segment in segments {
        let segment: &str = segment.as_ref();
        match node.children.get(segment) {
            Some(child) => node = child,
            None => break,
        }
        if let Some(rule) = node.decide(subject, permission) {
            deciding = Some(rule);
        }
    }

    match deciding {
        Some(rule) => Decision {
            effect: rule.effect,
            reason: Reason::Rule(rule),
        },
        None => Decision::deny(Reason::NoMatchingRule),
    }
}

/// Authorize a compound request: every `(segments, permission)` pair must
/// be allowed.
///
/// Returns the first deny, or the last allow when all pass. An empty
/// requirement list is allowed with [`Reason::NoRequirements`].
pub fn authorize_all<'p, 'a, S>(
    policy: &'p Policy,
    subject: &Subject,
    requirements: impl IntoIterator<Item = (&'a [S], Permission)>,
) -> Decision<'p>
where
    S: AsRef<str> + 'a,
{
    authorize_all_with(policy, subject, requirements, |_, _, _| {})
}

/// Same as [`authorize_all`], handing every decision to `observe` as it is
/// made. Evaluation stops at the first deny, so `observe` sees it last.
pub fn authorize_all_with<'p, 'a, S, F>(
    policy: &'p Policy,
    subject: &Subject,
    requirements: impl IntoIterator<Item = (&'a [S], Permission)>,
    mut observe: F,
) -> Decision<'p>
where
    S: AsRef<str> + 'a,
    F: FnMut(&'a [S], Permission, &Decision<'p>),
{
    let mut last = Decision {
        effect: Effect::Allow,
        reason: Reason::NoRequirements,
    };
    for (segments, permission) in requirements {
        let decision = authorize_segments(policy, subject, segments, permission);
        observe(segments, permission, &decision);
        if !decision.is_allowed() {
            return decision;
        }
        last = decision;
    }
    last
}
