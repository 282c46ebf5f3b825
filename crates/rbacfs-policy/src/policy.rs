//! # Policy
//!
//! The compiled, immutable decision structure. A [`Policy`] is a trie keyed
//! by path segment; every node holds the rules anchored exactly at that
//! node. Nothing in a `Policy` can change after [`compile`](crate::compile)
//! returns it, so it can be shared across any number of threads (typically
//! as `Arc<Policy>`) and queried without locks.

use serde::Serialize;
use std::collections::HashMap;

use crate::defs::Selector;
use crate::engine::{self, Decision};
use crate::permissions::{Effect, Permission, PermissionSet};
use crate::roles::{RoleId, RoleSet, RoleTable};

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    #[serde(skip)]
    pub(crate) role_id: RoleId,
    /// Role the rule applies to
    pub role: String,
    /// Allow or deny
    pub effect: Effect,
    /// Permissions covered
    pub permissions: PermissionSet,
    /// Path prefix the rule is anchored at
    pub path: String,
    /// Line of the definitions file the rule came from
    pub line: usize,
}

impl Rule {
    /// Check whether this rule speaks about `permission` for `subject`.
    pub(crate) fn applies(&self, subject: &Subject, permission: Permission) -> bool {
        self.permissions.contains(permission) && subject.roles.contains(self.role_id)
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} (line {})",
            self.effect, self.role, self.permissions, self.path, self.line
        )
    }
}

/// A trie node.
#[derive(Debug, Default)]
pub(crate) struct Node {
    pub(crate) children: HashMap<Box<str>, Node>,
    /// Sorted deny-first once the policy is frozen.
    pub(crate) rules: Vec<Rule>,
}

impl Node {
    pub(crate) fn insert(&mut self, segments: &[String], rule: Rule) {
        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.as_str().into()).or_default();
        }
        node.rules.push(rule);
    }

    /// Sort every node's rules into their canonical order.
    ///
    /// Deny rules first, then by role name, permission bits and line, so
    /// the first applicable rule at a node is the decision for that node and
    /// the reported rule does not depend on declaration order.
    pub(crate) fn freeze(&mut self) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            node.rules.sort_by(|a, b| {
                a.effect
                    .cmp(&b.effect)
                    .then_with(|| a.role.cmp(&b.role))
                    .then_with(|| a.permissions.cmp(&b.permissions))
                    .then_with(|| a.line.cmp(&b.line))
            });
            node.rules.shrink_to_fit();
            stack.extend(node.children.values_mut());
        }
    }

    /// The rule deciding `permission` for `subject` at this node, if any.
    pub(crate) fn decide(&self, subject: &Subject, permission: Permission) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.applies(subject, permission))
    }
}

/// A compiled subject binding.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) selector: Selector,
    pub(crate) role_names: Vec<String>,
    pub(crate) roles: RoleSet,
}

/// The effective role set of a caller.
///
/// Always expanded to the inheritance closure of the roles the caller holds.
/// A subject is only meaningful against the policy that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    roles: RoleSet,
}

impl Subject {
    /// A subject holding no roles. It is denied everything.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Effective roles.
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Check if the subject holds no roles.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Compiled RBAC policy.
#[derive(Debug)]
pub struct Policy {
    roles: RoleTable,
    root: Node,
    bindings: Vec<Binding>,
    rule_count: usize,
}

impl Policy {
    pub(crate) fn new(roles: RoleTable, root: Node, bindings: Vec<Binding>, rule_count: usize) -> Self {
        Self {
            roles,
            root,
            bindings,
            rule_count,
        }
    }

    pub(crate) fn root(&self) -> &Node {
        &self.root
    }

    /// Get the role table.
    pub fn roles(&self) -> &RoleTable {
        &self.roles
    }

    /// Number of rules in the policy.
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Number of subject bindings in the policy.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Build a subject from role names.
    ///
    /// Each name is expanded to its inheritance closure. Names the policy
    /// does not declare are ignored: no rule can mention them.
    ///
    /// # Example
    ///
    /// ```
    /// use rbacfs_policy::{compile, defs, Permission};
    ///
    /// let policy = compile(defs::parse("role reader\nrole editor : reader\nallow reader read /docs").unwrap()).unwrap();
    /// let editor = policy.subject(["editor"]);
    /// assert!(policy.authorize(&editor, "/docs/a.txt", Permission::Read).is_allowed());
    /// ```
    pub fn subject<I, S>(&self, role_names: I) -> Subject
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roles = RoleSet::new();
        for name in role_names {
            match self.roles.id(name.as_ref()) {
                Some(id) => roles.union_with(self.roles.closure(id)),
                None => tracing::debug!(role = name.as_ref(), "Ignoring undeclared role"),
            }
        }
        Subject { roles }
    }

    /// Build the subject for an OS caller from the policy's bindings.
    ///
    /// The roles of every binding whose selector matches `uid` or `gid` are
    /// combined. A caller matching no binding gets an empty subject.
    pub fn subject_for(&self, uid: u32, gid: u32) -> Subject {
        let mut roles = RoleSet::new();
        for binding in &self.bindings {
            if binding.selector.matches(uid, gid) {
                roles.union_with(&binding.roles);
            }
        }
        Subject { roles }
    }

    /// Authorize `permission` on `path` for `subject`.
    ///
    /// Shorthand for [`engine::authorize`].
    pub fn authorize<'p>(&'p self, subject: &Subject, path: &str, permission: Permission) -> Decision<'p> {
        engine::authorize(self, subject, path, permission)
    }

    /// Describe the policy in a serializable form.
    pub fn summary(&self) -> PolicySummary<'_> {
        let roles = self
            .roles
            .ids()
            .map(|id| RoleSummary {
                name: self.roles.name(id),
                parents: self.roles.parents(id).iter().map(|p| self.roles.name(*p)).collect(),
                effective: self
                    .roles
                    .closure(id)
                    .iter()
                    .map(|r| self.roles.name(r))
                    .collect(),
            })
            .collect();

        let mut rules = Vec::with_capacity(self.rule_count);
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            rules.extend(node.rules.iter());
            stack.extend(node.children.values());
        }
        rules.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));

        let bindings = self
            .bindings
            .iter()
            .map(|b| BindingSummary {
                selector: b.selector,
                roles: b.role_names.iter().map(String::as_str).collect(),
            })
            .collect();

        PolicySummary {
            roles,
            rules,
            bindings,
        }
    }
}

/// Serializable description of a compiled policy.
#[derive(Debug, Serialize)]
pub struct PolicySummary<'p> {
    /// Declared roles, by name
    pub roles: Vec<RoleSummary<'p>>,
    /// Rules, ordered by path then source line
    pub rules: Vec<&'p Rule>,
    /// Subject bindings, in declaration order
    pub bindings: Vec<BindingSummary<'p>>,
}

/// One role in a [`PolicySummary`].
#[derive(Debug, Serialize)]
pub struct RoleSummary<'p> {
    /// Role name
    pub name: &'p str,
    /// Direct parents
    pub parents: Vec<&'p str>,
    /// Inheritance closure, the role itself included
    pub effective: Vec<&'p str>,
}

/// One binding in a [`PolicySummary`].
#[derive(Debug, Serialize)]
pub struct BindingSummary<'p> {
    /// Callers the binding applies to
    pub selector: Selector,
    /// Roles granted, as written
    pub roles: Vec<&'p str>,
}
