//! Policy compiler
//!
//! Turns parsed declarations into an immutable [`Policy`]. Every reference
//! is checked here so the engine never meets a dangling role or malformed
//! pattern at decision time.

use crate::defs::{BindingDecl, Declaration, RoleDecl, RuleDecl};
use crate::error::CompileError;
use crate::path::PathPattern;
use crate::policy::{Binding, Node, Policy, Rule};
use crate::roles::{RoleSet, RoleTable};

/// Compile declarations into a policy.
///
/// Takes ownership of the declarations; the returned policy keeps no
/// reference to them. The result does not depend on declaration order.
///
/// # Arguments
///
/// * `declarations` - Output of [`defs::parse`](crate::defs::parse)
///
/// # Errors
///
/// The first problem found, in this order: role table errors
/// (`DuplicateRole`, `UnknownRole` for parents, `CyclicRoleDefinition`),
/// then rule errors (`UnknownRole`, `InvalidRule`, `InvalidPath`), then
/// binding errors (`UnknownRole`).
///
/// # Example
///
/// ```
/// use rbacfs_policy::{compile, defs, CompileErrorKind};
///
/// let err = compile(defs::parse("allow ghost read /").unwrap()).unwrap_err();
/// assert_eq!(err.kind(), CompileErrorKind::UnknownRole);
/// ```
pub fn compile(declarations: Vec<Declaration>) -> Result<Policy, CompileError> {
    let mut role_decls: Vec<RoleDecl> = Vec::new();
    let mut rule_decls: Vec<RuleDecl> = Vec::new();
    let mut binding_decls: Vec<BindingDecl> = Vec::new();
    for declaration in declarations {
        match declaration {
            Declaration::Role(role) => role_decls.push(role),
            Declaration::Rule(rule) => rule_decls.push(rule),
            Declaration::Binding(binding) => binding_decls.push(binding),
        }
    }

    let roles = RoleTable::build(role_decls)?;

    let mut root = Node::default();
    let rule_count = rule_decls.len();
    for decl in rule_decls {
        let (rule, segments) = compile_rule(&roles, decl)?;
        root.insert(&segments, rule);
    }

    let bindings = binding_decls
        .into_iter()
        .map(|decl| compile_binding(&roles, decl))
        .collect::<Result<Vec<_>, _>>()?;

    root.freeze();

    tracing::debug!(
        roles = roles.len(),
        rules = rule_count,
        bindings = bindings.len(),
        "Compiled policy"
    );

    Ok(Policy::new(roles, root, bindings, rule_count))
}

fn compile_rule(roles: &RoleTable, decl: RuleDecl) -> Result<(Rule, Vec<String>), CompileError> {
    let role_id = roles.id(&decl.role).ok_or_else(|| CompileError::UnknownRole {
        role: decl.role.clone(),
        line: decl.line,
    })?;

    if decl.permissions.is_empty() {
        return Err(CompileError::InvalidRule {
            reason: "empty permission set".to_string(),
            line: decl.line,
        });
    }

    let (path, segments) = PathPattern::new(decl.path.as_str())
        .map_err(|reason| CompileError::InvalidPath {
            path: decl.path.clone(),
            reason,
            line: decl.line,
        })?
        .into_parts();

    let rule = Rule {
        role_id,
        role: decl.role,
        effect: decl.effect,
        permissions: decl.permissions,
        path,
        line: decl.line,
    };
    Ok((rule, segments))
}

fn compile_binding(roles: &RoleTable, decl: BindingDecl) -> Result<Binding, CompileError> {
    let mut set = RoleSet::new();
    for name in &decl.roles {
        let id = roles.id(name).ok_or_else(|| CompileError::UnknownRole {
            role: name.clone(),
            line: decl.line,
        })?;
        set.union_with(roles.closure(id));
    }
    Ok(Binding {
        selector: decl.selector,
        role_names: decl.roles,
        roles: set,
    })
}
