//! # Definitions parser
//!
//! Turns the text of an `rbac.defs` file into an owned sequence of
//! [`Declaration`]s. The grammar is line oriented:
//!
//! ```text
//! # roles, with optional parents
//! role reader
//! role editor : reader
//! role admin : editor, auditor
//!
//! # rules: effect, role, permissions, path prefix
//! allow reader read,list /docs
//! deny  reader write     /docs/secret
//! allow editor all       "/shared drive"
//!
//! # bindings: which callers hold which roles
//! bind uid:1000 editor
//! bind gid:100  reader
//! bind *        guest
//! ```
//!
//! `#` starts a comment outside quotes. Double-quoted tokens may contain
//! spaces, `#`, and the escapes `\"` and `\\`.
//!
//! Parsing is purely syntactic: whether a referenced role exists, or whether
//! a path is normalized, is decided by the compiler.

use serde::Serialize;

use crate::error::ParseError;
use crate::permissions::{Effect, PermissionSet};

/// One parsed statement of a definitions file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    /// `role <name> [: <parent>, ...]`
    Role(RoleDecl),
    /// `allow|deny <role> <perms> <path>`
    Rule(RuleDecl),
    /// `bind <selector> <role> ...`
    Binding(BindingDecl),
}

impl Declaration {
    /// Line the declaration was read from.
    pub fn line(&self) -> usize {
        match self {
            Declaration::Role(d) => d.line,
            Declaration::Rule(d) => d.line,
            Declaration::Binding(d) => d.line,
        }
    }
}

/// A role definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDecl {
    /// Role name
    pub name: String,
    /// Roles this role inherits from
    pub parents: Vec<String>,
    /// Source line
    pub line: usize,
}

/// A path rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDecl {
    /// Allow or deny
    pub effect: Effect,
    /// Role the rule applies to
    pub role: String,
    /// Permissions covered by the rule
    pub permissions: PermissionSet,
    /// Path prefix, as written
    pub path: String,
    /// Source line
    pub line: usize,
}

/// Which callers a binding applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Callers with this user id
    Uid(u32),
    /// Callers with this primary group id
    Gid(u32),
    /// Every caller
    Any,
}

impl Selector {
    fn parse(token: &str) -> Option<Self> {
        if token == "*" {
            return Some(Selector::Any);
        }
        let (kind, id) = token.split_once(':')?;
        let id: u32 = id.parse().ok()?;
        match kind {
            "uid" => Some(Selector::Uid(id)),
            "gid" => Some(Selector::Gid(id)),
            _ => None,
        }
    }

    /// Check whether a caller identity is selected.
    pub fn matches(&self, uid: u32, gid: u32) -> bool {
        match self {
            Selector::Uid(u) => *u == uid,
            Selector::Gid(g) => *g == gid,
            Selector::Any => true,
        }
    }
}

/// A subject binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDecl {
    /// Callers the binding applies to
    pub selector: Selector,
    /// Roles granted to those callers
    pub roles: Vec<String>,
    /// Source line
    pub line: usize,
}

/// Parse definitions text into declarations.
///
/// Stops at the first malformed line; a definitions file either parses
/// completely or not at all.
///
/// # Example
///
/// ```
/// use rbacfs_policy::defs::{parse, Declaration};
///
/// let decls = parse("role reader\nallow reader read /docs\n").unwrap();
/// assert_eq!(decls.len(), 2);
/// assert!(matches!(decls[1], Declaration::Rule(_)));
///
/// let err = parse("role reader\ngrant reader read /docs\n").unwrap_err();
/// assert_eq!(err.line, 2);
/// ```
pub fn parse(text: &str) -> Result<Vec<Declaration>, ParseError> {
    let mut declarations = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize(raw).map_err(|msg| ParseError::new(line, msg))?;
        let Some((keyword, args)) = tokens.split_first() else {
            continue;
        };

        let decl = match keyword.as_str() {
            "role" => Declaration::Role(parse_role(args, line)?),
            "allow" | "deny" => Declaration::Rule(parse_rule(keyword, args, line)?),
            "bind" => Declaration::Binding(parse_binding(args, line)?),
            other => {
                return Err(ParseError::new(
                    line,
                    format!("unknown keyword `{other}` (expected `role`, `allow`, `deny` or `bind`)"),
                ))
            }
        };
        declarations.push(decl);
    }

    Ok(declarations)
}

fn parse_role(args: &[String], line: usize) -> Result<RoleDecl, ParseError> {
    let rest = args.join(" ");
    let (name, parents) = match rest.split_once(':') {
        Some((name, parents)) => (name.trim(), Some(parents)),
        None => (rest.trim(), None),
    };

    if name.is_empty() {
        return Err(ParseError::new(line, "role declaration requires a name"));
    }
    if !is_valid_role_name(name) {
        return Err(ParseError::new(line, format!("invalid role name `{name}`")));
    }

    let mut parent_names = Vec::new();
    if let Some(parents) = parents {
        for parent in parents.split([',', ' ', '\t']).filter(|p| !p.is_empty()) {
            if !is_valid_role_name(parent) {
                return Err(ParseError::new(line, format!("invalid parent role name `{parent}`")));
            }
            parent_names.push(parent.to_string());
        }
        if parent_names.is_empty() {
            return Err(ParseError::new(
                line,
                format!("expected at least one parent role after `:` for role `{name}`"),
            ));
        }
    }

    Ok(RoleDecl {
        name: name.to_string(),
        parents: parent_names,
        line,
    })
}

fn parse_rule(keyword: &str, args: &[String], line: usize) -> Result<RuleDecl, ParseError> {
    // Permission lists may be written with spaces after commas, so
    // everything between the role and the final path token is the list.
    if args.len() < 3 {
        return Err(ParseError::new(
            line,
            format!("expected `{keyword} <role> <permissions> <path>`"),
        ));
    }
    let effect = Effect::parse(keyword)
        .ok_or_else(|| ParseError::new(line, format!("unknown effect `{keyword}`")))?;

    let role = &args[0];
    if !is_valid_role_name(role) {
        return Err(ParseError::new(line, format!("invalid role name `{role}`")));
    }

    let path = &args[args.len() - 1];
    let list = args[1..args.len() - 1].join("");
    let permissions = PermissionSet::parse_list(&list).map_err(|token| {
        if token.is_empty() {
            ParseError::new(line, "empty entry in permission list")
        } else {
            ParseError::new(line, format!("unknown permission `{token}`"))
        }
    })?;

    Ok(RuleDecl {
        effect,
        role: role.clone(),
        permissions,
        path: path.clone(),
        line,
    })
}

fn parse_binding(args: &[String], line: usize) -> Result<BindingDecl, ParseError> {
    let Some((selector, roles)) = args.split_first() else {
        return Err(ParseError::new(line, "expected `bind <uid:N|gid:N|*> <role>...`"));
    };
    let selector = Selector::parse(selector).ok_or_else(|| {
        ParseError::new(
            line,
            format!("invalid subject selector `{selector}` (expected `uid:N`, `gid:N` or `*`)"),
        )
    })?;

    let mut role_names = Vec::new();
    for role in roles.iter().flat_map(|r| r.split(',')).filter(|r| !r.is_empty()) {
        if !is_valid_role_name(role) {
            return Err(ParseError::new(line, format!("invalid role name `{role}`")));
        }
        role_names.push(role.to_string());
    }
    if role_names.is_empty() {
        return Err(ParseError::new(line, "binding requires at least one role"));
    }

    Ok(BindingDecl {
        selector,
        roles: role_names,
        line,
    })
}

/// Role names: ASCII letters, digits, `_`, `-` and `.`, starting with a
/// letter or `_`.
fn is_valid_role_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Split one line into tokens, honoring double quotes and `#` comments.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars();
    let mut current = String::new();
    let mut in_token = false;

    while let Some(c) = chars.next() {
        match c {
            '#' => break,
            '"' => {
                // A quote always yields a token, even an empty one.
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(e @ ('"' | '\\')) => current.push(e),
                            Some(other) => return Err(format!("unsupported escape `\\{other}`")),
                            None => return Err("unterminated quoted string".to_string()),
                        },
                        Some(other) => current.push(other),
                        None => return Err("unterminated quoted string".to_string()),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
