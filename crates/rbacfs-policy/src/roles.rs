//! Role table and inheritance closure
//!
//! Roles are interned to dense [`RoleId`]s at compile time. Each role's
//! closure (itself plus every role it inherits from, transitively) is
//! computed once, so the authorization engine only ever tests membership in
//! a precomputed [`RoleSet`].

use std::collections::HashMap;

use crate::defs::RoleDecl;
use crate::error::CompileError;

/// Interned role identifier, an index into the role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleId(u32);

impl RoleId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A set of roles, stored as a bit set over role ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    words: Vec<u64>,
}

impl RoleSet {
    /// Create a new empty role set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role to the set.
    pub fn insert(&mut self, role: RoleId) {
        let (word, bit) = (role.index() / 64, role.index() % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    /// Check if the set contains a role.
    pub fn contains(&self, role: RoleId) -> bool {
        let (word, bit) = (role.index() / 64, role.index() % 64);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    /// Merge another role set into this one.
    pub fn union_with(&mut self, other: &RoleSet) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= src;
        }
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Get the count of roles.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate role ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, word)| {
            (0..64u32)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| RoleId(i as u32 * 64 + bit))
        })
    }
}

/// Compiled roles: names, ids and inheritance closures.
#[derive(Debug, Clone)]
pub struct RoleTable {
    names: Vec<String>,
    parents: Vec<Vec<RoleId>>,
    index: HashMap<String, RoleId>,
    closures: Vec<RoleSet>,
}

impl RoleTable {
    /// Build the role table from role declarations.
    ///
    /// Roles are sorted by name before ids are assigned, so ids (and every
    /// structure derived from them) do not depend on declaration order.
    ///
    /// # Errors
    ///
    /// - `DuplicateRole` if a name is declared twice
    /// - `UnknownRole` if a parent is never declared
    /// - `CyclicRoleDefinition` if inheritance loops
    pub fn build(mut decls: Vec<RoleDecl>) -> Result<Self, CompileError> {
        decls.sort_by(|a, b| a.name.cmp(&b.name).then(a.line.cmp(&b.line)));

        let mut index = HashMap::with_capacity(decls.len());
        let mut first_line: HashMap<&str, usize> = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if let Some(&first) = first_line.get(decl.name.as_str()) {
                return Err(CompileError::DuplicateRole {
                    role: decl.name.clone(),
                    line: decl.line,
                    first_line: first,
                });
            }
            first_line.insert(&decl.name, decl.line);
            index.insert(decl.name.clone(), RoleId(i as u32));
        }

        let mut parents = Vec::with_capacity(decls.len());
        for decl in &decls {
            let mut ids = Vec::with_capacity(decl.parents.len());
            for parent in &decl.parents {
                let id = index.get(parent).copied().ok_or_else(|| CompileError::UnknownRole {
                    role: parent.clone(),
                    line: decl.line,
                })?;
                ids.push(id);
            }
            parents.push(ids);
        }

        let names: Vec<String> = decls.into_iter().map(|d| d.name).collect();
        let order = topological_order(&names, &parents)?;

        // Parents come before children in `order`, so every parent closure
        // is complete by the time a child reads it.
        let mut closures = vec![RoleSet::new(); names.len()];
        for role in order {
            let mut closure = RoleSet::new();
            closure.insert(role);
            for parent in &parents[role.index()] {
                closure.union_with(&closures[parent.index()]);
            }
            closures[role.index()] = closure;
        }

        Ok(Self {
            names,
            parents,
            index,
            closures,
        })
    }

    /// Look up a role by name.
    pub fn id(&self, name: &str) -> Option<RoleId> {
        self.index.get(name).copied()
    }

    /// Get the name of a role.
    pub fn name(&self, role: RoleId) -> &str {
        &self.names[role.index()]
    }

    /// Get the direct parents of a role.
    pub fn parents(&self, role: RoleId) -> &[RoleId] {
        &self.parents[role.index()]
    }

    /// Get the reflexive-transitive closure of a role.
    pub fn closure(&self, role: RoleId) -> &RoleSet {
        &self.closures[role.index()]
    }

    /// Number of roles.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate all role ids.
    pub fn ids(&self) -> impl Iterator<Item = RoleId> {
        (0..self.names.len() as u32).map(RoleId)
    }
}

/// Order roles so that every parent precedes its children.
///
/// Iterative three-color DFS; an edge into a role still on the stack is a
/// cycle, reported as the path from that role back to itself.
fn topological_order(names: &[String], parents: &[Vec<RoleId>]) -> Result<Vec<RoleId>, CompileError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color = vec![Color::White; names.len()];
    let mut order = Vec::with_capacity(names.len());

    for start in 0..names.len() {
        if color[start] != Color::White {
            continue;
        }
        // (role, index of next parent to visit)
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = Color::Gray;

        while let Some(top) = stack.last_mut() {
            let role = top.0;
            if let Some(parent) = parents[role].get(top.1) {
                top.1 += 1;
                let p = parent.index();
                match color[p] {
                    Color::White => {
                        color[p] = Color::Gray;
                        stack.push((p, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|(r, _)| *r == p).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|(r, _)| names[*r].clone()).collect();
                        cycle.push(names[p].clone());
                        return Err(CompileError::CyclicRoleDefinition { cycle });
                    }
                    Color::Black => {}
                }
            } else {
                color[role] = Color::Black;
                order.push(RoleId(role as u32));
                stack.pop();
            }
        }
    }

    Ok(order)
}
