//! The committed global namespace
//!
//! Holds every node of every successfully loaded bundle together with name
//! bindings, local-variable ownership and per-function version history.
//! Only [`Namespace::commit`] mutates it, one whole bundle at a time.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::id::MuId;
use crate::ir::{EntityKind, FuncNode, GlobalCellNode, Node};

/// Type alias for the HashMap implementation used by the namespace
pub type NsHashMap<K, V> = FxHashMap<K, V>;

/// Everything a validated bundle contributes to the namespace
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub nodes: Vec<(MuId, Node)>,
    /// Local variable -> block or instruction that defines it
    pub vars: Vec<(MuId, MuId)>,
    /// Names generated in the bundle, in generation order
    pub names: Vec<(String, MuId)>,
    /// Block -> function version, instruction -> block, clause -> instruction
    pub owners: Vec<(MuId, MuId)>,
}

/// A name that now resolves to a different identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowed {
    pub name: String,
    pub previous: MuId,
    pub current: MuId,
}

/// Summary of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub nodes: usize,
    pub names_bound: usize,
    pub shadowed: Vec<Shadowed>,
}

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    nodes: NsHashMap<MuId, Node>,
    vars: NsHashMap<MuId, MuId>,
    /// Current name bindings
    names: NsHashMap<String, MuId>,
    /// The name each id was generated with, kept after shadowing
    id_names: NsHashMap<MuId, String>,
    /// Function -> versions in commit order; the last one is current
    versions: NsHashMap<MuId, Vec<MuId>>,
    owners: NsHashMap<MuId, MuId>,
    commits: u64,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: MuId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Kind of the entity behind `id`, including local variables
    pub fn kind_of(&self, id: MuId) -> Option<EntityKind> {
        self.nodes
            .get(&id)
            .map(Node::kind)
            .or_else(|| self.vars.contains_key(&id).then_some(EntityKind::Var))
    }

    /// Whether `id` is claimed by a committed node or variable
    pub fn contains(&self, id: MuId) -> bool {
        self.nodes.contains_key(&id) || self.vars.contains_key(&id)
    }

    /// The block or instruction that defines a committed local variable
    pub fn var_owner(&self, var: MuId) -> Option<MuId> {
        self.vars.get(&var).copied()
    }

    /// The function version owning a block, the block owning an instruction,
    /// or the instruction owning a destination clause
    pub fn owner(&self, id: MuId) -> Option<MuId> {
        self.owners.get(&id).copied()
    }

    pub fn id_of(&self, name: &str) -> Option<MuId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: MuId) -> Option<&str> {
        self.id_names.get(&id).map(String::as_str)
    }

    /// Whether `name` currently resolves to `id`
    pub fn is_current_binding(&self, id: MuId) -> bool {
        self.name_of(id)
            .and_then(|name| self.id_of(name))
            .is_some_and(|bound| bound == id)
    }

    pub fn current_version(&self, func: MuId) -> Option<MuId> {
        self.versions.get(&func).and_then(|v| v.last().copied())
    }

    /// All committed versions of `func`, oldest first
    pub fn versions(&self, func: MuId) -> &[MuId] {
        self.versions.get(&func).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All committed functions, in id order
    pub fn functions(&self) -> Vec<(MuId, &FuncNode)> {
        let mut funcs: Vec<_> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| match node {
                Node::Func(func) => Some((*id, func)),
                _ => None,
            })
            .collect();
        funcs.sort_by_key(|(id, _)| *id);
        funcs
    }

    /// All committed global cells, in id order
    pub fn global_cells(&self) -> Vec<(MuId, &GlobalCellNode)> {
        let mut cells: Vec<_> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| match node {
                Node::GlobalCell(cell) => Some((*id, cell)),
                _ => None,
            })
            .collect();
        cells.sort_by_key(|(id, _)| *id);
        cells
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of bundles committed so far
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Merges a validated bundle
    ///
    /// The caller guarantees the batch was validated against this exact
    /// namespace; no checking happens here.
    pub fn commit(&mut self, batch: CommitBatch) -> CommitSummary {
        let mut summary = CommitSummary {
            nodes: batch.nodes.len(),
            ..Default::default()
        };

        for (id, node) in batch.nodes {
            if let Node::FuncVer(ver) = &node {
                self.versions.entry(ver.func).or_default().push(id);
            }
            self.nodes.insert(id, node);
        }
        self.vars.extend(batch.vars);
        self.owners.extend(batch.owners);

        for (name, id) in batch.names {
            if let Some(previous) = self.names.insert(name.clone(), id) {
                if previous != id {
                    summary.shadowed.push(Shadowed {
                        name: name.clone(),
                        previous,
                        current: id,
                    });
                }
            }
            self.id_names.insert(id, name);
            summary.names_bound += 1;
        }

        self.commits += 1;
        debug!(
            commit = self.commits,
            nodes = summary.nodes,
            names = summary.names_bound,
            "namespace updated"
        );
        summary
    }
}

#[cfg(test)]
#[path = "namespace_tests.rs"]
mod tests;
