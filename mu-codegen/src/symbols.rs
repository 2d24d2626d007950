//! Native symbol names for compiled functions and global cells
//!
//! A function named `@test_fnc` is exported as `test_fnc`. The sigil is
//! dropped and every character that is not valid in a C identifier becomes
//! `_`. Entities without a name, or whose name has since been rebound to
//! another entity, get a name derived from their identifier.

use rustc_hash::FxHashMap;

use mu_core::{MuId, Namespace, Node};

/// Base symbol for a function or global cell, before collision handling
pub fn symbol_for(ns: &Namespace, id: MuId) -> String {
    match ns.name_of(id) {
        Some(name) => {
            let base = sanitize(name);
            if ns.is_current_binding(id) {
                base
            } else {
                format!("{}__{}", base, id.get())
            }
        }
        None => match ns.node(id) {
            Some(Node::GlobalCell(_)) => format!("__mu_global_{}", id.get()),
            _ => format!("__mu_func_{}", id.get()),
        },
    }
}

fn sanitize(name: &str) -> String {
    let trimmed = name.trim_start_matches(['@', '%']);
    let mut out: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Symbols handed out within one object file
#[derive(Debug, Default)]
pub struct SymbolTable {
    taken: FxHashMap<String, MuId>,
    assigned: FxHashMap<MuId, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The symbol of `id`, unique within this table
    pub fn assign(&mut self, ns: &Namespace, id: MuId) -> String {
        if let Some(symbol) = self.assigned.get(&id) {
            return symbol.clone();
        }
        let base = symbol_for(ns, id);
        let symbol = if self.taken.contains_key(&base) {
            format!("{}__{}", base, id.get())
        } else {
            base
        };
        self.taken.insert(symbol.clone(), id);
        self.assigned.insert(id, symbol.clone());
        symbol
    }

    pub fn get(&self, id: MuId) -> Option<&str> {
        self.assigned.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mu_core::ir::{FuncNode, GlobalCellNode, TypeNode};
    use mu_core::CommitBatch;

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    fn namespace(names: &[(&str, u32)]) -> Namespace {
        let mut ns = Namespace::new();
        let mut batch = CommitBatch::default();
        batch.nodes.push((id(100), Node::Type(TypeNode::Void)));
        for (name, n) in names {
            batch.nodes.push((id(*n), Node::Func(FuncNode { sig: id(100) })));
            batch.names.push((name.to_string(), id(*n)));
        }
        ns.commit(batch);
        ns
    }

    #[test]
    fn test_sigil_is_dropped() {
        let ns = namespace(&[("@test_fnc", 1), ("%local", 2)]);
        assert_eq!(symbol_for(&ns, id(1)), "test_fnc");
        assert_eq!(symbol_for(&ns, id(2)), "local");
    }

    #[test]
    fn test_invalid_characters_are_replaced() {
        let ns = namespace(&[("@foo.bar-baz", 1), ("@1st", 2)]);
        assert_eq!(symbol_for(&ns, id(1)), "foo_bar_baz");
        assert_eq!(symbol_for(&ns, id(2)), "_1st");
    }

    #[test]
    fn test_unnamed_function() {
        let ns = namespace(&[]);
        assert_eq!(symbol_for(&ns, id(7)), "__mu_func_7");
    }

    #[test]
    fn test_global_cells() {
        let mut ns = namespace(&[]);
        let mut batch = CommitBatch::default();
        batch.nodes.push((id(8), Node::GlobalCell(GlobalCellNode { ty: id(100) })));
        batch.nodes.push((id(9), Node::GlobalCell(GlobalCellNode { ty: id(100) })));
        batch.names.push(("@counter".to_string(), id(9)));
        ns.commit(batch);

        assert_eq!(symbol_for(&ns, id(8)), "__mu_global_8");
        assert_eq!(symbol_for(&ns, id(9)), "counter");
    }

    #[test]
    fn test_shadowed_function_gets_id_suffix() {
        let mut ns = namespace(&[("@f", 1)]);
        let mut batch = CommitBatch::default();
        batch.nodes.push((id(2), Node::Func(FuncNode { sig: id(100) })));
        batch.names.push(("@f".to_string(), id(2)));
        ns.commit(batch);

        assert_eq!(symbol_for(&ns, id(2)), "f");
        assert_eq!(symbol_for(&ns, id(1)), "f__1");
    }

    #[test]
    fn test_collisions_are_disambiguated() {
        let ns = namespace(&[("@a.b", 1), ("@a_b", 2)]);
        let mut table = SymbolTable::new();
        assert_eq!(table.assign(&ns, id(1)), "a_b");
        assert_eq!(table.assign(&ns, id(2)), "a_b__2");
        // stable on repeat
        assert_eq!(table.assign(&ns, id(2)), "a_b__2");
        assert_eq!(table.get(id(1)), Some("a_b"));
    }
}
