//! The staging area of one in-flight bundle
//!
//! Draft nodes are kept here, keyed by identifier, until `load` hands the
//! whole table to the resolver. Nothing in a bundle is visible through the
//! global namespace.

use mu_core::ir::{EntityKind, Node};
use mu_core::namespace::{CommitBatch, NsHashMap};
use mu_core::{Error, MuId, Namespace, Result};

#[derive(Debug, Default)]
pub struct Bundle {
    nodes: NsHashMap<MuId, Node>,
    /// Node ids in staging order
    order: Vec<MuId>,
    /// Local variable -> defining block or instruction
    vars: NsHashMap<MuId, MuId>,
    /// Names reserved by `gen_sym`, in generation order
    names: Vec<(String, MuId)>,
    name_index: NsHashMap<String, MuId>,
    id_names: NsHashMap<MuId, String>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for `id` until the bundle is committed or dropped
    pub fn reserve_name(&mut self, name: &str, id: MuId) -> Result<()> {
        if let Some(&existing) = self.name_index.get(name) {
            return Err(Error::DuplicateName {
                name: name.to_string(),
                existing,
            });
        }
        self.name_index.insert(name.to_string(), id);
        self.id_names.insert(id, name.to_string());
        self.names.push((name.to_string(), id));
        Ok(())
    }

    /// Whether `id` is already used by a node or a variable of this bundle
    pub fn is_claimed(&self, id: MuId) -> bool {
        self.nodes.contains_key(&id) || self.vars.contains_key(&id)
    }

    /// Stages `node` under `id`
    ///
    /// Fails without staging anything if `id` or one of the variables the
    /// node defines is already claimed here or in `committed`.
    pub fn insert(&mut self, id: MuId, node: Node, committed: &Namespace) -> Result<()> {
        let mut claimed = vec![id];
        claimed.extend(node.defined_vars());

        for (i, candidate) in claimed.iter().enumerate() {
            if self.is_claimed(*candidate)
                || committed.contains(*candidate)
                || claimed[..i].contains(candidate)
            {
                return Err(Error::DuplicateId(*candidate));
            }
        }

        for var in &claimed[1..] {
            self.vars.insert(*var, id);
        }
        self.nodes.insert(id, node);
        self.order.push(id);
        Ok(())
    }

    pub fn node(&self, id: MuId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn kind_of(&self, id: MuId) -> Option<EntityKind> {
        self.nodes
            .get(&id)
            .map(Node::kind)
            .or_else(|| self.vars.contains_key(&id).then_some(EntityKind::Var))
    }

    pub fn var_owner(&self, var: MuId) -> Option<MuId> {
        self.vars.get(&var).copied()
    }

    pub fn name_of(&self, id: MuId) -> Option<&str> {
        self.id_names.get(&id).map(String::as_str)
    }

    /// Names reserved in this bundle, in generation order
    pub fn names(&self) -> &[(String, MuId)] {
        &self.names
    }

    /// Staged nodes in ascending id order
    pub fn nodes_by_id(&self) -> Vec<(MuId, &Node)> {
        let mut nodes: Vec<_> = self.nodes.iter().map(|(id, node)| (*id, node)).collect();
        nodes.sort_by_key(|(id, _)| *id);
        nodes
    }

    /// Every identifier this bundle claims: node ids and variable ids
    pub fn claimed_ids(&self) -> impl Iterator<Item = MuId> + '_ {
        self.order.iter().copied().chain(self.vars.keys().copied())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Turns the staged nodes into a commit batch
    ///
    /// Names whose identifier never received a node or variable are dropped.
    pub fn into_batch(self, owners: Vec<(MuId, MuId)>) -> CommitBatch {
        let Bundle {
            mut nodes,
            order,
            vars,
            names,
            ..
        } = self;

        let names = names
            .into_iter()
            .filter(|(_, id)| nodes.contains_key(id) || vars.contains_key(id))
            .collect();
        let nodes = order
            .into_iter()
            .filter_map(|id| nodes.remove(&id).map(|node| (id, node)))
            .collect();

        CommitBatch {
            nodes,
            vars: vars.into_iter().collect(),
            names,
            owners,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mu_core::ir::{BasicBlockNode, TypeNode};

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    #[test]
    fn test_duplicate_name_in_bundle() {
        let mut bundle = Bundle::new();
        bundle.reserve_name("@i64", id(1)).unwrap();
        let err = bundle.reserve_name("@i64", id(2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { existing, .. } if existing == id(1)));
        assert_eq!(bundle.name_of(id(1)), Some("@i64"));
        assert_eq!(bundle.name_of(id(2)), None);
    }

    #[test]
    fn test_duplicate_id_in_bundle() {
        let ns = Namespace::new();
        let mut bundle = Bundle::new();
        bundle
            .insert(id(1), Node::Type(TypeNode::Int { len: 8 }), &ns)
            .unwrap();
        let err = bundle
            .insert(id(1), Node::Type(TypeNode::Int { len: 16 }), &ns)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(dup) if dup == id(1)));
        assert_eq!(bundle.len(), 1);
        assert_eq!(
            bundle.node(id(1)),
            Some(&Node::Type(TypeNode::Int { len: 8 }))
        );
    }

    #[test]
    fn test_variables_are_claimed() {
        let ns = Namespace::new();
        let mut bundle = Bundle::new();
        let bb = Node::BasicBlock(BasicBlockNode {
            params: vec![(id(5), id(1))],
            insts: vec![],
        });
        bundle.insert(id(4), bb, &ns).unwrap();
        assert!(bundle.is_claimed(id(5)));
        assert_eq!(bundle.kind_of(id(5)), Some(EntityKind::Var));
        assert_eq!(bundle.var_owner(id(5)), Some(id(4)));

        // the variable id cannot be reused for a node
        let err = bundle
            .insert(id(5), Node::Type(TypeNode::Void), &ns)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
    }

    #[test]
    fn test_repeated_variable_inside_one_node() {
        let ns = Namespace::new();
        let mut bundle = Bundle::new();
        let bb = Node::BasicBlock(BasicBlockNode {
            params: vec![(id(5), id(1)), (id(5), id(1))],
            insts: vec![],
        });
        assert!(matches!(
            bundle.insert(id(4), bb, &ns),
            Err(Error::DuplicateId(dup)) if dup == id(5)
        ));
        assert!(bundle.is_empty());
        assert!(!bundle.is_claimed(id(4)));
    }

    #[test]
    fn test_batch_drops_unused_names() {
        let ns = Namespace::new();
        let mut bundle = Bundle::new();
        bundle.reserve_name("@used", id(1)).unwrap();
        bundle.reserve_name("@unused", id(2)).unwrap();
        bundle
            .insert(id(1), Node::Type(TypeNode::Double), &ns)
            .unwrap();

        let batch = bundle.into_batch(Vec::new());
        assert_eq!(batch.names, vec![("@used".to_string(), id(1))]);
        assert_eq!(batch.nodes.len(), 1);
    }
}
