#[cfg(test)]
mod tests {
    use crate::id::MuId;
    use crate::ir::*;
    use crate::namespace::*;

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    fn int_type_batch(ty: u32, name: &str) -> CommitBatch {
        CommitBatch {
            nodes: vec![(id(ty), Node::Type(TypeNode::Int { len: 64 }))],
            names: vec![(name.to_string(), id(ty))],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_namespace() {
        let ns = Namespace::new();
        assert!(ns.is_empty());
        assert_eq!(ns.commits(), 0);
        assert!(ns.node(id(1)).is_none());
        assert!(ns.id_of("@i64").is_none());
    }

    #[test]
    fn test_commit_makes_nodes_and_names_visible() {
        let mut ns = Namespace::new();
        let summary = ns.commit(int_type_batch(1, "@i64"));

        assert_eq!(summary.nodes, 1);
        assert_eq!(summary.names_bound, 1);
        assert!(summary.shadowed.is_empty());
        assert_eq!(ns.id_of("@i64"), Some(id(1)));
        assert_eq!(ns.name_of(id(1)), Some("@i64"));
        assert_eq!(ns.kind_of(id(1)), Some(EntityKind::Type));
        assert_eq!(ns.commits(), 1);
    }

    #[test]
    fn test_rebinding_shadows_but_keeps_old_name() {
        let mut ns = Namespace::new();
        ns.commit(int_type_batch(1, "@t"));
        let summary = ns.commit(int_type_batch(2, "@t"));

        assert_eq!(
            summary.shadowed,
            vec![Shadowed {
                name: "@t".to_string(),
                previous: id(1),
                current: id(2),
            }]
        );
        assert_eq!(ns.id_of("@t"), Some(id(2)));
        assert_eq!(ns.name_of(id(1)), Some("@t"));
        assert!(ns.is_current_binding(id(2)));
        assert!(!ns.is_current_binding(id(1)));
        assert!(ns.node(id(1)).is_some());
    }

    #[test]
    fn test_versions_accumulate_and_last_is_current() {
        let mut ns = Namespace::new();
        let ver = |n: u32| {
            (
                id(n),
                Node::FuncVer(FuncVerNode {
                    func: id(5),
                    blocks: vec![],
                }),
            )
        };
        ns.commit(CommitBatch {
            nodes: vec![(id(5), Node::Func(FuncNode { sig: id(4) })), ver(6)],
            ..Default::default()
        });
        assert_eq!(ns.current_version(id(5)), Some(id(6)));

        ns.commit(CommitBatch {
            nodes: vec![ver(7)],
            ..Default::default()
        });
        assert_eq!(ns.current_version(id(5)), Some(id(7)));
        assert_eq!(ns.versions(id(5)), &[id(6), id(7)]);
        assert!(ns.versions(id(99)).is_empty());
        assert_eq!(ns.functions().len(), 1);
    }

    #[test]
    fn test_vars_and_owners() {
        let mut ns = Namespace::new();
        ns.commit(CommitBatch {
            vars: vec![(id(10), id(3))],
            owners: vec![(id(3), id(2))],
            ..Default::default()
        });
        assert!(ns.contains(id(10)));
        assert_eq!(ns.kind_of(id(10)), Some(EntityKind::Var));
        assert_eq!(ns.var_owner(id(10)), Some(id(3)));
        assert_eq!(ns.owner(id(3)), Some(id(2)));
    }

    #[test]
    fn test_global_cells_are_listed_in_id_order() {
        let mut ns = Namespace::new();
        ns.commit(CommitBatch {
            nodes: vec![
                (id(1), Node::Type(TypeNode::Int { len: 64 })),
                (id(7), Node::GlobalCell(GlobalCellNode { ty: id(1) })),
                (id(3), Node::GlobalCell(GlobalCellNode { ty: id(1) })),
            ],
            ..Default::default()
        });
        let cells: Vec<_> = ns.global_cells().into_iter().map(|(id, _)| id).collect();
        assert_eq!(cells, vec![id(3), id(7)]);
        assert_eq!(ns.kind_of(id(7)), Some(EntityKind::GlobalCell));
    }
}
