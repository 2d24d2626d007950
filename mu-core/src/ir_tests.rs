#[cfg(test)]
mod tests {
    use crate::id::MuId;
    use crate::ir::*;
    use proptest::prelude::*;

    fn id(n: u32) -> MuId {
        MuId::new(n).unwrap()
    }

    // ===== Literal fitting =====

    #[test]
    fn test_unsigned_literals_fit() {
        assert!(int_literal_fits(0, 1));
        assert!(int_literal_fits(1, 1));
        assert!(!int_literal_fits(2, 1));
        assert!(int_literal_fits(255, 8));
        assert!(!int_literal_fits(256, 8));
        assert!(int_literal_fits(u64::MAX, 64));
        assert!(int_literal_fits(u64::MAX, 128));
    }

    #[test]
    fn test_negative_literals_wrap() {
        // -1 and -128 as sign-extended 64-bit values
        assert!(int_literal_fits(u64::MAX, 8));
        assert!(int_literal_fits((-128i64) as u64, 8));
        assert!(!int_literal_fits((-129i64) as u64, 8));
        assert!(int_literal_fits((-1i64) as u64, 1));
    }

    #[test]
    fn test_zero_width_never_fits() {
        assert!(!int_literal_fits(0, 0));
    }

    proptest! {
        #[test]
        fn prop_masked_values_fit(value: u64, len in 1u32..64) {
            prop_assert!(int_literal_fits(value & ((1u64 << len) - 1), len));
        }

        #[test]
        fn prop_wider_types_accept_narrower_literals(value: u64, len in 1u32..64) {
            if int_literal_fits(value, len) {
                prop_assert!(int_literal_fits(value, len + 1));
            }
        }
    }

    // ===== Node helpers =====

    #[test]
    fn test_node_kinds() {
        assert_eq!(Node::Type(TypeNode::Int { len: 64 }).kind(), EntityKind::Type);
        assert_eq!(
            Node::Const(ConstNode::Int { ty: id(1), value: 3 }).kind(),
            EntityKind::Const
        );
        assert_eq!(
            Node::Inst(InstNode::Ret { values: vec![] }).kind(),
            EntityKind::Inst
        );
        assert_eq!(EntityKind::FuncSig.to_string(), "function signature");
    }

    #[test]
    fn test_type_references() {
        let st = TypeNode::Struct {
            fields: vec![id(1), id(2)],
        };
        assert_eq!(st.type_refs(), vec![id(1), id(2)]);
        assert_eq!(st.sig_ref(), None);

        let fp = TypeNode::UFuncPtr { sig: id(9) };
        assert!(fp.type_refs().is_empty());
        assert_eq!(fp.sig_ref(), Some(id(9)));
        assert!(fp.is_pointer_like());
        assert!(!TypeNode::Double.is_pointer_like());
    }

    #[test]
    fn test_defined_vars() {
        let bb = Node::BasicBlock(BasicBlockNode {
            params: vec![(id(10), id(1)), (id(11), id(1))],
            insts: vec![id(12)],
        });
        assert_eq!(bb.defined_vars(), vec![id(10), id(11)]);

        let call = Node::Inst(InstNode::Call {
            results: vec![id(20), id(21)],
            sig: id(2),
            callee: id(3),
            args: vec![],
        });
        assert_eq!(call.defined_vars(), vec![id(20), id(21)]);

        let ret = Node::Inst(InstNode::Ret { values: vec![id(20)] });
        assert!(ret.defined_vars().is_empty());

        let load = Node::Inst(InstNode::Load {
            result: id(30),
            is_ptr: true,
            ord: MemOrd::NotAtomic,
            ref_ty: id(1),
            loc: id(31),
        });
        assert_eq!(load.defined_vars(), vec![id(30)]);

        let store = InstNode::Store {
            is_ptr: false,
            ord: MemOrd::SeqCst,
            ref_ty: id(1),
            loc: id(31),
            value: id(32),
        };
        assert!(store.results().is_empty());
        assert!(!store.is_terminator());
    }

    #[test]
    fn test_memory_orders() {
        assert!(!MemOrd::NotAtomic.is_atomic());
        assert!(MemOrd::Relaxed.is_atomic());
        assert!(MemOrd::Acquire.valid_for_load());
        assert!(!MemOrd::Release.valid_for_load());
        assert!(MemOrd::Release.valid_for_store());
        assert!(!MemOrd::Acquire.valid_for_store());
        assert!(MemOrd::SeqCst.valid_for_load() && MemOrd::SeqCst.valid_for_store());
    }

    #[test]
    fn test_global_cells_and_extern_constants() {
        assert_eq!(
            Node::GlobalCell(GlobalCellNode { ty: id(1) }).kind(),
            EntityKind::GlobalCell
        );
        let ext = ConstNode::Extern {
            ty: id(2),
            symbol: "malloc".to_string(),
        };
        assert_eq!(ext.ty(), id(2));
    }

    #[test]
    fn test_terminators_and_destinations() {
        let switch = InstNode::Switch {
            ty: id(1),
            operand: id(2),
            default: id(3),
            cases: vec![(id(4), id(5)), (id(6), id(7))],
        };
        assert!(switch.is_terminator());
        assert_eq!(switch.destinations(), vec![id(3), id(5), id(7)]);

        let binop = InstNode::BinOp {
            result: id(8),
            op: BinOptr::Add,
            ty: id(1),
            lhs: id(2),
            rhs: id(2),
        };
        assert!(!binop.is_terminator());
        assert!(binop.destinations().is_empty());
    }

    #[test]
    fn test_operator_classes() {
        assert!(BinOptr::Fadd.is_float());
        assert!(!BinOptr::Lshr.is_float());
        assert_eq!(CmpOptr::Eq.class(), CmpClass::Equality);
        assert_eq!(CmpOptr::Ult.class(), CmpClass::Ordering);
        assert_eq!(CmpOptr::Fune.class(), CmpClass::Float);
    }

    #[test]
    fn test_entry_block_is_first() {
        let ver = FuncVerNode {
            func: id(1),
            blocks: vec![id(5), id(6)],
        };
        assert_eq!(ver.entry(), Some(id(5)));
        let empty = FuncVerNode {
            func: id(1),
            blocks: vec![],
        };
        assert_eq!(empty.entry(), None);
    }
}
