//! Tests for the IR builder

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::vm::MuVm;
    use parking_lot::Mutex;

    fn vm() -> MuVm {
        MuVm::new("--log-level=none").unwrap()
    }

    mod gen_sym {
        use super::*;

        #[test]
        fn test_ids_are_fresh_and_increasing() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let first = b.gen_sym(None).unwrap();
            let second = b.gen_sym(Some("@i64")).unwrap();
            let third = vm.new_context().new_ir_builder().gen_sym(None).unwrap();
            assert!(first < second && second < third);
        }

        #[test]
        fn test_invalid_names() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            assert!(matches!(b.gen_sym(Some("")), Err(Error::InvalidName(_))));
            assert!(matches!(
                b.gen_sym(Some("@two words")),
                Err(Error::InvalidName(_))
            ));
        }

        #[test]
        fn test_duplicate_name_does_not_consume_an_id() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let first = b.gen_sym(Some("@x")).unwrap();
            let err = b.gen_sym(Some("@x")).unwrap_err();
            assert!(matches!(err, Error::DuplicateName { existing, .. } if existing == first));
            let next = b.gen_sym(None).unwrap();
            assert_eq!(next.get(), first.get() + 1);
        }

        #[test]
        fn test_same_name_in_separate_bundles() {
            let vm = vm();
            let ctx = vm.new_context();
            let mut a = ctx.new_ir_builder();
            let mut b = ctx.new_ir_builder();
            assert!(a.gen_sym(Some("@t")).is_ok());
            assert!(b.gen_sym(Some("@t")).is_ok());
        }
    }

    mod staging {
        use super::*;

        #[test]
        fn test_unknown_id_is_rejected() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let never_issued = MuId::new(4242).unwrap();
            assert!(matches!(
                b.new_type_int(never_issued, 64),
                Err(Error::UnknownId(id)) if id == never_issued
            ));
            assert!(b.is_empty());
        }

        #[test]
        fn test_unknown_result_variable_is_rejected() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let inst = b.gen_sym(None).unwrap();
            let ty = b.gen_sym(None).unwrap();
            let never_issued = MuId::new(4242).unwrap();
            assert!(matches!(
                b.new_binop(inst, never_issued, BinOptr::Add, ty, ty, ty),
                Err(Error::UnknownId(_))
            ));
        }

        #[test]
        fn test_duplicate_id_keeps_builder_open() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let ty = b.gen_sym(Some("@i32")).unwrap();
            b.new_type_int(ty, 32).unwrap();

            assert!(matches!(b.new_type_double(ty), Err(Error::DuplicateId(_))));
            assert_eq!(b.len(), 1);

            let other = b.gen_sym(None).unwrap();
            b.new_type_double(other).unwrap();
            assert_eq!(b.len(), 2);
            assert!(b.load().is_ok());
        }

        #[test]
        fn test_committed_id_cannot_be_redefined() {
            let vm = vm();
            let ctx = vm.new_context();
            let mut b = ctx.new_ir_builder();
            let ty = b.gen_sym(None).unwrap();
            b.new_type_int(ty, 8).unwrap();
            b.load().unwrap();

            let mut b = ctx.new_ir_builder();
            assert!(matches!(b.new_type_int(ty, 16), Err(Error::DuplicateId(_))));
        }

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        #[test]
        fn test_only_accepted_nodes_are_traced() {
            let vm = vm();
            let logs = Captured::default();
            let writer = logs.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::TRACE)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();

            tracing::subscriber::with_default(subscriber, || {
                let mut b = vm.new_context().new_ir_builder();
                let ty = b.gen_sym(None).unwrap();
                b.new_type_int(ty, 32).unwrap();
                assert!(b.new_type_double(ty).is_err());
                assert!(b.new_type_int(MuId::new(4242).unwrap(), 8).is_err());
            });

            let text = String::from_utf8(logs.0.lock().clone()).unwrap();
            assert_eq!(text.matches("staged id=").count(), 1, "{text}");
        }

        #[test]
        fn test_variable_ids_are_claimed() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let bb = b.gen_sym(None).unwrap();
            let var = b.gen_sym(None).unwrap();
            let ty = b.gen_sym(None).unwrap();
            b.new_bb(bb, &[(var, ty)], &[]).unwrap();
            assert!(matches!(b.new_type_void(var), Err(Error::DuplicateId(_))));
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn test_load_reports_commit() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let i64_t = b.gen_sym(Some("@i64")).unwrap();
            let c = b.gen_sym(Some("@c")).unwrap();
            let unused = b.gen_sym(Some("@unused")).unwrap();
            b.new_type_int(i64_t, 64).unwrap();
            b.new_const_int(c, i64_t, 7).unwrap();

            let report = b.load().unwrap();
            assert_eq!(report.nodes, 2);
            assert_eq!(report.names_bound, 2);
            assert!(report.shadowed.is_empty());
            assert_eq!(vm.id_of("@c"), Some(c));
            assert_eq!(vm.id_of("@unused"), None);
            assert_eq!(vm.name_of(unused), None);
        }

        #[test]
        fn test_abort_discards_everything() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let ty = b.gen_sym(Some("@gone")).unwrap();
            b.new_type_float(ty).unwrap();
            b.abort();

            assert_eq!(vm.id_of("@gone"), None);
            assert!(vm.namespace().is_empty());
            // the identifier stays consumed
            let next = vm.new_context().new_ir_builder().gen_sym(None).unwrap();
            assert!(next > ty);
        }

        #[test]
        fn test_drop_is_abort() {
            let vm = vm();
            {
                let mut b = vm.new_context().new_ir_builder();
                let ty = b.gen_sym(Some("@dropped")).unwrap();
                b.new_type_float(ty).unwrap();
            }
            assert_eq!(vm.id_of("@dropped"), None);
        }

        #[test]
        fn test_failed_load_commits_nothing() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let good = b.gen_sym(Some("@good")).unwrap();
            let bad = b.gen_sym(Some("@bad")).unwrap();
            let missing = b.gen_sym(None).unwrap();
            b.new_type_int(good, 64).unwrap();
            b.new_const_int(bad, missing, 1).unwrap();

            let err = b.load().unwrap_err();
            let Error::Load(failure) = err else {
                panic!("expected a load failure, got {err:?}");
            };
            assert!(failure.mentions(bad));
            assert_eq!(vm.id_of("@good"), None);
            assert!(vm.namespace().node(good).is_none());
        }
    }

    mod memory {
        use super::*;

        #[test]
        fn test_memory_and_native_call_nodes_load() {
            let vm = vm();
            let mut b = vm.new_context().new_ir_builder();
            let mut sym = || b.gen_sym(None).unwrap();
            let (i64_t, pair, arr, ptr_t, sig, fp_t) = (sym(), sym(), sym(), sym(), sym(), sym());
            let (counter, native, zero, func, ver, entry) = (sym(), sym(), sym(), sym(), sym(), sym());
            let insts: Vec<MuId> = (0..9).map(|_| sym()).collect();
            let vars: Vec<MuId> = (0..7).map(|_| sym()).collect();
            let param = sym();

            b.new_type_int(i64_t, 64).unwrap();
            b.new_type_struct(pair, &[i64_t, i64_t]).unwrap();
            b.new_type_array(arr, i64_t, 4).unwrap();
            b.new_type_uptr(ptr_t, i64_t).unwrap();
            b.new_funcsig(sig, &[ptr_t], &[i64_t]).unwrap();
            b.new_type_ufuncptr(fp_t, sig).unwrap();
            b.new_global_cell(counter, i64_t).unwrap();
            b.new_const_extern(native, fp_t, "some_native_fn").unwrap();
            b.new_const_int(zero, i64_t, 0).unwrap();
            b.new_func(func, sig).unwrap();
            b.new_func_ver(ver, func, &[entry]).unwrap();
            b.new_bb(entry, &[(param, ptr_t)], &insts).unwrap();

            b.new_load(insts[0], vars[0], true, MemOrd::NotAtomic, i64_t, param)
                .unwrap();
            b.new_store(insts[1], false, MemOrd::SeqCst, i64_t, counter, vars[0])
                .unwrap();
            b.new_alloca(insts[2], vars[1], pair).unwrap();
            b.new_getfieldiref(insts[3], vars[2], false, pair, 1, vars[1])
                .unwrap();
            b.new_alloca(insts[4], vars[3], arr).unwrap();
            b.new_getelemiref(insts[5], vars[4], false, arr, i64_t, vars[3], zero)
                .unwrap();
            b.new_shiftiref(insts[6], vars[5], true, i64_t, i64_t, param, zero)
                .unwrap();
            b.new_ccall(insts[7], &[vars[6]], fp_t, sig, native, &[vars[5]])
                .unwrap();
            b.new_ret(insts[8], &[vars[6]]).unwrap();

            let report = b.load().unwrap();
            assert_eq!(report.nodes, 12 + insts.len());
            assert!(matches!(
                vm.namespace().node(counter),
                Some(Node::GlobalCell(GlobalCellNode { ty })) if *ty == i64_t
            ));
        }
    }
}
