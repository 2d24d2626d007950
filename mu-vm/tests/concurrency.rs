//! Bundles built and loaded from several threads at once

use std::sync::{Arc, Barrier};
use std::thread;

use mu_vm::{Error, MuVm, Reason};

const THREADS: usize = 8;

fn vm() -> MuVm {
    MuVm::new("--log-level=none").unwrap()
}

#[test]
fn test_independent_bundles_all_commit() {
    let vm = vm();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let vm = vm.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut b = vm.new_context().new_ir_builder();
                let ty = b.gen_sym(Some(&format!("@i{}", 8 + i))).unwrap();
                let c = b.gen_sym(Some(&format!("@c{}", i))).unwrap();
                b.new_type_int(ty, 8 + i as u32).unwrap();
                b.new_const_int(c, ty, i as u64).unwrap();
                barrier.wait();
                b.load().unwrap();
                (ty, c)
            })
        })
        .collect();

    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let ns = vm.namespace();
    assert_eq!(ns.commits(), THREADS as u64);
    assert_eq!(ns.len(), THREADS * 2);
    for (i, (ty, c)) in ids.into_iter().enumerate() {
        assert_eq!(ns.id_of(&format!("@i{}", 8 + i)), Some(ty));
        assert_eq!(ns.id_of(&format!("@c{}", i)), Some(c));
    }
}

#[test]
fn test_two_bundles_claiming_one_id() {
    for _ in 0..20 {
        let vm = vm();
        let ctx = vm.new_context();

        let mut first = ctx.new_ir_builder();
        let shared = first.gen_sym(None).unwrap();
        first.new_type_int(shared, 32).unwrap();

        // the second builder stages a node under an id it did not generate
        let mut second = ctx.new_ir_builder();
        second.new_type_double(shared).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|b| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    b.load()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "exactly one bundle may own the id");
        let failure = results.into_iter().find_map(|r| match r {
            Err(Error::Load(failure)) => Some(failure),
            _ => None,
        });
        let failure = failure.expect("the other bundle must fail validation");
        assert!(failure
            .matching(|r| matches!(r, Reason::DuplicateId))
            .any(|d| d.node == shared));
        assert_eq!(vm.namespace().commits(), 1);
    }
}

#[test]
fn test_readers_never_see_a_partial_bundle() {
    let vm = vm();
    const BUNDLES: usize = 50;
    const NODES: usize = 10;

    let writer = {
        let vm = vm.clone();
        thread::spawn(move || {
            let ctx = vm.new_context();
            for _ in 0..BUNDLES {
                let mut b = ctx.new_ir_builder();
                for _ in 0..NODES {
                    let id = b.gen_sym(None).unwrap();
                    b.new_type_float(id).unwrap();
                }
                b.load().unwrap();
            }
        })
    };

    let reader = {
        let vm = vm.clone();
        thread::spawn(move || {
            for _ in 0..BUNDLES * 4 {
                let ns = vm.namespace();
                assert_eq!(ns.len(), ns.commits() as usize * NODES);
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(vm.namespace().len(), BUNDLES * NODES);
}
