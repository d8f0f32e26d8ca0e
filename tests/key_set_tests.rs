//! Dispatch key set algebra and priority extraction

use tessera_core::{legacy_extract_dispatch_key, DispatchKey, DispatchKeySet, NUM_DISPATCH_KEYS};

/// Every subset of a handful of keys, plus a few wide ones.
fn sample_sets() -> Vec<DispatchKeySet> {
    let keys = [
        DispatchKey::CPU,
        DispatchKey::SparseCPU,
        DispatchKey::Meta,
        DispatchKey::Autograd,
        DispatchKey::Batched,
    ];
    let mut sets = Vec::new();
    for mask in 0u32..(1 << keys.len()) {
        let set: DispatchKeySet = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, k)| *k)
            .collect();
        sets.push(set);
    }
    sets.push(DispatchKeySet::full());
    sets.push(DispatchKeySet::full_after(DispatchKey::Tracer));
    sets
}

#[test]
fn test_union_and_intersection_laws() {
    let sets = sample_sets();
    for &a in &sets {
        assert!((a - a).is_empty());
        for &b in &sets {
            assert_eq!(a | b, b | a);
            assert_eq!(a & b, b & a);
            assert_eq!(a | (a & b), a);
            for &c in sets.iter().step_by(5) {
                assert_eq!((a | b) | c, a | (b | c));
                assert_eq!((a & b) & c, a & (b & c));
            }
        }
    }
}

#[test]
fn test_highest_priority_matches_msb() {
    assert_eq!(
        DispatchKeySet::empty().highest_priority_key(),
        DispatchKey::Undefined
    );
    for set in sample_sets().into_iter().filter(|s| !s.is_empty()) {
        let key = set.highest_priority_key();
        let msb = 64 - (set.raw_repr() & ((1u64 << (NUM_DISPATCH_KEYS - 1)) - 1)).leading_zeros();
        assert_eq!(key.ordinal() as u32, msb, "{set}");
        assert!(set.has(key).unwrap());
        assert_eq!(legacy_extract_dispatch_key(set), key);
    }
}

#[test]
fn test_full_after_is_strictly_lower() {
    for key in DispatchKey::ALL.iter().copied().skip(1) {
        let below = DispatchKeySet::full_after(key);
        assert!(!below.has(key).unwrap());
        for other in DispatchKey::ALL.iter().copied().skip(1) {
            assert_eq!(below.has(other).unwrap(), other < key);
        }
    }
}

#[test]
fn test_format_is_descending_not_insertion_order() {
    let ascending = DispatchKeySet::empty()
        .add(DispatchKey::CPU)
        .add(DispatchKey::SparseCPU);
    let descending = DispatchKeySet::empty()
        .add(DispatchKey::SparseCPU)
        .add(DispatchKey::CPU);
    assert_eq!(ascending.to_string(), "DispatchKeySet(SparseCPU, CPU)");
    assert_eq!(ascending.to_string(), descending.to_string());
}

#[test]
fn test_dispatcher_style_exclusion() {
    // A wrapper handler re-dispatches to everything below itself.
    let tensor_keys: DispatchKeySet = [DispatchKey::CPU, DispatchKey::Autograd, DispatchKey::Tracer]
        .into_iter()
        .collect();
    let mut order = Vec::new();
    let mut remaining = tensor_keys;
    loop {
        let key = remaining.highest_priority_key();
        if key == DispatchKey::Undefined {
            break;
        }
        order.push(key);
        remaining = remaining & DispatchKeySet::full_after(key);
    }
    assert_eq!(
        order,
        vec![DispatchKey::Tracer, DispatchKey::Autograd, DispatchKey::CPU]
    );
}
