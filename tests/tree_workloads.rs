//! End-to-end tree workloads: ordering, rebalancing, persistence and
//! resource accounting over realistic operation sequences.

use tempfile::tempdir;
use tupledb::{FieldType, Schema, Tree, Tuple};

fn int_schemas() -> (Schema, Schema) {
    (
        Schema::new([FieldType::Int]).unwrap(),
        Schema::new([FieldType::Int]).unwrap(),
    )
}

/// 64-byte pages + INT/INT tuples give 4 slots per page, so even small
/// workloads exercise splits, shifts and merges.
fn small_int_tree(path: &std::path::Path) -> Tree {
    let (key, data) = int_schemas();
    Tree::create(path, key, data, 64).unwrap()
}

fn k(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

fn traversal(tree: &Tree) -> Vec<(i32, i32)> {
    tree.iter()
        .map(|item| {
            let (key, data) = item.unwrap();
            (
                i32::from_le_bytes(key.try_into().unwrap()),
                i32::from_le_bytes(data.try_into().unwrap()),
            )
        })
        .collect()
}

#[test]
fn traversal_is_sorted_regardless_of_insert_order() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    // deterministic scatter over 0..200
    let mut v = 17i32;
    for _ in 0..200 {
        v = (v * 73 + 41) % 200;
        tree.insert(&k(v), &k(v)).unwrap();
    }

    let keys: Vec<i32> = traversal(&tree).into_iter().map(|(key, _)| key).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);
    tree.verify().unwrap();
}

#[test]
fn thousand_inserts_then_erase_evens() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for v in 0..1000 {
        tree.insert(&k(v), &k(v)).unwrap();
    }
    tree.verify().unwrap();

    for v in (0..1000).step_by(2) {
        assert!(tree.erase_one(&k(v)).unwrap(), "erase {}", v);
    }
    tree.verify().unwrap();

    for v in 0..1000 {
        let expected = if v % 2 == 0 { 0 } else { 1 };
        assert_eq!(tree.count(&k(v)).unwrap(), expected, "count of {}", v);
    }
    assert_eq!(tree.len().unwrap(), 500);
}

#[test]
fn reopen_reproduces_the_exact_traversal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t");

    let before;
    {
        let (key, data) = int_schemas();
        let mut tree = Tree::create(&path, key, data, 64).unwrap();
        for v in 0..1000 {
            tree.insert(&k(v), &k(v.wrapping_mul(31))).unwrap();
        }
        before = tree
            .iter()
            .map(|item| item.unwrap())
            .collect::<Vec<_>>();
        tree.close().unwrap();
    }

    let tree = Tree::open(&path).unwrap();
    let after = tree.iter().map(|item| item.unwrap()).collect::<Vec<_>>();
    assert_eq!(before, after);
    assert_eq!(tree.len().unwrap(), 1000);
    tree.verify().unwrap();
}

#[test]
fn interleaved_inserts_and_erases_keep_invariants() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    let mut expected = std::collections::BTreeMap::new();
    let mut v = 5i32;
    for round in 0..600 {
        v = (v * 137 + 7) % 250;
        if round % 3 == 2 {
            let erased = tree.erase_one(&k(v)).unwrap();
            let expected_hit = match expected.get_mut(&v) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        expected.remove(&v);
                    }
                    true
                }
                None => false,
            };
            assert_eq!(erased, expected_hit, "erase {} at round {}", v, round);
        } else {
            tree.insert(&k(v), &k(round)).unwrap();
            // the engine keeps duplicates; the model keeps the count
            *expected.entry(v).or_insert(0usize) += 1;
        }
        if round % 50 == 0 {
            tree.verify().unwrap();
        }
    }

    tree.verify().unwrap();
    let total: usize = expected.values().sum();
    assert_eq!(tree.len().unwrap() as usize, total);
    for (key, count) in expected {
        assert_eq!(tree.count(&k(key)).unwrap(), count, "count of {}", key);
    }
}

#[test]
fn erase_one_removes_exactly_one_duplicate() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for _ in 0..5 {
        tree.insert(&k(42), &k(0)).unwrap();
    }
    for remaining in (0..5).rev() {
        assert!(tree.erase_one(&k(42)).unwrap());
        assert_eq!(tree.count(&k(42)).unwrap(), remaining);
    }
    assert!(!tree.erase_one(&k(42)).unwrap());
}

#[test]
fn erase_all_duplicates_by_key() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for v in 0..10 {
        for _ in 0..3 {
            tree.insert(&k(v), &k(v)).unwrap();
        }
    }
    assert_eq!(tree.erase(&k(4)).unwrap(), 3);
    assert_eq!(tree.count(&k(4)).unwrap(), 0);
    assert_eq!(tree.len().unwrap(), 27);
    tree.verify().unwrap();
}

#[test]
fn targeted_erase_through_a_cursor() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for v in 0..50 {
        tree.insert(&k(v), &k(v)).unwrap();
    }

    let cursor = tree.find(&k(25)).unwrap();
    assert!(tree.erase_at(&cursor).unwrap());
    assert!(!tree.exists(&k(25)).unwrap());

    let cursor = tree.find(&k(49)).unwrap();
    assert!(tree.erase_at(&cursor).unwrap());
    assert_eq!(tree.len().unwrap(), 48);
    tree.verify().unwrap();
}

#[test]
fn all_handles_returned_after_public_operations() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for v in 0..200 {
        tree.insert(&k(v), &k(v)).unwrap();
    }
    assert_eq!(tree.pager().resident_pages(), 0);

    tree.exists(&k(100)).unwrap();
    tree.count(&k(100)).unwrap();
    tree.erase_one(&k(100)).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.pager().resident_pages(), 0);
}

#[test]
fn freed_pages_never_leak_after_full_drain() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    for v in 0..300 {
        tree.insert(&k(v), &k(v)).unwrap();
    }
    for v in 0..300 {
        tree.erase_one(&k(v)).unwrap();
    }

    assert_eq!(tree.pager().used_pages().unwrap(), 0);
    assert_eq!(
        tree.pager().free_pages().len() as u32,
        tree.pager().n_pages().unwrap()
    );
    tree.verify().unwrap();
}

#[test]
fn string_keys_scenario() {
    let dir = tempdir().unwrap();
    let key_schema = Schema::new([FieldType::Str(8)]).unwrap();
    let data_schema = Schema::new([FieldType::Int]).unwrap();
    let mut tree = Tree::create(
        dir.path().join("t"),
        key_schema.clone(),
        data_schema,
        4096,
    )
    .unwrap();

    let mut key = vec![0u8; key_schema.width()];
    for (name, val) in [("alpha", 1i32), ("beta", 2), ("gamma", 3)] {
        key_schema.set_field(&mut key, 0, name).unwrap();
        tree.insert(&key, &val.to_le_bytes()).unwrap();
    }

    key_schema.set_field(&mut key, 0, "beta").unwrap();
    let found = tree.find(&key).unwrap();
    assert_eq!(found.data().unwrap(), 2i32.to_le_bytes());

    let next = tree.upper_bound(&key).unwrap();
    assert_eq!(
        key_schema.format_tuple(next.key().unwrap()),
        "gamma"
    );
    tree.verify().unwrap();
}

#[test]
fn composite_keys_compare_field_by_field() {
    let dir = tempdir().unwrap();
    let key_schema = Schema::new([FieldType::Short, FieldType::Str(4)]).unwrap();
    let data_schema = Schema::new([FieldType::Double, FieldType::Bool]).unwrap();
    let mut tree = Tree::create(
        dir.path().join("t"),
        key_schema.clone(),
        data_schema.clone(),
        4096,
    )
    .unwrap();

    let mut key = vec![0u8; key_schema.width()];
    let mut data = vec![0u8; data_schema.width()];
    for (a, b, x) in [(2i32, "bb", 2.0), (1, "zz", 1.5), (2, "aa", 2.5)] {
        key_schema.set_field(&mut key, 0, &a.to_string()).unwrap();
        key_schema.set_field(&mut key, 1, b).unwrap();
        data_schema.set_field(&mut data, 0, &x.to_string()).unwrap();
        data_schema.set_field(&mut data, 1, "1").unwrap();
        tree.insert(&key, &data).unwrap();
    }

    // (1, "zz") sorts before both (2, _) entries
    let rendered: Vec<String> = tree
        .iter()
        .map(|item| key_schema.format_tuple(&item.unwrap().0))
        .collect();
    assert_eq!(rendered, ["1 zz", "2 aa", "2 bb"]);
    tree.verify().unwrap();
}

#[test]
fn cross_schema_tuple_comparison_is_rejected() {
    let ints = Schema::new([FieldType::Int]).unwrap();
    let longs = Schema::new([FieldType::Int64]).unwrap();

    let a_bytes = 1i32.to_le_bytes();
    let b_bytes = 1i64.to_le_bytes();
    let a = Tuple::new(&ints, &a_bytes).unwrap();
    let b = Tuple::new(&longs, &b_bytes).unwrap();

    let err = a.compare(&b).unwrap_err();
    assert!(err.to_string().contains("schema mismatch"));
}

#[test]
fn wrong_width_key_is_a_schema_mismatch() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    let err = tree.insert(&[1u8; 8], &k(0)).unwrap_err();
    assert!(err.to_string().contains("schema mismatch"));
    let err = tree.find(&[1u8; 8]).unwrap_err();
    assert!(err.to_string().contains("schema mismatch"));
}

#[test]
fn operations_fail_cleanly_after_close() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));
    tree.insert(&k(1), &k(1)).unwrap();
    tree.close().unwrap();

    assert!(!tree.is_open());
    let err = tree.exists(&k(1)).unwrap_err();
    assert!(err.to_string().contains("not open"));
    let err = tree.insert(&k(2), &k(2)).unwrap_err();
    assert!(err.to_string().contains("not open"));
}

#[test]
fn len_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t");
    {
        let (key, data) = int_schemas();
        let mut tree = Tree::create(&path, key, data, 64).unwrap();
        for v in 0..37 {
            tree.insert(&k(v), &k(v)).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = Tree::open(&path).unwrap();
    assert_eq!(tree.len().unwrap(), 37);
}

#[test]
fn deep_tree_collapses_back_to_nothing() {
    let dir = tempdir().unwrap();
    let mut tree = small_int_tree(&dir.path().join("t"));

    // three levels at capacity 4
    for v in 0..500 {
        tree.insert(&k(v), &k(v)).unwrap();
    }
    for v in (0..500).rev() {
        assert!(tree.erase_one(&k(v)).unwrap(), "erase {}", v);
    }

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.pager().used_pages().unwrap(), 0);
    tree.verify().unwrap();

    // and grows again afterwards
    for v in 0..20 {
        tree.insert(&k(v), &k(v)).unwrap();
    }
    assert_eq!(tree.len().unwrap(), 20);
    tree.verify().unwrap();
}
