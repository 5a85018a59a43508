use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, BTreeSet};

/// Walk the whole tree and assert every structural invariant: key order,
/// cached heights, the AVL balance bound, and node accounting.
///
/// A thread left behind by `kth_largest` points back at an ancestor whose
/// key equals the lower bound of the subtree, so it trips the order check.
pub(super) fn validate_tree<K: Ord, V>(t: &AvlTree<K, V>) {
    fn walk<K: Ord, V>(t: &AvlTree<K, V>, ptr: Ptr, lo: Option<&K>, hi: Option<&K>) -> (u8, usize) {
        if ptr.is_null() {
            return (0, 0);
        }

        let node = t.nodes.node(ptr);
        if let Some(lo) = lo {
            assert!(node.key > *lo, "key must exceed every key on its left path");
        }
        if let Some(hi) = hi {
            assert!(node.key < *hi, "key must precede every key on its right path");
        }

        let (lh, lc) = walk(t, node.left, lo, Some(&node.key));
        let (rh, rc) = walk(t, node.right, Some(&node.key), hi);
        assert_eq!(
            node.height,
            1 + lh.max(rh),
            "stored node height must match children"
        );

        let balance = i32::from(rh) - i32::from(lh);
        assert!(
            (-1..=1).contains(&balance),
            "balance factor out of range: {balance}"
        );
        assert_eq!(t.nodes.balance(ptr), balance);

        (node.height, lc + rc + 1)
    }

    let (height, count) = walk(t, t.root, None, None);
    assert_eq!(usize::from(height), t.height());
    assert_eq!(
        count, t.count,
        "reachable node count must match AvlTree::len"
    );
    assert_eq!(
        t.nodes.slots.len() - t.nodes.free.len(),
        t.count,
        "live arena slots must match AvlTree::len"
    );
    for &idx in &t.nodes.free {
        assert!(t.nodes.slots[idx as usize].is_none(), "free slot {idx} is occupied");
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(u8, u32),
    #[proptest(weight = 3)]
    Remove(u8),
    #[proptest(weight = 2)]
    Get(u8),
    #[proptest(weight = 2)]
    KthLargest(#[proptest(strategy = "0usize..=300")] usize),
    Compact,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=1000)
}

fn tree_from(keys: &[i32]) -> AvlTree<i32, i32> {
    let mut t = AvlTree::new();
    for &k in keys {
        // Duplicates in generated input are expected; skip them.
        let _ = t.insert(k, k.wrapping_mul(3));
    }
    t
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_btreemap(ops in ops_strategy()) {
        let mut t: AvlTree<u8, u32> = AvlTree::new();
        let mut m: BTreeMap<u8, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let expected = if m.contains_key(&key) {
                        Err(TreeError::DuplicateKey)
                    } else {
                        m.insert(key, value);
                        Ok(())
                    };
                    prop_assert_eq!(t.insert(key, value), expected);
                }
                Op::Remove(key) => {
                    let expected = m.remove(&key).ok_or(TreeError::KeyNotFound);
                    prop_assert_eq!(t.remove(&key), expected);
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(&key), m.get(&key));
                    prop_assert_eq!(t.contains_key(&key), m.contains_key(&key));
                }
                Op::KthLargest(k) => {
                    let expected = k.checked_sub(1).and_then(|k| m.iter().rev().nth(k));
                    prop_assert_eq!(t.kth_largest(k), expected);
                }
                Op::Compact => {
                    prop_assert_eq!(t.compact(), m.len());
                }
            }

            prop_assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }

        let got: Vec<(u8, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u8, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_kth_largest_matches_descending_sort(keys in prop::collection::vec(any::<i32>(), 0..200)) {
        let mut t = tree_from(&keys);
        let mut sorted: Vec<i32> = keys.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        sorted.reverse();
        prop_assert_eq!(t.len(), sorted.len());

        prop_assert_eq!(t.kth_largest(0), None);
        for (i, key) in sorted.iter().enumerate() {
            prop_assert_eq!(t.kth_largest(i + 1).map(|(k, _)| *k), Some(*key));
        }
        prop_assert_eq!(t.kth_largest(sorted.len() + 1), None);
        validate_tree(&t);
    }

    #[test]
    fn prop_insert_then_remove_round_trip(keys in prop::collection::vec(any::<i32>(), 0..200), extra in any::<i32>()) {
        let mut t = tree_from(&keys);
        prop_assume!(!t.contains_key(&extra));
        let before: Vec<i32> = t.iter().map(|(k, _)| *k).collect();

        t.insert(extra, 0).unwrap();
        validate_tree(&t);
        prop_assert_eq!(t.len(), before.len() + 1);
        prop_assert_eq!(t.remove(&extra), Ok(0));
        validate_tree(&t);

        let after: Vec<i32> = t.iter().map(|(k, _)| *k).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_duplicate_insert_leaves_tree_unchanged(keys in prop::collection::vec(any::<i32>(), 1..200), pick in any::<prop::sample::Index>()) {
        let mut t = tree_from(&keys);
        let dup = keys[pick.index(keys.len())];
        let before: Vec<(i32, i32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let height = t.height();

        prop_assert_eq!(t.insert(dup, -1), Err(TreeError::DuplicateKey));

        let after: Vec<(i32, i32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(t.height(), height);
        validate_tree(&t);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u32> = (1..=7).collect();

    for_each_permutation(&keys, |perm| {
        let mut t: AvlTree<u32, u32> = AvlTree::new();
        for k in perm {
            t.insert(k, k * 10).unwrap();
            validate_tree(&t);
        }

        assert!(t.height() <= 4);
        let got: Vec<(u32, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u32, u32)> = keys.iter().map(|k| (*k, k * 10)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u32> = (1..=7).collect();

    // Insert in a fixed order, then remove in all permutations.
    let mut base: AvlTree<u32, u32> = AvlTree::new();
    for &k in &keys {
        base.insert(k, k).unwrap();
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base.clone();
        let mut remaining = keys.len();

        for k in perm {
            assert_eq!(t.remove(&k), Ok(k));
            assert_eq!(t.remove(&k), Err(TreeError::KeyNotFound));
            remaining -= 1;
            assert_eq!(t.len(), remaining);
            validate_tree(&t);
        }
        assert!(t.is_empty());
        assert!(t.root.is_null());
    });
}
