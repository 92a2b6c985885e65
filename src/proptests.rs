use super::*;

use crate::oracle::{summarize, FullBoxTree};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<f64>),
    /// Delete the `n`-th stored point (modulo the number stored).
    Delete(usize),
    Score(usize),
}

/// Coordinates from a small integer grid so duplicates and shared
/// coordinates show up often.
fn grid_point(dim: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((-6i8..=6).prop_map(f64::from), dim)
}

fn next_up(v: f64) -> f64 {
    if v == 0.0 {
        f64::from_bits(1)
    } else if v > 0.0 {
        f64::from_bits(v.to_bits() + 1)
    } else {
        f64::from_bits(v.to_bits() - 1)
    }
}

fn next_down(v: f64) -> f64 {
    -next_up(-v)
}

/// Grid values at very different magnitudes, nudged by up to two ulps, so
/// distinct coordinates are often adjacent floats.
fn fine_coordinate() -> impl Strategy<Value = f64> {
    let scale = prop_oneof![4 => Just(1.0), 1 => Just(1e15), 1 => Just(1e-300)];
    (-6i8..=6, scale, -2i32..=2).prop_map(|(k, scale, ulps)| {
        let mut v = f64::from(k) * scale;
        for _ in 0..ulps.unsigned_abs() {
            v = if ulps > 0 { next_up(v) } else { next_down(v) };
        }
        // Fold -0.0 into 0.0 so equal points have equal bits.
        v + 0.0
    })
}

fn fine_point(dim: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(fine_coordinate(), dim)
}

fn ops_strategy(point: impl Strategy<Value = Vec<f64>> + 'static) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        55 => point.prop_map(Op::Insert),
        30 => any::<usize>().prop_map(Op::Delete),
        15 => any::<usize>().prop_map(Op::Score),
    ];
    prop::collection::vec(op, 0..=400)
}

fn bits(p: &[f64]) -> Vec<u64> {
    p.iter().map(|v| v.to_bits()).collect()
}

fn from_bits(p: &[u64]) -> Vec<f64> {
    p.iter().map(|&b| f64::from_bits(b)).collect()
}

/// Replays `ops` on a tree and on the full-box oracle, comparing shapes,
/// boxes and scores after every step.
fn check_against_oracle(dim: usize, seed: u64, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut t = RandomCutTree::new(dim, Some(seed));
    let mut o = FullBoxTree::new(seed);
    // Multiset of stored points, keyed by bit pattern.
    let mut m: BTreeMap<Vec<u64>, u32> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Insert(p) => {
                let p = &p[..dim];
                let leaf = t.insert(p).unwrap();
                o.insert(p);
                let n = m.entry(bits(p)).or_default();
                *n += 1;
                prop_assert_eq!(t.duplicate_count(leaf), Ok(*n));
            }
            Op::Delete(n) => {
                let Some(key) = m.keys().nth(n % m.len().max(1)).cloned() else {
                    prop_assert_eq!(t.delete_point(&vec![0.5; dim]), Err(Error::NotFound));
                    continue;
                };
                let p = from_bits(&key);
                let removed = t.delete_point(&p).unwrap();
                prop_assert_eq!(&*removed, &p[..]);
                prop_assert!(o.delete(&p));
                let count = m.get_mut(&key).unwrap();
                *count -= 1;
                if *count == 0 {
                    m.remove(&key);
                }
            }
            Op::Score(n) => {
                let Some(key) = m.keys().nth(n % m.len().max(1)) else {
                    continue;
                };
                let p = from_bits(key);
                let leaf = t.find_leaf(&p).unwrap().unwrap();
                prop_assert_eq!(
                    t.collusive_displacement(leaf).ok(),
                    o.collusive_displacement(&p)
                );
            }
        }

        prop_assert_eq!(t.size() as u64, o.size());
        prop_assert_eq!(t.size() as u32, m.values().sum::<u32>());
        prop_assert_eq!(summarize(&t), o.summarize());
    }

    t.check_invariants();
    let got: BTreeMap<Vec<u64>, u32> = t.leaves().map(|l| (bits(l.point), l.duplicates)).collect();
    prop_assert_eq!(got, m);
    Ok(())
}

/// Applies `ops` to `t`, whose points are `stored`, checking every
/// structural invariant after each step.
fn check_invariants_through(
    mut t: RandomCutTree,
    mut stored: Vec<Vec<f64>>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    t.check_invariants();
    prop_assert_eq!(t.size(), stored.len());
    for op in ops {
        match op {
            Op::Insert(p) => {
                t.insert(&p).unwrap();
                stored.push(p);
            }
            Op::Delete(n) if !stored.is_empty() => {
                let p = stored.swap_remove(n % stored.len());
                t.delete_point(&p).unwrap();
            }
            Op::Delete(_) | Op::Score(_) => {}
        }
        t.check_invariants();
        prop_assert_eq!(t.size(), stored.len());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 20_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_matches_full_box_tree(dim in 1usize..=4, seed in any::<u64>(), ops in ops_strategy(grid_point(4))) {
        check_against_oracle(dim, seed, ops)?;
    }

    #[test]
    fn prop_matches_full_box_tree_near_coincident(
        dim in 1usize..=4,
        seed in any::<u64>(),
        ops in ops_strategy(fine_point(4)),
    ) {
        check_against_oracle(dim, seed, ops)?;
    }

    #[test]
    fn prop_invariants_hold_after_every_op(seed in any::<u64>(), ops in ops_strategy(grid_point(3))) {
        check_invariants_through(RandomCutTree::new(3, Some(seed)), Vec::new(), ops)?;
    }

    #[test]
    fn prop_invariants_hold_near_coincident(seed in any::<u64>(), ops in ops_strategy(fine_point(3))) {
        check_invariants_through(RandomCutTree::new(3, Some(seed)), Vec::new(), ops)?;
    }

    #[test]
    fn prop_bulk_load_then_stream(
        seed in any::<u64>(),
        points in prop::collection::vec(prop_oneof![grid_point(3), fine_point(3)], 0..=80),
        ops in ops_strategy(fine_point(3)),
    ) {
        let t = RandomCutTree::from_points(3, Some(seed), &points).unwrap();
        check_invariants_through(t, points, ops)?;
    }

    #[test]
    fn prop_bounded_stream_keeps_latest(capacity in 1usize..=16, values in prop::collection::vec(any::<i32>(), 0..=100)) {
        let mut b = BoundedStream::new(capacity).unwrap();
        for (i, &v) in values.iter().enumerate() {
            let (evicted, index) = b.add(v);
            prop_assert_eq!(index, i as u64);
            prop_assert_eq!(evicted, i.checked_sub(capacity).map(|j| values[j]));
        }
        let start = values.len().saturating_sub(capacity);
        let got: Vec<i32> = b.iter().copied().collect();
        prop_assert_eq!(&got[..], &values[start..]);
        prop_assert_eq!(b.start_index(), start as u64);
        for (i, v) in values.iter().enumerate() {
            let got = b.get(i as u64);
            if i < start {
                prop_assert!(got.is_err());
            } else {
                prop_assert_eq!(got, Ok(v));
            }
        }
    }

    #[test]
    fn prop_forest_window_never_exceeds_capacity(
        capacity in 1usize..=24,
        seed in any::<u64>(),
        points in prop::collection::vec(prop_oneof![grid_point(2), fine_point(2)], 1..=120),
    ) {
        let mut f = Forest::new(3, capacity, Some(seed)).unwrap();
        for (i, p) in points.iter().enumerate() {
            let score = f.add_point(p).unwrap();
            prop_assert!(score >= 0.0);
            for t in f.trees() {
                prop_assert_eq!(t.size(), (i + 1).min(capacity));
            }
        }
        for t in f.trees() {
            t.check_invariants();
        }
    }
}

#[test]
fn exhaustive_delete_order_small_set() {
    let points: Vec<[f64; 2]> = vec![
        [0.0, 0.0],
        [1.0, 3.0],
        [2.0, 1.0],
        [3.0, 3.0],
        [3.0, 3.0],
        [-1.0, 2.0],
    ];

    let mut base = RandomCutTree::new(2, Some(3));
    for p in &points {
        base.insert(p).unwrap();
    }
    base.check_invariants();

    let mut order: Vec<usize> = (0..points.len()).collect();
    permute(&mut order, 0, &mut |perm| {
        let mut t = base.clone();
        for &i in perm {
            t.delete_point(&points[i]).unwrap();
            t.check_invariants();
        }
        assert!(t.is_empty());
    });
}

/// Calls `f` with every ordering of `items[k..]`.
fn permute(items: &mut [usize], k: usize, f: &mut impl FnMut(&[usize])) {
    if k == items.len() {
        f(items);
        return;
    }
    for i in k..items.len() {
        items.swap(k, i);
        permute(items, k + 1, f);
        items.swap(k, i);
    }
}
