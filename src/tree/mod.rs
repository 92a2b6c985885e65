//! A single robust random cut tree.
//!
//! Points are inserted by walking down from the root and drawing, at every
//! visited node, a random cut across the box of that node enlarged by the new
//! point. The first cut that falls outside the node's current box separates
//! the new point from the whole subtree: a branch is spliced in there with
//! the new leaf on one side and the old subtree on the other. Deleting a leaf
//! promotes its sibling into the parent's place.
//!
//! Only the tree-wide box is stored explicitly; see `node` for how branches
//! encode their children's boxes.

mod iter;
mod node;

pub use iter::{BranchRef, Branches, LeafRef, NodeRef, Walk};
pub use node::LeafId;

use node::{BoxDelta, Branch, DimSet, Leaf, Node, NodeArena, NodeId};

use crate::cut::{entropy_seed, tree_rng, BoundingBox, Cut, TreeRng};
use crate::error::{Error, Result};

/// Online random cut tree over points of a fixed dimension.
#[derive(Clone, Debug)]
pub struct RandomCutTree {
    dimension: usize,
    nodes: NodeArena,
    root: Option<NodeId>,
    /// Box over every stored point; `None` iff the tree is empty.
    bbox: Option<BoundingBox>,
    rng: TreeRng,
}

impl RandomCutTree {
    /// Create an empty tree for `dimension`-length points.
    ///
    /// With a seed, the sequence of cuts (and so the tree shape) is fully
    /// determined by the seed and the operation sequence.
    ///
    /// # Panics
    ///
    /// If `dimension` is zero.
    pub fn new(dimension: usize, seed: Option<u64>) -> Self {
        Self::with_rng(dimension, tree_rng(seed.unwrap_or_else(entropy_seed), 0))
    }

    pub(crate) fn with_rng(dimension: usize, rng: TreeRng) -> Self {
        assert!(dimension > 0, "random cut tree dimension must be non-zero");
        Self {
            dimension,
            nodes: NodeArena::default(),
            root: None,
            bbox: None,
            rng,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored points, duplicates included.
    pub fn size(&self) -> usize {
        self.root
            .map_or(0, |r| self.nodes.get(r).leaf_count() as usize)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Coordinate-wise minimum over all stored points.
    pub fn min_box(&self) -> Option<&[f64]> {
        self.bbox.as_ref().map(|b| &*b.min)
    }

    /// Coordinate-wise maximum over all stored points.
    pub fn max_box(&self) -> Option<&[f64]> {
        self.bbox.as_ref().map(|b| &*b.max)
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bbox.as_ref()
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.nodes.memory_usage()
            + self
                .bbox
                .as_ref()
                .map_or(0, |b| 2 * b.dimension() * std::mem::size_of::<f64>())
    }

    /// Drop every point. The random source keeps its position.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.bbox = None;
    }

    fn check_point(&self, point: &[f64]) -> Result<()> {
        if point.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: point.len(),
            });
        }
        if let Some(dimension) = point.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonFinite { dimension });
        }
        Ok(())
    }

    /// Leaf reached by following cuts for `point`.
    fn query(&self, point: &[f64]) -> Option<NodeId> {
        let mut node = self.root?;
        loop {
            match self.nodes.get(node) {
                Node::Leaf(_) => return Some(node),
                Node::Branch(b) => node = b.child(b.cut.goes_left(point)),
            }
        }
    }

    fn find(&self, point: &[f64]) -> Option<NodeId> {
        self.query(point)
            .filter(|&id| *self.nodes.leaf(id).point == *point)
    }

    /// Leaf holding exactly `point`, if any.
    pub fn find_leaf(&self, point: &[f64]) -> Result<Option<LeafId>> {
        self.check_point(point)?;
        Ok(self.find(point).map(|id| self.nodes.leaf_id(id)))
    }

    fn resolve(&self, leaf: LeafId) -> Result<NodeId> {
        self.nodes.resolve(leaf).ok_or(Error::NotFound)
    }

    /// The point stored in a leaf.
    pub fn point(&self, leaf: LeafId) -> Result<&[f64]> {
        Ok(&self.nodes.leaf(self.resolve(leaf)?).point)
    }

    /// How many identical points a leaf currently represents.
    pub fn duplicate_count(&self, leaf: LeafId) -> Result<u32> {
        Ok(self.nodes.leaf(self.resolve(leaf)?).duplicates)
    }

    /// Add `delta` to the leaf count of `from` and every ancestor.
    fn bump_counts(&mut self, from: Option<NodeId>, delta: i64) {
        let mut cur = from;
        while let Some(id) = cur {
            let node = self.nodes.get_mut(id);
            match node {
                Node::Leaf(l) => {
                    l.duplicates = (i64::from(l.duplicates) + delta) as u32;
                }
                Node::Branch(b) => {
                    b.leaf_count = (b.leaf_count as i64 + delta) as u64;
                }
            }
            cur = node.parent();
        }
    }

    fn sibling(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        let parent = self.nodes.get(id).parent()?;
        let b = self.nodes.branch(parent);
        let sibling = if b.left == id { b.right } else { b.left };
        Some((parent, sibling))
    }

    /// Insert a point and return the leaf that now holds it.
    ///
    /// A point equal to one already stored only raises that leaf's duplicate
    /// count; the shape of the tree does not change.
    pub fn insert(&mut self, point: &[f64]) -> Result<LeafId> {
        self.check_point(point)?;

        let Some(root) = self.root else {
            let id = self.nodes.alloc(Node::Leaf(Leaf {
                point: point.into(),
                duplicates: 1,
                parent: None,
            }));
            self.root = Some(id);
            self.bbox = Some(BoundingBox::from_point(point));
            return Ok(self.nodes.leaf_id(id));
        };

        if let Some(dup) = self.find(point) {
            self.bump_counts(Some(dup), 1);
            return Ok(self.nodes.leaf_id(dup));
        }

        let bbox = self
            .bbox
            .as_mut()
            .unwrap_or_else(|| panic!("invariant violation: non-empty tree without a box"));
        let mut min = bbox.min.to_vec();
        let mut max = bbox.max.to_vec();
        bbox.extend(point);

        // `min`/`max` track the box of `node` as it was before this insert.
        let mut node = root;
        let mut parent: Option<(NodeId, bool)> = None;
        let mut depth = 0usize;
        let (cut, leaf_is_left) = loop {
            let cut = Cut::random(&mut self.rng, &min, &max, point).unwrap_or_else(|| {
                panic!("invariant violation: no cut separates point at depth {depth}, node {node}")
            });
            if cut.value < min[cut.dimension] {
                break (cut, true);
            }
            if cut.value >= max[cut.dimension] && point[cut.dimension] > cut.value {
                break (cut, false);
            }

            let Node::Branch(b) = self.nodes.get_mut(node) else {
                panic!("invariant violation: cut {cut:?} inside leaf box at depth {depth}, node {node}");
            };
            let left = b.cut.goes_left(point);
            b.delta.descend_expanding(left, point, &mut min, &mut max);
            parent = Some((node, left));
            node = b.child(left);
            depth += 1;
        };

        let leaf = self.nodes.alloc(Node::Leaf(Leaf {
            point: point.into(),
            duplicates: 1,
            parent: None,
        }));
        let (left, right) = if leaf_is_left { (leaf, node) } else { (node, leaf) };
        let branch = self.nodes.alloc(Node::Branch(Branch {
            cut,
            left,
            right,
            leaf_count: 1 + self.nodes.get(node).leaf_count(),
            parent: parent.map(|(p, _)| p),
            delta: BoxDelta::split(point, &min, &max, leaf_is_left),
        }));
        self.nodes.get_mut(node).set_parent(Some(branch));
        self.nodes.get_mut(leaf).set_parent(Some(branch));

        match parent {
            Some((p, side)) => {
                self.nodes.branch_mut(p).set_child(side, branch);
                self.bump_counts(Some(p), 1);
            }
            None => self.root = Some(branch),
        }

        Ok(self.nodes.leaf_id(leaf))
    }

    /// Build a tree over a batch of points, top-down.
    ///
    /// Every node draws one cut across the box of the points below it and
    /// splits them by that cut; identical points share a leaf. The resulting
    /// shape has the same distribution as inserting the points one at a time.
    pub fn from_points<P: AsRef<[f64]>>(dimension: usize, seed: Option<u64>, points: &[P]) -> Result<Self> {
        let mut tree = Self::new(dimension, seed);
        let points: Vec<&[f64]> = points.iter().map(AsRef::as_ref).collect();
        for p in &points {
            tree.check_point(p)?;
        }
        tree.bulk_load(&points);
        Ok(tree)
    }

    /// Fill an empty tree with already validated points.
    pub(crate) fn bulk_load(&mut self, points: &[&[f64]]) {
        debug_assert!(self.is_empty());
        let box_of = |idx: &[usize]| {
            let mut bbox = BoundingBox::from_point(points[idx[0]]);
            for &i in &idx[1..] {
                bbox.extend(points[i]);
            }
            bbox
        };
        if points.is_empty() {
            return;
        }
        let all: Vec<usize> = (0..points.len()).collect();
        let bbox = box_of(&all);

        let mut stack: Vec<(Vec<usize>, BoundingBox, Option<(NodeId, bool)>)> =
            vec![(all, bbox.clone(), None)];
        while let Some((idx, node_box, link)) = stack.pop() {
            let parent = link.map(|(p, _)| p);
            let id = match Cut::random(&mut self.rng, &node_box.min, &node_box.max, &node_box.min) {
                // Every point here is identical.
                None => self.nodes.alloc(Node::Leaf(Leaf {
                    point: points[idx[0]].into(),
                    duplicates: idx.len() as u32,
                    parent,
                })),
                Some(cut) => {
                    let (left, right): (Vec<usize>, Vec<usize>) =
                        idx.iter().copied().partition(|&i| cut.goes_left(points[i]));
                    let (left_box, right_box) = (box_of(&left), box_of(&right));
                    let id = self.nodes.alloc(Node::Branch(Branch {
                        cut,
                        left: 0,
                        right: 0,
                        leaf_count: idx.len() as u64,
                        parent,
                        delta: BoxDelta::join(&left_box, &right_box),
                    }));
                    stack.push((right, right_box, Some((id, false))));
                    stack.push((left, left_box, Some((id, true))));
                    id
                }
            };
            match link {
                Some((p, side)) => self.nodes.branch_mut(p).set_child(side, id),
                None => self.root = Some(id),
            }
        }
        self.bbox = Some(bbox);
    }

    /// Remove one occurrence of the point held by `leaf` and return it.
    pub fn delete(&mut self, leaf: LeafId) -> Result<Box<[f64]>> {
        let id = self.resolve(leaf)?;
        Ok(self.remove_leaf(id))
    }

    /// Remove one occurrence of `point`.
    pub fn delete_point(&mut self, point: &[f64]) -> Result<Box<[f64]>> {
        self.check_point(point)?;
        let id = self.find(point).ok_or(Error::NotFound)?;
        Ok(self.remove_leaf(id))
    }

    fn remove_leaf(&mut self, id: NodeId) -> Box<[f64]> {
        let duplicates = self.nodes.leaf(id).duplicates;
        if duplicates > 1 {
            self.bump_counts(Some(id), -1);
            return self.nodes.leaf(id).point.clone();
        }

        let Some((parent, sibling)) = self.sibling(id) else {
            // Sole point.
            self.root = None;
            self.bbox = None;
            return self.take_point(id);
        };

        let parent_node = self.nodes.branch(parent);
        let grandparent = parent_node.parent;
        let leaf_is_left = parent_node.left == id;

        match grandparent {
            None => {
                // The recorded bounds of the old root describe the sibling
                // wherever the removed leaf was the one defining the box.
                let delta = parent_node.delta.clone();
                let bbox = self
                    .bbox
                    .as_mut()
                    .unwrap_or_else(|| panic!("invariant violation: non-empty tree without a box"));
                for i in 0..self.dimension {
                    if leaf_is_left != delta.min_left.get(i) {
                        bbox.min[i] = delta.min_values[i];
                    }
                    if leaf_is_left != delta.max_left.get(i) {
                        bbox.max[i] = delta.max_values[i];
                    }
                }
                self.nodes.get_mut(sibling).set_parent(None);
                self.root = Some(sibling);
            }
            Some(gp) => {
                self.shrink_box_upwards(id);
                let parent_is_left = self.nodes.branch(gp).left == parent;
                self.nodes.branch_mut(gp).set_child(parent_is_left, sibling);
                self.nodes.get_mut(sibling).set_parent(Some(gp));
                self.bump_counts(Some(gp), -1);
            }
        }

        self.nodes.release(parent);
        self.take_point(id)
    }

    fn take_point(&mut self, id: NodeId) -> Box<[f64]> {
        match self.nodes.release(id) {
            Node::Leaf(l) => l.point,
            Node::Branch(_) => panic!("invariant violation: node {id} is not a leaf"),
        }
    }

    /// Repair recorded bounds on the ancestors of a leaf about to be removed.
    ///
    /// Carries, per dimension, the best bound seen among the siblings of the
    /// path so far. A dimension stops propagating at the first ancestor whose
    /// bound was defined by the other side.
    fn shrink_box_upwards(&mut self, leaf: NodeId) {
        let d = self.dimension;
        let mut min_open = DimSet::full(d);
        let mut max_open = DimSet::full(d);
        let mut alt_min = vec![f64::INFINITY; d];
        let mut alt_max = vec![f64::NEG_INFINITY; d];

        let mut prev = leaf;
        let mut cur = self.nodes.leaf(leaf).parent;
        while let Some(id) = cur {
            if min_open.is_empty() && max_open.is_empty() {
                return;
            }
            let b = self.nodes.branch_mut(id);
            let prev_is_left = b.left == prev;
            let delta = &mut b.delta;

            for i in min_open.clone().ones() {
                if prev_is_left != delta.min_left.get(i) {
                    // The removed path defined this minimum.
                    if delta.min_values[i] < alt_min[i] {
                        delta.min_left.set(i, prev_is_left);
                        std::mem::swap(&mut delta.min_values[i], &mut alt_min[i]);
                    }
                } else {
                    delta.min_values[i] = alt_min[i];
                    min_open.set(i, false);
                }
            }
            for i in max_open.clone().ones() {
                if prev_is_left != delta.max_left.get(i) {
                    if delta.max_values[i] > alt_max[i] {
                        delta.max_left.set(i, prev_is_left);
                        std::mem::swap(&mut delta.max_values[i], &mut alt_max[i]);
                    }
                } else {
                    delta.max_values[i] = alt_max[i];
                    max_open.set(i, false);
                }
            }

            prev = id;
            cur = b.parent;
        }

        let bbox = self
            .bbox
            .as_mut()
            .unwrap_or_else(|| panic!("invariant violation: non-empty tree without a box"));
        for i in min_open.ones() {
            bbox.min[i] = alt_min[i];
        }
        for i in max_open.ones() {
            bbox.max[i] = alt_max[i];
        }
    }

    /// Size of the sibling subtree: how many points move up if `leaf` goes.
    pub fn displacement(&self, leaf: LeafId) -> Result<u64> {
        let id = self.resolve(leaf)?;
        Ok(self
            .sibling(id)
            .map_or(0, |(_, s)| self.nodes.get(s).leaf_count()))
    }

    /// Collusive displacement of a leaf.
    ///
    /// The largest `sibling / subtree` leaf-count ratio over every subtree on
    /// the path from `leaf` to the root, using integer division. Zero for the
    /// root.
    pub fn collusive_displacement(&self, leaf: LeafId) -> Result<u64> {
        let mut node = self.resolve(leaf)?;
        let mut score = 0;
        while let Some((parent, sibling)) = self.sibling(node) {
            let ratio = self.nodes.get(sibling).leaf_count() / self.nodes.get(node).leaf_count();
            score = score.max(ratio);
            node = parent;
        }
        Ok(score)
    }

    /// Box of the subtree rooted at `id`, rebuilt from the recorded deltas.
    #[cfg(test)]
    pub(crate) fn subtree_box(&self, id: NodeId) -> Option<BoundingBox> {
        let mut bbox = self.bbox.clone()?;
        let mut path: Vec<(NodeId, bool)> = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.nodes.get(cur).parent() {
            path.push((parent, self.nodes.branch(parent).left == cur));
            cur = parent;
        }
        for &(branch, left) in path.iter().rev() {
            self.nodes
                .branch(branch)
                .delta
                .narrow(left, &mut bbox.min, &mut bbox.max);
        }
        Some(bbox)
    }

    /// Panic unless every structural invariant holds: parent links agree
    /// with child links, leaf counts add up, and every rebuilt subtree box is
    /// exactly the box of the points below it.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let Some(root) = self.root else {
            assert!(self.bbox.is_none(), "empty tree keeps a box");
            assert_eq!(self.nodes.live(), 0, "empty tree keeps nodes");
            return;
        };
        assert_eq!(self.nodes.get(root).parent(), None, "root has a parent");

        // Post-order: (node, expanded). Each finished node leaves its
        // brute-force box on `boxes`.
        let mut stack = vec![(root, false)];
        let mut boxes: Vec<BoundingBox> = Vec::new();
        let mut leaves = 0usize;
        let mut branches = 0usize;
        while let Some((id, expanded)) = stack.pop() {
            match self.nodes.get(id) {
                Node::Leaf(l) => {
                    assert!(l.duplicates >= 1, "leaf {id} has no points");
                    assert_eq!(l.point.len(), self.dimension);
                    leaves += 1;
                    boxes.push(BoundingBox::from_point(&l.point));
                }
                Node::Branch(b) if !expanded => {
                    assert_eq!(self.nodes.get(b.left).parent(), Some(id), "left child of {id}");
                    assert_eq!(self.nodes.get(b.right).parent(), Some(id), "right child of {id}");
                    stack.push((id, true));
                    stack.push((b.right, false));
                    stack.push((b.left, false));
                    continue;
                }
                Node::Branch(b) => {
                    branches += 1;
                    assert_eq!(
                        b.leaf_count,
                        self.nodes.get(b.left).leaf_count() + self.nodes.get(b.right).leaf_count(),
                        "leaf count of {id}"
                    );
                    let right = boxes.pop().unwrap();
                    let left = boxes.pop().unwrap();
                    assert!(left.max[b.cut.dimension] <= b.cut.value, "left of cut at {id}");
                    assert!(right.min[b.cut.dimension] > b.cut.value, "right of cut at {id}");
                    boxes.push(left.union(&right));
                }
            }
            let want = boxes.last().unwrap();
            assert_eq!(self.subtree_box(id).as_ref(), Some(want), "box of node {id}");
        }
        assert_eq!(boxes.len(), 1);
        assert_eq!(self.bbox.as_ref(), boxes.last());
        assert_eq!(branches + 1, leaves);
        assert_eq!(self.nodes.live(), leaves + branches, "leaked nodes");
    }
}
