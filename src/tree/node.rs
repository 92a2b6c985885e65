//! Tree nodes and the arena that owns them.
//!
//! Nodes refer to each other by `NodeId` (an index into the arena). Parent
//! links are plain ids as well, so the arena is the only owner and removing a
//! node is a slot release, not a pointer dance.
//!
//! Branches do not store a bounding box. Each branch stores, per dimension,
//! the bound of *one* child plus a flag saying which child that is; the other
//! child shares the branch's own bound. Walking down from the tree-wide box
//! rebuilds any subtree's box (`BoxDelta::narrow`).

use smallvec::{smallvec, SmallVec};

use crate::cut::{BoundingBox, Cut};

pub(crate) type NodeId = u32;

/// Handle to a leaf returned by `RandomCutTree::insert`.
///
/// Stays valid until the leaf is removed structurally (its duplicate count
/// drops to zero). A stale handle is reported as `Error::NotFound`, even if
/// its arena slot has been reused since.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeafId {
    pub(crate) index: NodeId,
    pub(crate) generation: u32,
}

/// Fixed-size bit set, one bit per dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DimSet(SmallVec<[u64; 1]>);

impl DimSet {
    pub(crate) fn empty(dimension: usize) -> Self {
        Self(smallvec![0; dimension.div_ceil(64)])
    }

    pub(crate) fn full(dimension: usize) -> Self {
        let mut s = Self::empty(dimension);
        for i in 0..dimension {
            s.set(i, true);
        }
        s
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> bool {
        (self.0[i / 64] >> (i % 64)) & 1 != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, i: usize, v: bool) {
        let bit = 1u64 << (i % 64);
        if v {
            self.0[i / 64] |= bit;
        } else {
            self.0[i / 64] &= !bit;
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Indices of set bits, ascending.
    pub(crate) fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            let mut word = word;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                Some(w * 64 + bit)
            })
        })
    }

    fn heap_bytes(&self) -> usize {
        if self.0.spilled() {
            self.0.capacity() * 8
        } else {
            0
        }
    }
}

/// Half of a branch's children boxes.
///
/// For dimension `i`, `min_left[i]` says whether `min_values[i]` is the
/// left child's minimum (`true`) or the right child's (`false`). The child
/// not described shares the branch's minimum. Same for the maximum.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BoxDelta {
    pub(crate) min_left: DimSet,
    pub(crate) max_left: DimSet,
    pub(crate) min_values: Box<[f64]>,
    pub(crate) max_values: Box<[f64]>,
}

impl BoxDelta {
    /// Delta for a branch joining a new leaf `point` with a subtree whose box
    /// is `[min, max]`.
    pub(crate) fn split(point: &[f64], min: &[f64], max: &[f64], leaf_is_left: bool) -> Self {
        let d = point.len();
        let mut delta = Self {
            min_left: DimSet::empty(d),
            max_left: DimSet::empty(d),
            min_values: vec![0.0; d].into_boxed_slice(),
            max_values: vec![0.0; d].into_boxed_slice(),
        };
        for i in 0..d {
            // Record the bound of whichever side does NOT define the branch's bound.
            delta.min_left.set(i, (point[i] < min[i]) != leaf_is_left);
            delta.max_left.set(i, (point[i] > max[i]) != leaf_is_left);
            delta.min_values[i] = point[i].max(min[i]);
            delta.max_values[i] = point[i].min(max[i]);
        }
        delta
    }

    /// Delta for a branch whose children have boxes `left` and `right`.
    pub(crate) fn join(left: &BoundingBox, right: &BoundingBox) -> Self {
        let d = left.dimension();
        let mut delta = Self {
            min_left: DimSet::empty(d),
            max_left: DimSet::empty(d),
            min_values: vec![0.0; d].into_boxed_slice(),
            max_values: vec![0.0; d].into_boxed_slice(),
        };
        for i in 0..d {
            delta.min_left.set(i, left.min[i] > right.min[i]);
            delta.max_left.set(i, left.max[i] < right.max[i]);
            delta.min_values[i] = left.min[i].max(right.min[i]);
            delta.max_values[i] = left.max[i].min(right.max[i]);
        }
        delta
    }

    /// Turn the branch's box `[min, max]` into the box of one child.
    pub(crate) fn narrow(&self, left: bool, min: &mut [f64], max: &mut [f64]) {
        for i in 0..min.len() {
            if self.min_left.get(i) == left {
                min[i] = self.min_values[i];
            }
            if self.max_left.get(i) == left {
                max[i] = self.max_values[i];
            }
        }
    }

    /// Narrow `[min, max]` to the `left`/right child while recording that
    /// `point` is about to be inserted below that child.
    ///
    /// `min`/`max` come out as the child's box *before* the insertion; the
    /// stored delta comes out describing the boxes *after* it. Bounds only grow.
    pub(crate) fn descend_expanding(&mut self, left: bool, point: &[f64], min: &mut [f64], max: &mut [f64]) {
        for i in 0..point.len() {
            let (old_min, old_max) = (min[i], max[i]);

            if self.min_left.get(i) == left {
                // The path's side is the recorded one; the other side holds `old_min`.
                min[i] = self.min_values[i];
                if point[i] < old_min {
                    self.min_left.set(i, !left);
                    self.min_values[i] = old_min;
                } else {
                    self.min_values[i] = self.min_values[i].min(point[i]);
                }
            }

            if self.max_left.get(i) == left {
                max[i] = self.max_values[i];
                if point[i] > old_max {
                    self.max_left.set(i, !left);
                    self.max_values[i] = old_max;
                } else {
                    self.max_values[i] = self.max_values[i].max(point[i]);
                }
            }
        }
    }

    fn heap_bytes(&self) -> usize {
        (self.min_values.len() + self.max_values.len()) * std::mem::size_of::<f64>()
            + self.min_left.heap_bytes()
            + self.max_left.heap_bytes()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Leaf {
    pub(crate) point: Box<[f64]>,
    /// Number of identical points folded into this leaf; always >= 1.
    pub(crate) duplicates: u32,
    pub(crate) parent: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub(crate) struct Branch {
    pub(crate) cut: Cut,
    pub(crate) left: NodeId,
    pub(crate) right: NodeId,
    /// Duplicate-weighted number of points below this branch.
    pub(crate) leaf_count: u64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) delta: BoxDelta,
}

impl Branch {
    #[inline]
    pub(crate) fn child(&self, left: bool) -> NodeId {
        if left {
            self.left
        } else {
            self.right
        }
    }

    #[inline]
    pub(crate) fn set_child(&mut self, left: bool, id: NodeId) {
        if left {
            self.left = id;
        } else {
            self.right = id;
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Node {
    Leaf(Leaf),
    Branch(Branch),
}

impl Node {
    #[inline]
    pub(crate) fn leaf_count(&self) -> u64 {
        match self {
            Node::Leaf(l) => u64::from(l.duplicates),
            Node::Branch(b) => b.leaf_count,
        }
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Leaf(l) => l.parent,
            Node::Branch(b) => b.parent,
        }
    }

    #[inline]
    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Node::Leaf(l) => l.parent = parent,
            Node::Branch(b) => b.parent = parent,
        }
    }

    fn heap_bytes(&self) -> usize {
        match self {
            Node::Leaf(l) => l.point.len() * std::mem::size_of::<f64>(),
            Node::Branch(b) => b.delta.heap_bytes(),
        }
    }
}

#[derive(Clone, Debug)]
struct Slot {
    /// Bumped every time the slot is released.
    generation: u32,
    node: Option<Node>,
}

/// Homogeneous node storage with a free list of released slots.
#[derive(Clone, Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<NodeId>,
}

impl NodeArena {
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize].node = Some(node);
            id
        } else {
            let id = NodeId::try_from(self.slots.len())
                .unwrap_or_else(|_| panic!("node arena exhausted at {} slots", self.slots.len()));
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            id
        }
    }

    pub(crate) fn release(&mut self, id: NodeId) -> Node {
        let slot = &mut self.slots[id as usize];
        let node = slot
            .node
            .take()
            .unwrap_or_else(|| panic!("invariant violation: double release of node {id}"));
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id);
        node
    }

    /// Release every live node. Slots are kept so outstanding handles stay stale.
    pub(crate) fn clear(&mut self) {
        self.free.clear();
        for (id, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(id as NodeId);
        }
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node {
        self.slots[id as usize]
            .node
            .as_ref()
            .unwrap_or_else(|| panic!("invariant violation: dangling node id {id}"))
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id as usize]
            .node
            .as_mut()
            .unwrap_or_else(|| panic!("invariant violation: dangling node id {id}"))
    }

    #[inline]
    pub(crate) fn leaf_id(&self, id: NodeId) -> LeafId {
        LeafId {
            index: id,
            generation: self.slots[id as usize].generation,
        }
    }

    /// Resolve a handle to a live leaf.
    pub(crate) fn resolve(&self, leaf: LeafId) -> Option<NodeId> {
        let slot = self.slots.get(leaf.index as usize)?;
        match (&slot.node, slot.generation == leaf.generation) {
            (Some(Node::Leaf(_)), true) => Some(leaf.index),
            _ => None,
        }
    }

    pub(crate) fn leaf(&self, id: NodeId) -> &Leaf {
        match self.get(id) {
            Node::Leaf(l) => l,
            Node::Branch(_) => panic!("invariant violation: node {id} is not a leaf"),
        }
    }

    pub(crate) fn branch(&self, id: NodeId) -> &Branch {
        match self.get(id) {
            Node::Branch(b) => b,
            Node::Leaf(_) => panic!("invariant violation: node {id} is not a branch"),
        }
    }

    pub(crate) fn branch_mut(&mut self, id: NodeId) -> &mut Branch {
        match self.get_mut(id) {
            Node::Branch(b) => b,
            Node::Leaf(_) => panic!("invariant violation: node {id} is not a branch"),
        }
    }

    /// Number of live nodes.
    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Slot>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
            + self
                .slots
                .iter()
                .filter_map(|s| s.node.as_ref())
                .map(Node::heap_bytes)
                .sum::<usize>()
    }
}
