//! Iterative traversals over the node arena.
//!
//! All traversals keep an explicit stack, so a degenerate (near-linear) tree
//! cannot overflow the call stack. Children are visited left before right.

use smallvec::SmallVec;

use super::node::{Node, NodeId};
use super::{LeafId, RandomCutTree};
use crate::cut::{BoundingBox, Cut};

type Stack<T> = SmallVec<[T; 32]>;

/// A leaf seen during a traversal.
#[derive(Clone, Debug)]
pub struct LeafRef<'a> {
    pub id: LeafId,
    pub point: &'a [f64],
    pub duplicates: u32,
    /// Distance from the root (the root is at depth 0).
    pub depth: usize,
}

/// A branch seen during a traversal.
#[derive(Clone, Debug)]
pub struct BranchRef {
    pub cut: Cut,
    pub leaf_count: u64,
    pub depth: usize,
    /// Box of the points below this branch. Only filled in by [`Walk`].
    pub bbox: Option<BoundingBox>,
}

#[derive(Clone, Debug)]
pub enum NodeRef<'a> {
    Leaf(LeafRef<'a>),
    Branch(BranchRef),
}

impl RandomCutTree {
    /// Every node in pre-order, with each branch's box rebuilt on the way down.
    pub fn walk(&self) -> Walk<'_> {
        let mut stack = Stack::new();
        if let (Some(root), Some(bbox)) = (self.root, self.bbox.clone()) {
            stack.push((root, 0, bbox));
        }
        Walk { tree: self, stack }
    }

    /// Every leaf, left to right.
    pub fn leaves(&self) -> impl Iterator<Item = LeafRef<'_>> + '_ {
        let mut stack: Stack<(NodeId, usize)> = Stack::new();
        stack.extend(self.root.map(|r| (r, 0)));
        std::iter::from_fn(move || loop {
            let (id, depth) = stack.pop()?;
            match self.nodes.get(id) {
                Node::Leaf(l) => {
                    return Some(LeafRef {
                        id: self.nodes.leaf_id(id),
                        point: &l.point,
                        duplicates: l.duplicates,
                        depth,
                    })
                }
                Node::Branch(b) => {
                    stack.push((b.right, depth + 1));
                    stack.push((b.left, depth + 1));
                }
            }
        })
    }

    /// Every branch in post-order (children before their parent).
    pub fn branches(&self) -> Branches<'_> {
        let mut stack = Stack::new();
        stack.extend(self.root.map(|r| (r, 0, false)));
        Branches { tree: self, stack }
    }
}

pub struct Walk<'a> {
    tree: &'a RandomCutTree,
    stack: Stack<(NodeId, usize, BoundingBox)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth, bbox) = self.stack.pop()?;
        let nodes = &self.tree.nodes;
        Some(match nodes.get(id) {
            Node::Leaf(l) => NodeRef::Leaf(LeafRef {
                id: nodes.leaf_id(id),
                point: &l.point,
                duplicates: l.duplicates,
                depth,
            }),
            Node::Branch(b) => {
                let mut left = bbox.clone();
                b.delta.narrow(true, &mut left.min, &mut left.max);
                let mut right = bbox.clone();
                b.delta.narrow(false, &mut right.min, &mut right.max);
                self.stack.push((b.right, depth + 1, right));
                self.stack.push((b.left, depth + 1, left));
                NodeRef::Branch(BranchRef {
                    cut: b.cut,
                    leaf_count: b.leaf_count,
                    depth,
                    bbox: Some(bbox),
                })
            }
        })
    }
}

pub struct Branches<'a> {
    tree: &'a RandomCutTree,
    /// `(node, depth, children already pushed)`
    stack: Stack<(NodeId, usize, bool)>,
}

impl Iterator for Branches<'_> {
    type Item = BranchRef;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((id, depth, expanded)) = self.stack.pop() {
            let Node::Branch(b) = self.tree.nodes.get(id) else {
                continue;
            };
            if expanded {
                return Some(BranchRef {
                    cut: b.cut,
                    leaf_count: b.leaf_count,
                    depth,
                    bbox: None,
                });
            }
            self.stack.push((id, depth, true));
            self.stack.push((b.right, depth + 1, false));
            self.stack.push((b.left, depth + 1, false));
        }
        None
    }
}
