//! Reference tree that stores a full box on every node.
//!
//! Uses the same cut draw and the same placement rules as
//! [`RandomCutTree`], so fed the same seed and operations it must produce the
//! same shape. Boxes are recomputed from children after every delete.

use crate::cut::{tree_rng, BoundingBox, Cut, TreeRng};
use crate::tree::{NodeRef, RandomCutTree};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Summary {
    Leaf { point: Vec<f64>, duplicates: u32 },
    Branch { cut: Cut, leaf_count: u64, bbox: BoundingBox },
}

/// Pre-order summary of a tree, boxes included.
pub(crate) fn summarize(t: &RandomCutTree) -> Vec<Summary> {
    t.walk()
        .map(|n| match n {
            NodeRef::Leaf(l) => Summary::Leaf {
                point: l.point.to_vec(),
                duplicates: l.duplicates,
            },
            NodeRef::Branch(b) => Summary::Branch {
                cut: b.cut,
                leaf_count: b.leaf_count,
                bbox: b.bbox.unwrap(),
            },
        })
        .collect()
}

enum Kind {
    Leaf(Box<[f64]>),
    Branch { cut: Cut, left: usize, right: usize },
}

struct FullNode {
    parent: Option<usize>,
    count: u64,
    bbox: BoundingBox,
    kind: Kind,
}

pub(crate) struct FullBoxTree {
    nodes: Vec<Option<FullNode>>,
    free: Vec<usize>,
    root: Option<usize>,
    rng: TreeRng,
}

impl FullBoxTree {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            rng: tree_rng(seed, 0),
        }
    }

    fn node(&self, id: usize) -> &FullNode {
        self.nodes[id].as_ref().unwrap()
    }

    fn node_mut(&mut self, id: usize) -> &mut FullNode {
        self.nodes[id].as_mut().unwrap()
    }

    fn alloc(&mut self, node: FullNode) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: usize) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    pub(crate) fn size(&self) -> u64 {
        self.root.map_or(0, |r| self.node(r).count)
    }

    fn find(&self, point: &[f64]) -> Option<usize> {
        let mut id = self.root?;
        loop {
            match &self.node(id).kind {
                Kind::Leaf(p) => return (**p == *point).then_some(id),
                Kind::Branch { cut, left, right } => {
                    id = if cut.goes_left(point) { *left } else { *right };
                }
            }
        }
    }

    fn relink(&mut self, parent: Option<usize>, old: usize, new: usize) {
        match parent {
            Some(p) => {
                if let Kind::Branch { left, right, .. } = &mut self.node_mut(p).kind {
                    if *left == old {
                        *left = new;
                    } else {
                        *right = new;
                    }
                }
            }
            None => self.root = Some(new),
        }
        self.node_mut(new).parent = parent;
    }

    pub(crate) fn insert(&mut self, point: &[f64]) {
        let leaf = FullNode {
            parent: None,
            count: 1,
            bbox: BoundingBox::from_point(point),
            kind: Kind::Leaf(point.into()),
        };
        let Some(root) = self.root else {
            let id = self.alloc(leaf);
            self.root = Some(id);
            return;
        };
        if let Some(dup) = self.find(point) {
            let mut cur = Some(dup);
            while let Some(id) = cur {
                self.node_mut(id).count += 1;
                cur = self.node(id).parent;
            }
            return;
        }

        let mut id = root;
        loop {
            let bbox = self.node(id).bbox.clone();
            let cut = Cut::random(&mut self.rng, &bbox.min, &bbox.max, point).unwrap();
            let new_left = cut.value < bbox.min[cut.dimension];
            let new_right = cut.value >= bbox.max[cut.dimension] && point[cut.dimension] > cut.value;
            if new_left || new_right {
                let parent = self.node(id).parent;
                let leaf = self.alloc(leaf);
                let (left, right) = if new_left { (leaf, id) } else { (id, leaf) };
                let mut merged = bbox;
                merged.extend(point);
                let branch = self.alloc(FullNode {
                    parent: None,
                    count: self.node(id).count + 1,
                    bbox: merged,
                    kind: Kind::Branch { cut, left, right },
                });
                self.relink(parent, id, branch);
                self.node_mut(id).parent = Some(branch);
                self.node_mut(leaf).parent = Some(branch);
                let mut cur = parent;
                while let Some(p) = cur {
                    let n = self.node_mut(p);
                    n.count += 1;
                    n.bbox.extend(point);
                    cur = n.parent;
                }
                return;
            }
            id = match &self.node(id).kind {
                Kind::Branch { cut: c, left, right } => {
                    if c.goes_left(point) {
                        *left
                    } else {
                        *right
                    }
                }
                Kind::Leaf(_) => panic!("cut inside a leaf box"),
            };
        }
    }

    /// Remove one copy of `point`. Returns false if it is not stored.
    pub(crate) fn delete(&mut self, point: &[f64]) -> bool {
        let Some(id) = self.find(point) else {
            return false;
        };
        if self.node(id).count > 1 {
            let mut cur = Some(id);
            while let Some(n) = cur {
                self.node_mut(n).count -= 1;
                cur = self.node(n).parent;
            }
            return true;
        }
        let Some(parent) = self.node(id).parent else {
            self.release(id);
            self.root = None;
            return true;
        };
        let Kind::Branch { left, right, .. } = self.node(parent).kind else {
            unreachable!()
        };
        let sibling = if left == id { right } else { left };
        let grandparent = self.node(parent).parent;
        self.relink(grandparent, parent, sibling);
        self.release(parent);
        self.release(id);

        let mut cur = grandparent;
        while let Some(n) = cur {
            let Kind::Branch { left, right, .. } = self.node(n).kind else {
                unreachable!()
            };
            let bbox = self.node(left).bbox.union(&self.node(right).bbox);
            let node = self.node_mut(n);
            node.count -= 1;
            node.bbox = bbox;
            cur = node.parent;
        }
        true
    }

    pub(crate) fn collusive_displacement(&self, point: &[f64]) -> Option<u64> {
        let mut id = self.find(point)?;
        let mut score = 0;
        while let Some(parent) = self.node(id).parent {
            let Kind::Branch { left, right, .. } = self.node(parent).kind else {
                unreachable!()
            };
            let sibling = if left == id { right } else { left };
            score = score.max(self.node(sibling).count / self.node(id).count);
            id = parent;
        }
        Some(score)
    }

    pub(crate) fn summarize(&self) -> Vec<Summary> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let n = self.node(id);
            match &n.kind {
                Kind::Leaf(p) => out.push(Summary::Leaf {
                    point: p.to_vec(),
                    duplicates: n.count as u32,
                }),
                Kind::Branch { cut, left, right } => {
                    out.push(Summary::Branch {
                        cut: *cut,
                        leaf_count: n.count,
                        bbox: n.bbox.clone(),
                    });
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_matches_on_a_line() {
        let mut t = RandomCutTree::new(2, Some(42));
        let mut o = FullBoxTree::new(42);
        for i in 0..40 {
            let p = [f64::from(i), f64::from(i % 7)];
            t.insert(&p).unwrap();
            o.insert(&p);
            assert_eq!(summarize(&t), o.summarize());
        }
        for i in (0..40).step_by(3) {
            let p = [f64::from(i), f64::from(i % 7)];
            t.delete_point(&p).unwrap();
            assert!(o.delete(&p));
            assert_eq!(summarize(&t), o.summarize());
        }
        assert_eq!(t.size() as u64, o.size());
    }
}
