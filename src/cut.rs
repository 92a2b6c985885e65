//! Random cuts and the boxes they split.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random source owned by each tree.
pub type TreeRng = ChaCha8Rng;

/// Build the generator for tree `stream` of a forest seeded with `seed`.
///
/// Stream `0` is also what a standalone tree seeded with `seed` uses, so the
/// first tree of a forest replays exactly like `RandomCutTree::new(d, Some(seed))`.
pub(crate) fn tree_rng(seed: u64, stream: u64) -> TreeRng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Seed for a caller that did not provide one.
pub(crate) fn entropy_seed() -> u64 {
    rand::thread_rng().gen()
}

/// An axis-aligned hyperplane: `point[dimension] <= value` lies left of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cut {
    pub dimension: usize,
    pub value: f64,
}

impl Cut {
    /// Which side of the cut `point` falls on (`true` = left).
    #[inline]
    pub fn goes_left(&self, point: &[f64]) -> bool {
        point[self.dimension] <= self.value
    }

    /// Draw a cut through the smallest box covering `[min, max]` and `point`.
    ///
    /// The dimension is picked with probability proportional to its span in
    /// that enlarged box, then the value uniformly along it. Dimensions with
    /// zero span are never picked. Returns `None` only when every span is
    /// zero, i.e. `point` coincides with a degenerate box.
    ///
    /// The value always lies in `[lo, hi)` of the chosen dimension's enlarged
    /// range, so at least one coordinate on each side of the range is
    /// separated by it.
    ///
    /// Consumes exactly one `f64` from `rng`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, min: &[f64], max: &[f64], point: &[f64]) -> Option<Self> {
        debug_assert_eq!(min.len(), point.len());
        debug_assert_eq!(max.len(), point.len());

        let span = |i: usize| max[i].max(point[i]) - min[i].min(point[i]);

        let mut total = 0.0;
        for i in 0..point.len() {
            total += span(i);
        }
        let r = rng.gen::<f64>() * total;
        if !(total > 0.0) {
            return None;
        }

        // Running prefix sum; the first dimension whose sum reaches `r` wins.
        let mut acc = 0.0;
        for i in 0..point.len() {
            let s = span(i);
            acc += s;
            if s > 0.0 && acc >= r {
                let lo = min[i].min(point[i]);
                let hi = max[i].max(point[i]);
                let mut value = lo + acc - r;
                // Rounding can push `value` onto `hi` or off the range when
                // the span is a few ulps wide.
                if !(lo..hi).contains(&value) {
                    value = lo;
                }
                return Some(Self { dimension: i, value });
            }
        }
        None
    }
}

/// Coordinate-wise minimum and maximum over a set of points.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Box<[f64]>,
    pub max: Box<[f64]>,
}

impl BoundingBox {
    /// The degenerate box around a single point.
    pub fn from_point(point: &[f64]) -> Self {
        Self {
            min: point.into(),
            max: point.into(),
        }
    }

    /// Grow to cover `point`.
    pub fn extend(&mut self, point: &[f64]) {
        for (i, &v) in point.iter().enumerate() {
            if v < self.min[i] {
                self.min[i] = v;
            }
            if v > self.max[i] {
                self.max[i] = v;
            }
        }
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.extend(&other.min);
        out.extend(&other.max);
        out
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point
            .iter()
            .enumerate()
            .all(|(i, &v)| self.min[i] <= v && v <= self.max[i])
    }
}
