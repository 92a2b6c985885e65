//! An ensemble of random cut trees over a sliding window of points.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bounded::BoundedStream;
use crate::cut::{entropy_seed, tree_rng};
use crate::error::{Error, Result};
use crate::tree::RandomCutTree;

/// Parameters shared by [`Forest`] and [`Shingler`](crate::Shingler).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ForestConfig {
    /// Number of independent trees.
    pub num_trees: usize,
    /// Points kept per tree; older points are evicted first.
    pub tree_capacity: usize,
    /// Scalars per point when shingling. Ignored by a bare [`Forest`].
    pub shingle_size: usize,
    /// Master seed. `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            tree_capacity: 256,
            shingle_size: 4,
            seed: None,
        }
    }
}

impl ForestConfig {
    pub fn num_trees(mut self, num_trees: usize) -> Self {
        self.num_trees = num_trees;
        self
    }

    pub fn tree_capacity(mut self, tree_capacity: usize) -> Self {
        self.tree_capacity = tree_capacity;
        self
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = shingle_size;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_trees == 0 {
            return Err(Error::InvalidConfig("num_trees must be non-zero"));
        }
        if self.tree_capacity == 0 {
            return Err(Error::InvalidConfig("tree_capacity must be non-zero"));
        }
        if self.shingle_size == 0 {
            return Err(Error::InvalidConfig("shingle_size must be non-zero"));
        }
        Ok(())
    }
}

/// A robust random cut forest.
///
/// Every point is fed to every tree. Each tree keeps the same window of the
/// last `tree_capacity` points, so once the window is full the oldest point is
/// evicted from every tree before the new one goes in. The score of a point
/// is its collusive displacement averaged over the trees.
///
/// Tree `i` draws its cuts from the master seed's ChaCha stream `i`, so a
/// seeded forest is reproducible whether or not the trees run in parallel.
#[derive(Clone, Debug)]
pub struct Forest {
    config: ForestConfig,
    seed: u64,
    /// Built on the first point, which fixes the dimension.
    trees: Vec<RandomCutTree>,
    window: BoundedStream<Box<[f64]>>,
}

impl Forest {
    pub fn new(num_trees: usize, tree_capacity: usize, seed: Option<u64>) -> Result<Self> {
        Self::with_config(
            ForestConfig::default()
                .num_trees(num_trees)
                .tree_capacity(tree_capacity)
                .seed(seed),
        )
    }

    pub fn with_config(config: ForestConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(entropy_seed);
        debug!(
            num_trees = config.num_trees,
            tree_capacity = config.tree_capacity,
            seed,
            "creating random cut forest"
        );
        Ok(Self {
            window: BoundedStream::new(config.tree_capacity)?,
            trees: Vec::new(),
            config,
            seed,
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// The effective master seed (drawn at construction if none was given).
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn num_trees(&self) -> usize {
        self.config.num_trees
    }

    #[inline]
    pub fn tree_capacity(&self) -> usize {
        self.config.tree_capacity
    }

    /// Point dimension. `None` until the first point arrives, since the
    /// first point fixes it.
    pub fn dimension(&self) -> Option<usize> {
        self.trees.first().map(RandomCutTree::dimension)
    }

    /// The trees, one per configured tree.
    ///
    /// Empty until the first point arrives: trees are built once the point
    /// dimension is known.
    pub fn trees(&self) -> &[RandomCutTree] {
        &self.trees
    }

    /// Stream index the next point will get.
    pub fn next_index(&self) -> u64 {
        self.window.next_index()
    }

    /// Create a forest whose trees already hold `points`, built top-down.
    ///
    /// The points take stream indices `0..points.len()`. Only the last
    /// `tree_capacity` of them stay in the window and in the trees, and later
    /// arrivals evict them oldest first.
    pub fn with_points<P: AsRef<[f64]>>(config: ForestConfig, points: &[P]) -> Result<Self> {
        let mut forest = Self::with_config(config)?;
        let Some(first) = points.first() else {
            return Ok(forest);
        };
        check_point(None, first.as_ref())?;
        let dimension = first.as_ref().len();
        for p in points {
            check_point(Some(dimension), p.as_ref())?;
        }
        for p in points {
            forest.window.add(p.as_ref().into());
        }
        debug!(
            points = points.len(),
            retained = forest.window.len(),
            "seeding forest from a batch"
        );

        let rows: Vec<&[f64]> = forest.window.iter().map(|p| &**p).collect();
        let seed = forest.seed;
        let build = |i: usize| {
            let mut tree = RandomCutTree::with_rng(dimension, tree_rng(seed, i as u64));
            tree.bulk_load(&rows);
            tree
        };
        #[cfg(feature = "parallel")]
        let trees = (0..forest.config.num_trees).into_par_iter().map(build).collect();
        #[cfg(not(feature = "parallel"))]
        let trees = (0..forest.config.num_trees).map(build).collect();
        forest.trees = trees;
        Ok(forest)
    }

    /// Add a point to every tree and return its average collusive displacement.
    pub fn add_point(&mut self, point: &[f64]) -> Result<f64> {
        check_point(self.dimension(), point)?;
        if self.trees.is_empty() {
            self.trees = (0..self.config.num_trees)
                .map(|i| RandomCutTree::with_rng(point.len(), tree_rng(self.seed, i as u64)))
                .collect();
        }

        let (evicted, index) = self.window.add(point.into());
        if evicted.is_some() {
            trace!(index, evicted = index - self.config.tree_capacity as u64, "evicting oldest point");
        }
        let evicted = evicted.as_deref();

        let step = |(i, tree): (usize, &mut RandomCutTree)| -> u64 {
            if let Some(old) = evicted {
                if let Err(e) = tree.delete_point(old) {
                    panic!("invariant violation: tree {i} lost a windowed point before index {index}: {e}");
                }
            }
            tree.insert(point)
                .and_then(|leaf| tree.collusive_displacement(leaf))
                .unwrap_or_else(|e| panic!("invariant violation: tree {i} rejected validated point {index}: {e}"))
        };

        #[cfg(feature = "parallel")]
        let total: u64 = self.trees.par_iter_mut().enumerate().map(step).sum();
        #[cfg(not(feature = "parallel"))]
        let total: u64 = self.trees.iter_mut().enumerate().map(step).sum();

        Ok(total as f64 / self.trees.len() as f64)
    }

    /// Add several points in order, returning one score per point.
    pub fn add_points<'p, I>(&mut self, points: I) -> Result<Vec<f64>>
    where
        I: IntoIterator<Item = &'p [f64]>,
    {
        points.into_iter().map(|p| self.add_point(p)).collect()
    }

    /// Average collusive displacement of a point still inside the window.
    pub fn score_at(&self, index: u64) -> Result<f64> {
        let point = self.window.get(index)?;
        let mut total = 0u64;
        for tree in &self.trees {
            let leaf = tree.find_leaf(point)?.ok_or(Error::NotFound)?;
            total += tree.collusive_displacement(leaf)?;
        }
        Ok(total as f64 / self.trees.len() as f64)
    }
}

/// Validate a point against an expected dimension, or against none yet.
fn check_point(expected: Option<usize>, point: &[f64]) -> Result<()> {
    match expected {
        Some(expected) if point.len() != expected => {
            return Err(Error::DimensionMismatch {
                expected,
                actual: point.len(),
            })
        }
        None if point.is_empty() => {
            return Err(Error::InvalidConfig("points must have at least one coordinate"))
        }
        _ => {}
    }
    if let Some(dimension) = point.iter().position(|v| !v.is_finite()) {
        return Err(Error::NonFinite { dimension });
    }
    Ok(())
}
