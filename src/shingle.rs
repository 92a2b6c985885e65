//! Turns a stream of fixed-width frames into overlapping points.

use tracing::debug;

use crate::bounded::BoundedStream;
use crate::error::{Error, Result};
use crate::forest::{Forest, ForestConfig};

/// Feeds a [`Forest`] with sliding windows ("shingles") of a stream.
///
/// Each stream element is a frame of `w` values, where `w` is fixed by the
/// first frame (a scalar stream has `w = 1`). After `shingle_size` frames
/// have arrived, every new frame produces the point
/// `[f[t - shingle_size + 1] ++ ... ++ f[t]]`, oldest first, of dimension
/// `shingle_size * w`.
#[derive(Clone, Debug)]
pub struct Shingler {
    window: BoundedStream<Box<[f64]>>,
    width: Option<usize>,
    forest: Forest,
}

impl Shingler {
    pub fn new(
        shingle_size: usize,
        num_trees: usize,
        tree_capacity: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        Self::with_config(ForestConfig {
            num_trees,
            tree_capacity,
            shingle_size,
            seed,
        })
    }

    pub fn with_config(config: ForestConfig) -> Result<Self> {
        Self::with_history(config, &[] as &[&[f64]])
    }

    /// Start from frames that have already been seen.
    ///
    /// Every full shingle in `frames` is loaded into the forest in one batch
    /// (see [`Forest::with_points`]), and the last `shingle_size` frames are
    /// kept so the next frame continues the sequence.
    pub fn with_history<P: AsRef<[f64]>>(config: ForestConfig, frames: &[P]) -> Result<Self> {
        config.validate()?;
        let mut window = BoundedStream::new(config.shingle_size)?;
        let mut width = None;
        for f in frames {
            check_frame(width, window.next_index(), f.as_ref())?;
            width = Some(f.as_ref().len());
            window.add(f.as_ref().into());
        }
        let shingles: Vec<Vec<f64>> = frames
            .windows(config.shingle_size)
            .map(|w| w.iter().flat_map(|f| f.as_ref().iter().copied()).collect())
            .collect();
        debug!(
            shingle_size = config.shingle_size,
            history = frames.len(),
            shingles = shingles.len(),
            "creating shingler"
        );
        Ok(Self {
            forest: Forest::with_points(config, &shingles)?,
            window,
            width,
        })
    }

    #[inline]
    pub fn shingle_size(&self) -> usize {
        self.window.capacity()
    }

    /// Values per frame, once the first frame has arrived.
    pub fn frame_width(&self) -> Option<usize> {
        self.width
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// Frames accepted so far.
    pub fn seen(&self) -> u64 {
        self.window.next_index()
    }

    /// Push one scalar and score the resulting shingle.
    ///
    /// Same as [`add_vector`](Self::add_vector) with a one-value frame.
    pub fn add_scalar(&mut self, value: f64) -> Result<Option<f64>> {
        self.add_vector(&[value])
    }

    /// Push one frame and score the resulting shingle.
    ///
    /// Returns `Ok(None)` until the first full shingle is available. A frame
    /// of the wrong width or with a non-finite value is rejected without
    /// entering the window.
    pub fn add_vector(&mut self, frame: &[f64]) -> Result<Option<f64>> {
        check_frame(self.width, self.window.next_index(), frame)?;
        self.width = Some(frame.len());
        self.window.add(frame.into());
        if !self.window.is_full() {
            return Ok(None);
        }
        let shingle: Vec<f64> = self.window.iter().flat_map(|f| f.iter().copied()).collect();
        self.forest.add_point(&shingle).map(Some)
    }
}

fn check_frame(width: Option<usize>, index: u64, frame: &[f64]) -> Result<()> {
    match width {
        Some(expected) if frame.len() != expected => {
            return Err(Error::DimensionMismatch {
                expected,
                actual: frame.len(),
            })
        }
        None if frame.is_empty() => {
            return Err(Error::InvalidConfig("frames must have at least one value"))
        }
        _ => {}
    }
    if let Some(offset) = frame.iter().position(|v| !v.is_finite()) {
        return Err(Error::NonFiniteInput { index, offset });
    }
    Ok(())
}
