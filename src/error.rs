//! Error types shared by trees, forests and the stream buffer.

use thiserror::Error;

/// Recoverable errors.
///
/// None of these leave a tree, forest or buffer modified: every operation
/// validates its input before the first write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A point's length does not match the fixed dimension of the tree.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the tree (or forest) was built for.
        expected: usize,
        /// Length of the rejected point.
        actual: usize,
    },

    /// A coordinate is NaN or infinite.
    #[error("non-finite coordinate in dimension {dimension}")]
    NonFinite {
        /// First offending coordinate.
        dimension: usize,
    },

    /// A value pushed into a [`Shingler`](crate::Shingler) is NaN or infinite.
    #[error("non-finite input at stream index {index}, offset {offset}")]
    NonFiniteInput {
        /// Stream index the rejected frame would have taken.
        index: u64,
        /// Position of the first offending value within the frame.
        offset: usize,
    },

    /// A leaf handle is stale, or a point is not stored in the tree.
    #[error("point not found in tree")]
    NotFound,

    /// A logical stream index lies outside the retained window.
    #[error("stream index {index} outside retained window [{start}, {end})")]
    OutOfRange {
        /// Requested logical index.
        index: u64,
        /// Oldest retained logical index.
        start: u64,
        /// One past the newest logical index.
        end: u64,
    },

    /// A constructor was given an unusable parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
