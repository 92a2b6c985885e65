//! # rrcf-rs
//!
//! Streaming anomaly detection with robust random cut forests.
//!
//! Based on "Robust Random Cut Forest Based Anomaly Detection on Streams"
//! (ICML 2016, Guha et al.)
//!
//! A [`RandomCutTree`] partitions points with random axis-aligned cuts, picking
//! the dimension of each cut in proportion to its span. Points far from the
//! rest are cut off early, so removing them would displace many others. That
//! displacement, taken as the worst ratio along the path to the root, is the
//! anomaly score. A [`Forest`] averages it over many trees that all see the
//! same sliding window, and a [`Shingler`] turns a series of scalars or
//! fixed-width frames into the overlapping vectors a forest consumes.
//!
//! Trees store one explicit bounding box. Each branch keeps only a per
//! dimension delta telling which child inherits the parent's bound and what
//! the other child's bound is, which roughly halves the memory a full box per
//! node would take.
//!
//! ## Example
//!
//! ```rust
//! use rrcf_rs::Shingler;
//!
//! let mut detector = Shingler::new(4, 20, 64, Some(7)).unwrap();
//! let mut last = None;
//! for i in 0..200 {
//!     let x = (f64::from(i) / 8.0).sin();
//!     last = detector.add_scalar(x).unwrap();
//! }
//! let normal = last.unwrap();
//! let spike = detector.add_scalar(50.0).unwrap().unwrap();
//! assert!(spike > normal);
//! ```

#![forbid(unsafe_code)]

mod bounded;
mod cut;
mod error;
mod forest;
mod shingle;
mod tree;

pub use bounded::BoundedStream;
pub use cut::{BoundingBox, Cut};
pub use error::{Error, Result};
pub use forest::{Forest, ForestConfig};
pub use shingle::Shingler;
pub use tree::{BranchRef, Branches, LeafId, LeafRef, NodeRef, RandomCutTree, Walk};

#[cfg(test)]
mod oracle;
#[cfg(test)]
mod proptests;
