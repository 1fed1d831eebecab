//! Displacement analysis.
//!
//! Submodules:
//! - `kmeans`: generic k-means clustering.
//! - `displacement`: before/after displacement estimation on a sample table.

pub mod displacement;
pub mod kmeans;
