//! Data ingestion.
//!
//! Submodules:
//! - `reader`: whitespace-delimited GPS time series files.
//! - `delta`: GeoNet delta station directory over HTTP.

pub mod delta;
pub mod reader;
