//! Earthquake GPS displacement tools.
//!
//! Reads GPS station time series, estimates before/after displacement by
//! clustering, and renders the results as plots or as an animated KML tour
//! of displacement vectors. Station positions come from the GeoNet delta
//! directory.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod render;
pub mod stations;
