//! Output rendering.
//!
//! Submodules:
//! - `plot`: SVG plots of estimates and station maps.
//! - `projection`: WGS84/UTM conversion for vector endpoints.
//! - `kml`: animated KML/KMZ displacement documents.

pub mod kml;
pub mod plot;
pub mod projection;
