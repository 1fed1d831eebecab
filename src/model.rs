//! Core data types for the earthquake displacement tools.
//!
//! This module defines the shared domain model imported by all other modules:
//! station records, displacement sample tables, and the crate error type.
//! It contains no I/O.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Station types
// ---------------------------------------------------------------------------

/// A continuous GPS site as listed by the GeoNet delta directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    /// Short site code, e.g. "KAIK". Unique key.
    pub code: String,
    pub network: String,
    pub name: String,
    /// WGS84 latitude, decimal degrees.
    pub latitude: f64,
    /// WGS84 longitude, decimal degrees.
    pub longitude: f64,
    /// Opening date as reported by the directory (not parsed).
    pub opened: String,
}

// ---------------------------------------------------------------------------
// Input formats
// ---------------------------------------------------------------------------

/// The two known GPS time series layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputFormat {
    /// Kinematic solution files (`*.LC`): `dNorth dEast dHeight` in
    /// millimetres, a units row directly under the header, no time column.
    Lc,
    /// Reformatted files: `sec-past-eq n(cm) e(cm) u(cm)`.
    Reformatted,
}

impl InputFormat {
    /// Name of the time column, if the format carries one.
    pub fn time_column(&self) -> Option<&'static str> {
        match self {
            InputFormat::Lc => None,
            InputFormat::Reformatted => Some("sec-past-eq"),
        }
    }

    /// Names of the north, east and up columns, in that order.
    pub fn component_columns(&self) -> [&'static str; 3] {
        match self {
            InputFormat::Lc => ["dNorth", "dEast", "dHeight"],
            InputFormat::Reformatted => ["n(cm)", "e(cm)", "u(cm)"],
        }
    }

    /// 0-based line indices to skip, counted from the header line (the
    /// header is 0). Blank lines before the header are not counted, so the
    /// LC units row is skipped even when the file starts with blank lines.
    pub fn skip_lines(&self) -> &'static [usize] {
        match self {
            InputFormat::Lc => &[1],
            InputFormat::Reformatted => &[],
        }
    }

    /// Conversion factor from the file's displacement unit to metres.
    pub fn metres_per_unit(&self) -> f64 {
        match self {
            InputFormat::Lc => 0.001,
            InputFormat::Reformatted => 0.01,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Lc => write!(f, "LC"),
            InputFormat::Reformatted => write!(f, "reformatted"),
        }
    }
}

impl FromStr for InputFormat {
    type Err = QuakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lc" => Ok(InputFormat::Lc),
            "reformatted" => Ok(InputFormat::Reformatted),
            other => Err(QuakeError::Config(format!(
                "unknown input format '{}' (expected LC or reformatted)",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample tables
// ---------------------------------------------------------------------------

/// One row of a displacement time series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds relative to the event (or row position times the sample
    /// interval for formats without a time column).
    pub time: f64,
    pub north: f64,
    pub east: f64,
    pub up: f64,
}

impl Sample {
    pub fn components(&self) -> [f64; 3] {
        [self.north, self.east, self.up]
    }
}

/// A displacement time series loaded from one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTable {
    /// File the table was read from (display only).
    pub source: String,
    pub format: InputFormat,
    /// Column headers of the north, east and up components.
    pub component_names: [String; 3],
    /// Rows in file order.
    pub samples: Vec<Sample>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The three displacement components of every row.
    pub fn component_matrix(&self) -> Vec<[f64; 3]> {
        self.samples.iter().map(Sample::components).collect()
    }

    /// A copy with the first row's components subtracted from every row, so
    /// the series starts at zero. Timestamps are unchanged.
    pub fn normalised(&self) -> SampleTable {
        let origin = match self.samples.first() {
            Some(s) => *s,
            None => return self.clone(),
        };
        let samples = self
            .samples
            .iter()
            .map(|s| Sample {
                time: s.time,
                north: s.north - origin.north,
                east: s.east - origin.east,
                up: s.up - origin.up,
            })
            .collect();
        SampleTable {
            samples,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Displacement vectors
// ---------------------------------------------------------------------------

/// Relative movement between two time-ordered clusters, in the input unit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DisplacementVector {
    pub north: f64,
    pub east: f64,
    pub up: f64,
}

impl DisplacementVector {
    pub fn from_components(c: [f64; 3]) -> Self {
        DisplacementVector {
            north: c[0],
            east: c[1],
            up: c[2],
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.north * self.north + self.east * self.east + self.up * self.up).sqrt()
    }

    pub fn horizontal_magnitude(&self) -> f64 {
        self.north.hypot(self.east)
    }
}

impl Sub for DisplacementVector {
    type Output = DisplacementVector;

    fn sub(self, rhs: DisplacementVector) -> DisplacementVector {
        DisplacementVector {
            north: self.north - rhs.north,
            east: self.east - rhs.east,
            up: self.up - rhs.up,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the crate.
#[derive(Debug, thiserror::Error)]
pub enum QuakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-2xx HTTP response from the station directory.
    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing column '{0}' in header")]
    MissingColumn(String),

    #[error("No samples in {0}")]
    EmptyTable(String),

    #[error("Clustering failed: {0}")]
    Clustering(String),

    #[error("Unknown station: {0}")]
    UnknownStation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every item of a multi-file run failed.
    #[error("Batch failed: {0}")]
    Batch(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl From<quick_xml::Error> for QuakeError {
    fn from(e: quick_xml::Error) -> Self {
        QuakeError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for QuakeError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        QuakeError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_format_parses_case_insensitively() {
        assert_eq!("LC".parse::<InputFormat>().unwrap(), InputFormat::Lc);
        assert_eq!("lc".parse::<InputFormat>().unwrap(), InputFormat::Lc);
        assert_eq!(
            "Reformatted".parse::<InputFormat>().unwrap(),
            InputFormat::Reformatted
        );
        assert!("csv".parse::<InputFormat>().is_err());
    }

    #[test]
    fn test_normalised_table_starts_at_zero() {
        let table = SampleTable {
            source: "t".to_string(),
            format: InputFormat::Reformatted,
            component_names: ["n".into(), "e".into(), "u".into()],
            samples: vec![
                Sample { time: 0.0, north: 2.0, east: 3.0, up: -1.0 },
                Sample { time: 1.0, north: 4.0, east: 3.5, up: 0.0 },
            ],
        };
        let norm = table.normalised();
        assert_eq!(norm.samples[0].components(), [0.0, 0.0, 0.0]);
        assert_eq!(norm.samples[1].components(), [2.0, 0.5, 1.0]);
        assert_eq!(norm.samples[1].time, 1.0, "timestamps must be preserved");
    }

    #[test]
    fn test_displacement_vector_subtraction_and_magnitude() {
        let a = DisplacementVector { north: 5.0, east: 2.0, up: -1.0 };
        let b = DisplacementVector { north: 2.0, east: -2.0, up: -1.0 };
        let d = a - b;
        assert_eq!(d, DisplacementVector { north: 3.0, east: 4.0, up: 0.0 });
        assert_eq!(d.horizontal_magnitude(), 5.0);
        assert_eq!(d.magnitude(), 5.0);
    }

    #[test]
    fn test_batch_error_message() {
        let err = QuakeError::Batch("none of 3 input files could be processed".to_string());
        assert_eq!(err.to_string(), "Batch failed: none of 3 input files could be processed");
    }
}
