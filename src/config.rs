//! Runtime configuration.
//!
//! Settings come from an optional TOML file (`quake.toml` by default, or the
//! path in `QUAKE_CONFIG`), then a handful of environment overrides, which
//! may themselves come from a `.env` file. Every field has a default so the
//! tools run with no configuration at all.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::logging::LogLevel;
use crate::model::{QuakeError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "quake.toml";

/// GeoNet delta directory service for continuous GPS sites.
pub const DEFAULT_DELTA_URL: &str = "http://magma.geonet.org.nz/ws-delta";

/// Shortest accepted sample interval. Tour durations are written with
/// limited precision, so much shorter steps would print as zero.
pub const MIN_SAMPLE_INTERVAL_SECS: f64 = 0.001;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delta: DeltaConfig,
    pub input: InputConfig,
    pub kml: KmlConfig,
    pub projection: ProjectionConfig,
    pub plot: PlotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub base_url: String,
    /// Site type filter passed to the directory (`cgps` = continuous GPS).
    pub site_type: String,
    pub timeout_secs: u64,
    /// Local copy of the station directory. `None` disables caching.
    pub cache_path: Option<PathBuf>,
    pub cache_max_age_hours: i64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DELTA_URL.to_string(),
            site_type: "cgps".to_string(),
            timeout_secs: 30,
            cache_path: None,
            cache_max_age_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Seconds between rows for formats without a time column.
    pub sample_interval_secs: f64,
    /// Which `.`-separated file name segment holds the station code.
    pub station_segment: usize,
    /// Pattern used by `quake kml` when no files are given.
    pub default_glob: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 0.1,
            station_segment: 2,
            default_glob: "*.LC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KmlConfig {
    pub name: String,
    /// Altitude, metres above ground, at which vectors are drawn.
    pub vector_elevation: f64,
    /// Exaggeration applied to horizontal displacement (after unit conversion).
    pub horizontal_scale: f64,
    /// Exaggeration applied to vertical displacement.
    pub vertical_scale: f64,
    pub icon_href: String,
    /// KML colours are aabbggrr.
    pub horizontal_color: String,
    pub up_color: String,
    pub down_color: String,
    pub line_width: f64,
    /// `sequential` or `concurrent`.
    pub mode: String,
    /// Keep every n-th row in the animation (1 keeps all).
    pub decimate: usize,
}

impl Default for KmlConfig {
    fn default() -> Self {
        Self {
            name: "GPS Sensor displacement for Kaikoura Earthquake 14 Nov 2016".to_string(),
            vector_elevation: 1000.0,
            horizontal_scale: 1000.0,
            vertical_scale: 1000.0,
            icon_href: "http://maps.google.com/mapfiles/kml/paddle/red-stars-lv.png".to_string(),
            horizontal_color: "ffffffff".to_string(),
            up_color: "ff0000ff".to_string(),
            down_color: "ffff0000".to_string(),
            line_width: 5.0,
            mode: "sequential".to_string(),
            decimate: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub zone: u32,
    pub north: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        // Kaikoura, NZ: UTM 59S
        Self { zone: 59, north: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self { width: 1600, height: 900 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            timestamps: false,
        }
    }
}

impl LoggingConfig {
    pub fn min_level(&self) -> Result<LogLevel> {
        self.level.parse().map_err(QuakeError::Config)
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Config> {
        toml::from_str(text).map_err(|e| QuakeError::Config(e.to_string()))
    }

    /// Read a TOML file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Resolve the configuration for a run.
    ///
    /// An explicit path must exist. Without one, `QUAKE_CONFIG` is used if
    /// set, then `quake.toml` if present, then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Config> {
        dotenv::dotenv().ok();

        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match env::var("QUAKE_CONFIG") {
                Ok(path) => Self::load(Path::new(&path))?,
                Err(_) if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                    Self::load(Path::new(DEFAULT_CONFIG_FILE))?
                }
                Err(_) => Config::default(),
            },
        };

        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("QUAKE_DELTA_URL") {
            self.delta.base_url = url;
        }
        if let Some(level) = lookup("QUAKE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = lookup("QUAKE_LOG_FILE") {
            self.logging.file = Some(file);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.input.sample_interval_secs >= MIN_SAMPLE_INTERVAL_SECS) {
            return Err(QuakeError::Config(format!(
                "input.sample_interval_secs must be at least {}",
                MIN_SAMPLE_INTERVAL_SECS
            )));
        }
        if self.kml.decimate == 0 {
            return Err(QuakeError::Config("kml.decimate must be at least 1".into()));
        }
        if !(1..=60).contains(&self.projection.zone) {
            return Err(QuakeError::Config(format!(
                "projection.zone {} is outside 1..=60",
                self.projection.zone
            )));
        }
        self.logging.min_level()?;
        Ok(())
    }
}
