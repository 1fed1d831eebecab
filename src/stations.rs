//! Station directory for the Kaikoura displacement tools.
//!
//! Holds the GPS site records fetched from GeoNet delta, keyed by
//! station code, plus the helpers that tie input files to stations.
//! The directory can be cached to a local JSON file so repeated runs
//! do not hit the web service.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DeltaConfig;
use crate::ingest::delta;
use crate::logging::{self, Source};
use crate::model::{QuakeError, Result, StationRecord};

// ---------------------------------------------------------------------------
// Study region
// ---------------------------------------------------------------------------

/// Stations around the 14 Nov 2016 Kaikoura rupture.
pub static STUDY_REGION_STATIONS: &[&str] = &[
    "CMBL", "HANM", "HOKI", "KAIK", "MAHA", "MRBL", "WITH", "YALD",
];

/// Lon/lat bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Region {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

/// Upper South Island, NZ.
pub const STUDY_REGION: Region = Region {
    min_lon: 170.0,
    min_lat: -46.0,
    max_lon: 177.0,
    max_lat: -39.0,
};

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Station records keyed by code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationDirectory {
    stations: BTreeMap<String, StationRecord>,
}

impl StationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. A later record with the same code replaces the earlier one.
    pub fn insert(&mut self, record: StationRecord) {
        self.stations.insert(record.code.clone(), record);
    }

    pub fn get(&self, code: &str) -> Option<&StationRecord> {
        self.stations.get(code)
    }

    /// Like `get`, but a missing station is an error.
    pub fn require(&self, code: &str) -> Result<&StationRecord> {
        self.get(code)
            .ok_or_else(|| QuakeError::UnknownStation(code.to_string()))
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.stations.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationRecord> {
        self.stations.values()
    }
}

impl FromIterator<StationRecord> for StationDirectory {
    fn from_iter<I: IntoIterator<Item = StationRecord>>(iter: I) -> Self {
        let mut directory = StationDirectory::new();
        for record in iter {
            directory.insert(record);
        }
        directory
    }
}

// ---------------------------------------------------------------------------
// File name → station code
// ---------------------------------------------------------------------------

/// Derives a station code from an input file name.
///
/// The file name is split on `.` and segment `segment` is upper-cased, so
/// `gps.2016.kaik.LC` with segment 2 gives `KAIK`.
pub fn station_code_from_path(path: &Path, segment: usize) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| QuakeError::UnknownStation(path.display().to_string()))?;

    file_name
        .split('.')
        .nth(segment)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
        .ok_or_else(|| {
            QuakeError::UnknownStation(format!(
                "no station code at segment {} of '{}'",
                segment, file_name
            ))
        })
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CachedDirectory {
    fetched_at: DateTime<Utc>,
    directory: StationDirectory,
}

/// Writes the directory to a JSON cache file, stamped with `now`.
pub fn save_cache(path: &Path, directory: &StationDirectory, now: DateTime<Utc>) -> Result<()> {
    let cached = CachedDirectory {
        fetched_at: now,
        directory: directory.clone(),
    };
    let json = serde_json::to_string_pretty(&cached)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads a cache file. Returns `None` if it is missing or older than
/// `max_age_hours` relative to `now`.
pub fn load_cache(
    path: &Path,
    max_age_hours: i64,
    now: DateTime<Utc>,
) -> Result<Option<StationDirectory>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let cached: CachedDirectory = serde_json::from_str(&text)?;

    if now - cached.fetched_at > Duration::hours(max_age_hours) {
        logging::debug(
            Source::Delta,
            None,
            &format!("Cache {} is stale (fetched {})", path.display(), cached.fetched_at),
        );
        return Ok(None);
    }
    Ok(Some(cached.directory))
}

/// Returns the station directory, from the cache when configured and fresh,
/// otherwise from the delta service (refreshing the cache).
pub fn load_or_fetch(config: &DeltaConfig, refresh: bool) -> Result<StationDirectory> {
    let now = Utc::now();

    if let (Some(path), false) = (&config.cache_path, refresh) {
        match load_cache(path, config.cache_max_age_hours, now) {
            Ok(Some(directory)) => {
                logging::info(
                    Source::Delta,
                    None,
                    &format!("Loaded {} stations from {}", directory.len(), path.display()),
                );
                return Ok(directory);
            }
            Ok(None) => {}
            Err(e) => logging::warn(
                Source::Delta,
                None,
                &format!("Ignoring unreadable cache {}: {}", path.display(), e),
            ),
        }
    }

    let client = delta::build_client(config.timeout_secs)?;
    let url = delta::build_sites_url(&config.base_url, &config.site_type);
    let directory = delta::fetch_stations(&client, &url)?;

    if let Some(path) = &config.cache_path {
        match save_cache(path, &directory, now) {
            Ok(()) => logging::debug(Source::Delta, None, &format!("Cached stations to {}", path.display())),
            Err(e) => logging::warn(
                Source::Delta,
                None,
                &format!("Could not write cache {}: {}", path.display(), e),
            ),
        }
    }

    Ok(directory)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(code: &str, lon: f64, lat: f64) -> StationRecord {
        StationRecord {
            code: code.to_string(),
            network: "LI".to_string(),
            name: format!("{} site", code),
            latitude: lat,
            longitude: lon,
            opened: "2001-01-01T00:00:00Z".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 11, 14, 11, 2, 56).unwrap()
    }

    #[test]
    fn test_station_code_from_lc_file_name() {
        let code = station_code_from_path(Path::new("data/gps.2016.kaik.LC"), 2).unwrap();
        assert_eq!(code, "KAIK");
    }

    #[test]
    fn test_station_code_missing_segment_is_error() {
        let err = station_code_from_path(Path::new("kaik.LC"), 2).unwrap_err();
        assert!(matches!(err, QuakeError::UnknownStation(_)));
    }

    #[test]
    fn test_require_unknown_station() {
        let directory: StationDirectory = vec![record("KAIK", 173.53, -42.43)].into_iter().collect();
        assert!(directory.require("KAIK").is_ok());
        assert!(matches!(
            directory.require("ZZZZ"),
            Err(QuakeError::UnknownStation(code)) if code == "ZZZZ"
        ));
    }

    #[test]
    fn test_later_duplicate_replaces_earlier() {
        let directory: StationDirectory = vec![
            record("KAIK", 173.0, -42.0),
            record("KAIK", 173.53, -42.43),
        ]
        .into_iter()
        .collect();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get("KAIK").unwrap().longitude, 173.53);
    }

    #[test]
    fn test_no_duplicate_study_region_codes() {
        let mut seen = std::collections::HashSet::new();
        for code in STUDY_REGION_STATIONS {
            assert!(seen.insert(code), "duplicate station code {}", code);
            assert_eq!(code.len(), 4, "GeoNet cGPS codes are four characters");
        }
    }

    #[test]
    fn test_study_region_contains_kaikoura() {
        assert!(STUDY_REGION.contains(173.53, -42.43));
        assert!(!STUDY_REGION.contains(174.78, -36.85), "Auckland is outside");
    }

    #[test]
    fn test_cache_round_trip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.json");
        let directory: StationDirectory = vec![record("HANM", 172.81, -42.55)].into_iter().collect();

        save_cache(&path, &directory, fixed_now()).unwrap();

        let fresh = load_cache(&path, 24, fixed_now() + Duration::hours(2)).unwrap();
        assert_eq!(fresh, Some(directory));

        let stale = load_cache(&path, 24, fixed_now() + Duration::hours(25)).unwrap();
        assert_eq!(stale, None, "cache older than max age should be ignored");
    }

    #[test]
    fn test_missing_cache_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_cache(&dir.path().join("nope.json"), 24, fixed_now()).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_fresh_cache_avoids_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.json");
        let directory: StationDirectory = vec![record("KAIK", 173.53, -42.43)].into_iter().collect();
        save_cache(&path, &directory, Utc::now()).unwrap();

        let config = DeltaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            cache_path: Some(path),
            ..DeltaConfig::default()
        };
        let loaded = load_or_fetch(&config, false).expect("fresh cache should be used");
        assert_eq!(loaded.codes(), vec!["KAIK"]);
    }

    /// Serves one HTTP response with `body`, returning the base URL.
    fn serve_once(body: &'static str) -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_unwritable_cache_keeps_fetched_directory() {
        let base_url = serve_once(
            r#"<sites><site code="KAIK" network="LI" name="Kaikoura" latitude="-42.4255" longitude="173.5337"/></sites>"#,
        );
        let dir = tempfile::tempdir().unwrap();
        let config = DeltaConfig {
            base_url,
            timeout_secs: 5,
            cache_path: Some(dir.path().join("missing_dir").join("stations.json")),
            ..DeltaConfig::default()
        };

        let loaded = load_or_fetch(&config, true).expect("fetch should succeed even if the cache cannot be written");
        assert_eq!(loaded.codes(), vec!["KAIK"]);
    }
}
