//! GeoNet delta directory client
//!
//! Retrieves continuous GPS site metadata (code, network, name, position,
//! opening date) from the GeoNet delta web service. The service answers
//! with an XML document whose site elements carry everything as attributes.
//!
//! Service: http://magma.geonet.org.nz/ws-delta/site?type=cgps

use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::logging::{self, Source};
use crate::model::{QuakeError, Result, StationRecord};
use crate::stations::StationDirectory;

/// Builds the site listing URL for a site type (`cgps` for continuous GPS).
pub fn build_sites_url(base_url: &str, site_type: &str) -> String {
    format!("{}/site?type={}", base_url.trim_end_matches('/'), site_type)
}

/// Blocking client with the given request timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch and parse the site directory. One request, no retry.
pub fn fetch_stations(client: &reqwest::blocking::Client, url: &str) -> Result<StationDirectory> {
    logging::info(Source::Delta, None, &format!("Fetching station directory from {}", url));

    let response = client
        .get(url)
        .header("Accept", "application/xml")
        .send()?;

    if !response.status().is_success() {
        return Err(QuakeError::Http(response.status().as_u16()));
    }

    let text = response.text()?;
    let directory = parse_sites_xml(&text)?;

    logging::info(
        Source::Delta,
        None,
        &format!("Received {} stations", directory.len()),
    );
    Ok(directory)
}

/// Parse a delta site listing.
///
/// Every element with a `code` attribute is a site. Coordinates may be given
/// as `latitude`/`longitude` or `lat`/`lon`.
pub fn parse_sites_xml(text: &str) -> Result<StationDirectory> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut directory = StationDirectory::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                if let Some(record) = parse_site(&e)? {
                    directory.insert(record);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(directory)
}

fn parse_site(element: &BytesStart<'_>) -> Result<Option<StationRecord>> {
    let mut code = None;
    let mut network = String::new();
    let mut name = String::new();
    let mut opened = String::new();
    let mut latitude = None;
    let mut longitude = None;

    for attr in element.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.to_string();
        match attr.key.as_ref() {
            b"code" => code = Some(value),
            b"network" => network = value,
            b"name" => name = value,
            b"opened" => opened = value,
            b"latitude" | b"lat" => latitude = Some(value),
            b"longitude" | b"lon" => longitude = Some(value),
            _ => {}
        }
    }

    let Some(code) = code else {
        return Ok(None);
    };

    let latitude = parse_coordinate(&code, "latitude", latitude)?;
    let longitude = parse_coordinate(&code, "longitude", longitude)?;

    Ok(Some(StationRecord {
        code,
        network,
        name,
        latitude,
        longitude,
        opened,
    }))
}

fn parse_coordinate(code: &str, what: &str, value: Option<String>) -> Result<f64> {
    let value = value.ok_or_else(|| {
        QuakeError::Xml(format!("site {} has no {}", code, what))
    })?;
    value.trim().parse::<f64>().map_err(|_| {
        QuakeError::Xml(format!("site {} has invalid {} '{}'", code, what, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sites>
  <site code="KAIK" network="LI" name="Kaikoura" latitude="-42.4255" longitude="173.5337" opened="2001-01-01T00:00:00Z"/>
  <site code="HANM" network="LI" name="Hanmer Springs" lat="-42.5536" lon="172.8117" opened="2001-05-08T00:00:00Z"></site>
  <site code="MRBL" network="LI" name="Marble &amp; Quarry" latitude="-42.0538" longitude="172.7069" opened="2000-11-29T00:00:00Z"/>
</sites>"#;

    #[test]
    fn test_build_sites_url() {
        assert_eq!(
            build_sites_url("http://magma.geonet.org.nz/ws-delta/", "cgps"),
            "http://magma.geonet.org.nz/ws-delta/site?type=cgps"
        );
    }

    #[test]
    fn test_parse_sites_reads_all_attributes() {
        let directory = parse_sites_xml(SAMPLE).expect("sample XML should parse");
        assert_eq!(directory.len(), 3);

        let kaik = directory.get("KAIK").expect("KAIK present");
        assert_eq!(kaik.network, "LI");
        assert_eq!(kaik.name, "Kaikoura");
        assert_eq!(kaik.latitude, -42.4255);
        assert_eq!(kaik.longitude, 173.5337);
        assert_eq!(kaik.opened, "2001-01-01T00:00:00Z");
    }

    #[test]
    fn test_parse_sites_accepts_short_coordinate_names() {
        let directory = parse_sites_xml(SAMPLE).unwrap();
        let hanm = directory.get("HANM").unwrap();
        assert_eq!(hanm.longitude, 172.8117);
        assert_eq!(hanm.latitude, -42.5536);
    }

    #[test]
    fn test_parse_sites_unescapes_values() {
        let directory = parse_sites_xml(SAMPLE).unwrap();
        assert_eq!(directory.get("MRBL").unwrap().name, "Marble & Quarry");
    }

    #[test]
    fn test_invalid_coordinate_is_error() {
        let xml = r#"<sites><site code="BAD" latitude="north" longitude="1.0"/></sites>"#;
        assert!(matches!(parse_sites_xml(xml), Err(QuakeError::Xml(_))));
    }

    #[test]
    fn test_malformed_document_is_error() {
        let xml = r#"<sites><site code="KAIK" latitude="1" longitude="2"></sites>"#;
        assert!(parse_sites_xml(xml).is_err());
    }

    // Network test, run with: cargo test -- --ignored delta_api
    #[test]
    #[ignore] // Don't run in CI - depends on external API
    fn delta_api_lists_kaikoura() {
        let client = build_client(30).unwrap();
        let url = build_sites_url(crate::config::DEFAULT_DELTA_URL, "cgps");
        let directory = fetch_stations(&client, &url).expect("delta service reachable");
        assert!(directory.get("KAIK").is_some(), "KAIK should be a cgps site");
    }
}
