//! KML displacement animation.
//!
//! Each station gets a labelled point and two zero-length lines: one for
//! horizontal displacement and one for vertical displacement. A `gx:Tour`
//! then replays the time series as `gx:AnimatedUpdate` / `gx:Wait` pairs
//! that rewrite the line endpoints, so the vectors grow and shrink when the
//! tour is played in Google Earth. The vertical line switches between the
//! `up` and `down` styles as the sign of the vertical displacement changes.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::config::Config;
use crate::logging::{self, Source};
use crate::model::{QuakeError, Result, SampleTable, StationRecord};
use crate::render::projection::{UtmZone, offset_lonlat, utm_zone_for};

const KML_NS: &str = "http://www.opengis.net/kml/2.2";
const GX_NS: &str = "http://www.google.com/kml/ext/2.2";

const STYLE_STATION: &str = "station";
const STYLE_HORIZONTAL: &str = "horizontal";
const STYLE_UP: &str = "up";
const STYLE_DOWN: &str = "down";

/// How updates for several stations are laid out in the tour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationMode {
    /// Every row of one station, then the next station.
    Sequential,
    /// Row `i` of every station in one step. Google Earth runs the updates
    /// before a `gx:Wait` concurrently.
    Concurrent,
}

impl FromStr for AnimationMode {
    type Err = QuakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(AnimationMode::Sequential),
            "concurrent" => Ok(AnimationMode::Concurrent),
            other => Err(QuakeError::Config(format!(
                "unknown animation mode '{}' (expected sequential or concurrent)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KmlOptions {
    pub name: String,
    pub vector_elevation: f64,
    pub horizontal_scale: f64,
    pub vertical_scale: f64,
    pub icon_href: String,
    pub horizontal_color: String,
    pub up_color: String,
    pub down_color: String,
    pub line_width: f64,
    pub mode: AnimationMode,
    pub decimate: usize,
    /// Duration of each update and wait, seconds.
    pub step_secs: f64,
    pub zone: UtmZone,
}

impl KmlOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        let kml = &config.kml;
        Ok(Self {
            name: kml.name.clone(),
            vector_elevation: kml.vector_elevation,
            horizontal_scale: kml.horizontal_scale,
            vertical_scale: kml.vertical_scale,
            icon_href: kml.icon_href.clone(),
            horizontal_color: kml.horizontal_color.clone(),
            up_color: kml.up_color.clone(),
            down_color: kml.down_color.clone(),
            line_width: kml.line_width,
            mode: kml.mode.parse()?,
            decimate: kml.decimate.max(1),
            step_secs: config.input.sample_interval_secs,
            zone: UtmZone::new(config.projection.zone, config.projection.north),
        })
    }
}

/// Longitude, latitude, altitude.
pub type Coord = (f64, f64, f64);

/// Endpoints of both vectors for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub horizontal_end: Coord,
    pub vertical_end: Coord,
    pub up: bool,
}

struct StationTrack {
    record: StationRecord,
    origin: Coord,
    frames: Vec<Frame>,
}

impl StationTrack {
    fn horizontal_id(&self) -> String {
        format!("{}_h", self.record.code)
    }

    fn vertical_id(&self) -> String {
        format!("{}_v", self.record.code)
    }

    fn vertical_placemark_id(&self) -> String {
        format!("{}_vpm", self.record.code)
    }
}

/// Computes the animation frames for one station. The table is normalised
/// so the first row is the zero vector.
pub fn station_frames(record: &StationRecord, table: &SampleTable, options: &KmlOptions) -> Vec<Frame> {
    let metres = table.format.metres_per_unit();
    let normalised = table.normalised();

    normalised
        .samples
        .iter()
        .step_by(options.decimate.max(1))
        .map(|s| {
            let east_m = s.east * metres * options.horizontal_scale;
            let north_m = s.north * metres * options.horizontal_scale;
            let (lon, lat) = offset_lonlat(record.longitude, record.latitude, east_m, north_m, options.zone);
            let up_m = s.up * metres * options.vertical_scale;
            Frame {
                horizontal_end: (lon, lat, options.vector_elevation),
                vertical_end: (
                    record.longitude,
                    record.latitude,
                    options.vector_elevation + up_m,
                ),
                up: s.up >= 0.0,
            }
        })
        .collect()
}

fn format_coord(c: Coord) -> String {
    format!("{:.7},{:.7},{:.2}", c.0, c.1, c.2)
}

fn format_line(start: Coord, end: Coord) -> String {
    format!("{} {}", format_coord(start), format_coord(end))
}

fn format_number(v: f64) -> String {
    // KML readers are happiest without exponents
    let s = format!("{:.6}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" { "0".to_string() } else { s.to_string() }
}

/// The station's own UTM zone when it differs from the document's zone.
/// Vectors still draw, but grid north drifts from true north away from the
/// zone's central meridian.
pub fn zone_mismatch(record: &StationRecord, zone: UtmZone) -> Option<UtmZone> {
    let own = utm_zone_for(record.longitude, record.latitude);
    (own != zone).then_some(own)
}

/// Builds the animated displacement document.
pub struct KmlBuilder {
    options: KmlOptions,
    tracks: Vec<StationTrack>,
}

impl KmlBuilder {
    pub fn new(options: KmlOptions) -> Self {
        Self {
            options,
            tracks: Vec::new(),
        }
    }

    /// Adds a station and its displacement series.
    pub fn add_station(&mut self, record: &StationRecord, table: &SampleTable) {
        if let Some(own) = zone_mismatch(record, self.options.zone) {
            logging::warn(
                Source::Kml,
                Some(&record.code),
                &format!(
                    "station lies in UTM zone {}{} but the document uses zone {}{}",
                    own.zone,
                    if own.north { "N" } else { "S" },
                    self.options.zone.zone,
                    if self.options.zone.north { "N" } else { "S" }
                ),
            );
        }
        let frames = station_frames(record, table, &self.options);
        logging::debug(
            Source::Kml,
            Some(&record.code),
            &format!("{} animation frames from {} rows", frames.len(), table.len()),
        );
        self.tracks.push(StationTrack {
            record: record.clone(),
            origin: (record.longitude, record.latitude, self.options.vector_elevation),
            frames,
        });
    }

    pub fn station_count(&self) -> usize {
        self.tracks.len()
    }

    /// Serialises the document.
    pub fn to_kml_string(&self) -> Result<String> {
        let mut out = XmlOut::new();
        out.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        out.start("kml", &[("xmlns", KML_NS), ("xmlns:gx", GX_NS)])?;
        out.start("Document", &[])?;
        out.text_element("name", &self.options.name)?;
        out.text_element("open", "1")?;

        self.write_styles(&mut out)?;
        for track in &self.tracks {
            self.write_station(&mut out, track)?;
        }
        self.write_tour(&mut out)?;

        out.end("Document")?;
        out.end("kml")?;
        out.into_string()
    }

    /// Writes a `.kml` file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let kml = self.to_kml_string()?;
        std::fs::write(path, kml)?;
        logging::info(
            Source::Kml,
            None,
            &format!("Wrote {} stations to {}", self.tracks.len(), path.display()),
        );
        Ok(())
    }

    /// Writes a `.kmz` archive holding the document as `doc.kml`.
    pub fn save_kmz(&self, path: &Path) -> Result<()> {
        let kml = self.to_kml_string()?;
        let file = File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        zip.start_file("doc.kml", options)?;
        zip.write_all(kml.as_bytes())?;
        zip.finish()?;
        logging::info(
            Source::Kml,
            None,
            &format!("Wrote {} stations to {}", self.tracks.len(), path.display()),
        );
        Ok(())
    }

    fn write_styles(&self, out: &mut XmlOut) -> Result<()> {
        out.start("Style", &[("id", STYLE_STATION)])?;
        out.start("IconStyle", &[])?;
        out.text_element("scale", "1.0")?;
        out.start("Icon", &[])?;
        out.text_element("href", &self.options.icon_href)?;
        out.end("Icon")?;
        out.end("IconStyle")?;
        out.end("Style")?;

        let width = format_number(self.options.line_width);
        for (id, color) in [
            (STYLE_HORIZONTAL, &self.options.horizontal_color),
            (STYLE_UP, &self.options.up_color),
            (STYLE_DOWN, &self.options.down_color),
        ] {
            out.start("Style", &[("id", id)])?;
            out.start("LineStyle", &[])?;
            out.text_element("color", color)?;
            out.text_element("width", &width)?;
            out.end("LineStyle")?;
            out.end("Style")?;
        }
        Ok(())
    }

    fn write_station(&self, out: &mut XmlOut, track: &StationTrack) -> Result<()> {
        let code = &track.record.code;
        let origin = format_coord(track.origin);

        out.start("Placemark", &[("id", code.as_str())])?;
        out.text_element("name", code)?;
        if !track.record.name.is_empty() {
            out.text_element("description", &track.record.name)?;
        }
        out.text_element("styleUrl", &format!("#{}", STYLE_STATION))?;
        out.start("Point", &[])?;
        out.text_element("altitudeMode", "relativeToGround")?;
        out.text_element("coordinates", &origin)?;
        out.end("Point")?;
        out.end("Placemark")?;

        let zero_line = format_line(track.origin, track.origin);

        let horizontal_pm = format!("{}_hpm", code);
        out.start("Placemark", &[("id", horizontal_pm.as_str())])?;
        out.text_element("name", &format!("{} horizontal", code))?;
        out.text_element("styleUrl", &format!("#{}", STYLE_HORIZONTAL))?;
        self.write_line(out, &track.horizontal_id(), &zero_line)?;
        out.end("Placemark")?;

        let vertical_pm = track.vertical_placemark_id();
        out.start("Placemark", &[("id", vertical_pm.as_str())])?;
        out.text_element("name", &format!("{} vertical", code))?;
        out.text_element("styleUrl", &format!("#{}", STYLE_UP))?;
        self.write_line(out, &track.vertical_id(), &zero_line)?;
        out.end("Placemark")?;
        Ok(())
    }

    fn write_line(&self, out: &mut XmlOut, id: &str, coordinates: &str) -> Result<()> {
        out.start("LineString", &[("id", id)])?;
        out.text_element("tessellate", "1")?;
        out.text_element("altitudeMode", "relativeToGround")?;
        out.text_element("coordinates", coordinates)?;
        out.end("LineString")
    }

    fn write_tour(&self, out: &mut XmlOut) -> Result<()> {
        out.start("gx:Tour", &[])?;
        out.text_element("name", "Play displacement animation")?;
        out.start("gx:Playlist", &[])?;

        // style each vertical line currently shows
        let mut showing_up = vec![true; self.tracks.len()];

        match self.options.mode {
            AnimationMode::Sequential => {
                for (t, track) in self.tracks.iter().enumerate() {
                    for frame in &track.frames {
                        self.write_update(out, &[(track, frame)], &mut showing_up[t..=t])?;
                        self.write_wait(out)?;
                    }
                    self.write_wait(out)?;
                }
            }
            AnimationMode::Concurrent => {
                let rows = self.tracks.iter().map(|t| t.frames.len()).max().unwrap_or(0);
                for row in 0..rows {
                    for (t, track) in self.tracks.iter().enumerate() {
                        if let Some(frame) = track.frames.get(row) {
                            self.write_update(out, &[(track, frame)], &mut showing_up[t..=t])?;
                        }
                    }
                    self.write_wait(out)?;
                }
                self.write_wait(out)?;
            }
        }

        out.end("gx:Playlist")?;
        out.end("gx:Tour")
    }

    fn write_update(
        &self,
        out: &mut XmlOut,
        steps: &[(&StationTrack, &Frame)],
        showing_up: &mut [bool],
    ) -> Result<()> {
        out.start("gx:AnimatedUpdate", &[])?;
        out.text_element("gx:duration", &format_number(self.options.step_secs))?;
        out.start("Update", &[])?;
        out.empty("targetHref")?;
        out.start("Change", &[])?;

        for ((track, frame), shown) in steps.iter().zip(showing_up.iter_mut()) {
            let horizontal_id = track.horizontal_id();
            out.start("LineString", &[("targetId", horizontal_id.as_str())])?;
            out.text_element("coordinates", &format_line(track.origin, frame.horizontal_end))?;
            out.end("LineString")?;

            let vertical_id = track.vertical_id();
            out.start("LineString", &[("targetId", vertical_id.as_str())])?;
            out.text_element("coordinates", &format_line(track.origin, frame.vertical_end))?;
            out.end("LineString")?;

            if frame.up != *shown {
                let style = if frame.up { STYLE_UP } else { STYLE_DOWN };
                let vertical_pm = track.vertical_placemark_id();
                out.start("Placemark", &[("targetId", vertical_pm.as_str())])?;
                out.text_element("styleUrl", &format!("#{}", style))?;
                out.end("Placemark")?;
                *shown = frame.up;
            }
        }

        out.end("Change")?;
        out.end("Update")?;
        out.end("gx:AnimatedUpdate")
    }

    fn write_wait(&self, out: &mut XmlOut) -> Result<()> {
        out.start("gx:Wait", &[])?;
        out.text_element("gx:duration", &format_number(self.options.step_secs))?;
        out.end("gx:Wait")
    }
}

/// Thin wrapper over the quick-xml event writer.
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let mut element = BytesStart::new(name);
        for &attr in attrs {
            element.push_attribute(attr);
        }
        self.writer.write_event(Event::Start(element))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::Empty(BytesStart::new(name)))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.start(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn into_string(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| QuakeError::Xml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputFormat, Sample};
    use approx::assert_abs_diff_eq;

    fn kaik() -> StationRecord {
        StationRecord {
            code: "KAIK".to_string(),
            network: "LI".to_string(),
            name: "Kaikoura".to_string(),
            latitude: -42.4255,
            longitude: 173.5337,
            opened: String::new(),
        }
    }

    fn options() -> KmlOptions {
        KmlOptions::from_config(&Config::default()).unwrap()
    }

    /// LC table (millimetres): starts at an offset, moves 1 m north-east and
    /// drops 100 mm.
    fn lc_table() -> SampleTable {
        SampleTable {
            source: "gps.2016.kaik.LC".to_string(),
            format: InputFormat::Lc,
            component_names: ["dNorth".into(), "dEast".into(), "dHeight".into()],
            samples: vec![
                Sample { time: 0.0, north: 10.0, east: 20.0, up: 5.0 },
                Sample { time: 0.1, north: 510.0, east: 520.0, up: 55.0 },
                Sample { time: 0.2, north: 1010.0, east: 1020.0, up: -95.0 },
            ],
        }
    }

    #[test]
    fn test_first_frame_is_zero_length() {
        let opts = options();
        let frames = station_frames(&kaik(), &lc_table(), &opts);
        assert_eq!(frames.len(), 3);
        let (lon, lat, alt) = frames[0].horizontal_end;
        assert_abs_diff_eq!(lon, 173.5337, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, -42.4255, epsilon = 1e-7);
        assert_eq!(alt, opts.vector_elevation);
        assert_eq!(frames[0].vertical_end.2, opts.vector_elevation);
    }

    #[test]
    fn test_frames_move_north_east_and_track_vertical_sign() {
        let opts = options();
        let frames = station_frames(&kaik(), &lc_table(), &opts);
        let last = frames[2];
        assert!(last.horizontal_end.0 > 173.5337, "moved east");
        assert!(last.horizontal_end.1 > -42.4255, "moved north");
        // -100 mm, scaled x1000 -> 100 m below the vector elevation
        assert_abs_diff_eq!(last.vertical_end.2, opts.vector_elevation - 100.0, epsilon = 1e-9);
        assert!(!last.up);
        assert!(frames[1].up);
    }

    #[test]
    fn test_decimation_keeps_every_nth_row() {
        let mut opts = options();
        opts.decimate = 2;
        let frames = station_frames(&kaik(), &lc_table(), &opts);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_document_structure() {
        let mut builder = KmlBuilder::new(options());
        builder.add_station(&kaik(), &lc_table());
        let kml = builder.to_kml_string().unwrap();

        assert!(kml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(kml.contains(r#"xmlns:gx="http://www.google.com/kml/ext/2.2""#));
        assert!(kml.contains(r#"<Placemark id="KAIK">"#));
        assert!(kml.contains(r#"<LineString id="KAIK_h">"#));
        assert!(kml.contains(r#"<LineString id="KAIK_v">"#));
        assert_eq!(kml.matches("<gx:AnimatedUpdate>").count(), 3);
        // one wait per row plus one after the station
        assert_eq!(kml.matches("<gx:Wait>").count(), 4);
        assert!(kml.contains("<gx:duration>0.1</gx:duration>"));
    }

    #[test]
    fn test_vertical_style_switches_once_when_going_down() {
        let mut builder = KmlBuilder::new(options());
        builder.add_station(&kaik(), &lc_table());
        let kml = builder.to_kml_string().unwrap();
        assert_eq!(kml.matches(r#"<Placemark targetId="KAIK_vpm">"#).count(), 1);
        assert!(kml.contains("<styleUrl>#down</styleUrl>"));
    }

    #[test]
    fn test_concurrent_mode_shares_waits() {
        let mut opts = options();
        opts.mode = AnimationMode::Concurrent;
        let mut builder = KmlBuilder::new(opts);
        let mut hanm = kaik();
        hanm.code = "HANM".to_string();
        builder.add_station(&kaik(), &lc_table());
        builder.add_station(&hanm, &lc_table());
        let kml = builder.to_kml_string().unwrap();

        assert_eq!(kml.matches("<gx:AnimatedUpdate>").count(), 6);
        assert_eq!(kml.matches("<gx:Wait>").count(), 4);
    }

    #[test]
    fn test_station_names_are_escaped() {
        let mut station = kaik();
        station.name = "Kaikoura <peninsula> & co".to_string();
        let mut builder = KmlBuilder::new(options());
        builder.add_station(&station, &lc_table());
        let kml = builder.to_kml_string().unwrap();
        assert!(kml.contains("Kaikoura &lt;peninsula&gt; &amp; co"));
    }

    #[test]
    fn test_animation_mode_parse() {
        assert_eq!("Concurrent".parse::<AnimationMode>().unwrap(), AnimationMode::Concurrent);
        assert!("parallel".parse::<AnimationMode>().is_err());
    }

    #[test]
    fn test_zone_mismatch_flags_stations_outside_document_zone() {
        assert_eq!(zone_mismatch(&kaik(), UtmZone::new(59, false)), None);
        assert_eq!(zone_mismatch(&kaik(), UtmZone::new(60, false)), Some(UtmZone::new(59, false)));

        let mut chatham = kaik();
        chatham.longitude = -176.5;
        chatham.latitude = -43.95;
        assert_eq!(zone_mismatch(&chatham, UtmZone::new(59, false)), Some(UtmZone::new(1, false)));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0000001), "0");
        // the shortest sample interval config accepts must survive
        assert_eq!(format_number(crate::config::MIN_SAMPLE_INTERVAL_SECS), "0.001");
        assert_eq!(format_number(0.0025), "0.0025");
    }
}
