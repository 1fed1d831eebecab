//! Plot rendering with plotters.
//!
//! `plot_estimate` draws the three raw displacement components against time
//! with each cluster's mean overlaid as a flat segment across the cluster's
//! time span, so the fit can be checked by eye. `plot_station_map` scatters
//! station positions over the study region. Output is SVG.

use std::path::Path;

use plotters::prelude::*;

use crate::analysis::displacement::DisplacementEstimate;
use crate::logging::{self, Source};
use crate::model::{QuakeError, Result};
use crate::stations::{Region, StationDirectory};

/// North, east, up.
const COMPONENT_COLORS: [RGBColor; 3] = [
    RGBColor(228, 26, 28),
    RGBColor(55, 126, 184),
    RGBColor(77, 175, 74),
];

fn render_err<E: std::fmt::Display>(e: E) -> QuakeError {
    QuakeError::Render(e.to_string())
}

fn font(size: f64) -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, size, FontStyle::Normal)
}

/// Value range with a little padding; never empty.
fn padded_range(min: f64, max: f64) -> (f64, f64) {
    if !min.is_finite() || !max.is_finite() {
        return (-1.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0, max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

/// Time span `(first, last)` of each cluster's rows, indexed by cluster id.
fn cluster_spans(estimate: &DisplacementEstimate) -> Vec<Option<(f64, f64)>> {
    let k = estimate
        .clusters
        .iter()
        .map(|c| c.cluster_id + 1)
        .max()
        .unwrap_or(0);
    let mut spans: Vec<Option<(f64, f64)>> = vec![None; k];
    for row in &estimate.table.rows {
        let t = row.sample.time;
        let span = &mut spans[row.cluster_id];
        *span = Some(match *span {
            Some((lo, hi)) => (lo.min(t), hi.max(t)),
            None => (t, t),
        });
    }
    spans
}

/// Draw raw components and cluster means to an SVG file.
pub fn plot_estimate(path: &Path, estimate: &DisplacementEstimate, title: &str, size: (u32, u32)) -> Result<()> {
    let rows = &estimate.table.rows;
    if rows.is_empty() {
        return Err(QuakeError::Render(format!(
            "nothing to plot for {}",
            estimate.table.source
        )));
    }

    let (t_min, t_max) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
        (lo.min(r.sample.time), hi.max(r.sample.time))
    });
    let (v_min, v_max) = rows.iter().fold((f64::MAX, f64::MIN), |(lo, hi), r| {
        r.sample
            .components()
            .iter()
            .fold((lo, hi), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
    });
    let (x_lo, x_hi) = padded_range(t_min, t_max);
    let (y_lo, y_hi) = padded_range(v_min, v_max);

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, font(16.0))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc("time (s)")
        .y_desc("displacement")
        .label_style(font(12.0))
        .draw()
        .map_err(render_err)?;

    let spans = cluster_spans(estimate);

    for (c, name) in estimate.table.component_names.iter().enumerate() {
        let color = COMPONENT_COLORS[c];

        chart
            .draw_series(LineSeries::new(
                rows.iter().map(|r| (r.sample.time, r.sample.components()[c])),
                color.mix(0.6),
            ))
            .map_err(render_err)?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));

        let mean_segments: Vec<Vec<(f64, f64)>> = estimate
            .clusters
            .iter()
            .filter_map(|cluster| {
                let (start, end) = spans.get(cluster.cluster_id).copied().flatten()?;
                let value = [cluster.center.north, cluster.center.east, cluster.center.up][c];
                Some(vec![(start, value), (end, value)])
            })
            .collect();

        chart
            .draw_series(
                mean_segments
                    .into_iter()
                    .map(|segment| PathElement::new(segment, color.stroke_width(3))),
            )
            .map_err(render_err)?
            .label(format!("{}_mean", name))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3)));
    }

    chart
        .configure_series_labels()
        .label_font(font(12.0))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(render_err)?;

    root.present().map_err(render_err)?;

    logging::info(Source::Plot, None, &format!("Wrote {}", path.display()));
    Ok(())
}

/// Scatter the given stations, labelled by code, over `region`.
///
/// Codes missing from the directory are skipped with a warning.
pub fn plot_station_map(
    path: &Path,
    directory: &StationDirectory,
    codes: &[&str],
    region: Region,
    size: (u32, u32),
) -> Result<usize> {
    let mut points = Vec::new();
    for &code in codes {
        match directory.get(code) {
            Some(station) => points.push((station.longitude, station.latitude, station.code.clone())),
            None => logging::warn(Source::Plot, Some(code), "not in station directory, skipped"),
        }
    }

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("GPS stations", font(18.0))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(region.min_lon..region.max_lon, region.min_lat..region.max_lat)
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc("longitude")
        .y_desc("latitude")
        .label_style(font(12.0))
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(
            points
                .iter()
                .map(|(lon, lat, _)| Circle::new((*lon, *lat), 4, BLACK.filled())),
        )
        .map_err(render_err)?;

    chart
        .draw_series(
            points
                .iter()
                .map(|(lon, lat, code)| Text::new(code.clone(), (*lon + 0.05, *lat), font(12.0))),
        )
        .map_err(render_err)?;

    root.present().map_err(render_err)?;

    logging::info(
        Source::Plot,
        None,
        &format!("Mapped {} stations to {}", points.len(), path.display()),
    );
    Ok(points.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::displacement::get_displacement;
    use crate::analysis::kmeans::KmeansParams;
    use crate::model::{InputFormat, Sample, SampleTable, StationRecord};

    fn estimate() -> DisplacementEstimate {
        let samples = (0..20)
            .map(|t| Sample {
                time: t as f64,
                north: if t < 10 { 0.0 } else { 5.0 },
                east: if t < 10 { 0.0 } else { 2.0 },
                up: if t < 10 { 0.0 } else { -1.0 },
            })
            .collect();
        let table = SampleTable {
            source: "kaik.txt".to_string(),
            format: InputFormat::Reformatted,
            component_names: ["n(cm)".into(), "e(cm)".into(), "u(cm)".into()],
            samples,
        };
        get_displacement(&table, &KmeansParams { k: 2, seed: Some(1), ..Default::default() }).unwrap()
    }

    #[test]
    fn test_padded_range_never_empty() {
        assert_eq!(padded_range(3.0, 3.0), (2.0, 4.0));
        let (lo, hi) = padded_range(f64::NAN, 1.0);
        assert!(lo < hi);
        let (lo, hi) = padded_range(0.0, 10.0);
        assert!(lo < 0.0 && hi > 10.0);
    }

    #[test]
    fn test_cluster_spans_cover_member_rows() {
        let est = estimate();
        let spans = cluster_spans(&est);
        let early = est.clusters[0].cluster_id;
        let late = est.clusters[1].cluster_id;
        assert_eq!(spans[early], Some((0.0, 9.0)));
        assert_eq!(spans[late], Some((10.0, 19.0)));
    }

    #[test]
    fn test_plot_estimate_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kaik.svg");
        plot_estimate(&path, &estimate(), "File: kaik.txt", (800, 600)).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"), "output should be an SVG document");
    }

    #[test]
    fn test_station_map_skips_unknown_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.svg");
        let directory: StationDirectory = vec![StationRecord {
            code: "KAIK".into(),
            network: "LI".into(),
            name: "Kaikoura".into(),
            latitude: -42.4255,
            longitude: 173.5337,
            opened: String::new(),
        }]
        .into_iter()
        .collect();
        let drawn = plot_station_map(&path, &directory, &["KAIK", "ZZZZ"], crate::stations::STUDY_REGION, (600, 600)).unwrap();
        assert_eq!(drawn, 1);
        assert!(path.exists());
    }
}
