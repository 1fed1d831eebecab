//! Displacement estimation.
//!
//! A station's position is roughly constant before and after an earthquake,
//! so clustering the north/east/up samples separates the resting positions.
//! Ordering the clusters by mean sample time and differencing consecutive
//! centres gives the displacement of each event.
//!
//! The result quality depends entirely on the input: noisy series produce
//! meaningless deltas, so the plots should always be checked.

use crate::analysis::kmeans::{KmeansParams, kmeans};
use crate::logging::{self, Source};
use crate::model::{DisplacementVector, QuakeError, Result, Sample, SampleTable};

/// A cluster, positioned in the time ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOrderedCluster {
    /// Label assigned by the clustering step (not stable across runs).
    pub cluster_id: usize,
    pub center: DisplacementVector,
    /// Mean time of the member samples. NaN for an empty cluster.
    pub mean_time: f64,
    pub size: usize,
}

/// A sample annotated with its cluster and that cluster's centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotatedSample {
    pub sample: Sample,
    pub cluster_id: usize,
    pub cluster_mean: DisplacementVector,
}

/// The input table with per-row cluster annotations. The input table itself
/// is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedTable {
    pub source: String,
    pub component_names: [String; 3],
    pub rows: Vec<AnnotatedSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementEstimate {
    pub table: AnnotatedTable,
    /// Clusters sorted by mean time, earliest first.
    pub clusters: Vec<TimeOrderedCluster>,
    /// `clusters.len() - 1` deltas between consecutive clusters.
    pub displacements: Vec<DisplacementVector>,
}

/// Cluster the samples and return the time-ordered displacement sequence.
pub fn get_displacement(table: &SampleTable, params: &KmeansParams) -> Result<DisplacementEstimate> {
    if table.is_empty() {
        return Err(QuakeError::EmptyTable(table.source.clone()));
    }

    let points = table.component_matrix();
    let fit = kmeans(&points, params)?;

    logging::debug(
        Source::Cluster,
        None,
        &format!(
            "{}: k={} converged in {} iterations, inertia {:.4}",
            table.source, params.k, fit.iterations, fit.inertia
        ),
    );

    // mean time per cluster
    let mut time_sums = vec![0.0f64; fit.centers.len()];
    let mut sizes = vec![0usize; fit.centers.len()];
    for (sample, &label) in table.samples.iter().zip(fit.labels.iter()) {
        time_sums[label] += sample.time;
        sizes[label] += 1;
    }

    let mut clusters: Vec<TimeOrderedCluster> = fit
        .centers
        .iter()
        .enumerate()
        .map(|(id, center)| TimeOrderedCluster {
            cluster_id: id,
            center: DisplacementVector::from_components(*center),
            mean_time: if sizes[id] > 0 {
                time_sums[id] / sizes[id] as f64
            } else {
                f64::NAN
            },
            size: sizes[id],
        })
        .collect();

    clusters.sort_by(by_mean_time);

    let displacements = ordered_deltas(&clusters);

    let rows = table
        .samples
        .iter()
        .zip(fit.labels.iter())
        .map(|(sample, &label)| AnnotatedSample {
            sample: *sample,
            cluster_id: label,
            cluster_mean: DisplacementVector::from_components(fit.centers[label]),
        })
        .collect();

    Ok(DisplacementEstimate {
        table: AnnotatedTable {
            source: table.source.clone(),
            component_names: table.component_names.clone(),
            rows,
        },
        clusters,
        displacements,
    })
}

/// Orders by mean time with empty clusters (NaN) last. Used with a stable
/// sort, so ties keep cluster index order.
fn by_mean_time(a: &TimeOrderedCluster, b: &TimeOrderedCluster) -> std::cmp::Ordering {
    a.mean_time
        .is_nan()
        .cmp(&b.mean_time.is_nan())
        .then_with(|| a.mean_time.total_cmp(&b.mean_time))
}

/// Differences between consecutive cluster centres.
pub fn ordered_deltas(clusters: &[TimeOrderedCluster]) -> Vec<DisplacementVector> {
    clusters
        .windows(2)
        .map(|pair| pair[1].center - pair[0].center)
        .collect()
}

/// Plot title in the form
/// `File: f, displacement(s) for event 1 :n(cm)=5.00 e(cm)=2.00 u(cm)=-1.00`.
pub fn format_title(file: &str, component_names: &[String; 3], displacements: &[DisplacementVector]) -> String {
    let mut title = format!("File: {}, displacement(s) for", file);
    for (i, d) in displacements.iter().enumerate() {
        title.push_str(&format!(
            " event {} :{}={:.2} {}={:.2} {}={:.2}",
            i + 1,
            component_names[0],
            d.north,
            component_names[1],
            d.east,
            component_names[2],
            d.up
        ));
    }
    title
}
