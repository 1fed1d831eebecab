//! K-means clustering for displacement samples
//!
//! Lloyd's algorithm with k-means++ seeding and several restarts, keeping
//! the run with the lowest inertia. Without a seed the initial centres come
//! from OS entropy, so repeated runs may label clusters differently.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{QuakeError, Result};

/// Parameters for K-means clustering
#[derive(Debug, Clone)]
pub struct KmeansParams {
    /// Number of clusters
    pub k: usize,
    /// Maximum iterations per run (default: 300)
    pub max_iterations: usize,
    /// Stop when no centre moves further than this (default: 1e-4)
    pub tolerance: f64,
    /// Independent restarts; the lowest-inertia run wins (default: 10)
    pub n_init: usize,
    /// Random seed for centre initialisation. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            k: 2,
            max_iterations: 300,
            tolerance: 1e-4,
            n_init: 10,
            seed: None,
        }
    }
}

/// Result of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct KmeansFit<const D: usize> {
    pub centers: Vec<[f64; D]>,
    /// Cluster index per input point.
    pub labels: Vec<usize>,
    /// Sum of squared distances to the assigned centre.
    pub inertia: f64,
    pub iterations: usize,
}

/// Cluster `points` into `params.k` groups.
pub fn kmeans<const D: usize>(points: &[[f64; D]], params: &KmeansParams) -> Result<KmeansFit<D>> {
    if params.k == 0 {
        return Err(QuakeError::Clustering("k must be at least 1".into()));
    }
    if points.len() < params.k {
        return Err(QuakeError::Clustering(format!(
            "{} samples is fewer than {} clusters",
            points.len(),
            params.k
        )));
    }
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(QuakeError::Clustering("samples contain non-finite values".into()));
    }

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut best: Option<KmeansFit<D>> = None;
    for _ in 0..params.n_init.max(1) {
        let initial = kmeans_plus_plus(points, params.k, &mut rng);
        let fit = lloyd(points, initial, params);
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }

    best.ok_or_else(|| QuakeError::Clustering("no clustering run completed".into()))
}

fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of and squared distance to the nearest centre.
fn nearest<const D: usize>(point: &[f64; D], centers: &[[f64; D]]) -> (usize, f64) {
    let mut best_k = 0;
    let mut best_dist = f64::INFINITY;
    for (k, center) in centers.iter().enumerate() {
        let dist = squared_distance(point, center);
        if dist < best_dist {
            best_dist = dist;
            best_k = k;
        }
    }
    (best_k, best_dist)
}

/// k-means++ seeding: each new centre is drawn with probability proportional
/// to its squared distance from the nearest centre chosen so far.
fn kmeans_plus_plus<const D: usize>(points: &[[f64; D]], k: usize, rng: &mut StdRng) -> Vec<[f64; D]> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..points.len())]);

    let mut dist: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centers[0]))
        .collect();

    while centers.len() < k {
        let total: f64 = dist.iter().sum();
        let chosen = if total > 0.0 {
            weighted_index(&dist, rng.gen_range(0.0..total))
        } else {
            // all points coincide with a centre
            rng.gen_range(0..points.len())
        };

        let center = points[chosen];
        for (d, p) in dist.iter_mut().zip(points.iter()) {
            *d = d.min(squared_distance(p, &center));
        }
        centers.push(center);
    }

    centers
}

/// Index whose cumulative weight interval contains `target`. If rounding
/// carries `target` past the end, the last index with non-zero weight wins,
/// so a point already chosen as a centre is never drawn again.
fn weighted_index(weights: &[f64], mut target: f64) -> usize {
    let mut chosen = None;
    for (i, w) in weights.iter().enumerate() {
        if *w > 0.0 {
            chosen = Some(i);
            if target < *w {
                break;
            }
        }
        target -= w;
    }
    chosen.unwrap_or(weights.len().saturating_sub(1))
}

fn lloyd<const D: usize>(points: &[[f64; D]], mut centers: Vec<[f64; D]>, params: &KmeansParams) -> KmeansFit<D> {
    let k = centers.len();
    let mut labels = vec![0usize; points.len()];
    let mut iterations = 0;

    for iter in 0..params.max_iterations {
        iterations = iter + 1;

        // Assignment step
        for (label, point) in labels.iter_mut().zip(points.iter()) {
            *label = nearest(point, &centers).0;
        }

        // Update step
        let mut sums = vec![[0.0f64; D]; k];
        let mut counts = vec![0usize; k];
        for (point, &label) in points.iter().zip(labels.iter()) {
            for (s, v) in sums[label].iter_mut().zip(point.iter()) {
                *s += v;
            }
            counts[label] += 1;
        }

        let mut max_shift = 0.0f64;
        for c in 0..k {
            if counts[c] == 0 {
                continue; // empty cluster keeps its centre
            }
            let mut updated = sums[c];
            for v in updated.iter_mut() {
                *v /= counts[c] as f64;
            }
            max_shift = max_shift.max(squared_distance(&updated, &centers[c]).sqrt());
            centers[c] = updated;
        }

        if max_shift < params.tolerance {
            break;
        }
    }

    // final assignment against the converged centres
    let mut inertia = 0.0;
    for (label, point) in labels.iter_mut().zip(points.iter()) {
        let (k, dist) = nearest(point, &centers);
        *label = k;
        inertia += dist;
    }

    KmeansFit {
        centers,
        labels,
        inertia,
        iterations,
    }
}
