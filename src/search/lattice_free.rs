//! UB search when only a range of cell edge lengths is known.
//!
//! Every hemisphere direction is tried at a ladder of lengths between
//! `min_d` and `max_d`, and the vectors that index the most low-|Q| peaks in
//! one dimension become candidate cell edges. Trial cells are assembled from
//! that list, shortest edges first, and each is grown over all peaks. The
//! trial with the smallest error wins. No cell reduction is applied, so the
//! result can be any primitive cell of the lattice.

use rayon::prelude::*;
use tracing::debug;

use super::observer::IndexingObserver;
use super::{fit_indexed_peaks, require_peaks, require_positive, LatticeFreeConfig, UbFit};
use crate::directions::make_hemisphere_directions;
use crate::error::{IndexingError, Result};
use crate::indexing::{get_indexed_peaks, get_indexed_peaks_1d};
use crate::lattice::{angle_degrees, invert_ub, ub_from_abc};
use crate::refine::best_fit_direction;
use crate::{Matrix3, Vector3};

/// Refined edge vectors closer than this (Å), or closer to each other's
/// negative, are the same edge.
const DUPLICATE_DISTANCE: f64 = 1.0e-3;

/// Slack in degrees around 90° when orienting b and c of a trial cell.
const RIGHT_ANGLE_SLACK: f64 = 5.0;

/// A trial cell must index more than this fraction of the peaks indexed by
/// the shortest edge vector alone.
const MIN_INDEXED_FRACTION: f64 = 0.25;

/// Peak set growth per refit in [`grow_indexed_set`]: `round(1.5 n + 2)`.
const GROWTH_FACTOR: f64 = 1.5;
const GROWTH_STEP: f64 = 2.0;

/// Refits over the complete peak set that end [`grow_indexed_set`].
const FULL_SET_PASSES: usize = 4;

fn validate(config: &LatticeFreeConfig) -> Result<()> {
    require_positive("min_d", config.min_d)?;
    require_positive("degrees_per_step", config.degrees_per_step)?;
    require_positive("length_step", config.length_step)?;
    if !(config.max_d > config.min_d && config.max_d.is_finite()) {
        return Err(IndexingError::InvalidArgument(format!(
            "max_d must be greater than min_d, got {} and {}",
            config.max_d, config.min_d
        )));
    }
    if !(config.min_angle > 0.0 && config.min_angle < 90.0) {
        return Err(IndexingError::InvalidArgument(format!(
            "min_angle must be in (0, 90) degrees, got {}",
            config.min_angle
        )));
    }
    if config.num_initial == 0 {
        return Err(IndexingError::InvalidArgument(
            "num_initial must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ── Edge vector scan ────────────────────────────────────────────────────────

/// Candidate real-space cell edges for `q_vectors`.
///
/// Each hemisphere direction is scaled to `min_d + i · length_step` for
/// `i = 0..=round(1 + (max_d - min_d) / length_step)`, and a vector counts
/// a peak when its projection is within `tolerance` of an integer. The
/// vectors reaching the highest count over the whole scan are refined by
/// least squares, kept if the refined length lies in `[min_d, max_d]`, and
/// deduplicated up to sign.
///
/// Returns the edge vectors in scan order together with the highest count.
pub fn scan_for_edge_vectors(
    q_vectors: &[Vector3],
    config: &LatticeFreeConfig,
) -> Result<(Vec<Vector3>, usize)> {
    require_peaks(q_vectors, 1)?;
    validate(config)?;
    let tol = config.tolerance;

    let num_dir_steps = (90.0 / config.degrees_per_step).round() as i32;
    let hemisphere = make_hemisphere_directions(num_dir_steps)?;
    let num_lengths = (1.0 + (config.max_d - config.min_d) / config.length_step).round() as usize;
    debug!(
        "Scanning {} directions x {} lengths over {} peaks",
        hemisphere.len(),
        num_lengths + 1,
        q_vectors.len()
    );

    // Per direction: the best count along it and every length reaching it.
    let per_direction: Vec<(usize, Vec<Vector3>)> = hemisphere
        .par_iter()
        .map(|unit| {
            let mut best = 0;
            let mut vectors = Vec::new();
            for step in 0..=num_lengths {
                let edge = unit * (config.min_d + step as f64 * config.length_step);
                let count = q_vectors
                    .iter()
                    .filter(|&q| {
                        let proj = edge.dot(q);
                        (proj - proj.round()).abs() <= tol
                    })
                    .count();
                if count > best {
                    best = count;
                    vectors.clear();
                }
                if count == best {
                    vectors.push(edge);
                }
            }
            (best, vectors)
        })
        .collect();

    let max_indexed = per_direction.iter().map(|(count, _)| *count).max().unwrap_or(0);
    if max_indexed == 0 {
        return Ok((Vec::new(), 0));
    }
    let selected: Vec<Vector3> = per_direction
        .into_iter()
        .filter(|(count, _)| *count == max_indexed)
        .flat_map(|(_, vectors)| vectors)
        .collect();

    let refined: Vec<Option<Vector3>> = selected
        .par_iter()
        .map(|edge| {
            let indexed = get_indexed_peaks_1d(edge, q_vectors, tol);
            let (edge, _) = best_fit_direction(&indexed.indices, &indexed.q_vectors).ok()?;
            let length = edge.norm();
            (length >= config.min_d && length <= config.max_d).then_some(edge)
        })
        .collect();

    let mut edges: Vec<Vector3> = Vec::new();
    for edge in refined.into_iter().flatten() {
        let duplicate = edges.iter().any(|kept| {
            (edge - kept).norm() < DUPLICATE_DISTANCE || (edge + kept).norm() < DUPLICATE_DISTANCE
        });
        if !duplicate {
            edges.push(edge);
        }
    }
    debug!(
        "{} of {} top-scoring vectors survive refinement",
        edges.len(),
        selected.len()
    );
    Ok((edges, max_indexed))
}

// ── Trial cells ─────────────────────────────────────────────────────────────

fn angle_in_range(angle: f64, min_angle: f64) -> bool {
    angle >= min_angle && 180.0 - angle >= min_angle
}

/// Trial UB with a = `edges[a_index]`, b the next edge at least
/// `min_angle` away from a's line, and c a later edge (either sign) on the
/// a × b side of the ab plane, at least `min_angle` from both lines.
///
/// b is negated when γ would exceed 95°, favoring cells with angles of 90°
/// or less.
fn cell_from_edges(edges: &[Vector3], a_index: usize, min_angle: f64) -> Option<Matrix3> {
    let a = edges[a_index];
    let mut index = a_index + 1;

    let mut b = None;
    while index < edges.len() {
        let candidate = edges[index];
        index += 1;
        let gamma = angle_degrees(&a, &candidate);
        if angle_in_range(gamma, min_angle) {
            b = Some(if gamma > 90.0 + RIGHT_ANGLE_SLACK {
                -candidate
            } else {
                candidate
            });
            break;
        }
    }
    let b = b?;

    let normal = a.cross(&b);
    for candidate in &edges[index..] {
        for c in [*candidate, -*candidate] {
            if angle_degrees(&normal, &c) < 90.0 - RIGHT_ANGLE_SLACK
                && angle_in_range(angle_degrees(&b, &c), min_angle)
                && angle_in_range(angle_degrees(&a, &c), min_angle)
            {
                return ub_from_abc(&a, &b, &c).ok();
            }
        }
    }
    None
}

/// Refine `ub` over a growing prefix of `q_vectors`.
///
/// The first refit uses `max(num_initial, 3)` peaks; each following one
/// admits `round(1.5 n + 2)`. Once the prefix covers every peak, four more
/// refits over the complete set finish the job. `q_vectors` should be in
/// order of increasing |Q|. Any failed refit fails the whole growth, since
/// a cell that cannot follow its own peaks is not worth keeping.
///
/// The returned fit is scored against all of `q_vectors`.
pub fn grow_indexed_set(
    ub: &Matrix3,
    q_vectors: &[Vector3],
    tolerance: f64,
    num_initial: usize,
) -> Result<UbFit> {
    require_peaks(q_vectors, 3)?;
    let total = q_vectors.len();
    let mut num = num_initial.max(3);
    let mut full_set_passes = 0;
    let mut ub = *ub;

    loop {
        if num > total {
            num = total;
            full_set_passes += 1;
        }
        let indexed = get_indexed_peaks(&ub, &q_vectors[..num], tolerance)?;
        let refit = fit_indexed_peaks(&indexed)?;
        invert_ub(&refit)?;
        ub = refit;
        if full_set_passes >= FULL_SET_PASSES {
            break;
        }
        num = (GROWTH_FACTOR * num as f64 + GROWTH_STEP).round() as usize;
    }
    UbFit::evaluate(ub, q_vectors, tolerance)
}

// ── Search ──────────────────────────────────────────────────────────────────

/// Find a UB for peaks from a cell whose edges all lie between
/// `config.min_d` and `config.max_d`.
///
/// The `num_initial` lowest-|Q| peaks are scanned for edge vectors
/// ([`scan_for_edge_vectors`]). The vectors are sorted by length and a
/// trial cell is built starting from each one in turn, then grown over all
/// peaks with [`grow_indexed_set`]. Among the trials indexing more than a
/// quarter of the peaks the shortest edge alone indexes, the smallest fit
/// error wins. A last refit over all peaks follows when there are at least
/// five.
///
/// Fails with `NoSolution` if fewer than three edge vectors are found or no
/// trial cell qualifies.
pub fn find_ub_without_lattice(
    q_vectors: &[Vector3],
    config: &LatticeFreeConfig,
    observer: &mut dyn IndexingObserver,
) -> Result<UbFit> {
    require_peaks(q_vectors, 3)?;
    validate(config)?;
    let tol = config.tolerance;

    let mut sorted = q_vectors.to_vec();
    sorted.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));
    let num_scanned = config.num_initial.min(sorted.len());

    let (mut edges, max_scanned) = scan_for_edge_vectors(&sorted[..num_scanned], config)?;
    observer.edge_vectors_found(edges.len(), max_scanned);
    if max_scanned == 0 {
        return Err(IndexingError::NoSolution(
            "no edge vector indexes any peak".to_string(),
        ));
    }
    if edges.len() < 3 {
        return Err(IndexingError::NoSolution(format!(
            "found {} edge vectors, need at least 3",
            edges.len()
        )));
    }
    edges.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));

    let min_indexed =
        MIN_INDEXED_FRACTION * get_indexed_peaks_1d(&edges[0], &sorted, tol).num_indexed() as f64;

    let trials: Vec<Option<Result<UbFit>>> = (0..edges.len() - 2)
        .into_par_iter()
        .map(|start| {
            cell_from_edges(&edges, start, config.min_angle)
                .map(|ub| grow_indexed_set(&ub, &sorted, tol, config.num_initial))
        })
        .collect();

    let mut best: Option<UbFit> = None;
    for (start, trial) in trials.into_iter().enumerate() {
        match trial {
            None => {}
            Some(Err(err)) => observer.refinement_failed(sorted.len(), &err),
            Some(Ok(fit)) => {
                observer.cell_evaluated(start, fit.num_indexed, fit.fit_error);
                let better = best
                    .as_ref()
                    .map_or(true, |current| fit.fit_error < current.fit_error);
                if fit.num_indexed as f64 > min_indexed && better {
                    best = Some(fit);
                }
            }
        }
    }
    let mut ub = best
        .ok_or_else(|| IndexingError::NoSolution("no trial cell indexes enough peaks".to_string()))?
        .ub;

    if q_vectors.len() >= 5 {
        let refit = get_indexed_peaks(&ub, q_vectors, tol)
            .and_then(|indexed| fit_indexed_peaks(&indexed))
            .and_then(|candidate| invert_ub(&candidate).map(|_| candidate));
        match refit {
            Ok(candidate) => ub = candidate,
            Err(err) => observer.refinement_failed(q_vectors.len(), &err),
        }
    }

    let fit = UbFit::evaluate(ub, q_vectors, tol)?;
    observer.finished(fit.num_indexed, fit.fit_error);
    Ok(fit)
}
