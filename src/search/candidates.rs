//! Independent per-edge candidate lists, recombined into a cell afterwards.
//!
//! Each of a, b and c is searched on its own: every hemisphere direction is
//! scaled to the edge length, refined against the peaks it indexes in one
//! dimension, and kept if it still has the right length and covers enough
//! peaks. The three lists are then combined and the best non-coplanar
//! triple is refined into a UB. This decouples matching the edge lengths
//! from finding the orientation, which helps when the cell is well known.

use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::debug;

use super::observer::{CellAxis, IndexingObserver};
use super::{
    fit_indexed_peaks, projection_error, require_peaks, require_positive, CandidateConfig, UbFit,
};
use crate::directions::make_hemisphere_directions;
use crate::error::{IndexingError, Result};
use crate::indexing::{get_indexed_peaks_1d, get_indexed_peaks_3d, number_indexed_3d};
use crate::lattice::{angle_degrees, LatticeParameters};
use crate::refine::best_fit_direction;
use crate::Vector3;

/// Triples whose normalized volume `|a × b · c| / (|a| |b| |c|)` is below
/// this are treated as coplanar.
const MIN_NORMALIZED_VOLUME: f64 = 0.05;

/// A refined candidate edge with its 1D indexing statistics.
#[derive(Debug, Clone, Copy)]
struct EdgeCandidate {
    direction: Vector3,
    num_indexed: usize,
    fit_error: f64,
}

/// Index along `direction`, fit, and repeat once. Returns the refined
/// vector, the count indexed by the first refit and the last fit residual.
fn refine_twice(direction: &Vector3, q_vectors: &[Vector3], tolerance: f64) -> Option<EdgeCandidate> {
    let first = get_indexed_peaks_1d(direction, q_vectors, tolerance);
    let (direction, _) = best_fit_direction(&first.indices, &first.q_vectors).ok()?;
    let second = get_indexed_peaks_1d(&direction, q_vectors, tolerance);
    let (direction, fit_error) = best_fit_direction(&second.indices, &second.q_vectors).ok()?;
    Some(EdgeCandidate {
        direction,
        num_indexed: second.num_indexed(),
        fit_error,
    })
}

/// Candidate edge vectors of length `length` found among `hemisphere`.
///
/// The first pass keeps every refined direction that indexes at least
/// `required_fraction` of the peaks, has a length within
/// `length_tolerance` of `length` and is not within `angle_tolerance / 4`
/// of an already kept direction or its negative. The second pass keeps
/// those indexing at least `count_fraction` of the best count with an error
/// no more than `error_factor` times the best error among them, refines
/// them twice more and drops any within `angle_tolerance` of one already
/// listed.
pub fn possible_direction_list(
    q_vectors: &[Vector3],
    hemisphere: &[Vector3],
    length: f64,
    config: &CandidateConfig,
) -> Result<Vec<Vector3>> {
    require_positive("edge length", length)?;
    let tol = config.tolerance;
    let required = (config.required_fraction * q_vectors.len() as f64) as usize;

    let refined: Vec<Option<EdgeCandidate>> = hemisphere
        .par_iter()
        .map(|unit| {
            let direction = unit * length;
            let count = get_indexed_peaks_1d(&direction, q_vectors, tol).num_indexed();
            if count < required {
                return None;
            }
            let candidate = refine_twice(&direction, q_vectors, tol)?;
            let refined_length = candidate.direction.norm();
            ((length - refined_length).abs() < config.length_tolerance).then_some(candidate)
        })
        .collect();

    let quarter = config.angle_tolerance / 4.0;
    let mut first_pass: Vec<EdgeCandidate> = Vec::new();
    for candidate in refined.into_iter().flatten() {
        let duplicate = first_pass.iter().any(|kept| {
            let angle = angle_degrees(&candidate.direction, &kept.direction);
            angle < quarter || angle > 180.0 - quarter
        });
        if !duplicate {
            first_pass.push(candidate);
        }
    }

    let Some(max_indexed) = first_pass.iter().map(|c| c.num_indexed).max() else {
        return Ok(Vec::new());
    };
    let min_count = config.count_fraction * max_indexed as f64;
    let min_error = first_pass
        .iter()
        .filter(|c| c.num_indexed as f64 >= min_count)
        .map(|c| c.fit_error)
        .fold(f64::INFINITY, f64::min);
    debug!(
        "Edge {:.3}: {} directions after first pass, best count {}, best error {:.3e}",
        length,
        first_pass.len(),
        max_indexed,
        min_error
    );

    let second: Vec<Option<Vector3>> = first_pass
        .par_iter()
        .map(|candidate| {
            let indexed = get_indexed_peaks_1d(&candidate.direction, q_vectors, tol);
            let keep = indexed.num_indexed() as f64 >= min_count
                && indexed.fit_error <= config.error_factor * min_error;
            if !keep {
                return None;
            }
            refine_twice(&candidate.direction, q_vectors, tol).map(|c| c.direction)
        })
        .collect();

    let mut edges: Vec<Vector3> = Vec::new();
    for direction in second.into_iter().flatten() {
        if edges
            .iter()
            .all(|kept| angle_degrees(&direction, kept) >= config.angle_tolerance)
        {
            edges.push(direction);
        }
    }
    Ok(edges)
}

/// Candidate lists for the a, b and c edges, sharing one hemisphere of
/// `round(90 / degrees_per_step)` bands.
pub fn possible_direction_lists(
    q_vectors: &[Vector3],
    lattice: &LatticeParameters,
    config: &CandidateConfig,
) -> Result<[Vec<Vector3>; 3]> {
    require_positive("degrees_per_step", config.degrees_per_step)?;
    lattice.validate()?;
    let n_steps = (90.0 / config.degrees_per_step).round() as i32;
    let hemisphere = make_hemisphere_directions(n_steps)?;
    debug!("Searching {} hemisphere directions per edge", hemisphere.len());

    Ok([
        possible_direction_list(q_vectors, &hemisphere, lattice.a, config)?,
        possible_direction_list(q_vectors, &hemisphere, lattice.b, config)?,
        possible_direction_list(q_vectors, &hemisphere, lattice.c, config)?,
    ])
}

#[derive(Debug, Clone, Copy)]
struct ScoredTriple {
    indices: (usize, usize, usize),
    num_indexed: usize,
    error: f64,
}

impl ScoredTriple {
    /// `Less` means `self` is better: more peaks, then lower error, then
    /// earlier in list order.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .num_indexed
            .cmp(&self.num_indexed)
            .then(self.error.total_cmp(&other.error))
            .then(self.indices.cmp(&other.indices))
    }
}

/// Find UB from independently built a, b and c candidate lists.
///
/// Every non-coplanar combination is scored by the number of peaks it
/// indexes in three dimensions and then by the squared rounding error of its
/// projections over all peaks. The winner is made right-handed, used to
/// index the peaks, and refit with least squares.
pub fn find_ub_from_candidate_lists(
    q_vectors: &[Vector3],
    lattice: &LatticeParameters,
    config: &CandidateConfig,
    observer: &mut dyn IndexingObserver,
) -> Result<UbFit> {
    require_peaks(q_vectors, 3)?;
    let [a_list, b_list, c_list] = possible_direction_lists(q_vectors, lattice, config)?;
    for (axis, list) in [(CellAxis::A, &a_list), (CellAxis::B, &b_list), (CellAxis::C, &c_list)] {
        observer.candidates_found(axis, list.len());
        if list.is_empty() {
            return Err(IndexingError::NoSolution(format!(
                "no candidate directions for the {axis} edge"
            )));
        }
    }

    let tol = config.tolerance;
    let best = a_list
        .par_iter()
        .enumerate()
        .filter_map(|(i, a)| {
            let mut best: Option<ScoredTriple> = None;
            for (j, b) in b_list.iter().enumerate() {
                for (k, c) in c_list.iter().enumerate() {
                    let volume = a.cross(b).dot(c).abs();
                    if volume < MIN_NORMALIZED_VOLUME * a.norm() * b.norm() * c.norm() {
                        continue;
                    }
                    let (num_indexed, _) = number_indexed_3d(a, b, c, q_vectors, tol);
                    let scored = ScoredTriple {
                        indices: (i, j, k),
                        num_indexed,
                        error: projection_error(a, q_vectors)
                            + projection_error(b, q_vectors)
                            + projection_error(c, q_vectors),
                    };
                    if best.map_or(true, |current| scored.rank(&current) == Ordering::Less) {
                        best = Some(scored);
                    }
                }
            }
            best
        })
        .min_by(|x, y| x.rank(y))
        .ok_or_else(|| IndexingError::NoSolution("every candidate triple is coplanar".to_string()))?;

    let (i, j, k) = best.indices;
    let (a_dir, b_dir) = (a_list[i], b_list[j]);
    let mut c_dir = c_list[k];
    if a_dir.cross(&b_dir).dot(&c_dir) < 0.0 {
        c_dir = -c_dir;
    }
    debug!(
        "Best candidate triple ({}, {}, {}) indexes {} peaks",
        i, j, k, best.num_indexed
    );

    let indexed = get_indexed_peaks_3d(&a_dir, &b_dir, &c_dir, q_vectors, tol);
    let ub = fit_indexed_peaks(&indexed)?;
    let fit = UbFit::evaluate(ub, q_vectors, tol)?;
    observer.finished(fit.num_indexed, fit.fit_error);
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{is_right_handed, ub_from_abc};
    use crate::search::observer::tests::RecordingObserver;
    use crate::search::NoopObserver;
    use crate::Matrix3;
    use approx::assert_abs_diff_eq;

    fn triclinic_edges() -> (Vector3, Vector3, Vector3) {
        (
            Vector3::new(3.0, 2.0, -3.0),
            Vector3::new(-2.0, 5.5, 1.0),
            Vector3::new(1.5, 1.0, 7.0),
        )
    }

    fn triclinic_peaks() -> (Matrix3, Vec<Vector3>) {
        let (a, b, c) = triclinic_edges();
        let ub = ub_from_abc(&a, &b, &c).unwrap();
        let q = (0..40)
            .map(|i| {
                Vector3::new(
                    ((i * 5) % 7 - 3) as f64,
                    ((i * 3) % 9 - 4) as f64,
                    ((i * 7) % 11 - 5) as f64,
                )
            })
            .filter(|hkl| *hkl != Vector3::zeros())
            .map(|hkl| ub * hkl)
            .collect();
        (ub, q)
    }

    fn coarse_config() -> CandidateConfig {
        CandidateConfig {
            tolerance: 0.1,
            degrees_per_step: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_lists_contain_true_edges() {
        let (a, b, c) = triclinic_edges();
        let (_, q) = triclinic_peaks();
        let lattice = LatticeParameters::from_edges(&a, &b, &c);

        let config = coarse_config();
        let lists = possible_direction_lists(&q, &lattice, &config).unwrap();
        for (list, edge) in lists.iter().zip([a, b, c]) {
            assert!(
                list.iter().any(|d| (d - edge).norm() < 1e-6),
                "{} missing from {:?}",
                edge,
                list
            );
            // Other lattice vectors of about the right length may be listed
            // too, but every entry must index all peaks in one dimension.
            for d in list {
                assert!((d.norm() - edge.norm()).abs() < config.length_tolerance);
                assert_eq!(get_indexed_peaks_1d(d, &q, config.tolerance).num_indexed(), q.len());
            }
        }
        // b - a has length 7.297, close enough to |c| = 7.228.
        assert!(lists[2].iter().any(|d| (d - (b - a)).norm() < 1e-6 || (d + (b - a)).norm() < 1e-6));
    }

    #[test]
    fn test_find_ub_from_lists_recovers_cell() {
        let (a, b, c) = triclinic_edges();
        let (true_ub, q) = triclinic_peaks();
        let lattice = LatticeParameters::from_edges(&a, &b, &c);
        let lists = possible_direction_lists(&q, &lattice, &coarse_config()).unwrap();
        let mut observer = RecordingObserver::default();

        let fit = find_ub_from_candidate_lists(&q, &lattice, &coarse_config(), &mut observer).unwrap();
        assert_eq!(fit.num_indexed, q.len());
        assert!(fit.fit_error < 1e-12);
        for (got, want) in fit.ub.iter().zip(true_ub.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-9);
        }
        assert!(is_right_handed(&fit.ub).unwrap());
        assert_eq!(
            observer.candidates,
            vec![
                (CellAxis::A, lists[0].len()),
                (CellAxis::B, lists[1].len()),
                (CellAxis::C, lists[2].len())
            ]
        );
    }

    #[test]
    fn test_wrong_edge_length_finds_nothing() {
        let (a, b, c) = triclinic_edges();
        let (_, q) = triclinic_peaks();
        let mut lattice = LatticeParameters::from_edges(&a, &b, &c);
        lattice.b = 4.0;

        let result = find_ub_from_candidate_lists(&q, &lattice, &coarse_config(), &mut NoopObserver);
        assert!(matches!(result, Err(IndexingError::NoSolution(_))));
    }

    #[test]
    fn test_duplicates_are_removed() {
        let (_, q) = triclinic_peaks();
        let (a, _, _) = triclinic_edges();
        let unit = a.normalize();
        // The same direction several times, slightly perturbed, and negated.
        let hemisphere = vec![
            unit,
            (unit + Vector3::new(1e-3, 0.0, 0.0)).normalize(),
            -unit,
            (unit + Vector3::new(0.0, -2e-3, 1e-3)).normalize(),
        ];
        let list = possible_direction_list(&q, &hemisphere, a.norm(), &coarse_config()).unwrap();
        assert_eq!(list.len(), 1);
    }
}
