//! Search strategies that turn a list of Q-vectors and a known unit cell into
//! a UB matrix.
//!
//! - [`select_direction`]: best single direction out of a candidate list
//! - [`find_ub_sequential`]: a, then b on the γ cone around a, then c from
//!   the cell angles
//! - [`scan_for_ub`]: exhaustive (a, b) orientation scan with c derived
//! - [`find_ub_from_candidate_lists`]: independent per-edge candidate lists,
//!   recombined afterwards
//! - [`find_ub`]: coarse scan on the lowest-|Q| peaks followed by
//!   progressive re-fitting as more peaks are admitted
//! - [`find_ub_without_lattice`]: no cell given, only a range of edge
//!   lengths; edges are scanned for, combined into trial cells and grown
//!
//! Every strategy reads the peak slice only. Candidate loops run on rayon's
//! global pool and break ties by candidate order, so results do not depend
//! on scheduling.

mod candidates;
mod lattice_free;
mod observer;
mod progressive;
mod scan;
mod select;
mod sequential;

pub use candidates::{find_ub_from_candidate_lists, possible_direction_list, possible_direction_lists};
pub use lattice_free::{find_ub_without_lattice, grow_indexed_set, scan_for_edge_vectors};
pub use observer::{CellAxis, IndexingObserver, NoopObserver, RefinementStep, TracingObserver};
pub use progressive::find_ub;
pub use scan::scan_for_ub;
pub use select::select_direction;
pub use sequential::find_ub_sequential;

use serde::{Deserialize, Serialize};

use crate::error::{IndexingError, Result};
use crate::indexing::{get_indexed_peaks, IndexedPeaks};
use crate::refine::best_fit_ub;
use crate::{Matrix3, Vector3};

// ── Configuration ───────────────────────────────────────────────────────────

/// Parameters of the exhaustive orientation scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Angular resolution of the scan in degrees. The work grows as the
    /// cube of `1 / degrees_per_step`; 1 to 3 degrees is practical. Default 2.0.
    pub degrees_per_step: f64,
    /// Maximum distance from an integer for a peak to count as indexed.
    /// Only used when `two_pass` is set. Default 0.15.
    pub tolerance: f64,
    /// Keep only the orientations that index the most peaks, then pick the
    /// smallest error among those. Without it the smallest error over all
    /// orientations wins. Default true.
    pub two_pass: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            degrees_per_step: 2.0,
            tolerance: 0.15,
            two_pass: true,
        }
    }
}

/// Parameters of the sequential a → b → c search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    /// Indexing tolerance. Default 0.15.
    pub tolerance: f64,
    /// Hemisphere resolution for the a search (`90° / hemisphere_steps`
    /// between directions). The b band uses half that spacing between cones
    /// and `10 × hemisphere_steps` directions per cone. Default 180.
    pub hemisphere_steps: i32,
    /// Index-and-refit passes applied to a and to b. Default 5.
    pub refine_iterations_ab: usize,
    /// Index-and-refit passes applied to c. Default 7.
    pub refine_iterations_c: usize,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.15,
            hemisphere_steps: 180,
            refine_iterations_ab: 5,
            refine_iterations_c: 7,
        }
    }
}

/// Parameters of the per-edge candidate list search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// Indexing tolerance. Default 0.15.
    pub tolerance: f64,
    /// Fraction of all peaks a direction must index in one dimension to be
    /// considered at all. Default 0.6.
    pub required_fraction: f64,
    /// Directions closer than this many degrees are duplicates. The first
    /// pass uses a quarter of it. Default 0.05.
    pub angle_tolerance: f64,
    /// Maximum difference in Å between a refined edge length and the
    /// requested one. Default 0.2.
    pub length_tolerance: f64,
    /// Second pass keeps directions indexing at least this fraction of the
    /// best first-pass count. Default 0.7.
    pub count_fraction: f64,
    /// Second pass keeps directions whose error is at most this multiple of
    /// the best first-pass error. Default 5.0.
    pub error_factor: f64,
    /// Hemisphere resolution in degrees. Default 0.25.
    pub degrees_per_step: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.15,
            required_fraction: 0.6,
            angle_tolerance: 0.05,
            length_tolerance: 0.2,
            count_fraction: 0.7,
            error_factor: 5.0,
            degrees_per_step: 0.25,
        }
    }
}

/// Parameters of the progressive UB builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindUbConfig {
    /// Indexing tolerance used by the initial scan and every refit.
    /// Default 0.15.
    pub tolerance: f64,
    /// Number of lowest-|Q| peaks used for the initial scan. Default 16.
    pub num_initial: usize,
    /// Resolution of the initial scan in degrees. Default 2.0.
    pub degrees_per_step: f64,
    /// Each growth step admits `round(growth_factor · n + 3)` peaks.
    /// Default 1.5.
    pub growth_factor: f64,
    /// Index-and-refit passes per growth step and for the final pass over
    /// all peaks. Default 1.
    pub refine_iterations: usize,
}

impl Default for FindUbConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.15,
            num_initial: 16,
            degrees_per_step: 2.0,
            growth_factor: 1.5,
            refine_iterations: 1,
        }
    }
}

/// Parameters of the search that needs no lattice parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeFreeConfig {
    /// Lower bound on the shortest cell edge in Å. It only has to be below
    /// the true value. Default 3.0.
    pub min_d: f64,
    /// Upper bound on the longest cell edge in Å. It only has to be above
    /// the true value, but a tight bound keeps supercells out of the
    /// candidate list. Default 30.0.
    pub max_d: f64,
    /// Indexing tolerance. Default 0.15.
    pub tolerance: f64,
    /// Number of lowest-|Q| peaks scanned for edge vectors, and the size of
    /// the first refit when a trial cell is grown. Default 16.
    pub num_initial: usize,
    /// Hemisphere resolution of the edge scan in degrees. Default 1.0.
    pub degrees_per_step: f64,
    /// Step in Å between the edge lengths tried along each direction.
    /// Default 0.1.
    pub length_step: f64,
    /// Smallest angle in degrees allowed between two edges of a trial cell.
    /// Default 40.
    pub min_angle: f64,
}

impl Default for LatticeFreeConfig {
    fn default() -> Self {
        Self {
            min_d: 3.0,
            max_d: 30.0,
            tolerance: 0.15,
            num_initial: 16,
            degrees_per_step: 1.0,
            length_step: 0.1,
            min_angle: 40.0,
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────────────

/// A UB matrix together with how well it indexes the input peaks.
#[derive(Debug, Clone, PartialEq)]
pub struct UbFit {
    pub ub: Matrix3,
    /// Sum over indexed peaks of the squared distances of h, k and l from
    /// their nearest integers.
    pub fit_error: f64,
    /// Number of input peaks indexed within the search tolerance.
    pub num_indexed: usize,
}

impl UbFit {
    /// Score `ub` against all of `q_vectors`.
    pub(crate) fn evaluate(ub: Matrix3, q_vectors: &[Vector3], tolerance: f64) -> Result<Self> {
        let indexed = get_indexed_peaks(&ub, q_vectors, tolerance)?;
        Ok(Self {
            ub,
            fit_error: indexed.fit_error,
            num_indexed: indexed.num_indexed(),
        })
    }
}

/// Outcome of [`scan_for_ub`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub a_dir: Vector3,
    pub b_dir: Vector3,
    pub c_dir: Vector3,
    /// Inverse of the matrix with rows `a_dir`, `b_dir`, `c_dir`.
    pub ub: Matrix3,
    /// Squared rounding error of all three projections, summed over every
    /// input peak.
    pub fit_error: f64,
}

// ── Shared helpers ──────────────────────────────────────────────────────────

/// Squared distance of `direction · Q` from the nearest integer, summed over
/// every peak.
#[inline]
pub(crate) fn projection_error(direction: &Vector3, q_vectors: &[Vector3]) -> f64 {
    q_vectors
        .iter()
        .map(|q| {
            let proj = direction.dot(q);
            let err = proj - proj.round();
            err * err
        })
        .sum()
}

/// Least-squares UB over the peaks a search indexed. Fewer than three
/// indexed peaks means the search failed, so that is `NoSolution`.
pub(crate) fn fit_indexed_peaks(indexed: &IndexedPeaks) -> Result<Matrix3> {
    if indexed.num_indexed() < 3 {
        return Err(IndexingError::NoSolution(format!(
            "only {} peaks indexed, need at least 3 to fit UB",
            indexed.num_indexed()
        )));
    }
    let (ub, _) = best_fit_ub(&indexed.miller_indices, &indexed.q_vectors)?;
    Ok(ub)
}

pub(crate) fn require_peaks(q_vectors: &[Vector3], minimum: usize) -> Result<()> {
    if q_vectors.len() < minimum {
        return Err(IndexingError::InvalidArgument(format!(
            "need at least {minimum} Q-vectors, got {}",
            q_vectors.len()
        )));
    }
    Ok(())
}

pub(crate) fn require_positive(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(IndexingError::InvalidArgument(format!(
            "{name} must be positive, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configs_fill_missing_fields_from_defaults() {
        let scan: ScanConfig = serde_json::from_str(r#"{"degrees_per_step": 5.0}"#).unwrap();
        assert_eq!(scan.degrees_per_step, 5.0);
        assert_eq!(scan.tolerance, ScanConfig::default().tolerance);
        assert!(scan.two_pass);

        let find: FindUbConfig = serde_json::from_str(r#"{"num_initial": 8}"#).unwrap();
        assert_eq!(find.num_initial, 8);
        assert_eq!(find.growth_factor, 1.5);

        let cand: CandidateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cand, CandidateConfig::default());

        let free: LatticeFreeConfig =
            serde_json::from_str(r#"{"min_d": 6.0, "max_d": 10.0}"#).unwrap();
        assert_eq!((free.min_d, free.max_d), (6.0, 10.0));
        assert_eq!(free.min_angle, 40.0);
    }

    #[test]
    fn test_too_few_indexed_peaks_is_no_solution() {
        let indexed = IndexedPeaks {
            miller_indices: vec![Vector3::x(), Vector3::y()],
            q_vectors: vec![Vector3::new(0.2, 0.0, 0.0), Vector3::new(0.0, 0.2, 0.0)],
            fit_error: 0.0,
        };
        assert!(matches!(
            fit_indexed_peaks(&indexed),
            Err(IndexingError::NoSolution(_))
        ));

        let mut enough = indexed.clone();
        enough.miller_indices.push(Vector3::z());
        enough.q_vectors.push(Vector3::new(0.0, 0.0, 0.2));
        let ub = fit_indexed_peaks(&enough).unwrap();
        assert!((ub - Matrix3::from_diagonal(&Vector3::new(0.2, 0.2, 0.2))).norm() < 1e-12);
    }

    #[test]
    fn test_projection_error() {
        let q = vec![Vector3::new(0.2, 0.0, 0.0), Vector3::new(0.31, 0.0, 0.0)];
        let d = Vector3::new(5.0, 0.0, 0.0);
        // 5·0.2 = 1.0 exactly; 5·0.31 = 1.55 → 0.45 from 2
        assert!((projection_error(&d, &q) - 0.45 * 0.45).abs() < 1e-12);
    }
}
