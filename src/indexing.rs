//! Assigning Miller indices to peaks.
//!
//! A real-space edge vector `d` whose length is the cell edge (the reciprocal
//! of the plane spacing in reciprocal space) indexes a peak `Q` in one
//! direction when `d · Q` is close to an integer. Three edge vectors, or
//! equivalently `UB⁻¹`, index a peak when all three projections are close to
//! integers and the rounded triple is not `(0, 0, 0)`.
//!
//! The fit error reported by every function here is the sum over indexed
//! peaks of the squared distances of the projections from their nearest
//! integers.

use crate::error::{IndexingError, Result};
use crate::lattice::{check_ub, invert_ub};
use crate::{Matrix3, Vector3};

// ── Result types ────────────────────────────────────────────────────────────

/// Peaks indexed in a single direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedPeaks1D {
    /// One-dimensional index of each accepted peak.
    pub indices: Vec<i32>,
    /// Accepted Q-vectors, in input order.
    pub q_vectors: Vec<Vector3>,
    /// Sum of squared deviations of `d · Q` from `indices`.
    pub fit_error: f64,
}

impl IndexedPeaks1D {
    pub fn num_indexed(&self) -> usize {
        self.indices.len()
    }
}

/// Peaks indexed in all three directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedPeaks {
    /// Rounded `(h, k, l)` of each accepted peak (integral values).
    pub miller_indices: Vec<Vector3>,
    /// Accepted Q-vectors, in input order.
    pub q_vectors: Vec<Vector3>,
    /// Sum over accepted peaks of the squared deviations of h, k and l.
    pub fit_error: f64,
}

impl IndexedPeaks {
    pub fn num_indexed(&self) -> usize {
        self.miller_indices.len()
    }
}

// ── Index validation ────────────────────────────────────────────────────────

/// True if every component of `hkl` is within `tolerance` of an integer and
/// the rounded triple is not `(0, 0, 0)`.
#[inline]
pub fn valid_index(hkl: &Vector3, tolerance: f64) -> bool {
    let rounded = hkl.map(f64::round);
    if rounded == Vector3::zeros() {
        return false;
    }
    (hkl - rounded).iter().all(|e| e.abs() <= tolerance)
}

/// Squared distance of each component from its nearest integer, summed.
#[inline]
fn squared_rounding_error(hkl: &Vector3) -> f64 {
    (hkl - hkl.map(f64::round)).norm_squared()
}

// ── 1D ──────────────────────────────────────────────────────────────────────

/// Peaks whose projection on `direction` is within `tolerance` of an integer.
///
/// Unlike the three-dimensional variants, an index of 0 is accepted: a peak
/// on the plane through the origin is legitimately indexed in one direction.
pub fn get_indexed_peaks_1d(
    direction: &Vector3,
    q_vectors: &[Vector3],
    tolerance: f64,
) -> IndexedPeaks1D {
    let mut result = IndexedPeaks1D::default();
    for q in q_vectors {
        let proj = direction.dot(q);
        let nearest = proj.round();
        let error = (proj - nearest).abs();
        if error < tolerance {
            result.fit_error += error * error;
            result.indices.push(nearest as i32);
            result.q_vectors.push(*q);
        }
    }
    result
}

/// Number of peaks indexed in one direction by `direction`. A zero vector
/// indexes nothing.
pub fn number_indexed_1d(direction: &Vector3, q_vectors: &[Vector3], tolerance: f64) -> usize {
    if direction.norm() == 0.0 {
        return 0;
    }
    q_vectors
        .iter()
        .filter(|q| {
            let proj = direction.dot(q);
            (proj - proj.round()).abs() < tolerance
        })
        .count()
}

// ── 3D from three directions ────────────────────────────────────────────────

/// Peaks indexed simultaneously by three edge vectors.
pub fn get_indexed_peaks_3d(
    a_dir: &Vector3,
    b_dir: &Vector3,
    c_dir: &Vector3,
    q_vectors: &[Vector3],
    tolerance: f64,
) -> IndexedPeaks {
    let mut result = IndexedPeaks::default();
    for q in q_vectors {
        let hkl = Vector3::new(a_dir.dot(q), b_dir.dot(q), c_dir.dot(q));
        if valid_index(&hkl, tolerance) {
            result.fit_error += squared_rounding_error(&hkl);
            result.miller_indices.push(hkl.map(f64::round));
            result.q_vectors.push(*q);
        }
    }
    result
}

/// Number of peaks indexed by three edge vectors, together with the mean
/// squared error per indexed peak (`f64::INFINITY` when none are indexed).
///
/// Zero-length edges index nothing.
pub fn number_indexed_3d(
    a_dir: &Vector3,
    b_dir: &Vector3,
    c_dir: &Vector3,
    q_vectors: &[Vector3],
    tolerance: f64,
) -> (usize, f64) {
    if a_dir.norm() == 0.0 || b_dir.norm() == 0.0 || c_dir.norm() == 0.0 {
        return (0, f64::INFINITY);
    }
    let mut count = 0;
    let mut error = 0.0;
    for q in q_vectors {
        let hkl = Vector3::new(a_dir.dot(q), b_dir.dot(q), c_dir.dot(q));
        if valid_index(&hkl, tolerance) {
            count += 1;
            error += squared_rounding_error(&hkl);
        }
    }
    if count > 0 {
        (count, error / count as f64)
    } else {
        (0, f64::INFINITY)
    }
}

// ── 3D from UB ──────────────────────────────────────────────────────────────

/// Peaks indexed by `UB`: fractional indices are `UB⁻¹ · Q`.
///
/// Fails with [`IndexingError::SingularMatrix`](crate::IndexingError) if
/// `|det(UB)| < 1e-5`.
pub fn get_indexed_peaks(ub: &Matrix3, q_vectors: &[Vector3], tolerance: f64) -> Result<IndexedPeaks> {
    let ub_inverse = invert_ub(ub)?;
    let mut result = IndexedPeaks::default();
    for q in q_vectors {
        let hkl = ub_inverse * q;
        if valid_index(&hkl, tolerance) {
            result.fit_error += squared_rounding_error(&hkl);
            result.miller_indices.push(hkl.map(f64::round));
            result.q_vectors.push(*q);
        }
    }
    Ok(result)
}

/// Reject matrices that cannot be an orientation matrix at all.
fn require_valid_ub(ub: &Matrix3) -> Result<()> {
    if check_ub(ub) {
        Ok(())
    } else {
        Err(IndexingError::InvalidArgument(format!(
            "not a valid orientation matrix (det = {:.3e})",
            ub.determinant()
        )))
    }
}

/// Number of peaks indexed by `UB`. Fails unless [`check_ub`] accepts `ub`.
pub fn number_indexed(ub: &Matrix3, q_vectors: &[Vector3], tolerance: f64) -> Result<usize> {
    require_valid_ub(ub)?;
    let ub_inverse = invert_ub(ub)?;
    Ok(q_vectors
        .iter()
        .filter(|q| valid_index(&(ub_inverse * *q), tolerance))
        .count())
}

/// Estimated standard deviation of the fractional indices of the peaks that
/// `UB` indexes: `sqrt(Σ err² / (3 n))`. Zero when nothing is indexed.
/// Fails unless [`check_ub`] accepts `ub`.
pub fn indexing_std_dev(ub: &Matrix3, q_vectors: &[Vector3], tolerance: f64) -> Result<f64> {
    require_valid_ub(ub)?;
    let indexed = get_indexed_peaks(ub, q_vectors, tolerance)?;
    let n = indexed.num_indexed();
    if n == 0 {
        return Ok(0.0);
    }
    Ok((indexed.fit_error / (3 * n) as f64).sqrt())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Twelve measured natrolite peaks.
    pub(crate) fn natrolite_q_vectors() -> Vec<Vector3> {
        vec![
            Vector3::new(-0.57582, -0.35322, -0.19974),
            Vector3::new(-1.41754, -0.78704, -0.75974),
            Vector3::new(-1.12030, -0.53578, -0.27559),
            Vector3::new(-0.68911, -0.59397, -0.12716),
            Vector3::new(-1.06863, -0.43255, 0.01688),
            Vector3::new(-1.82007, -0.49671, -0.06266),
            Vector3::new(-1.10465, -0.73708, -0.01939),
            Vector3::new(-0.12747, -0.32380, 0.00821),
            Vector3::new(-0.84210, -0.37038, 0.15403),
            Vector3::new(-0.54099, -0.46900, 0.11535),
            Vector3::new(-0.90478, -0.50667, 0.51072),
            Vector3::new(-0.50387, -0.58561, 0.43502),
        ]
    }

    pub(crate) fn natrolite_miller_indices() -> Vec<Vector3> {
        [
            [1, 9, -9],
            [4, 20, -24],
            [2, 18, -14],
            [0, 12, -12],
            [1, 19, -9],
            [3, 31, -13],
            [0, 20, -14],
            [-1, 3, -5],
            [0, 16, -6],
            [-1, 11, -7],
            [-2, 20, -4],
            [-3, 13, -5],
        ]
        .iter()
        .map(|[h, k, l]| Vector3::new(*h as f64, *k as f64, *l as f64))
        .collect()
    }

    #[test]
    fn test_valid_index() {
        assert!(!valid_index(&Vector3::zeros(), 0.1));
        assert!(!valid_index(&Vector3::new(0.05, -0.04, 0.02), 0.1));
        assert!(valid_index(&Vector3::new(2.09, -3.09, -2.91), 0.1));
        assert!(!valid_index(&Vector3::new(2.11, -3.09, -2.91), 0.1));
        assert!(!valid_index(&Vector3::new(2.09, -3.11, -2.91), 0.1));
        assert!(!valid_index(&Vector3::new(2.09, -3.09, -2.89), 0.1));
    }

    #[test]
    fn test_get_indexed_peaks_1d() {
        let q_vectors = natrolite_q_vectors();
        let direction = Vector3::new(-2.62484, 4.04988, -4.46991);
        let indexed = get_indexed_peaks_1d(&direction, &q_vectors, 0.1);

        assert_eq!(indexed.num_indexed(), 12);
        assert_eq!(indexed.q_vectors.len(), 12);
        assert_abs_diff_eq!(indexed.fit_error, 0.011419, epsilon = 1e-5);
        assert_eq!(indexed.indices, vec![1, 4, 2, 0, 1, 3, 0, -1, 0, -1, -2, -3]);
        assert_eq!(number_indexed_1d(&direction, &q_vectors, 0.1), 12);
        assert_eq!(number_indexed_1d(&Vector3::zeros(), &q_vectors, 0.1), 0);
    }

    #[test]
    fn test_get_indexed_peaks_3d() {
        let q_vectors = natrolite_q_vectors();
        let a_dir = Vector3::new(-2.5825930, 3.9741700, -4.5514810);
        let b_dir = Vector3::new(-16.6087800, -2.5005515, 7.2465878);
        let c_dir = Vector3::new(2.7502847, 14.5671910, 11.3796620);

        let indexed = get_indexed_peaks_3d(&a_dir, &b_dir, &c_dir, &q_vectors, 0.1);
        assert_eq!(indexed.num_indexed(), 12);
        assert_abs_diff_eq!(indexed.fit_error, 0.023007052, epsilon = 1e-4);
        assert_eq!(indexed.miller_indices, natrolite_miller_indices());

        let (count, mean_error) = number_indexed_3d(&a_dir, &b_dir, &c_dir, &q_vectors, 0.1);
        assert_eq!(count, 12);
        assert_abs_diff_eq!(mean_error, indexed.fit_error / 12.0, epsilon = 1e-12);
    }

    #[test]
    fn test_get_indexed_peaks_from_ub() {
        let ub = Matrix3::new(
            -0.059660400, -0.049648200, 0.0077539105, //
            0.093009956, -0.007510495, 0.0419835400, //
            -0.104643770, 0.021613428, 0.0322586300,
        );
        let q_vectors = natrolite_q_vectors();
        let indexed = get_indexed_peaks(&ub, &q_vectors, 0.1).unwrap();

        assert_eq!(indexed.num_indexed(), 12);
        assert_abs_diff_eq!(indexed.fit_error, 0.023007052, epsilon = 1e-4);
        assert_eq!(indexed.miller_indices, natrolite_miller_indices());

        // Round trip: UB · hkl reproduces each accepted Q closely.
        for (hkl, q) in indexed.miller_indices.iter().zip(&indexed.q_vectors) {
            assert!((ub * hkl - q).norm() < 0.05);
        }
    }

    #[test]
    fn test_number_indexed_small_tolerance() {
        let ub = Matrix3::new(
            -0.141251, 0.3042650, -0.147160, //
            0.120633, 0.0907082, 0.106323, //
            0.258332, -0.0062807, -0.261151,
        );
        let q_vectors = vec![
            Vector3::new(-1.02753, 0.47106, -0.25957),
            Vector3::new(-2.05753, 0.93893, -0.51988),
            Vector3::new(-2.19878, 1.05926, -0.27486),
            Vector3::new(-2.63576, 1.39119, -0.53007),
            Vector3::new(-1.75324, 1.02999, -0.52537),
        ];
        assert_eq!(number_indexed(&ub, &q_vectors, 0.017).unwrap(), 4);
    }

    #[test]
    fn test_indexing_std_dev() {
        let ub = Matrix3::new(
            -0.059660400, -0.049648200, 0.0077539105, //
            0.093009956, -0.007510495, 0.0419835400, //
            -0.104643770, 0.021613428, 0.0322586300,
        );
        let q_vectors = natrolite_q_vectors();
        let std_dev = indexing_std_dev(&ub, &q_vectors, 0.1).unwrap();
        assert_abs_diff_eq!(std_dev, (0.023007052_f64 / 36.0).sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn test_singular_ub_is_rejected() {
        let ub = Matrix3::from_diagonal(&Vector3::new(1.0e-3, 1.0e-2, 1.0e-2));
        let q_vectors = natrolite_q_vectors();
        assert!(matches!(
            get_indexed_peaks(&ub, &q_vectors, 0.1),
            Err(IndexingError::SingularMatrix { .. })
        ));
        assert!(number_indexed(&ub, &q_vectors, 0.1).is_err());
    }

    #[test]
    fn test_implausible_ub_is_rejected() {
        let q_vectors = natrolite_q_vectors();
        // Invertible, but |det| = 27 is far outside any real cell.
        let huge = Matrix3::from_diagonal(&Vector3::new(3.0, 3.0, 3.0));
        assert!(get_indexed_peaks(&huge, &q_vectors, 0.1).is_ok());
        assert!(matches!(
            number_indexed(&huge, &q_vectors, 0.1),
            Err(IndexingError::InvalidArgument(_))
        ));
        assert!(matches!(
            indexing_std_dev(&huge, &q_vectors, 0.1),
            Err(IndexingError::InvalidArgument(_))
        ));

        let mut nan = Matrix3::from_diagonal(&Vector3::new(0.2, 0.2, 0.2));
        nan[(0, 1)] = f64::NAN;
        assert!(number_indexed(&nan, &q_vectors, 0.1).is_err());
    }

    #[test]
    fn test_tolerance_monotonic() {
        let q_vectors = natrolite_q_vectors();
        let direction = Vector3::new(-2.62484, 4.04988, -4.46991);
        let ub = Matrix3::new(
            -0.059660400, -0.049648200, 0.0077539105, //
            0.093009956, -0.007510495, 0.0419835400, //
            -0.104643770, 0.021613428, 0.0322586300,
        );
        let mut last_1d = 0;
        let mut last_3d = 0;
        for step in 0..=50 {
            let tol = step as f64 * 0.01;
            let n_1d = get_indexed_peaks_1d(&direction, &q_vectors, tol).num_indexed();
            let n_3d = get_indexed_peaks(&ub, &q_vectors, tol).unwrap().num_indexed();
            assert!(n_1d >= last_1d);
            assert!(n_3d >= last_3d);
            last_1d = n_1d;
            last_3d = n_3d;
        }
        assert_eq!(get_indexed_peaks_1d(&direction, &q_vectors, 0.0).num_indexed(), 0);
    }
}
