//! Least-squares refinement of edge vectors and UB matrices.
//!
//! Both fits are linear: the design matrix is factored once with a thin QR
//! decomposition and each right-hand side is solved against the upper
//! triangular factor. A factor with a (relatively) vanishing diagonal entry
//! means the rows do not span three independent directions and is reported
//! as [`IndexingError::RankDeficient`].

use nalgebra::{DMatrix, DVector};

use crate::error::{IndexingError, Result};
use crate::indexing::{get_indexed_peaks, get_indexed_peaks_1d};
use crate::lattice::invert_ub;
use crate::{Matrix3, Vector3};

/// Diagonal entries of R smaller than this fraction of the largest one are
/// treated as zero.
const RANK_TOLERANCE: f64 = 1.0e-10;

/// Thin QR factorization of an `n × 3` design matrix, ready to solve any
/// number of right-hand sides.
struct QrSolver {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl QrSolver {
    fn new(design: DMatrix<f64>) -> Result<Self> {
        let qr = design.qr();
        let q = qr.q();
        let r = qr.r();

        let diagonal = r.diagonal();
        let largest = diagonal.amax();
        if !largest.is_finite()
            || largest == 0.0
            || diagonal.iter().any(|d| d.abs() <= largest * RANK_TOLERANCE)
        {
            return Err(IndexingError::RankDeficient);
        }
        Ok(Self { q, r })
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let qt_b = self.q.transpose() * rhs;
        self.r
            .solve_upper_triangular(&qt_b)
            .ok_or(IndexingError::RankDeficient)
    }
}

/// Build the `n × 3` matrix whose rows are `rows`.
fn design_matrix(rows: &[Vector3]) -> DMatrix<f64> {
    let mut m = DMatrix::<f64>::zeros(rows.len(), 3);
    for (i, row) in rows.iter().enumerate() {
        for j in 0..3 {
            m[(i, j)] = row[j];
        }
    }
    m
}

fn check_pairs(n_left: usize, n_right: usize, what: &str) -> Result<()> {
    if n_left != n_right {
        return Err(IndexingError::InvalidArgument(format!(
            "number of {what} ({n_left}) does not match number of Q-vectors ({n_right})"
        )));
    }
    if n_left < 3 {
        return Err(IndexingError::InvalidArgument(format!(
            "need at least 3 {what} to fit, got {n_left}"
        )));
    }
    Ok(())
}

// ── Single edge vector ──────────────────────────────────────────────────────

/// Edge vector `d` minimizing `Σ (d · Qᵢ − indexᵢ)²`.
///
/// Returns the vector together with the squared residual norm.
pub fn best_fit_direction(indices: &[i32], q_vectors: &[Vector3]) -> Result<(Vector3, f64)> {
    check_pairs(indices.len(), q_vectors.len(), "indices")?;

    let design = design_matrix(q_vectors);
    let solver = QrSolver::new(design.clone())?;
    let rhs = DVector::from_iterator(indices.len(), indices.iter().map(|&i| i as f64));
    let x = solver.solve(&rhs)?;

    let direction = Vector3::new(x[0], x[1], x[2]);
    if direction.iter().any(|v| !v.is_finite()) || direction.norm() == 0.0 {
        return Err(IndexingError::Degenerate(format!(
            "best-fit direction is {direction:?}"
        )));
    }

    let residual = (&design * &x - &rhs).norm_squared();
    Ok((direction, residual))
}

// ── Full UB ─────────────────────────────────────────────────────────────────

/// UB minimizing `Σ |UB · hklᵢ − Qᵢ|²`.
///
/// Each Cartesian component of Q gives an independent linear system whose
/// solution is the corresponding row of UB; all three share the same QR
/// factorization of the `hkl` design matrix. The returned error is the sum of
/// the three squared residual norms.
pub fn best_fit_ub(hkl: &[Vector3], q_vectors: &[Vector3]) -> Result<(Matrix3, f64)> {
    check_pairs(hkl.len(), q_vectors.len(), "Miller indices")?;

    let design = design_matrix(hkl);
    let solver = QrSolver::new(design.clone())?;

    let mut ub = Matrix3::zeros();
    let mut total_error = 0.0;
    for component in 0..3 {
        let rhs = DVector::from_iterator(q_vectors.len(), q_vectors.iter().map(|q| q[component]));
        let row = solver.solve(&rhs)?;
        total_error += (&design * &row - &rhs).norm_squared();
        for j in 0..3 {
            ub[(component, j)] = row[j];
        }
    }

    if ub.iter().any(|v| !v.is_finite()) {
        return Err(IndexingError::Degenerate(
            "best-fit UB has non-finite entries".to_string(),
        ));
    }
    Ok((ub, total_error))
}

// ── Iterative refinement ────────────────────────────────────────────────────

/// Repeatedly index the peaks along `direction` and refit it.
///
/// Each pass that fails (fewer than three peaks indexed, or a failed fit)
/// leaves the current estimate unchanged, so the result is never worse
/// than a usable starting vector.
pub fn optimize_direction(
    direction: &Vector3,
    q_vectors: &[Vector3],
    tolerance: f64,
    iterations: usize,
) -> Vector3 {
    let mut current = *direction;
    for _ in 0..iterations {
        let indexed = get_indexed_peaks_1d(&current, q_vectors, tolerance);
        if indexed.num_indexed() < 3 {
            break;
        }
        match best_fit_direction(&indexed.indices, &indexed.q_vectors) {
            Ok((refined, _)) => current = refined,
            Err(_) => break,
        }
    }
    current
}

/// Repeatedly index the peaks with `ub` and refit it.
///
/// A refit is accepted only if it is finite and still invertible; otherwise
/// the loop stops and the last accepted matrix is returned.
pub fn optimize_ub(ub: &Matrix3, q_vectors: &[Vector3], tolerance: f64, iterations: usize) -> Matrix3 {
    let mut current = *ub;
    for _ in 0..iterations {
        let indexed = match get_indexed_peaks(&current, q_vectors, tolerance) {
            Ok(indexed) if indexed.num_indexed() >= 3 => indexed,
            _ => break,
        };
        match best_fit_ub(&indexed.miller_indices, &indexed.q_vectors) {
            Ok((refined, _)) if invert_ub(&refined).is_ok() => current = refined,
            _ => break,
        }
    }
    current
}
