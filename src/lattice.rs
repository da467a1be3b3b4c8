//! Lattice geometry helpers shared by the indexer and the search strategies.
//!
//! Real-space edge vectors `a`, `b`, `c` are the rows of `UB⁻¹`. Their lengths
//! are the cell edges in Ångström and the angles between them are the cell
//! angles, so the lattice parameters implied by any UB can be read off
//! directly.

use serde::{Deserialize, Serialize};

use crate::error::{IndexingError, Result};
use crate::{Matrix3, Vector3};

/// Smallest |det(UB)| that is still treated as invertible.
pub const MIN_UB_DETERMINANT: f64 = 1.0e-5;

/// Unit cell edge lengths (Å) and angles (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatticeParameters {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// Angle between `b` and `c`.
    pub alpha: f64,
    /// Angle between `c` and `a`.
    pub beta: f64,
    /// Angle between `a` and `b`.
    pub gamma: f64,
}

impl LatticeParameters {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    /// Check that the edges are positive and the angles close a cell of
    /// non-zero volume.
    pub fn validate(&self) -> Result<()> {
        if !(self.a > 0.0 && self.b > 0.0 && self.c > 0.0) {
            return Err(IndexingError::InvalidArgument(format!(
                "cell edges must be positive, got a={}, b={}, c={}",
                self.a, self.b, self.c
            )));
        }
        for (name, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gamma", self.gamma),
        ] {
            if !(value > 0.0 && value < 180.0) {
                return Err(IndexingError::InvalidArgument(format!(
                    "cell angle {name} must be in (0, 180) degrees, got {value}"
                )));
            }
        }
        let factor = volume_factor(self.alpha, self.beta, self.gamma);
        if !(factor > 0.0) {
            return Err(IndexingError::InvalidArgument(format!(
                "cell angles ({}, {}, {}) do not form a cell",
                self.alpha, self.beta, self.gamma
            )));
        }
        Ok(())
    }

    /// Cell volume in Å³. Zero (or NaN) for angle combinations that cannot
    /// form a cell.
    pub fn volume(&self) -> f64 {
        self.a * self.b * self.c * volume_factor(self.alpha, self.beta, self.gamma)
    }

    /// Lattice parameters implied by a UB matrix.
    pub fn from_ub(ub: &Matrix3) -> Result<Self> {
        let (a, b, c) = abc_from_ub(ub)?;
        Ok(Self::from_edges(&a, &b, &c))
    }

    /// Lattice parameters of three real-space edge vectors.
    pub fn from_edges(a: &Vector3, b: &Vector3, c: &Vector3) -> Self {
        Self {
            a: a.norm(),
            b: b.norm(),
            c: c.norm(),
            alpha: angle_degrees(b, c),
            beta: angle_degrees(c, a),
            gamma: angle_degrees(a, b),
        }
    }
}

/// `sqrt(1 - cos²α - cos²β - cos²γ + 2 cosα cosβ cosγ)` for angles in degrees.
fn volume_factor(alpha: f64, beta: f64, gamma: f64) -> f64 {
    let ca = alpha.to_radians().cos();
    let cb = beta.to_radians().cos();
    let cg = gamma.to_radians().cos();
    (1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg).sqrt()
}

/// Angle between two vectors in degrees.
///
/// The cosine is clamped to [-1, 1] so nearly parallel vectors give exactly
/// 0° or 180° instead of NaN.
pub fn angle_degrees(v1: &Vector3, v2: &Vector3) -> f64 {
    let n1 = v1.norm();
    let n2 = v2.norm();
    if n1 == 0.0 || n2 == 0.0 {
        return 0.0;
    }
    let cos = v1.dot(v2) / (n1 * n2);
    if cos >= 1.0 {
        0.0
    } else if cos <= -1.0 {
        180.0
    } else {
        cos.acos().to_degrees()
    }
}

/// Third cell edge from the first two and the cell parameters.
///
/// The components of `c` are taken relative to the orthonormal basis with
/// `e1` along `a_dir`, `e3` along `a_dir × b_dir` and `e2 = e3 × e1`:
///
/// ```text
/// c1 = c cosβ
/// c2 = c (cosα − cosγ cosβ) / sinγ
/// c3 = c V / sinγ,   V = sqrt(1 − cos²α − cos²β − cos²γ + 2 cosα cosβ cosγ)
/// ```
///
/// `a_dir` and `b_dir` only contribute their directions; `gamma` should be
/// the angle between them.
pub fn make_c_dir(
    a_dir: &Vector3,
    b_dir: &Vector3,
    c: f64,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> Vector3 {
    let cos_alpha = alpha.to_radians().cos();
    let cos_beta = beta.to_radians().cos();
    let (sin_gamma, cos_gamma) = gamma.to_radians().sin_cos();

    let c1 = c * cos_beta;
    let c2 = c * (cos_alpha - cos_gamma * cos_beta) / sin_gamma;
    let c3 = c * volume_factor(alpha, beta, gamma) / sin_gamma;

    let basis_1 = a_dir.normalize();
    let basis_3 = a_dir.cross(b_dir).normalize();
    let basis_2 = basis_3.cross(&basis_1).normalize();

    basis_1 * c1 + basis_2 * c2 + basis_3 * c3
}

/// UB matrix whose inverse has rows `a`, `b`, `c`.
pub fn ub_from_abc(a: &Vector3, b: &Vector3, c: &Vector3) -> Result<Matrix3> {
    let ub_inverse = Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]);
    ub_inverse
        .try_inverse()
        .filter(|ub| ub.iter().all(|v| v.is_finite()))
        .ok_or(IndexingError::SingularMatrix {
            determinant: ub_inverse.determinant(),
        })
}

/// Real-space edge vectors (rows of `UB⁻¹`).
pub fn abc_from_ub(ub: &Matrix3) -> Result<(Vector3, Vector3, Vector3)> {
    let ub_inverse = invert_ub(ub)?;
    Ok((
        ub_inverse.row(0).transpose(),
        ub_inverse.row(1).transpose(),
        ub_inverse.row(2).transpose(),
    ))
}

/// Invert a UB matrix, refusing matrices with `|det| < 1e-5`.
pub fn invert_ub(ub: &Matrix3) -> Result<Matrix3> {
    let determinant = ub.determinant();
    if !determinant.is_finite() || determinant.abs() < MIN_UB_DETERMINANT {
        return Err(IndexingError::SingularMatrix { determinant });
    }
    ub.try_inverse()
        .ok_or(IndexingError::SingularMatrix { determinant })
}

/// Check that a matrix is plausible as an orientation matrix: all entries
/// finite and `1e-12 < |det| ≤ 10`.
pub fn check_ub(ub: &Matrix3) -> bool {
    if ub.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let abs_det = ub.determinant().abs();
    abs_det > 1.0e-12 && abs_det <= 10.0
}

/// True if the real-space edges of `ub` form a right-handed system.
pub fn is_right_handed(ub: &Matrix3) -> Result<bool> {
    let (a, b, c) = abc_from_ub(ub)?;
    Ok(a.cross(&b).dot(&c) > 0.0)
}
