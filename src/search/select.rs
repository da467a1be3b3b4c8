use rayon::prelude::*;

use super::{projection_error, require_positive};
use crate::error::{IndexingError, Result};
use crate::Vector3;

/// Pick the candidate that best indexes `q_vectors` in one dimension when
/// scaled to `length`.
///
/// Every candidate is scaled to `length` and scored by the squared rounding
/// error of its projections summed over all peaks; the lowest score wins,
/// earlier candidates winning ties. Returns the winner as a unit vector
/// together with the number of peaks it indexes within `tolerance`.
pub fn select_direction(
    q_vectors: &[Vector3],
    candidates: &[Vector3],
    length: f64,
    tolerance: f64,
) -> Result<(Vector3, usize)> {
    require_positive("edge length", length)?;

    let (_, best_index) = candidates
        .par_iter()
        .enumerate()
        .map(|(i, dir)| (projection_error(&(dir * length), q_vectors), i))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .ok_or_else(|| IndexingError::InvalidArgument("no candidate directions".to_string()))?;

    let best = candidates[best_index] * length;
    let num_indexed = q_vectors
        .iter()
        .filter(|q| {
            let proj = best.dot(q);
            (proj - proj.round()).abs() < tolerance
        })
        .count();

    let norm = best.norm();
    if norm == 0.0 || !norm.is_finite() {
        return Err(IndexingError::Degenerate(
            "selected direction has zero or non-finite length".to_string(),
        ));
    }
    Ok((best / norm, num_indexed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::make_hemisphere_directions;
    use approx::assert_abs_diff_eq;

    fn cubic_peaks(a: f64) -> Vec<Vector3> {
        let mut q = Vec::new();
        for h in -2..=2 {
            for k in -2..=2 {
                for l in -2..=2 {
                    if (h, k, l) != (0, 0, 0) {
                        q.push(Vector3::new(h as f64, k as f64, l as f64) / a);
                    }
                }
            }
        }
        q
    }

    #[test]
    fn test_selects_lattice_axis() {
        let q = cubic_peaks(5.0);
        let candidates = vec![
            Vector3::new(0.6, 0.8, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.6, 0.8),
        ];
        let (dir, count) = select_direction(&q, &candidates, 5.0, 0.1).unwrap();
        assert_abs_diff_eq!(dir.z, 1.0, epsilon = 1e-12);
        assert_eq!(count, q.len());
    }

    #[test]
    fn test_hemisphere_search_finds_an_axis() {
        let q = cubic_peaks(5.0);
        let candidates = make_hemisphere_directions(18).unwrap();
        let (dir, count) = select_direction(&q, &candidates, 5.0, 0.05).unwrap();
        assert_abs_diff_eq!(dir.norm(), 1.0, epsilon = 1e-12);
        // Scaled by 5, the winner must project every peak onto an integer.
        assert_eq!(count, q.len());
        let largest = dir.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert_abs_diff_eq!(largest, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ties_go_to_first_candidate() {
        let q = cubic_peaks(4.0);
        let candidates = vec![Vector3::x(), Vector3::y(), Vector3::z()];
        let (dir, _) = select_direction(&q, &candidates, 4.0, 0.1).unwrap();
        assert_eq!(dir, Vector3::x());
    }

    #[test]
    fn test_rejects_empty_candidates_and_bad_length() {
        let q = cubic_peaks(4.0);
        assert!(matches!(
            select_direction(&q, &[], 4.0, 0.1),
            Err(IndexingError::InvalidArgument(_))
        ));
        assert!(select_direction(&q, &[Vector3::x()], 0.0, 0.1).is_err());
    }
}
