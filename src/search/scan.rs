//! Exhaustive orientation scan over (a, b) with c derived from the cell.

use std::cmp::Ordering;

use rayon::prelude::*;
use tracing::debug;

use super::{require_peaks, require_positive, ScanConfig, ScanResult};
use crate::directions::{make_circle_directions, make_hemisphere_directions};
use crate::error::{IndexingError, Result};
use crate::lattice::{make_c_dir, ub_from_abc, LatticeParameters};
use crate::Vector3;

/// One scored (a, b, c) triple. `order` is its position in the scan so ties
/// are broken the same way regardless of thread scheduling.
#[derive(Debug, Clone)]
struct Triple {
    a: Vector3,
    b: Vector3,
    c: Vector3,
    num_indexed: usize,
    error: f64,
    order: (usize, usize),
}

impl Triple {
    /// `Less` means `self` is the better triple.
    fn rank(&self, other: &Self, two_pass: bool) -> Ordering {
        let by_count = if two_pass {
            other.num_indexed.cmp(&self.num_indexed)
        } else {
            Ordering::Equal
        };
        by_count
            .then(self.error.total_cmp(&other.error))
            .then(self.order.cmp(&other.order))
    }
}

/// Squared rounding error of the three projections summed over all peaks,
/// and the number of peaks whose three projections are all within
/// `tolerance` of an integer.
fn score(a: &Vector3, b: &Vector3, c: &Vector3, q_vectors: &[Vector3], tolerance: f64) -> (usize, f64) {
    let mut error = 0.0;
    let mut count = 0;
    for q in q_vectors {
        let hkl = Vector3::new(a.dot(q), b.dot(q), c.dot(q));
        let dev = hkl - hkl.map(f64::round);
        error += dev.norm_squared();
        if dev.iter().all(|d| d.abs() <= tolerance) {
            count += 1;
        }
    }
    (count, error)
}

/// Scan every orientation of the cell described by `lattice` and return the
/// one whose edge vectors project the peaks closest to integers.
///
/// The a edge runs over a hemisphere of `round(90 / degrees_per_step)`
/// bands. For each a, the b edge runs over `round(4 sinγ · n_a)` directions
/// on the cone at γ around it, and c follows from the cell angles. With
/// [`ScanConfig::two_pass`] set, only the triples indexing the most peaks
/// within tolerance compete on error.
///
/// The cost is proportional to `n_a³ · |q_vectors|`, so the scan is only
/// meant for coarse steps and small peak sets.
pub fn scan_for_ub(
    q_vectors: &[Vector3],
    lattice: &LatticeParameters,
    config: &ScanConfig,
) -> Result<ScanResult> {
    require_peaks(q_vectors, 1)?;
    require_positive("degrees_per_step", config.degrees_per_step)?;
    lattice.validate()?;

    let num_a_steps = (90.0 / config.degrees_per_step).round() as i32;
    let num_b_steps = (4.0 * lattice.gamma.to_radians().sin() * num_a_steps as f64).round() as i32;
    if num_a_steps < 1 || num_b_steps < 1 {
        return Err(IndexingError::InvalidArgument(format!(
            "degrees_per_step {} is too coarse to scan",
            config.degrees_per_step
        )));
    }

    let a_dirs = make_hemisphere_directions(num_a_steps)?;
    debug!(
        "Scanning {} a-directions x {} b-directions over {} peaks",
        a_dirs.len(),
        num_b_steps,
        q_vectors.len()
    );

    let two_pass = config.two_pass;
    let per_a: Vec<Triple> = a_dirs
        .par_iter()
        .enumerate()
        .map(|(a_index, a_unit)| -> Result<Triple> {
            let a = a_unit * lattice.a;
            let b_dirs = make_circle_directions(num_b_steps, &a, lattice.gamma)?;
            let mut best: Option<Triple> = None;
            for (b_index, b_unit) in b_dirs.iter().enumerate() {
                let b = b_unit * lattice.b;
                let c = make_c_dir(&a, &b, lattice.c, lattice.alpha, lattice.beta, lattice.gamma);
                let (num_indexed, error) = score(&a, &b, &c, q_vectors, config.tolerance);
                let candidate = Triple {
                    a,
                    b,
                    c,
                    num_indexed,
                    error,
                    order: (a_index, b_index),
                };
                let replace = match &best {
                    Some(current) => candidate.rank(current, two_pass) == Ordering::Less,
                    None => true,
                };
                if replace {
                    best = Some(candidate);
                }
            }
            best.ok_or_else(|| IndexingError::NoSolution("empty b-direction circle".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let best = per_a
        .into_iter()
        .min_by(|x, y| x.rank(y, two_pass))
        .ok_or_else(|| IndexingError::NoSolution("no orientations scanned".to_string()))?;

    debug!(
        "Best orientation indexes {} peaks with error {:.6}",
        best.num_indexed, best.error
    );

    let ub = ub_from_abc(&best.a, &best.b, &best.c)?;
    Ok(ScanResult {
        a_dir: best.a,
        b_dir: best.b,
        c_dir: best.c,
        ub,
        fit_error: best.error,
    })
}
