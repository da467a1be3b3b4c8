//! Progressive UB builder: scan a small trusted subset, then grow it.

use tracing::debug;

use super::observer::IndexingObserver;
use super::{require_peaks, scan_for_ub, FindUbConfig, ScanConfig, UbFit};
use crate::error::{IndexingError, Result};
use crate::indexing::get_indexed_peaks;
use crate::lattice::{invert_ub, LatticeParameters};
use crate::refine::best_fit_ub;
use crate::{Matrix3, Vector3};

/// Find UB for a cell with known lattice parameters.
///
/// Peaks are ordered by increasing |Q|, the `num_initial` shortest ones are
/// scanned with the two-pass orientation scan, and the resulting UB is
/// refit while the peak set grows to `round(growth_factor · n + 3)` peaks
/// per step until every peak is included. A refit that fails is reported to
/// `observer` and the previous UB is kept. A last refit over all peaks
/// follows, and the returned fit is scored against all of `q_vectors`.
pub fn find_ub(
    q_vectors: &[Vector3],
    lattice: &LatticeParameters,
    config: &FindUbConfig,
    observer: &mut dyn IndexingObserver,
) -> Result<UbFit> {
    require_peaks(q_vectors, 3)?;
    lattice.validate()?;
    if config.num_initial == 0 {
        return Err(IndexingError::InvalidArgument(
            "num_initial must be at least 1".to_string(),
        ));
    }
    if !(config.growth_factor >= 1.0 && config.growth_factor.is_finite()) {
        return Err(IndexingError::InvalidArgument(format!(
            "growth_factor must be at least 1, got {}",
            config.growth_factor
        )));
    }

    let mut sorted = q_vectors.to_vec();
    sorted.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));
    let total = sorted.len();
    let mut num = config.num_initial.min(total);

    let scan_config = ScanConfig {
        degrees_per_step: config.degrees_per_step,
        tolerance: config.tolerance,
        two_pass: true,
    };
    let scan = scan_for_ub(&sorted[..num], lattice, &scan_config)?;
    debug!(
        "Initial scan over {} peaks: error {:.6}",
        num, scan.fit_error
    );

    let mut ub = scan.ub;
    while num < total {
        num = ((config.growth_factor * num as f64 + 3.0).round() as usize).min(total);
        ub = refit(ub, &sorted[..num], config, observer);
    }
    ub = refit(ub, &sorted, config, observer);

    let fit = UbFit::evaluate(ub, q_vectors, config.tolerance)?;
    observer.finished(fit.num_indexed, fit.fit_error);
    Ok(fit)
}

/// Index `peaks` with `ub` and refit, `refine_iterations` times. Stops at
/// the first failure, keeping the last UB that worked, and reports the
/// state afterwards as one growth step.
fn refit(
    mut ub: Matrix3,
    peaks: &[Vector3],
    config: &FindUbConfig,
    observer: &mut dyn IndexingObserver,
) -> Matrix3 {
    for _ in 0..config.refine_iterations {
        let attempt = get_indexed_peaks(&ub, peaks, config.tolerance)
            .and_then(|indexed| best_fit_ub(&indexed.miller_indices, &indexed.q_vectors))
            .and_then(|(candidate, _)| invert_ub(&candidate).map(|_| candidate));
        match attempt {
            Ok(candidate) => ub = candidate,
            Err(err) => {
                observer.refinement_failed(peaks.len(), &err);
                break;
            }
        }
    }
    if let Ok(indexed) = get_indexed_peaks(&ub, peaks, config.tolerance) {
        observer.growth_step(peaks.len(), indexed.num_indexed(), indexed.fit_error);
    }
    ub
}
