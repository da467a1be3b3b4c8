//! Sequential a → b → c search.
//!
//! The a edge is found on a fine hemisphere, b on a narrow band of cones at
//! γ around the refined a, and c from a small grid of cell angles around α
//! and β. Each edge is refined by alternating 1D indexing and least squares
//! before the next one is searched.

use super::observer::{CellAxis, IndexingObserver, RefinementStep};
use super::{fit_indexed_peaks, require_peaks, select_direction, SequentialConfig, UbFit};
use crate::directions::{make_circle_directions, make_hemisphere_directions};
use crate::error::{IndexingError, Result};
use crate::indexing::{get_indexed_peaks_1d, get_indexed_peaks_3d};
use crate::lattice::{angle_degrees, make_c_dir, LatticeParameters};
use crate::refine::best_fit_direction;
use crate::Vector3;

/// Half width in degrees of the band of cones searched for b.
const GAMMA_BAND_HALF_WIDTH: f64 = 0.5;

/// Step in degrees of the α/β grid used to build c candidates, and the
/// number of steps on each side of the nominal angle.
const C_ANGLE_STEP: f64 = 1.0 / 8.0;
const C_ANGLE_STEPS: i32 = 4;

/// Largest hemisphere resolution whose b band size still fits an `i32`.
const MAX_HEMISPHERE_STEPS: i32 = i32::MAX / 10;

/// Find UB by locating the a, b and c edges one after another.
///
/// Needs at least three peaks. The returned fit is scored against all of
/// `q_vectors` with the configured tolerance.
pub fn find_ub_sequential(
    q_vectors: &[Vector3],
    lattice: &LatticeParameters,
    config: &SequentialConfig,
    observer: &mut dyn IndexingObserver,
) -> Result<UbFit> {
    require_peaks(q_vectors, 3)?;
    lattice.validate()?;
    let tol = config.tolerance;
    if !(1..=MAX_HEMISPHERE_STEPS).contains(&config.hemisphere_steps) {
        return Err(IndexingError::InvalidArgument(format!(
            "hemisphere_steps must be in 1..={MAX_HEMISPHERE_STEPS}, got {}",
            config.hemisphere_steps
        )));
    }
    let per_cone = 10 * config.hemisphere_steps;

    // a: whole hemisphere
    let hemisphere = make_hemisphere_directions(config.hemisphere_steps)?;
    let (a_unit, num_indexed) = select_direction(q_vectors, &hemisphere, lattice.a, tol)?;
    observer.direction_selected(CellAxis::A, num_indexed);
    let a_dir = refine_edge(
        a_unit * lattice.a,
        CellAxis::A,
        &[],
        q_vectors,
        tol,
        config.refine_iterations_ab,
        observer,
    );

    // b: cones at γ ± 0.5° around a
    let band_step = 90.0 / (2.0 * config.hemisphere_steps as f64);
    let num_cones = ((2.0 * GAMMA_BAND_HALF_WIDTH) / band_step + 1e-9).floor() as usize;
    let mut band = Vec::with_capacity((num_cones + 1) * per_cone as usize);
    for i in 0..=num_cones {
        let angle = lattice.gamma - GAMMA_BAND_HALF_WIDTH + i as f64 * band_step;
        band.extend(make_circle_directions(per_cone, &a_dir, angle)?);
    }
    let (b_unit, num_indexed) = select_direction(q_vectors, &band, lattice.b, tol)?;
    observer.direction_selected(CellAxis::B, num_indexed);
    let b_dir = refine_edge(
        b_unit * lattice.b,
        CellAxis::B,
        &[a_dir],
        q_vectors,
        tol,
        config.refine_iterations_ab,
        observer,
    );

    // c: both signs of the Gram construction over a small α/β grid
    let mut c_candidates = Vec::with_capacity(2 * (2 * C_ANGLE_STEPS as usize + 1).pow(2));
    for i in -C_ANGLE_STEPS..=C_ANGLE_STEPS {
        for j in -C_ANGLE_STEPS..=C_ANGLE_STEPS {
            let c = make_c_dir(
                &a_dir,
                &b_dir,
                1.0,
                lattice.alpha + i as f64 * C_ANGLE_STEP,
                lattice.beta + j as f64 * C_ANGLE_STEP,
                lattice.gamma,
            );
            let norm = c.norm();
            if norm > 0.0 && norm.is_finite() {
                let c = c / norm;
                c_candidates.push(c);
                c_candidates.push(-c);
            }
        }
    }
    let (c_unit, num_indexed) = select_direction(q_vectors, &c_candidates, lattice.c, tol)?;
    observer.direction_selected(CellAxis::C, num_indexed);
    let c_dir = refine_edge(
        c_unit * lattice.c,
        CellAxis::C,
        &[b_dir, a_dir],
        q_vectors,
        tol,
        config.refine_iterations_c,
        observer,
    );

    let indexed = get_indexed_peaks_3d(&a_dir, &b_dir, &c_dir, q_vectors, tol);
    let ub = fit_indexed_peaks(&indexed)?;
    let fit = UbFit::evaluate(ub, q_vectors, tol)?;
    observer.finished(fit.num_indexed, fit.fit_error);
    Ok(fit)
}

/// Alternate 1D indexing and least squares on one edge, keeping the last
/// usable estimate. `previous` holds the edges the reported angles are
/// measured against.
fn refine_edge(
    start: Vector3,
    axis: CellAxis,
    previous: &[Vector3],
    q_vectors: &[Vector3],
    tolerance: f64,
    iterations: usize,
    observer: &mut dyn IndexingObserver,
) -> Vector3 {
    let mut edge = start;
    for iteration in 0..iterations {
        let indexed = get_indexed_peaks_1d(&edge, q_vectors, tolerance);
        match best_fit_direction(&indexed.indices, &indexed.q_vectors) {
            Ok((refined, fit_error)) => {
                edge = refined;
                observer.refinement_step(&RefinementStep {
                    axis,
                    iteration,
                    fit_error,
                    num_indexed: indexed.num_indexed(),
                    length: edge.norm(),
                    angles: previous.iter().map(|p| angle_degrees(&edge, p)).collect(),
                });
            }
            Err(err) => {
                observer.refinement_failed(indexed.num_indexed(), &err);
                break;
            }
        }
    }
    edge
}
