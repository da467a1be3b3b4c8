//! Candidate plane-normal directions for brute-force lattice searches.
//!
//! Two generators are provided:
//!
//! - [`make_hemisphere_directions`] covers the half-sphere `y ≥ 0` with
//!   roughly uniform spacing. A direction and its negative index the same
//!   planes, so only one of each antipodal pair is produced.
//! - [`make_circle_directions`] produces the cone of directions at a fixed
//!   angle from a given axis, used once one cell edge is known and the next
//!   edge must form the cell angle with it.

use std::f64::consts::PI;

use nalgebra::{Rotation3, Unit};

use crate::error::{IndexingError, Result};
use crate::Vector3;

/// Directions distributed over the upper hemisphere (`y ≥ 0`) with angular
/// separation of approximately `90° / n_steps`.
///
/// Latitude bands are spaced `π / (2 n_steps)` apart in the polar angle φ
/// measured from +y. Each band gets a number of azimuth samples proportional
/// to its circumference. The pole contributes the single vector `(0, 1, 0)`
/// and the equator only covers half a circle.
pub fn make_hemisphere_directions(n_steps: i32) -> Result<Vec<Vector3>> {
    if n_steps <= 0 {
        return Err(IndexingError::InvalidArgument(format!(
            "n_steps must be greater than 0, got {n_steps}"
        )));
    }

    let angle_step = PI / (2.0 * n_steps as f64);
    let mut directions = Vec::new();

    for band in 0..=n_steps {
        let phi = band as f64 * angle_step;
        let r = phi.sin();
        let y = phi.cos();

        let n_theta = (2.0 * PI * r / angle_step).round() as usize;
        if n_theta == 0 {
            directions.push(Vector3::new(0.0, 1.0, 0.0));
            continue;
        }
        let theta_step = 2.0 * PI / n_theta as f64;

        // Half of the equator avoids listing both v and -v.
        let last_theta = if band == n_steps {
            PI - theta_step / 2.0
        } else {
            2.0 * PI - theta_step / 2.0
        };

        let mut j = 0usize;
        loop {
            let theta = j as f64 * theta_step;
            if theta >= last_theta {
                break;
            }
            let (sin_t, cos_t) = theta.sin_cos();
            directions.push(Vector3::new(r * cos_t, y, r * sin_t));
            j += 1;
        }
    }

    Ok(directions)
}

/// `n_steps` unit vectors evenly spaced in azimuth around `axis`, each making
/// `angle_degrees` with it.
///
/// The first vector is the unit axis rotated by `angle_degrees` about a
/// perpendicular built from the standard basis vector least parallel to the
/// axis; the rest follow by right-handed rotations of `360° / n_steps` about
/// the axis.
pub fn make_circle_directions(
    n_steps: i32,
    axis: &Vector3,
    angle_degrees: f64,
) -> Result<Vec<Vector3>> {
    if n_steps <= 0 {
        return Err(IndexingError::InvalidArgument(format!(
            "n_steps must be greater than 0, got {n_steps}"
        )));
    }

    let max_component = axis.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if max_component == 0.0 || !max_component.is_finite() {
        return Err(IndexingError::InvalidArgument(
            "axis vector must be non-zero".to_string(),
        ));
    }

    // First index with the smallest |component| wins ties.
    let mut min_index = 0;
    for i in 1..3 {
        if axis[i].abs() < axis[min_index].abs() {
            min_index = i;
        }
    }
    let mut second_vec = Vector3::zeros();
    second_vec[min_index] = 1.0;

    let unit_axis = Unit::new_normalize(*axis);
    let perp = Unit::new_normalize(second_vec.cross(unit_axis.as_ref()));

    let tilt = Rotation3::from_axis_angle(&perp, angle_degrees.to_radians());
    let vector_at_angle = (tilt * unit_axis.into_inner()).normalize();

    let angle_step = 2.0 * PI / n_steps as f64;
    let directions = (0..n_steps)
        .map(|i| Rotation3::from_axis_angle(&unit_axis, i as f64 * angle_step) * vector_at_angle)
        .collect();

    Ok(directions)
}
