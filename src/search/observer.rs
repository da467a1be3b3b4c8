//! Progress reporting for the search strategies.
//!
//! The strategies never print. They call an [`IndexingObserver`] at fixed
//! checkpoints; the default methods ignore everything, so an observer only
//! implements what it cares about.

use std::fmt;

use tracing::{debug, info, warn};

use crate::error::IndexingError;

/// Which cell edge a refinement step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellAxis {
    A,
    B,
    C,
}

impl fmt::Display for CellAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellAxis::A => "a",
            CellAxis::B => "b",
            CellAxis::C => "c",
        };
        f.write_str(name)
    }
}

/// State of one edge after one index-and-refit pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementStep {
    pub axis: CellAxis,
    /// Zero-based pass number.
    pub iteration: usize,
    /// Squared residual of the 1D fit.
    pub fit_error: f64,
    /// Peaks indexed along this edge before the fit.
    pub num_indexed: usize,
    /// Length of the refined edge vector (Å).
    pub length: f64,
    /// Angles (degrees) between the refined edge and the edges found before
    /// it: empty for a, `[γ]` for b, `[α, β]` for c.
    pub angles: Vec<f64>,
}

/// Receives progress from the search strategies.
pub trait IndexingObserver {
    /// An edge vector was re-indexed and refit.
    fn refinement_step(&mut self, _step: &RefinementStep) {}

    /// A candidate edge was chosen from a direction list, before refinement.
    fn direction_selected(&mut self, _axis: CellAxis, _num_indexed: usize) {}

    /// A per-edge candidate list is complete.
    fn candidates_found(&mut self, _axis: CellAxis, _count: usize) {}

    /// The lattice-free scan kept `count` distinct edge vectors, each
    /// indexing `max_indexed` of the scanned peaks.
    fn edge_vectors_found(&mut self, _count: usize, _max_indexed: usize) {}

    /// A trial cell built from the edge vector list, starting at position
    /// `start`, was grown over all peaks.
    fn cell_evaluated(&mut self, _start: usize, _num_indexed: usize, _fit_error: f64) {}

    /// The progressive builder finished a growth step.
    fn growth_step(&mut self, _num_peaks: usize, _num_indexed: usize, _fit_error: f64) {}

    /// A refit failed; the previous estimate is kept.
    fn refinement_failed(&mut self, _num_peaks: usize, _error: &IndexingError) {}

    /// The search produced its final UB.
    fn finished(&mut self, _num_indexed: usize, _fit_error: f64) {}
}

/// Ignores all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IndexingObserver for NoopObserver {}

/// Forwards progress to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl IndexingObserver for TracingObserver {
    fn refinement_step(&mut self, step: &RefinementStep) {
        debug!(
            "{}-edge pass {}: {} indexed, error {:.6}, length {:.4}, angles {:?}",
            step.axis, step.iteration, step.num_indexed, step.fit_error, step.length, step.angles
        );
    }

    fn direction_selected(&mut self, axis: CellAxis, num_indexed: usize) {
        debug!("Selected {}-edge direction indexing {} peaks", axis, num_indexed);
    }

    fn candidates_found(&mut self, axis: CellAxis, count: usize) {
        info!("{} candidate directions for the {} edge", count, axis);
    }

    fn edge_vectors_found(&mut self, count: usize, max_indexed: usize) {
        info!(
            "{} candidate edge vectors, each indexing {} peaks",
            count, max_indexed
        );
    }

    fn cell_evaluated(&mut self, start: usize, num_indexed: usize, fit_error: f64) {
        debug!(
            "Cell from edge {}: {} indexed, error {:.6}",
            start, num_indexed, fit_error
        );
    }

    fn growth_step(&mut self, num_peaks: usize, num_indexed: usize, fit_error: f64) {
        info!(
            "Refit with {} peaks: {} indexed, error {:.6}",
            num_peaks, num_indexed, fit_error
        );
    }

    fn refinement_failed(&mut self, num_peaks: usize, error: &IndexingError) {
        warn!("Refit with {} peaks failed ({}), continuing", num_peaks, error);
    }

    fn finished(&mut self, num_indexed: usize, fit_error: f64) {
        info!("Final UB indexes {} peaks, error {:.6}", num_indexed, fit_error);
    }
}
