//! # ubfinder
//!
//! Orientation-matrix search and Miller indexing for single-crystal
//! diffraction peaks.
//!
//! Given a list of measured peak positions in reciprocal space (Q-vectors,
//! using the `|Q| = 1/d` convention with no factor of 2π) and, optionally,
//! the lattice parameters of the crystal, `ubfinder` finds the 3×3 `UB`
//! matrix with `Q ≈ UB · (h, k, l)` and assigns integer Miller indices to the
//! peaks that it indexes.
//!
//! ## Example
//!
//! ```no_run
//! use ubfinder::{find_ub, FindUbConfig, LatticeParameters, TracingObserver, Vector3};
//!
//! let q_vectors: Vec<Vector3> = vec![
//!     Vector3::new(-0.57582, -0.35322, -0.19974),
//!     Vector3::new(-1.41754, -0.78704, -0.75974),
//!     Vector3::new(-1.12030, -0.53578, -0.27559),
//!     // ... more peaks ...
//! ];
//!
//! let lattice = LatticeParameters::new(6.6, 9.7, 9.9, 84.0, 71.0, 70.0);
//! let config = FindUbConfig {
//!     tolerance: 0.2,
//!     ..Default::default()
//! };
//!
//! let fit = find_ub(&q_vectors, &lattice, &config, &mut TracingObserver).unwrap();
//! println!("UB = {}", fit.ub);
//! println!("Indexed {} peaks, error {:.5}", fit.num_indexed, fit.fit_error);
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Direction sampling**: candidate plane normals are drawn from an
//!    approximately uniform hemisphere, or from a circle of directions at a
//!    fixed angle from an already-found axis
//! 2. **Indexing**: a real-space edge vector `d` (length = edge length)
//!    indexes a peak in one direction when `d · Q` is within tolerance of an
//!    integer; three edges, or `UB⁻¹`, index a peak in all three directions
//! 3. **Refinement**: linear least squares via QR factorization refines a
//!    single edge vector from 1D indices, or a full `UB` from `(hkl, Q)` pairs
//! 4. **Search**: several strategies combine the above: a sequential
//!    a→b→c search, a full orientation scan over (a, b) with derived c,
//!    independent per-axis candidate lists recombined afterwards, and a
//!    search that only needs a range of edge lengths
//! 5. **Progressive refinement**: starting from the lowest-|Q| peaks, the
//!    trusted subset grows geometrically and `UB` is re-optimized each step
//!
//! Progress diagnostics are reported through the [`IndexingObserver`]
//! trait; [`TracingObserver`] forwards them to `tracing`.

pub mod directions;
pub mod error;
pub mod indexing;
pub mod lattice;
pub mod refine;
pub mod search;

pub use directions::{make_circle_directions, make_hemisphere_directions};
pub use error::{IndexingError, Result};
pub use indexing::{
    get_indexed_peaks, get_indexed_peaks_1d, get_indexed_peaks_3d, indexing_std_dev,
    number_indexed, valid_index, IndexedPeaks, IndexedPeaks1D,
};
pub use lattice::{angle_degrees, make_c_dir, LatticeParameters};
pub use refine::{best_fit_direction, best_fit_ub, optimize_direction, optimize_ub};
pub use search::{
    find_ub, find_ub_from_candidate_lists, find_ub_sequential, find_ub_without_lattice,
    grow_indexed_set, possible_direction_lists, scan_for_edge_vectors, scan_for_ub,
    select_direction, CandidateConfig, CellAxis, FindUbConfig, IndexingObserver,
    LatticeFreeConfig, NoopObserver, RefinementStep, ScanConfig, ScanResult, SequentialConfig,
    TracingObserver, UbFit,
};

// Commonly used types
// All of the math is done in 64-bit; the least-squares fits are sensitive to
// rounding once a few hundred peaks are included.
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
