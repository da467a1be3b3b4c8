//! Error taxonomy for the indexing engine.
//!
//! Argument errors are reported as soon as they are detected. Numerical
//! failures come out of the indexer and the least-squares refiner; the
//! refinement loops and the progressive builder absorb them and continue with
//! the previous estimate. A peak that no candidate indexes is never an error.

/// Errors produced while sampling, indexing, refining or searching.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexingError {
    /// Too few peaks or correspondences, mismatched list lengths, zero axes,
    /// non-positive step counts and similar caller mistakes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The UB matrix cannot be inverted reliably.
    #[error("UB matrix is singular or nearly so (|det| = {:.3e})", .determinant.abs())]
    SingularMatrix { determinant: f64 },
    /// The design matrix of a least-squares fit does not have full column
    /// rank; the peaks do not span three independent directions.
    #[error("least-squares design matrix is rank deficient")]
    RankDeficient,
    /// A fit produced an unusable result (zero or non-finite vector).
    #[error("degenerate result: {0}")]
    Degenerate(String),
    /// A search finished without any usable candidate.
    #[error("no solution found: {0}")]
    NoSolution(String),
}

pub type Result<T> = std::result::Result<T, IndexingError>;
