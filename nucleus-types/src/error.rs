use thiserror::Error;
use vigil::CancelledError;

/// Failure modes of the analysis pipeline.
///
/// Structural errors (shape mismatches) and empty-output conditions are
/// fatal and propagate immediately; statistical per-item edge cases
/// (zero-variance genes, undersized pathways) are not errors and are
/// handled by skip-and-continue at the call site.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Cell or gene identifiers disagree between a matrix and a metadata
    /// table, or constructor inputs are dimensionally inconsistent.
    #[error("input shape mismatch: {0}")]
    InputShape(String),

    /// A filtering or grouping step produced zero entities.
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// More principal components were requested than the matrix supports.
    #[error("rank deficiency: requested {requested} components, but the matrix supports at most {max_rank}")]
    RankDeficiency {
        /// Number of components requested
        requested: usize,
        /// Numerical rank bound of the input
        max_rank: usize,
    },

    /// Too few features passed the minimum-expression floor.
    #[error("insufficient features: {available} pass the expression floor, {requested} requested")]
    InsufficientFeatures {
        /// Number of features requested
        requested: usize,
        /// Number of qualifying features
        available: usize,
    },

    /// Too few genes passed the enrichment score floor.
    #[error("insufficient genes: {available} pass the score floor, at least {minimum} required")]
    InsufficientGenes {
        /// Configured minimum
        minimum: usize,
        /// Number of qualifying genes
        available: usize,
    },

    /// A numerical routine (QR/SVD factorization) failed.
    #[error("numerical failure: {0}")]
    Numeric(String),

    /// A named comparison group has no member cells.
    #[error("comparison group {0:?} has no cells")]
    EmptyGroup(String),

    /// The computation was cancelled from the controlling side.
    #[error("cancelled")]
    Cancelled(#[from] CancelledError),
}
