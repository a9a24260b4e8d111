//! Shared data model for the nucscan pipeline: count matrices with
//! explicit cell/gene identity, per-cell and per-gene metadata tables,
//! cluster labelings, and the pipeline error taxonomy.

#![deny(missing_docs)]

/// Error taxonomy for all pipeline stages
pub mod error;

/// Cluster labelings and structured comparison-group keys
pub mod group;

/// Count and derived expression matrices
pub mod matrix;

/// Cell and gene metadata tables
pub mod metadata;

pub use error::AnalysisError;
pub use group::{ClusterLabeling, GroupKey};
pub use matrix::{CountMatrix, NormalizedMatrix, ScaledMatrix};
pub use metadata::{CellAttrs, CellMetadata, GeneAttrs, GeneMetadata};
