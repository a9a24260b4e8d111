//! # nucscan: Single-Nucleus RNA-seq Analysis in Rust

/// Graph clustering over the shared-neighbor graph
pub mod cluster;

/// Dimensionality reduction methods
pub mod dim_red;

/// Seeded 2-D embedding of the neighbor graph
pub mod layout;

/// Nearest-neighbor and shared-neighbor graphs
pub mod nn;

/// Count matrix normalization and feature selection
pub mod normalization;

/// Staged end-to-end analysis driver
pub mod pipeline;

/// Per-cell quality control metrics and filtering
pub mod qc;

pub(crate) mod stats;
