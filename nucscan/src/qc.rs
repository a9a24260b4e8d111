//! Per-cell quality metrics and cell filtering.

use log::info;
use nucleus_types::{AnalysisError, CellMetadata, CountMatrix};

/// Per-cell quality metrics, computed once from the raw counts and
/// consumed read-only by the filtering policy.
#[derive(Clone, Debug)]
pub struct QcMetrics {
    /// Number of genes with a nonzero count, per cell.
    pub feature_counts: Vec<usize>,
    /// Sum of counts, per cell.
    pub total_counts: Vec<u64>,
    /// Fraction of each cell's counts attributed to mitochondrial genes.
    pub mito_fractions: Vec<f64>,
}

/// Filtering policy for [`filter_cells`].
#[derive(Clone, Debug)]
pub struct QcThresholds {
    /// Cells with fewer expressed genes are dropped regardless of the
    /// other thresholds (ingestion floor).
    pub min_feature_count: usize,
    /// Cells with more expressed genes are dropped (doublet proxy).
    pub max_feature_count: usize,
    /// Cells with a mitochondrial fraction at or above this ceiling are
    /// dropped (stress/lysis proxy).
    pub max_mito_fraction: f64,
}

/// Computes per-cell metrics from the raw counts. `is_mito` decides which
/// gene ids count toward the mitochondrial fraction.
pub fn compute_qc(matrix: &CountMatrix, is_mito: impl Fn(&str) -> bool) -> QcMetrics {
    let mito_gene: Vec<bool> = matrix.gene_ids().iter().map(|id| is_mito(id)).collect();

    let n_cells = matrix.n_cells();
    let mut feature_counts = Vec::with_capacity(n_cells);
    let mut total_counts = Vec::with_capacity(n_cells);
    let mut mito_fractions = Vec::with_capacity(n_cells);

    for row in matrix.counts().outer_iterator() {
        let mut features = 0usize;
        let mut total = 0u64;
        let mut mito = 0u64;
        for (gene, &count) in row.iter() {
            features += 1;
            total += u64::from(count);
            if mito_gene[gene] {
                mito += u64::from(count);
            }
        }
        feature_counts.push(features);
        total_counts.push(total);
        // Every ingested cell has at least one nonzero count, so the
        // fraction is well defined.
        mito_fractions.push(mito as f64 / total as f64);
    }

    QcMetrics {
        feature_counts,
        total_counts,
        mito_fractions,
    }
}

/// Retains cells passing all thresholds, subsetting matrix and metadata in
/// lock-step. Fails with `EmptyResult` when nothing survives.
pub fn filter_cells(
    matrix: &CountMatrix,
    metadata: &CellMetadata,
    metrics: &QcMetrics,
    thresholds: &QcThresholds,
) -> Result<(CountMatrix, CellMetadata), AnalysisError> {
    metadata.validate_covers(matrix)?;

    let keep: Vec<usize> = (0..matrix.n_cells())
        .filter(|&cell| {
            metrics.feature_counts[cell] >= thresholds.min_feature_count
                && metrics.feature_counts[cell] <= thresholds.max_feature_count
                && metrics.mito_fractions[cell] < thresholds.max_mito_fraction
        })
        .collect();

    if keep.is_empty() {
        return Err(AnalysisError::EmptyResult(format!(
            "no cell passed QC thresholds {thresholds:?}"
        )));
    }
    info!(
        "QC retained {} of {} cells",
        keep.len(),
        matrix.n_cells()
    );

    let filtered = matrix.select_cells(&keep);
    let filtered_metadata = metadata.subset_to(&filtered)?;
    Ok((filtered, filtered_metadata))
}
