//! Library-size normalization, variable-feature selection, and
//! standardization of the selected features.

use crate::stats::{mean_var, median_mut};
use log::info;
use ndarray::Array2;
use nucleus_types::{AnalysisError, CountMatrix, NormalizedMatrix, ScaledMatrix};
use sprs::CsMat;

/// Genes whose mean normalized expression does not clear this floor are
/// excluded from variable-feature ranking.
const EXPRESSION_FLOOR: f64 = 1e-12;

/// Number of mean-quantile bins used to standardize dispersions.
const DISPERSION_BINS: usize = 20;

/// Clip cap applied during standardization, in standard deviations.
pub const DEFAULT_CLIP: f64 = 10.0;

/// Library-size normalization followed by `ln(1 + x)`.
///
/// Each cell's counts are scaled so its total equals `target_sum`; with
/// `None` the median of the per-cell totals is used. The sparsity pattern
/// is unchanged.
pub fn normalize(matrix: &CountMatrix, target_sum: Option<f64>) -> NormalizedMatrix {
    let totals: Vec<f64> = matrix
        .counts()
        .outer_iterator()
        .map(|row| row.iter().map(|(_, &c)| f64::from(c)).sum())
        .collect();

    let target = match target_sum {
        Some(t) => t,
        None => {
            let mut totals = totals.clone();
            median_mut(&mut totals).map_or(1.0, |m| m.max(1.0))
        }
    };

    let counts = matrix.counts();
    let mut values = Vec::with_capacity(counts.nnz());
    for (row, vec) in counts.outer_iterator().enumerate() {
        let scale = target / totals[row];
        for (_, &count) in vec.iter() {
            values.push((f64::from(count) * scale).ln_1p());
        }
    }
    let normalized = CsMat::new(
        (counts.rows(), counts.cols()),
        counts.indptr().raw_storage().to_vec(),
        counts.indices().to_vec(),
        values,
    );

    NormalizedMatrix::new(
        matrix.barcodes().to_vec(),
        matrix.gene_ids().to_vec(),
        normalized,
    )
}

/// Per-gene mean and variance of the normalized values, zeros included.
fn gene_moments(matrix: &NormalizedMatrix) -> (Vec<f64>, Vec<f64>) {
    let n_cells = matrix.n_cells() as f64;
    let gene_major = matrix.to_gene_major();

    let mut means = vec![0.0; matrix.n_genes()];
    let mut vars = vec![0.0; matrix.n_genes()];
    for (gene, col) in gene_major.outer_iterator().enumerate() {
        let sum: f64 = col.iter().map(|(_, &v)| v).sum();
        let sum_sq: f64 = col.iter().map(|(_, &v)| v * v).sum();
        let mean = sum / n_cells;
        means[gene] = mean;
        vars[gene] = sum_sq / n_cells - mean * mean;
    }
    (means, vars)
}

/// Selects the `n` most variable genes by binned dispersion z-scores.
///
/// Genes clearing the expression floor are binned by mean-expression
/// quantile; within each bin dispersions (variance over mean) are
/// standardized, and genes are ranked by the resulting z-score. The
/// returned column indices are sorted ascending.
pub fn select_variable_features(
    matrix: &NormalizedMatrix,
    n: usize,
) -> Result<Vec<usize>, AnalysisError> {
    let (means, vars) = gene_moments(matrix);

    let mut expressed: Vec<usize> = (0..matrix.n_genes())
        .filter(|&g| means[g] > EXPRESSION_FLOOR)
        .collect();
    if expressed.len() < n {
        return Err(AnalysisError::InsufficientFeatures {
            requested: n,
            available: expressed.len(),
        });
    }

    // Quantile bins over mean expression; dispersion standardized per bin.
    expressed.sort_by(|&a, &b| {
        means[a]
            .partial_cmp(&means[b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    // At least two genes per bin, or the within-bin spread is degenerate.
    let n_bins = DISPERSION_BINS.min(expressed.len() / 2).max(1);
    let bin_size = expressed.len().div_ceil(n_bins);

    let mut z_scores = vec![f64::NEG_INFINITY; matrix.n_genes()];
    for bin in expressed.chunks(bin_size) {
        let dispersions: Vec<f64> = bin.iter().map(|&g| vars[g] / means[g]).collect();
        let (bin_mean, bin_var) = mean_var(&dispersions);
        let bin_sd = bin_var.sqrt();
        for (&gene, &dispersion) in bin.iter().zip(&dispersions) {
            z_scores[gene] = if bin_sd > 0.0 {
                (dispersion - bin_mean) / bin_sd
            } else {
                0.0
            };
        }
    }

    let mut ranked = expressed;
    ranked.sort_by(|&a, &b| {
        z_scores[b]
            .partial_cmp(&z_scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut selected: Vec<usize> = ranked.into_iter().take(n).collect();
    selected.sort_unstable();
    info!("selected {} variable features", selected.len());
    Ok(selected)
}

/// Standardizes the selected features to zero mean and unit variance,
/// clipping standardized values to `±clip`. Densifies.
///
/// Zero-variance features come out as all-zero columns.
pub fn scale(matrix: &NormalizedMatrix, features: &[usize], clip: f64) -> ScaledMatrix {
    let n_cells = matrix.n_cells();
    let gene_major = matrix.to_gene_major();
    let mut values = Array2::<f64>::zeros((n_cells, features.len()));

    for (out_col, &gene) in features.iter().enumerate() {
        let col = gene_major.outer_view(gene);
        let mut dense = vec![0.0; n_cells];
        if let Some(col) = col {
            for (cell, &v) in col.iter() {
                dense[cell] = v;
            }
        }
        let (mean, var) = mean_var(&dense);
        let sd = var.sqrt();
        if sd == 0.0 {
            continue;
        }
        for (cell, v) in dense.into_iter().enumerate() {
            values[[cell, out_col]] = ((v - mean) / sd).clamp(-clip, clip);
        }
    }

    let feature_ids = features
        .iter()
        .map(|&g| matrix.gene_ids()[g].clone())
        .collect();
    ScaledMatrix::new(matrix.barcodes().to_vec(), feature_ids, values)
}

#[cfg(test)]
mod test_normalization {
    use super::*;
    use approx::assert_relative_eq;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[test]
    fn test_normalize_hand_computed() {
        // cell0 totals 4, cell1 totals 8; target 8.
        let matrix = CountMatrix::from_triplets(
            names("c", 2),
            names("g", 2),
            &[(0, 0, 1), (0, 1, 3), (1, 0, 8)],
        )
        .unwrap();
        let norm = normalize(&matrix, Some(8.0));
        assert_relative_eq!(*norm.values().get(0, 0).unwrap(), 3.0f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(*norm.values().get(0, 1).unwrap(), 7.0f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(*norm.values().get(1, 0).unwrap(), 9.0f64.ln(), epsilon = 1e-12);
        assert_eq!(norm.values().get(1, 1), None);
    }

    #[test]
    fn test_normalization_is_scale_invariant() {
        let base = CountMatrix::from_triplets(
            names("c", 2),
            names("g", 3),
            &[(0, 0, 2), (0, 2, 6), (1, 1, 4)],
        )
        .unwrap();
        // Same matrix with every count in cell 0 multiplied by 7.
        let scaled = CountMatrix::from_triplets(
            names("c", 2),
            names("g", 3),
            &[(0, 0, 14), (0, 2, 42), (1, 1, 4)],
        )
        .unwrap();

        let a = normalize(&base, Some(1_000.0));
        let b = normalize(&scaled, Some(1_000.0));
        for gene in 0..3 {
            let va = a.values().get(0, gene).copied().unwrap_or(0.0);
            let vb = b.values().get(0, gene).copied().unwrap_or(0.0);
            assert_relative_eq!(va, vb, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_median_target_default() {
        // Totals are 2, 10, 100; median 10. Cell 0 scales by 5.
        let matrix = CountMatrix::from_triplets(
            names("c", 3),
            names("g", 1),
            &[(0, 0, 2), (1, 0, 10), (2, 0, 100)],
        )
        .unwrap();
        let norm = normalize(&matrix, None);
        assert_relative_eq!(*norm.values().get(0, 0).unwrap(), 11.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_select_variable_features_prefers_dispersed_genes() {
        // g0 is flat across cells, g1 varies strongly, g2 varies mildly.
        let mut entries = Vec::new();
        for cell in 0..10 {
            entries.push((cell, 0, 5));
            entries.push((cell, 1, if cell % 2 == 0 { 1 } else { 20 }));
            entries.push((cell, 2, 5 + (cell % 2) as u32));
        }
        let matrix = CountMatrix::from_triplets(names("c", 10), names("g", 3), &entries).unwrap();
        let norm = normalize(&matrix, Some(100.0));

        let selected = select_variable_features(&norm, 1).unwrap();
        assert_eq!(selected, vec![1]);
    }

    #[test]
    fn test_too_few_expressed_genes() {
        let matrix =
            CountMatrix::from_triplets(names("c", 2), names("g", 4), &[(0, 0, 1), (1, 0, 2)])
                .unwrap();
        let norm = normalize(&matrix, Some(100.0));
        let err = select_variable_features(&norm, 3).unwrap_err();
        match err {
            AnalysisError::InsufficientFeatures {
                requested,
                available,
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_scale_centers_and_standardizes() {
        let mut entries = Vec::new();
        for cell in 0..4 {
            entries.push((cell, 0, (cell as u32 + 1) * 2));
            entries.push((cell, 1, 3));
        }
        let matrix = CountMatrix::from_triplets(names("c", 4), names("g", 2), &entries).unwrap();
        let norm = normalize(&matrix, Some(10.0));
        let scaled = scale(&norm, &[0, 1], DEFAULT_CLIP);

        assert_eq!(scaled.n_cells(), 4);
        assert_eq!(scaled.n_features(), 2);
        for col in 0..2 {
            let column = scaled.values().column(col);
            let mean: f64 = column.sum() / 4.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
        }
        let var0: f64 = scaled
            .values()
            .column(0)
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            / 4.0;
        assert_relative_eq!(var0, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_clips_outliers() {
        // 9 identical cells plus one with an inverted gene ratio; the
        // outlier standardizes to |z| = 3, which a cap of 1.0 must bound.
        let mut entries: Vec<(usize, usize, u32)> = Vec::new();
        for cell in 0..9 {
            entries.push((cell, 0, 1));
            entries.push((cell, 1, 9));
        }
        entries.push((9, 0, 9));
        entries.push((9, 1, 1));
        let matrix = CountMatrix::from_triplets(names("c", 10), names("g", 2), &entries).unwrap();
        let norm = normalize(&matrix, Some(5.0));
        let scaled = scale(&norm, &[0, 1], 1.0);
        for v in scaled.values().iter() {
            assert!(v.abs() <= 1.0 + 1e-12);
        }
    }
}
