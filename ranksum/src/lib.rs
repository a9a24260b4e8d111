//! Rank-based differential expression between two cell groups.
//!
//! For every gene, compares the expression distributions of the two
//! groups with a two-sided Wilcoxon/Mann-Whitney test (normal
//! approximation with tie and continuity correction), reports a log2
//! fold-change of group means with a pseudocount, and adjusts p-values
//! for multiple testing across the tested genes.

#![deny(missing_docs)]

/// Multiple-testing corrections
pub mod correction;

/// Wilcoxon/Mann-Whitney rank test
pub mod wilcoxon;

use nucleus_types::{
    AnalysisError, CellMetadata, ClusterLabeling, GeneMetadata, GroupKey, NormalizedMatrix,
};
use rayon::prelude::*;
use serde::Serialize;
use vigil::{NoOpWatch, Watch};

pub use correction::Correction;

/// Per-gene outcome of one (group_1, group_2) comparison.
#[derive(Clone, Debug, Serialize)]
pub struct DEGResult {
    /// Gene identifier
    pub gene_id: String,
    /// log2(mean_1 + eps) - log2(mean_2 + eps)
    pub log2_fold_change: f64,
    /// Raw two-sided p-value
    pub raw_p_value: f64,
    /// Multiple-testing-adjusted p-value
    pub adjusted_p_value: f64,
    /// false for genes skipped as zero-variance (reported with
    /// fold-change 0 and p-value 1)
    pub tested: bool,
}

/// Knobs of the comparison.
#[derive(Clone, Debug)]
pub struct DiffExpOptions {
    /// Multiple-testing correction applied across tested genes
    pub correction: Correction,
    /// Pseudocount added to group means before taking log2
    pub pseudocount: f64,
    /// Also report genes excluded from testing (zero variance), with
    /// fold-change 0 and p-value 1
    pub include_untested: bool,
}

impl Default for DiffExpOptions {
    fn default() -> Self {
        DiffExpOptions {
            correction: Correction::BenjaminiHochberg,
            pseudocount: 1e-9,
            include_untested: false,
        }
    }
}

/// Compare two groups given explicit row indices.
pub fn compare(
    matrix: &NormalizedMatrix,
    cells_1: &[usize],
    cells_2: &[usize],
    options: &DiffExpOptions,
) -> Result<Vec<DEGResult>, AnalysisError> {
    compare_with_cancellation(NoOpWatch, matrix, cells_1, cells_2, options)
}

/// Compare two groups named by structured keys, resolved against the
/// cluster labeling and cell metadata by an explicit keyed join.
pub fn compare_groups(
    matrix: &NormalizedMatrix,
    labeling: &ClusterLabeling,
    metadata: &CellMetadata,
    group_1: &GroupKey,
    group_2: &GroupKey,
    options: &DiffExpOptions,
) -> Result<Vec<DEGResult>, AnalysisError> {
    let cells_1 = group_1.resolve(labeling, metadata)?;
    let cells_2 = group_2.resolve(labeling, metadata)?;
    compare(matrix, &cells_1, &cells_2, options)
}

/// Cancellable form of [`compare`].
pub fn compare_with_cancellation(
    mut watch: impl Watch,
    matrix: &NormalizedMatrix,
    cells_1: &[usize],
    cells_2: &[usize],
    options: &DiffExpOptions,
) -> Result<Vec<DEGResult>, AnalysisError> {
    if cells_1.is_empty() {
        return Err(AnalysisError::EmptyGroup("group_1".into()));
    }
    if cells_2.is_empty() {
        return Err(AnalysisError::EmptyGroup("group_2".into()));
    }
    let n_cells = matrix.n_cells();
    for &cell in cells_1.iter().chain(cells_2) {
        if cell >= n_cells {
            return Err(AnalysisError::InputShape(format!(
                "cell index {cell} outside a matrix of {n_cells} cells"
            )));
        }
    }

    watch.checkpoint(0.0)?;

    // 0 = neither, 1 = group_1, 2 = group_2; overlapping cells land in
    // whichever group claims them last, which the keyed join precludes.
    let mut membership = vec![0u8; n_cells];
    for &cell in cells_1 {
        membership[cell] = 1;
    }
    for &cell in cells_2 {
        membership[cell] = 2;
    }

    let gene_major = matrix.to_gene_major();
    let n_1 = cells_1.len();
    let n_2 = cells_2.len();
    watch.checkpoint(0.1)?;

    struct GeneStats {
        log2_fold_change: f64,
        p_value: f64,
        tested: bool,
    }

    let stats: Vec<GeneStats> = (0..matrix.n_genes())
        .into_par_iter()
        .map(|gene| {
            // Materialize both groups densely; zeros carry rank weight.
            let mut values_1 = vec![0.0f64; n_1];
            let mut values_2 = vec![0.0f64; n_2];
            let mut filled_1 = 0;
            let mut filled_2 = 0;
            for (cell, &value) in gene_major.outer_view(gene).unwrap().iter() {
                match membership[cell] {
                    1 => {
                        values_1[filled_1] = value;
                        filled_1 += 1;
                    }
                    2 => {
                        values_2[filled_2] = value;
                        filled_2 += 1;
                    }
                    _ => {}
                }
            }

            let mean_1 = values_1.iter().sum::<f64>() / n_1 as f64;
            let mean_2 = values_2.iter().sum::<f64>() / n_2 as f64;

            let constant = values_1
                .iter()
                .chain(&values_2)
                .all(|&v| v == values_1[0]);
            if constant {
                return GeneStats {
                    log2_fold_change: 0.0,
                    p_value: 1.0,
                    tested: false,
                };
            }

            GeneStats {
                log2_fold_change: (mean_1 + options.pseudocount).log2() - (mean_2 + options.pseudocount).log2(),
                p_value: wilcoxon::mann_whitney_two_sided(&values_1, &values_2),
                tested: true,
            }
        })
        .collect();

    watch.checkpoint(0.8)?;

    // Correct across tested genes only; untested genes keep p = 1.
    let tested_p: Vec<(usize, f64)> = stats
        .iter()
        .enumerate()
        .filter(|(_, s)| s.tested)
        .map(|(i, s)| (i, s.p_value))
        .collect();
    let adjusted = correction::adjust(options.correction, &tested_p);
    let mut adjusted_by_gene = vec![1.0f64; stats.len()];
    for (gene, q) in adjusted {
        adjusted_by_gene[gene] = q;
    }

    watch.checkpoint(0.95)?;

    let mut results = Vec::with_capacity(stats.len());
    for (gene, s) in stats.into_iter().enumerate() {
        if !s.tested && !options.include_untested {
            continue;
        }
        results.push(DEGResult {
            gene_id: matrix.gene_ids()[gene].clone(),
            log2_fold_change: s.log2_fold_change,
            raw_p_value: s.p_value,
            adjusted_p_value: adjusted_by_gene[gene],
            tested: s.tested,
        });
    }
    let skipped = matrix.n_genes() - results.len();
    if skipped > 0 {
        log::info!("{skipped} zero-variance genes excluded from testing");
    }

    watch.checkpoint(1.0)?;
    Ok(results)
}

/// A [`DEGResult`] joined with its gene annotations for export.
#[derive(Clone, Debug, Serialize)]
pub struct AnnotatedDEGResult {
    /// The comparison outcome.
    pub result: DEGResult,
    /// Gene symbol, if the gene is annotated.
    pub symbol: Option<String>,
    /// Gene biotype, if the gene is annotated.
    pub biotype: Option<String>,
}

/// Joins results with the gene annotation table. Genes missing from the
/// table come through with empty annotation rather than failing.
pub fn annotate(results: &[DEGResult], genes: &GeneMetadata) -> Vec<AnnotatedDEGResult> {
    results
        .iter()
        .map(|result| {
            let attrs = genes.get(&result.gene_id);
            AnnotatedDEGResult {
                result: result.clone(),
                symbol: attrs.map(|a| a.symbol.clone()),
                biotype: attrs.map(|a| a.biotype.clone()),
            }
        })
        .collect()
}

/// Order results for export: descending fold-change, gene id as the
/// deterministic tie-break.
pub fn sort_for_export(results: &mut [DEGResult]) {
    results.sort_by(|a, b| {
        b.log2_fold_change
            .partial_cmp(&a.log2_fold_change)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.gene_id.cmp(&b.gene_id))
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use sprs::TriMat;

    /// 6 cells x 3 genes. Gene 0 high in cells 0-2, gene 1 high in
    /// cells 3-5, gene 2 all zero.
    fn fixture() -> NormalizedMatrix {
        let dense: [[f64; 3]; 6] = [
            [5.0, 0.0, 0.0],
            [4.0, 1.0, 0.0],
            [6.0, 0.0, 0.0],
            [0.0, 5.0, 0.0],
            [1.0, 4.0, 0.0],
            [0.0, 6.0, 0.0],
        ];
        let mut tri = TriMat::new((6, 3));
        for (r, row) in dense.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        NormalizedMatrix::new(
            (0..6).map(|i| format!("c{i}")).collect(),
            (0..3).map(|i| format!("g{i}")).collect(),
            tri.to_csr(),
        )
    }

    #[test]
    fn test_direction_of_fold_change() {
        let m = fixture();
        let opts = DiffExpOptions::default();
        let res = compare(&m, &[0, 1, 2], &[3, 4, 5], &opts).unwrap();
        assert_eq!(res.len(), 2); // zero-variance gene dropped

        let g0 = res.iter().find(|r| r.gene_id == "g0").unwrap();
        let g1 = res.iter().find(|r| r.gene_id == "g1").unwrap();
        assert!(g0.log2_fold_change > 0.0);
        assert!(g1.log2_fold_change < 0.0);
    }

    #[test]
    fn test_symmetry_under_group_swap() {
        let m = fixture();
        let opts = DiffExpOptions::default();
        let fwd = compare(&m, &[0, 1, 2], &[3, 4, 5], &opts).unwrap();
        let rev = compare(&m, &[3, 4, 5], &[0, 1, 2], &opts).unwrap();

        for (f, r) in fwd.iter().zip(&rev) {
            assert_eq!(f.gene_id, r.gene_id);
            assert_abs_diff_eq!(f.log2_fold_change, -r.log2_fold_change, epsilon = 1e-12);
            assert_abs_diff_eq!(f.raw_p_value, r.raw_p_value, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_untested_gene_reporting() {
        let m = fixture();
        let opts = DiffExpOptions {
            include_untested: true,
            ..Default::default()
        };
        let res = compare(&m, &[0, 1, 2], &[3, 4, 5], &opts).unwrap();
        let g2 = res.iter().find(|r| r.gene_id == "g2").unwrap();
        assert!(!g2.tested);
        assert_eq!(g2.log2_fold_change, 0.0);
        assert_eq!(g2.raw_p_value, 1.0);
        assert_eq!(g2.adjusted_p_value, 1.0);
    }

    #[test]
    fn test_empty_group_rejected() {
        let m = fixture();
        let err = compare(&m, &[], &[0, 1], &DiffExpOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyGroup(_)));
    }

    #[test]
    fn test_export_order() {
        let m = fixture();
        let mut res = compare(&m, &[0, 1, 2], &[3, 4, 5], &DiffExpOptions::default()).unwrap();
        sort_for_export(&mut res);
        assert_eq!(res[0].gene_id, "g0");
        assert_eq!(res[1].gene_id, "g1");
    }

    #[test]
    fn test_cancellation_propagates() {
        let (state, watch) = vigil::pair();
        state.cancel();
        let m = fixture();
        let err = compare_with_cancellation(watch, &m, &[0], &[1], &DiffExpOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }

    #[test]
    fn test_group_key_comparison() {
        use nucleus_types::{CellAttrs, CellMetadata, ClusterLabeling};

        let m = fixture();
        let labeling = ClusterLabeling::new(m.barcodes().to_vec(), vec![0, 0, 0, 1, 1, 1]);
        let metadata = CellMetadata::new(m.barcodes().iter().map(|b| {
            (
                b.clone(),
                CellAttrs {
                    sample: "s".into(),
                    condition: "x".into(),
                },
            )
        }));

        let res = compare_groups(
            &m,
            &labeling,
            &metadata,
            &GroupKey::cluster(0),
            &GroupKey::cluster(1),
            &DiffExpOptions::default(),
        )
        .unwrap();
        assert!(res.iter().any(|r| r.gene_id == "g0" && r.log2_fold_change > 0.0));

        let err = compare_groups(
            &m,
            &labeling,
            &metadata,
            &GroupKey::cluster_condition(0, "missing"),
            &GroupKey::cluster(1),
            &DiffExpOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyGroup(_)));
    }

    #[test]
    fn test_annotation_join() {
        use nucleus_types::{GeneAttrs, GeneMetadata};

        let m = fixture();
        let res = compare(&m, &[0, 1, 2], &[3, 4, 5], &DiffExpOptions::default()).unwrap();
        let genes = GeneMetadata::new([(
            "g0".to_string(),
            GeneAttrs {
                symbol: "ACTB".into(),
                biotype: "protein_coding".into(),
            },
        )]);

        let annotated = annotate(&res, &genes);
        assert_eq!(annotated.len(), res.len());
        let g0 = annotated.iter().find(|r| r.result.gene_id == "g0").unwrap();
        assert_eq!(g0.symbol.as_deref(), Some("ACTB"));
        assert_eq!(g0.biotype.as_deref(), Some("protein_coding"));
        let g1 = annotated.iter().find(|r| r.result.gene_id == "g1").unwrap();
        assert!(g1.symbol.is_none() && g1.biotype.is_none());
    }
}
