//! Staged analysis driver.
//!
//! Chains QC filtering, normalization, feature selection, PCA, graph
//! construction, clustering, layout, differential expression, and
//! pathway enrichment into a single cancellable run. Each stage consumes
//! the previous stage's output immutably, so a run with the same input
//! and configuration reproduces the same output bit for bit.

use crate::cluster;
use crate::dim_red::{self, Embedding};
use crate::layout::{self, LayoutOptions};
use crate::nn::{self, NeighborGraph};
use crate::normalization;
use crate::qc::{self, QcMetrics, QcThresholds};
use gsea::{EnrichmentOptions, EnrichmentResult, Pathway};
use itertools::Itertools;
use log::info;
use ndarray::Array2;
use nucleus_types::{
    AnalysisError, CellMetadata, ClusterLabeling, CountMatrix, GroupKey, NormalizedMatrix,
};
use ranksum::{DEGResult, DiffExpOptions};
use vigil::Watch;

/// Full configuration of a pipeline run.
///
/// There are deliberately no defaults for the neighbor count and the
/// clustering resolution; both shape the result strongly and must be
/// chosen by the caller.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Cell filtering thresholds.
    pub qc: QcThresholds,
    /// Gene id prefix marking mitochondrial genes (for example `MT-`).
    pub mito_prefix: String,
    /// Per-cell count target for normalization; the median cell total
    /// when unset.
    pub target_sum: Option<f64>,
    /// Number of variable features carried into scaling and PCA.
    pub n_variable_features: usize,
    /// Magnitude cap on scaled expression values.
    pub scale_clip: f64,
    /// Number of principal components.
    pub n_components: usize,
    /// Nearest neighbors per cell in the SNN graph.
    pub n_neighbors: usize,
    /// Number of leading components used for the neighbor search.
    pub graph_dims: usize,
    /// Jaccard weight below which SNN edges are pruned.
    pub snn_floor: f64,
    /// Modularity resolution.
    pub resolution: f64,
    /// Seed for the clustering pass.
    pub cluster_seed: u64,
    /// Seed for the 2-D layout.
    pub layout_seed: u64,
    /// Layout optimizer knobs.
    pub layout: LayoutOptions,
    /// First group of the differential expression contrast.
    pub group_1: GroupKey,
    /// Second group of the contrast.
    pub group_2: GroupKey,
    /// Differential expression knobs.
    pub diff_exp: DiffExpOptions,
    /// Pathways to score against the DE ranking. Enrichment is skipped
    /// entirely when empty.
    pub pathways: Vec<Pathway>,
    /// Enrichment knobs.
    pub enrichment: EnrichmentOptions,
}

/// Everything a pipeline run produces, stage by stage.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Per-cell metrics over the unfiltered input.
    pub qc: QcMetrics,
    /// Metadata subset to the retained cells.
    pub metadata: CellMetadata,
    /// Normalized expression over the retained cells.
    pub normalized: NormalizedMatrix,
    /// Column indices of the selected variable features.
    pub variable_features: Vec<usize>,
    /// PCA embedding of the scaled variable features.
    pub embedding: Embedding,
    /// Shared-nearest-neighbor graph.
    pub graph: NeighborGraph,
    /// Cluster assignment per retained cell.
    pub labeling: ClusterLabeling,
    /// 2-D layout coordinates, one row per retained cell.
    pub coordinates: Array2<f64>,
    /// Differential expression results, descending fold change.
    pub diff_exp: Vec<DEGResult>,
    /// Pathway enrichment over the DE ranking; empty when no pathways
    /// were configured.
    pub enrichment: Vec<EnrichmentResult>,
}

/// Runs the full pipeline over `matrix` and `metadata`.
///
/// `metadata` must cover every barcode in the matrix. Progress is spread
/// over `watch` with the PCA, DE, and enrichment stages carrying the
/// largest shares; cancellation is observed between and inside stages.
pub fn run(
    mut watch: impl Watch,
    matrix: &CountMatrix,
    metadata: &CellMetadata,
    config: &PipelineConfig,
) -> Result<PipelineOutput, AnalysisError> {
    watch.checkpoint(0.0)?;

    let qc = qc::compute_qc(matrix, |id| id.starts_with(&config.mito_prefix));
    let (filtered, metadata) = qc::filter_cells(matrix, metadata, &qc, &config.qc)?;
    watch.checkpoint(0.05)?;

    let normalized = normalization::normalize(&filtered, config.target_sum);
    let variable_features =
        normalization::select_variable_features(&normalized, config.n_variable_features)?;
    let scaled = normalization::scale(&normalized, &variable_features, config.scale_clip);
    watch.checkpoint(0.15)?;

    let embedding = dim_red::reduce(&scaled, config.n_components, watch.fork(0.30))?;
    let graph = nn::build_graph(
        &embedding,
        config.n_neighbors,
        config.graph_dims,
        config.snn_floor,
    )?;
    watch.checkpoint(0.50)?;

    let labeling = cluster::cluster(
        &graph,
        config.resolution,
        config.cluster_seed,
        watch.fork(0.05),
    )?;
    info!(
        "cluster sizes: {}",
        labeling.sizes().iter().join(", ")
    );
    watch.checkpoint(0.55)?;

    let coordinates = layout::embed(&embedding, &graph, config.layout_seed, &config.layout);
    watch.checkpoint(0.70)?;

    let cells_1 = config.group_1.resolve(&labeling, &metadata)?;
    let cells_2 = config.group_2.resolve(&labeling, &metadata)?;
    let mut diff_exp = ranksum::compare_with_cancellation(
        watch.fork(0.20),
        &normalized,
        &cells_1,
        &cells_2,
        &config.diff_exp,
    )?;
    ranksum::sort_for_export(&mut diff_exp);

    let enrichment = if config.pathways.is_empty() {
        Vec::new()
    } else {
        let scores: Vec<(String, f64)> = diff_exp
            .iter()
            .filter(|r| r.tested)
            .map(|r| (r.gene_id.clone(), r.log2_fold_change))
            .collect();
        let mut results = gsea::enrich_with_cancellation(
            watch.fork(0.10),
            &scores,
            &config.pathways,
            &config.enrichment,
        )?;
        gsea::sort_for_export(&mut results);
        results
    };
    watch.checkpoint(1.0)?;

    Ok(PipelineOutput {
        qc,
        metadata,
        normalized,
        variable_features,
        embedding,
        graph,
        labeling,
        coordinates,
        diff_exp,
        enrichment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_types::CellAttrs;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Poisson};
    use rand_pcg::Pcg64Mcg;
    use ranksum::Correction;
    use vigil::NoOpWatch;

    const N_TREATED: usize = 55;
    const N_CONTROL: usize = 45;
    const N_GENES: usize = 50;
    const N_MARKERS: usize = 5;

    /// Two populations of cells driven apart by five marker genes
    /// expressed tenfold in the treated population.
    fn simulated_input() -> (CountMatrix, CellMetadata) {
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let n_cells = N_TREATED + N_CONTROL;

        let mut entries = Vec::new();
        for cell in 0..n_cells {
            let before = entries.len();
            for gene in 0..N_GENES {
                let lambda = if cell < N_TREATED && gene < N_MARKERS {
                    20.0
                } else {
                    2.0
                };
                let count = Poisson::new(lambda).unwrap().sample(&mut rng) as u32;
                if count > 0 {
                    entries.push((cell, gene, count));
                }
            }
            if entries.len() == before {
                entries.push((cell, 0, 1));
            }
        }

        let barcodes: Vec<String> = (0..n_cells).map(|i| format!("cell{i:03}")).collect();
        let gene_ids: Vec<String> = (0..N_GENES).map(|i| format!("gene{i:02}")).collect();
        let matrix = CountMatrix::from_triplets(barcodes.clone(), gene_ids, &entries).unwrap();

        let metadata = CellMetadata::new(barcodes.into_iter().enumerate().map(|(i, barcode)| {
            let condition = if i < N_TREATED { "treated" } else { "control" };
            (
                barcode,
                CellAttrs {
                    sample: "s1".into(),
                    condition: condition.into(),
                },
            )
        }));
        (matrix, metadata)
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            qc: QcThresholds {
                min_feature_count: 1,
                max_feature_count: N_GENES,
                max_mito_fraction: 1.0,
            },
            mito_prefix: "MT-".into(),
            target_sum: Some(1e4),
            n_variable_features: 30,
            scale_clip: 10.0,
            n_components: 10,
            n_neighbors: 15,
            graph_dims: 10,
            snn_floor: nn::DEFAULT_SNN_FLOOR,
            resolution: 1.0,
            cluster_seed: 0,
            layout_seed: 0,
            layout: LayoutOptions {
                n_epochs: 50,
                ..LayoutOptions::default()
            },
            // Clusters are labeled by descending size, so the treated
            // population (55 cells) lands in cluster 0.
            group_1: GroupKey::cluster(0),
            group_2: GroupKey::cluster(1),
            diff_exp: DiffExpOptions::default(),
            pathways: vec![
                Pathway {
                    id: "marker_program".into(),
                    genes: (0..N_MARKERS).map(|i| format!("gene{i:02}")).collect(),
                },
                Pathway {
                    id: "background".into(),
                    genes: (10..30).map(|i| format!("gene{i:02}")).collect(),
                },
            ],
            enrichment: EnrichmentOptions {
                score_floor: 0.0,
                min_genes: 10,
                min_pathway_size: 3,
                max_pathway_size: 800,
                permutations: 200,
                seed: 0,
                correction: Correction::BenjaminiHochberg,
            },
        }
    }

    #[test]
    fn recovers_marker_genes_end_to_end() {
        let (matrix, metadata) = simulated_input();
        let out = run(NoOpWatch, &matrix, &metadata, &config()).unwrap();

        assert_eq!(out.metadata.len(), N_TREATED + N_CONTROL);
        assert!(out.labeling.n_clusters() >= 2);
        assert_eq!(out.labeling.sizes()[0], N_TREATED);
        assert_eq!(out.coordinates.nrows(), N_TREATED + N_CONTROL);

        // The five markers dominate the fold-change ranking and survive
        // multiple testing.
        let top: Vec<&str> = out.diff_exp[..N_MARKERS]
            .iter()
            .map(|r| r.gene_id.as_str())
            .collect();
        for gene in 0..N_MARKERS {
            assert!(top.contains(&format!("gene{gene:02}").as_str()), "top genes were {top:?}");
        }
        // Log-space fold changes are compressed; positive with a margin
        // is what the simulation guarantees.
        for result in &out.diff_exp[..N_MARKERS] {
            assert!(result.log2_fold_change > 0.3);
            assert!(result.adjusted_p_value < 0.05);
        }

        // The marker pathway scores as enriched at the top of the
        // ranking; the disjoint background pathway does not beat it.
        let marker = out
            .enrichment
            .iter()
            .find(|r| r.pathway_id == "marker_program")
            .unwrap();
        assert!(marker.enrichment_score > 0.5);
        assert!(marker.p_value < 0.05);
        assert!(!marker.contributing_genes.is_empty());
    }

    #[test]
    fn identical_seeds_reproduce_the_run() {
        let (matrix, metadata) = simulated_input();
        let cfg = config();
        let a = run(NoOpWatch, &matrix, &metadata, &cfg).unwrap();
        let b = run(NoOpWatch, &matrix, &metadata, &cfg).unwrap();

        assert_eq!(a.labeling.labels(), b.labeling.labels());
        assert_eq!(a.coordinates, b.coordinates);
        let pa: Vec<f64> = a.diff_exp.iter().map(|r| r.raw_p_value).collect();
        let pb: Vec<f64> = b.diff_exp.iter().map(|r| r.raw_p_value).collect();
        assert_eq!(pa, pb);
        let ea: Vec<f64> = a.enrichment.iter().map(|r| r.p_value).collect();
        let eb: Vec<f64> = b.enrichment.iter().map(|r| r.p_value).collect();
        assert_eq!(ea, eb);
    }

    #[test]
    fn impossible_qc_thresholds_fail_with_empty_result() {
        let (matrix, metadata) = simulated_input();
        let mut cfg = config();
        cfg.qc.max_feature_count = 0;
        let err = run(NoOpWatch, &matrix, &metadata, &cfg).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResult(_)));
    }

    #[test]
    fn excessive_component_count_fails_with_rank_deficiency() {
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let n_cells = 8;
        let n_genes = 30;
        let mut entries = Vec::new();
        for cell in 0..n_cells {
            for gene in 0..n_genes {
                let count = Poisson::new(2.0f64).unwrap().sample(&mut rng) as u32 + 1;
                entries.push((cell, gene, count));
            }
        }
        let barcodes: Vec<String> = (0..n_cells).map(|i| format!("cell{i}")).collect();
        let gene_ids: Vec<String> = (0..n_genes).map(|i| format!("gene{i}")).collect();
        let matrix = CountMatrix::from_triplets(barcodes.clone(), gene_ids, &entries).unwrap();
        let metadata = CellMetadata::new(barcodes.into_iter().map(|b| {
            (
                b,
                CellAttrs {
                    sample: "s1".into(),
                    condition: "control".into(),
                },
            )
        }));

        let mut cfg = config();
        cfg.qc.max_feature_count = n_genes;
        cfg.n_variable_features = 20;
        cfg.pathways.clear();
        // 10 components against 8 cells caps the rank at 7.
        let err = run(NoOpWatch, &matrix, &metadata, &cfg).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::RankDeficiency { requested: 10, max_rank: 7 }
        ));
    }

    #[test]
    fn cancellation_propagates_from_any_stage() {
        let (matrix, metadata) = simulated_input();
        let (state, watch) = vigil::pair();
        state.cancel();
        let err = run(watch, &matrix, &metadata, &config()).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }
}
