//! Ranked gene set enrichment with a permutation null.
//!
//! Genes are ranked by a signed score (typically a log2 fold change from a
//! differential expression comparison), each pathway is scored with a weighted
//! running-sum statistic, and significance is assessed against a null built by
//! permuting pathway membership over the ranked universe.

use fxhash::FxHashSet;
use nucleus_types::AnalysisError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use ranksum::Correction;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use vigil::Watch;

mod score;

use score::enrichment_walk;

/// Permutations are evaluated in fixed-size batches so cancellation is
/// observed between batches rather than only at the end.
const PERMUTATION_BATCH: usize = 64;

/// A named collection of gene identifiers.
#[derive(Debug, Clone)]
pub struct Pathway {
    /// Stable pathway identifier.
    pub id: String,
    /// Member gene identifiers. Genes absent from the ranked universe are
    /// ignored when the pathway is scored.
    pub genes: Vec<String>,
}

/// Parameters for an enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    /// Genes whose ranking score magnitude falls below this floor are dropped
    /// from the universe before any pathway is scored.
    pub score_floor: f64,
    /// Minimum number of genes that must survive the score floor.
    pub min_genes: usize,
    /// Pathways with fewer in-universe members are skipped.
    pub min_pathway_size: usize,
    /// Pathways with more in-universe members are skipped.
    pub max_pathway_size: usize,
    /// Number of membership permutations drawn for the null. Must be
    /// nonzero.
    pub permutations: usize,
    /// Seed for the permutation stream. Runs with equal seeds and inputs
    /// produce identical output.
    pub seed: u64,
    /// Multiple testing correction applied across scored pathways.
    pub correction: Correction,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        EnrichmentOptions {
            score_floor: 1.0,
            min_genes: 15,
            min_pathway_size: 3,
            max_pathway_size: 800,
            permutations: 1000,
            seed: 0,
            correction: Correction::BenjaminiHochberg,
        }
    }
}

/// Enrichment outcome for a single pathway.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentResult {
    /// Pathway identifier.
    pub pathway_id: String,
    /// Signed running-sum enrichment score.
    pub enrichment_score: f64,
    /// Enrichment score divided by the mean magnitude of same-sign null
    /// scores. Zero when the null produced no same-sign scores.
    pub normalized_score: f64,
    /// Fraction of permuted scores with magnitude at least the observed
    /// magnitude.
    pub p_value: f64,
    /// P-value after multiple testing correction across pathways.
    pub adjusted_p_value: f64,
    /// Member genes at or before the running-sum peak, in rank order.
    pub contributing_genes: Vec<String>,
}

/// Runs enrichment for `pathways` against genes ranked by `scores`.
///
/// Pathways whose in-universe size falls outside the configured bounds are
/// skipped with a log message rather than failing the run. The returned
/// results keep the input pathway order; use [`sort_for_export`] for the
/// significance-ordered view.
pub fn enrich(
    scores: &[(String, f64)],
    pathways: &[Pathway],
    options: &EnrichmentOptions,
) -> Result<Vec<EnrichmentResult>, AnalysisError> {
    enrich_with_cancellation(vigil::NoOpWatch, scores, pathways, options)
}

/// [`enrich`] with progress reporting and cancellation.
pub fn enrich_with_cancellation(
    mut watch: impl Watch,
    scores: &[(String, f64)],
    pathways: &[Pathway],
    options: &EnrichmentOptions,
) -> Result<Vec<EnrichmentResult>, AnalysisError> {
    watch.checkpoint(0.0)?;

    if options.permutations == 0 {
        return Err(AnalysisError::InputShape(
            "enrichment requires at least one permutation".into(),
        ));
    }

    let ranked = rank_universe(scores, options)?;
    let universe_size = ranked.len();

    // Hit positions per pathway, for pathways inside the size bounds.
    let mut kept: Vec<(usize, Vec<usize>)> = Vec::new();
    for (pathway_index, pathway) in pathways.iter().enumerate() {
        let members: FxHashSet<&str> = pathway.genes.iter().map(String::as_str).collect();
        let hits: Vec<usize> = ranked
            .iter()
            .enumerate()
            .filter(|(_, (gene, _))| members.contains(gene.as_str()))
            .map(|(rank, _)| rank)
            .collect();
        if hits.len() < options.min_pathway_size || hits.len() > options.max_pathway_size {
            log::info!(
                "skipping pathway {} with {} of {} genes in the ranked universe",
                pathway.id,
                hits.len(),
                pathway.genes.len()
            );
            continue;
        }
        if hits.len() == universe_size {
            log::info!(
                "skipping pathway {} covering the entire ranked universe",
                pathway.id
            );
            continue;
        }
        kept.push((pathway_index, hits));
    }
    watch.checkpoint(0.05)?;

    if kept.is_empty() {
        return Err(AnalysisError::EmptyResult(
            "no pathway satisfied the size bounds within the ranked universe".into(),
        ));
    }

    let magnitudes: Vec<f64> = ranked.iter().map(|(_, s)| s.abs()).collect();

    let observed: Vec<score::WalkResult> = kept
        .iter()
        .map(|(_, hits)| {
            let weights: Vec<f64> = hits.iter().map(|&pos| magnitudes[pos]).collect();
            enrichment_walk(hits, &weights, universe_size)
        })
        .collect();
    watch.checkpoint(0.1)?;

    let null_scores = permutation_null(&mut watch, &kept, &magnitudes, universe_size, options)?;

    // Empirical p-values and sign-matched normalization against the null.
    let mut results: Vec<EnrichmentResult> = Vec::with_capacity(kept.len());
    for (slot, ((pathway_index, hits), walk)) in kept.iter().zip(&observed).enumerate() {
        let null = &null_scores[slot];
        let at_least_as_extreme = null.iter().filter(|es| es.abs() >= walk.es.abs()).count();
        let p_value = at_least_as_extreme as f64 / null.len() as f64;

        let same_sign: Vec<f64> = null
            .iter()
            .copied()
            .filter(|es| es.is_sign_positive() == walk.es.is_sign_positive())
            .collect();
        let normalized_score = if same_sign.is_empty() {
            0.0
        } else {
            let mean_magnitude =
                same_sign.iter().map(|es| es.abs()).sum::<f64>() / same_sign.len() as f64;
            if mean_magnitude > 0.0 {
                walk.es / mean_magnitude
            } else {
                0.0
            }
        };

        let contributing_genes = if walk.es >= 0.0 {
            hits[..=walk.peak_hit]
                .iter()
                .map(|&pos| ranked[pos].0.clone())
                .collect()
        } else {
            hits[walk.peak_hit..]
                .iter()
                .map(|&pos| ranked[pos].0.clone())
                .collect()
        };

        results.push(EnrichmentResult {
            pathway_id: pathways[*pathway_index].id.clone(),
            enrichment_score: walk.es,
            normalized_score,
            p_value,
            adjusted_p_value: f64::NAN,
            contributing_genes,
        });
    }

    let indexed: Vec<(usize, f64)> = results
        .iter()
        .enumerate()
        .map(|(i, r)| (i, r.p_value))
        .collect();
    for (i, adjusted) in ranksum::correction::adjust(options.correction, &indexed) {
        results[i].adjusted_p_value = adjusted;
    }
    watch.checkpoint(1.0)?;

    Ok(results)
}

/// Orders enrichment results by ascending adjusted p-value, breaking ties by
/// descending score magnitude and then pathway id.
pub fn sort_for_export(results: &mut [EnrichmentResult]) {
    results.sort_by(|a, b| {
        a.adjusted_p_value
            .partial_cmp(&b.adjusted_p_value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.enrichment_score
                    .abs()
                    .partial_cmp(&a.enrichment_score.abs())
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.pathway_id.cmp(&b.pathway_id))
    });
}

/// Applies the score floor and ranks the surviving genes by descending score.
fn rank_universe(
    scores: &[(String, f64)],
    options: &EnrichmentOptions,
) -> Result<Vec<(String, f64)>, AnalysisError> {
    let mut ranked: Vec<(String, f64)> = scores
        .iter()
        .filter(|(_, s)| s.is_finite() && s.abs() >= options.score_floor)
        .cloned()
        .collect();
    if ranked.len() < options.min_genes {
        return Err(AnalysisError::InsufficientGenes {
            minimum: options.min_genes,
            available: ranked.len(),
        });
    }
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(ranked)
}

/// Builds the permutation null by shuffling pathway membership over the
/// ranked universe. Returns one vector of permuted enrichment scores per kept
/// pathway, in permutation order.
///
/// Each permutation draws from its own seeded generator so the null is
/// independent of batch size and thread count.
fn permutation_null(
    watch: &mut impl Watch,
    kept: &[(usize, Vec<usize>)],
    magnitudes: &[f64],
    universe_size: usize,
    options: &EnrichmentOptions,
) -> Result<Vec<Vec<f64>>, AnalysisError> {
    let mut null_scores: Vec<Vec<f64>> = vec![Vec::with_capacity(options.permutations); kept.len()];

    let mut done = 0usize;
    while done < options.permutations {
        let batch = (options.permutations - done).min(PERMUTATION_BATCH);
        let batch_scores: Vec<Vec<f64>> = (done..done + batch)
            .into_par_iter()
            .map(|perm| {
                let mut rng = ChaCha20Rng::seed_from_u64(options.seed.wrapping_add(perm as u64));
                let mut positions: Vec<usize> = (0..universe_size).collect();
                positions.shuffle(&mut rng);
                kept.iter()
                    .map(|(_, hits)| {
                        let mut shuffled: Vec<usize> =
                            hits.iter().map(|&pos| positions[pos]).collect();
                        shuffled.sort_unstable();
                        let weights: Vec<f64> =
                            shuffled.iter().map(|&pos| magnitudes[pos]).collect();
                        enrichment_walk(&shuffled, &weights, universe_size).es
                    })
                    .collect()
            })
            .collect();
        for per_permutation in batch_scores {
            for (slot, es) in per_permutation.into_iter().enumerate() {
                null_scores[slot].push(es);
            }
        }
        done += batch;
        watch.checkpoint(0.1 + 0.85 * done as f64 / options.permutations as f64)?;
    }

    Ok(null_scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gene(i: usize) -> String {
        format!("gene{i:03}")
    }

    /// 40 genes ranked 20.0 down to 0.5 step 0.5, all clearing a floor of
    /// 0.25.
    fn descending_scores(n: usize) -> Vec<(String, f64)> {
        (0..n).map(|i| (gene(i), 20.0 - 0.5 * i as f64)).collect()
    }

    fn options() -> EnrichmentOptions {
        EnrichmentOptions {
            score_floor: 0.25,
            min_genes: 10,
            permutations: 200,
            ..EnrichmentOptions::default()
        }
    }

    #[test]
    fn top_ranked_pathway_is_enriched() {
        let scores = descending_scores(40);
        let pathways = vec![
            Pathway {
                id: "top".into(),
                genes: (0..6).map(gene).collect(),
            },
            Pathway {
                id: "spread".into(),
                genes: vec![gene(1), gene(12), gene(23), gene(30), gene(38)],
            },
        ];
        let results = enrich(&scores, &pathways, &options()).unwrap();
        assert_eq!(results.len(), 2);

        let top = &results[0];
        assert!(top.enrichment_score > 0.8);
        assert!(top.p_value < 0.05, "p = {}", top.p_value);
        assert!(top.normalized_score > 1.0);
        // All six members sit before the peak.
        assert_eq!(top.contributing_genes.len(), 6);
        assert_eq!(top.contributing_genes[0], gene(0));

        let spread = &results[1];
        assert!(spread.p_value > top.p_value);
    }

    #[test]
    fn bottom_ranked_pathway_scores_negative() {
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "tail".into(),
            genes: (34..40).map(gene).collect(),
        }];
        let results = enrich(&scores, &pathways, &options()).unwrap();
        assert!(results[0].enrichment_score < 0.0);
        // The leading edge runs from the peak to the end of the list.
        assert!(!results[0].contributing_genes.is_empty());
        assert!(results[0]
            .contributing_genes
            .iter()
            .all(|g| (34..40).map(gene).any(|m| m == *g)));
    }

    #[test]
    fn undersized_and_oversized_pathways_are_skipped() {
        let scores = descending_scores(40);
        let opts = EnrichmentOptions {
            max_pathway_size: 10,
            ..options()
        };
        let pathways = vec![
            Pathway {
                id: "tiny".into(),
                genes: vec![gene(0), gene(1)],
            },
            Pathway {
                id: "huge".into(),
                genes: (0..20).map(gene).collect(),
            },
            Pathway {
                id: "ok".into(),
                genes: (0..5).map(gene).collect(),
            },
        ];
        let results = enrich(&scores, &pathways, &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pathway_id, "ok");
    }

    #[test]
    fn only_skipped_pathways_is_an_empty_result() {
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "tiny".into(),
            genes: vec![gene(0)],
        }];
        let err = enrich(&scores, &pathways, &options()).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResult(_)));
    }

    #[test]
    fn score_floor_can_exhaust_the_universe() {
        let scores: Vec<(String, f64)> = (0..30).map(|i| (gene(i), 0.1)).collect();
        let pathways = vec![Pathway {
            id: "p".into(),
            genes: (0..5).map(gene).collect(),
        }];
        let err = enrich(&scores, &pathways, &options()).unwrap_err();
        match err {
            AnalysisError::InsufficientGenes { minimum, available } => {
                assert_eq!(minimum, 10);
                assert_eq!(available, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn zero_permutations_are_rejected() {
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "p".into(),
            genes: (0..5).map(gene).collect(),
        }];
        let opts = EnrichmentOptions {
            permutations: 0,
            ..options()
        };
        let err = enrich(&scores, &pathways, &opts).unwrap_err();
        assert!(matches!(err, AnalysisError::InputShape(_)));
    }

    #[test]
    fn membership_outside_the_universe_is_ignored() {
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "partial".into(),
            genes: vec![gene(0), gene(1), gene(2), "absent".into()],
        }];
        let results = enrich(&scores, &pathways, &options()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0]
            .contributing_genes
            .iter()
            .all(|g| g != "absent"));
    }

    #[test]
    fn equal_seeds_reproduce_the_run() {
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "p".into(),
            genes: vec![gene(3), gene(7), gene(20), gene(31)],
        }];
        let a = enrich(&scores, &pathways, &options()).unwrap();
        let b = enrich(&scores, &pathways, &options()).unwrap();
        assert_eq!(a[0].p_value, b[0].p_value);
        assert_eq!(a[0].normalized_score, b[0].normalized_score);

        let other_seed = EnrichmentOptions {
            seed: 7,
            ..options()
        };
        let c = enrich(&scores, &pathways, &other_seed).unwrap();
        // A different permutation stream almost surely shifts the estimate.
        assert!(a[0].p_value != c[0].p_value || a[0].normalized_score != c[0].normalized_score);
    }

    #[test]
    fn export_order_is_ascending_adjusted_p() {
        let mut results = vec![
            EnrichmentResult {
                pathway_id: "b".into(),
                enrichment_score: 0.4,
                normalized_score: 1.1,
                p_value: 0.2,
                adjusted_p_value: 0.3,
                contributing_genes: vec![],
            },
            EnrichmentResult {
                pathway_id: "a".into(),
                enrichment_score: -0.9,
                normalized_score: -2.0,
                p_value: 0.001,
                adjusted_p_value: 0.002,
                contributing_genes: vec![],
            },
        ];
        sort_for_export(&mut results);
        assert_eq!(results[0].pathway_id, "a");
    }

    #[test]
    fn cancellation_stops_the_permutation_loop() {
        let (state, watch) = vigil::pair();
        state.cancel();
        let scores = descending_scores(40);
        let pathways = vec![Pathway {
            id: "p".into(),
            genes: (0..5).map(gene).collect(),
        }];
        let err = enrich_with_cancellation(watch, &scores, &pathways, &options()).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }
}
