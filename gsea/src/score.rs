//! Weighted running-sum enrichment statistic over a ranked gene list.

/// Outcome of a single running-sum walk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WalkResult {
    /// Signed enrichment score, the extreme deviation of the running sum.
    pub es: f64,
    /// Index into the sorted hit positions where the extreme was reached.
    pub peak_hit: usize,
}

/// Computes the enrichment score for a pathway given the sorted ranks of its
/// member genes within the ranked universe.
///
/// `hit_positions` must be sorted ascending and non-empty. `weights` holds the
/// absolute ranking score of the gene at each hit position, in the same order.
/// Between hits the running sum decreases by a constant miss step, so only the
/// values immediately before and after each hit need to be examined.
pub(crate) fn enrichment_walk(
    hit_positions: &[usize],
    weights: &[f64],
    universe_size: usize,
) -> WalkResult {
    debug_assert_eq!(hit_positions.len(), weights.len());
    debug_assert!(!hit_positions.is_empty());
    debug_assert!(hit_positions.len() < universe_size);

    let weight_total: f64 = weights.iter().sum();
    let miss_step = 1.0 / (universe_size - hit_positions.len()) as f64;

    let mut hit_sum = 0.0;
    let mut max_dev = f64::NEG_INFINITY;
    let mut min_dev = f64::INFINITY;
    let mut max_hit = 0;
    let mut min_hit = 0;

    for (k, (&pos, &w)) in hit_positions.iter().zip(weights).enumerate() {
        let misses_before = (pos - k) as f64;
        let before = hit_sum - misses_before * miss_step;
        if before < min_dev {
            min_dev = before;
            min_hit = k;
        }
        hit_sum += if weight_total > 0.0 { w / weight_total } else { 0.0 };
        let after = hit_sum - misses_before * miss_step;
        if after > max_dev {
            max_dev = after;
            max_hit = k;
        }
    }

    if max_dev >= -min_dev {
        WalkResult {
            es: max_dev,
            peak_hit: max_hit,
        }
    } else {
        WalkResult {
            es: min_dev,
            peak_hit: min_hit,
        }
    }
}
