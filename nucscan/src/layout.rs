//! Seeded stochastic gradient layout of the neighbor graph into 2-D.
//!
//! Visualization-only output: edges of the SNN graph attract their
//! endpoints, negative samples repel, using the smooth UMAP-style
//! membership kernel `1 / (1 + a d^2b)`. Single-threaded and fully
//! deterministic for a fixed seed.

use crate::dim_red::Embedding;
use crate::nn::NeighborGraph;
use ndarray::{Array2, Axis};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// Kernel coefficients for spread 1.0, min_dist 0.1.
const KERNEL_A: f64 = 1.577;
const KERNEL_B: f64 = 0.8951;

/// Gradient clip bound, per coordinate.
const GRAD_CLIP: f64 = 4.0;

/// Spread of the PCA initialization, in embedding units.
const INIT_SCALE: f64 = 10.0;

/// Tuning knobs for the layout optimizer.
#[derive(Clone, Debug)]
pub struct LayoutOptions {
    /// Number of optimization epochs.
    pub n_epochs: usize,
    /// Negative samples drawn per positive edge sample.
    pub negative_sample_rate: usize,
    /// Initial learning rate; decays linearly to zero.
    pub learning_rate: f64,
    /// Weight on the repulsive term.
    pub repulsion_strength: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            n_epochs: 200,
            negative_sample_rate: 5,
            learning_rate: 1.0,
            repulsion_strength: 1.0,
        }
    }
}

/// Lays the cells out in 2-D, initialized from the first two principal
/// components and refined by edge-sampled gradient descent over the SNN
/// graph. Returns one row of coordinates per cell.
pub fn embed(
    embedding: &Embedding,
    graph: &NeighborGraph,
    seed: u64,
    options: &LayoutOptions,
) -> Array2<f64> {
    let n = graph.n_cells();
    let mut coords = pca_init(embedding, n);

    let edges = graph.edges();
    if edges.is_empty() || options.n_epochs == 0 {
        return coords;
    }

    // Heavier edges are sampled more often: the strongest edge is sampled
    // every epoch, an edge of half its weight every other epoch.
    let max_weight = edges
        .iter()
        .map(|&(_, _, w)| w)
        .fold(f64::MIN_POSITIVE, f64::max);
    let epochs_per_sample: Vec<f64> = edges.iter().map(|&(_, _, w)| max_weight / w).collect();
    let epochs_per_negative_sample: Vec<f64> = epochs_per_sample
        .iter()
        .map(|&e| e / options.negative_sample_rate as f64)
        .collect();
    let mut epoch_of_next_sample = epochs_per_sample.clone();
    let mut epoch_of_next_negative_sample = epochs_per_negative_sample.clone();

    let mut alpha = options.learning_rate;
    for epoch in 0..options.n_epochs {
        for (i, &(head, tail, _)) in edges.iter().enumerate() {
            if epoch_of_next_sample[i] > epoch as f64 {
                continue;
            }
            // each epoch + sample gets a deterministic seed
            let sample_seed = seed ^ (((epoch as u64) << 32) | (i as u64));
            let mut rng = SmallRng::seed_from_u64(sample_seed);

            let j = head as usize;
            let k = tail as usize;

            attract(&mut coords, j, k, alpha);
            epoch_of_next_sample[i] += epochs_per_sample[i];

            let n_neg_samples = ((epoch as f64 - epoch_of_next_negative_sample[i])
                / epochs_per_negative_sample[i])
                .floor() as isize;
            for _ in 0..n_neg_samples {
                let other = rng.gen_range(0..n);
                if other == j {
                    continue;
                }
                repel(&mut coords, j, other, alpha, options.repulsion_strength);
            }
            epoch_of_next_negative_sample[i] +=
                n_neg_samples as f64 * epochs_per_negative_sample[i];
        }
        alpha = options.learning_rate * (1.0 - (epoch + 1) as f64 / options.n_epochs as f64);
    }

    coords
}

fn pca_init(embedding: &Embedding, n: usize) -> Array2<f64> {
    let scores = embedding.scores();
    let mut coords = Array2::zeros((n, 2));
    let dims = scores.ncols().min(2);
    for d in 0..dims {
        let col = scores.column(d);
        let extreme = col.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()));
        if extreme == 0.0 {
            continue;
        }
        for (row, &x) in col.iter().enumerate() {
            coords[[row, d]] = x / extreme * INIT_SCALE;
        }
    }
    coords
}

fn dist_sq(coords: &Array2<f64>, j: usize, k: usize) -> f64 {
    let x = coords.row(j);
    let y = coords.row(k);
    x.iter()
        .zip(y)
        .map(|(&a, &b)| a - b)
        .fold(0.0, |acc, d| acc + d * d)
}

fn attract(coords: &mut Array2<f64>, j: usize, k: usize, alpha: f64) {
    let d2 = dist_sq(coords, j, k);
    let grad_coeff = if d2 > 0.0 {
        (-2.0 * KERNEL_A * KERNEL_B * d2.powf(KERNEL_B - 1.0))
            / (1.0 + KERNEL_A * d2.powf(KERNEL_B))
    } else {
        0.0
    };
    for d in 0..2 {
        let grad_d = (grad_coeff * (coords[[j, d]] - coords[[k, d]])).clamp(-GRAD_CLIP, GRAD_CLIP);
        coords[[j, d]] += grad_d * alpha;
        coords[[k, d]] -= grad_d * alpha;
    }
}

fn repel(coords: &mut Array2<f64>, j: usize, other: usize, alpha: f64, gamma: f64) {
    let d2 = dist_sq(coords, j, other);
    let grad_coeff = if d2 > 0.0 {
        (2.0 * gamma * KERNEL_B) / ((1e-3 + d2) * (1.0 + KERNEL_A * d2.powf(KERNEL_B)))
    } else {
        0.0
    };
    for d in 0..2 {
        let grad_d = if grad_coeff > 0.0 {
            (grad_coeff * (coords[[j, d]] - coords[[other, d]])).clamp(-GRAD_CLIP, GRAD_CLIP)
        } else {
            GRAD_CLIP
        };
        coords[[j, d]] += grad_d * alpha;
    }
}
