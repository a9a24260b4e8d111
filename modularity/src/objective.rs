use crate::{Clustering, Graph};
use rayon::prelude::*;

/// Modularity of a partition: within-community edge weight versus the
/// weighted-degree null model, scaled by `resolution`.
///
/// Edge terms are accumulated over parallel node chunks and reduced in
/// chunk order, so the result is deterministic.
pub fn modularity(resolution: f64, graph: &Graph, clustering: &Clustering) -> f64 {
    let nodes = graph.nodes();
    let total_edge_weight = graph.total_edge_weight();
    if total_edge_weight == 0.0 {
        return 0.0;
    }

    // Chunk count large relative to typical thread counts, so rayon can
    // balance the uneven loads induced by the lower-endpoint rule.
    let chunk_size = std::cmp::max(1, nodes / 64);
    let within: f64 = (0..nodes)
        .collect::<Vec<usize>>()
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut acc = 0.0;
            for &node in chunk {
                let c = clustering.get(node);
                for &(other, weight) in graph.neighbors(node) {
                    // count each undirected edge from its lower endpoint
                    if (other as usize) < node && clustering.get(other as usize) == c {
                        acc += 2.0 * weight;
                    }
                }
            }
            acc
        })
        .collect::<Vec<f64>>()
        .into_iter()
        .sum();

    let mut quality = within;

    let mut cluster_weights = vec![0.0; clustering.num_clusters()];
    for node in 0..nodes {
        cluster_weights[clustering.get(node)] += graph.weight(node);
    }
    for w in cluster_weights {
        quality -= w * w * resolution / (2.0 * total_edge_weight);
    }

    quality / (2.0 * total_edge_weight)
}
