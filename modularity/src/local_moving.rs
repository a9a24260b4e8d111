use crate::{Clustering, Graph, ZeroVec};
use rand::seq::SliceRandom;
use rand::Rng;

/// One level of greedy modularity-optimizing node moves.
///
/// Nodes are visited in a random permutation, cyclically, until a full
/// pass makes no move. Each visit moves the node to the neighboring
/// community with the largest positive modularity gain; exact ties go to
/// the lowest community label so runs are reproducible for a fixed seed.
#[derive(Default)]
pub(crate) struct LocalMoving {
    resolution: f64,
    cluster_weights: Vec<f64>,
    nodes_per_cluster: Vec<usize>,
    unused_clusters: Vec<usize>,
    node_order: Vec<usize>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
}

impl LocalMoving {
    pub fn new(resolution: f64) -> Self {
        LocalMoving {
            resolution,
            ..LocalMoving::default()
        }
    }

    pub fn sweep(&mut self, graph: &Graph, clustering: &mut Clustering, rng: &mut impl Rng) -> bool {
        let nodes = graph.nodes();
        if nodes == 0 {
            return false;
        }

        let mut update = false;
        let total_edge_weight = graph.total_edge_weight();

        self.cluster_weights.zero_len(nodes);
        self.nodes_per_cluster.zero_len(nodes);
        for node in 0..nodes {
            self.cluster_weights[clustering.get(node)] += graph.weight(node);
            self.nodes_per_cluster[clustering.get(node)] += 1;
        }

        let mut num_unused = 0;
        self.unused_clusters.zero_len(nodes);
        for cluster in (0..nodes).rev() {
            if self.nodes_per_cluster[cluster] == 0 {
                self.unused_clusters[num_unused] = cluster;
                num_unused += 1;
            }
        }

        self.node_order.clear();
        self.node_order.extend(0..nodes);
        self.node_order.shuffle(rng);

        self.edge_weight_per_cluster.zero_len(nodes);
        self.neighboring_clusters.zero_len(nodes);

        // Queue of still-unstable nodes: node_order[i..i + num_unstable],
        // wrapping around the end of the permutation.
        let mut num_unstable = nodes;
        let mut i = 0;

        loop {
            let node = self.node_order[i];
            let current_cluster = clustering.get(node);

            // Take the node out of its cluster.
            self.cluster_weights[current_cluster] -= graph.weight(node);
            self.nodes_per_cluster[current_cluster] -= 1;
            if self.nodes_per_cluster[current_cluster] == 0 {
                self.unused_clusters[num_unused] = current_cluster;
                num_unused += 1;
            }

            // Candidate clusters: every cluster adjacent to the node,
            // plus one empty cluster so splitting off is always possible.
            self.neighboring_clusters[0] = self.unused_clusters[num_unused - 1];
            let mut num_neighboring = 1;
            for &(other, edge_weight) in graph.neighbors(node) {
                let neighbor_cluster = clustering.get(other as usize);
                if self.edge_weight_per_cluster[neighbor_cluster] == 0.0 {
                    self.neighboring_clusters[num_neighboring] = neighbor_cluster;
                    num_neighboring += 1;
                }
                self.edge_weight_per_cluster[neighbor_cluster] += edge_weight;
            }

            // Gain of joining cluster c: E(node, c) - w(node) * W(c) * gamma / 2m.
            // Exact ties go to the lowest label; a tie can only move a node
            // to a smaller label, so repeated sweeps terminate.
            let mut best_cluster = current_cluster;
            let mut max_gain = self.edge_weight_per_cluster[current_cluster]
                - graph.weight(node) * self.cluster_weights[current_cluster] * self.resolution
                    / (2.0 * total_edge_weight);

            for &candidate in &self.neighboring_clusters[..num_neighboring] {
                let gain = self.edge_weight_per_cluster[candidate]
                    - graph.weight(node) * self.cluster_weights[candidate] * self.resolution
                        / (2.0 * total_edge_weight);
                if gain > max_gain || (gain == max_gain && candidate < best_cluster) {
                    best_cluster = candidate;
                    max_gain = gain;
                }
                self.edge_weight_per_cluster[candidate] = 0.0;
            }

            self.cluster_weights[best_cluster] += graph.weight(node);
            self.nodes_per_cluster[best_cluster] += 1;
            if best_cluster == self.unused_clusters[num_unused - 1] {
                num_unused -= 1;
            }

            num_unstable -= 1;

            if best_cluster != current_cluster {
                clustering.set(node, best_cluster);
                update = true;
            }

            i = (i + 1) % nodes;
            if num_unstable == 0 {
                break;
            }
        }

        if update {
            clustering.remove_empty_clusters();
        }

        update
    }
}
