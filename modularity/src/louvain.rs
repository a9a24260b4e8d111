use crate::local_moving::LocalMoving;
use crate::{Clustering, Graph};
use fxhash::FxHashSet;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use vigil::{CancelledError, Watch};

/// Default resolution of the modularity objective.
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Multi-level Louvain clustering.
///
/// Repeats local-move sweeps until no node move improves modularity,
/// aggregates communities into meta-nodes and recurses on the reduced
/// graph, then folds the aggregate labels back down. All randomness
/// comes from the seeded ChaCha20 stream, so a fixed (graph, resolution,
/// seed) triple always yields the same partition.
pub struct Louvain {
    rng: ChaCha20Rng,
    local_moving: LocalMoving,
}

impl Louvain {
    /// Set up with the given resolution and random seed.
    pub fn new(resolution: f64, seed: u64) -> Louvain {
        Louvain {
            rng: ChaCha20Rng::seed_from_u64(seed),
            local_moving: LocalMoving::new(resolution),
        }
    }

    /// Cluster `graph`, returning size-ranked labels (0 = largest).
    ///
    /// Cancellation is observed between local-move sweeps and between
    /// aggregation levels.
    pub fn cluster(
        &mut self,
        graph: &Graph,
        mut watch: impl Watch,
    ) -> Result<Clustering, CancelledError> {
        watch.checkpoint(0.0)?;
        let mut clustering = Clustering::singletons(graph.nodes());
        self.optimize(graph, &mut clustering, &mut watch)?;
        clustering.relabel_by_size();
        watch.checkpoint(1.0)?;
        Ok(clustering)
    }

    fn optimize(
        &mut self,
        graph: &Graph,
        clustering: &mut Clustering,
        watch: &mut impl Watch,
    ) -> Result<bool, CancelledError> {
        let mut update = false;
        while self.local_moving.sweep(graph, clustering, &mut self.rng) {
            update = true;
            if watch.is_cancelled() {
                return Err(CancelledError);
            }
        }

        if clustering.num_clusters() == graph.nodes() {
            return Ok(update);
        }

        // Recurse on the aggregate graph, one meta-node per community.
        let reduced = graph.aggregate(clustering);
        let mut reduced_clustering = Clustering::singletons(reduced.nodes());
        if self.optimize(&reduced, &mut reduced_clustering, watch)? {
            clustering.merge(&reduced_clustering);
            update = true;
        }

        Ok(update)
    }

    /// Build a graph from weighted adjacencies, dropping duplicate edges
    /// and self-loops. Node weights become the weighted degrees.
    pub fn build_graph<I: Iterator<Item = (u32, u32, f64)>>(n_nodes: usize, adjacency: I) -> Graph {
        let mut graph = Graph::with_nodes(n_nodes);
        let mut seen: Vec<FxHashSet<u32>> = vec![FxHashSet::default(); n_nodes];
        for (a, b, weight) in adjacency {
            if a == b {
                continue;
            }
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            if seen[lo as usize].insert(hi) {
                graph.add_edge(lo, hi, weight);
            }
        }
        graph
    }
}
