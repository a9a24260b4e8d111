/// Assignment of one integer label per node.
#[derive(Clone, Debug, Default)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Each node in its own cluster.
    pub fn singletons(nodes: usize) -> Clustering {
        Clustering {
            labels: (0..nodes).collect(),
            num_clusters: nodes,
        }
    }

    /// Label of `node`.
    pub fn get(&self, node: usize) -> usize {
        self.labels[node]
    }

    /// Relabel `node`, extending the cluster count if needed.
    pub fn set(&mut self, node: usize, label: usize) {
        self.labels[node] = label;
        if label >= self.num_clusters {
            self.num_clusters = label + 1;
        }
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct cluster labels (after compaction).
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// All labels, in node order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of nodes per cluster, indexed by label.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.num_clusters];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }

    /// Apply a clustering of the cluster labels themselves, as produced
    /// on an aggregate graph, then compact.
    pub fn merge(&mut self, aggregate: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = aggregate.get(*l);
        }
        self.num_clusters = aggregate.num_clusters;
        self.remove_empty_clusters();
    }

    /// Reassign labels so every label in `0..num_clusters` is used.
    pub fn remove_empty_clusters(&mut self) {
        let sizes = self.cluster_sizes();

        let mut remap = vec![usize::MAX; self.num_clusters];
        let mut next = 0;
        for (old, &size) in sizes.iter().enumerate() {
            if size > 0 {
                remap[old] = next;
                next += 1;
            }
        }

        for l in self.labels.iter_mut() {
            debug_assert_ne!(remap[*l], usize::MAX);
            *l = remap[*l];
        }
        self.num_clusters = next;
    }

    /// Reassign labels by descending cluster size, largest cluster
    /// becoming 0. Ties broken by the lower pre-existing label, so the
    /// result is independent of processing order.
    pub fn relabel_by_size(&mut self) {
        let sizes = self.cluster_sizes();

        let mut order: Vec<usize> = (0..self.num_clusters).collect();
        order.sort_by_key(|&c| (std::cmp::Reverse(sizes[c]), c));

        let mut remap = vec![0usize; self.num_clusters];
        for (rank, &old) in order.iter().enumerate() {
            remap[old] = rank;
        }

        for l in self.labels.iter_mut() {
            *l = remap[*l];
        }
    }
}
