use crate::Clustering;
use fxhash::FxHashMap;

/// Weighted undirected graph stored as per-node adjacency lists.
///
/// Each undirected edge is stored once per endpoint. Node weights carry
/// the weighted degree (for the modularity null model) and are summed
/// when nodes are aggregated into a reduced graph.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    adjacency: Vec<Vec<(u32, f64)>>,
    node_weights: Vec<f64>,
    total_edge_weight: f64,
}

impl Graph {
    /// Empty graph with `nodes` isolated nodes of weight zero.
    pub fn with_nodes(nodes: usize) -> Graph {
        Graph {
            adjacency: vec![Vec::new(); nodes],
            node_weights: vec![0.0; nodes],
            total_edge_weight: 0.0,
        }
    }

    /// Number of nodes.
    pub fn nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Add an undirected edge. Self-loops are rejected by the builders
    /// upstream; each endpoint's node weight grows by the edge weight.
    pub fn add_edge(&mut self, a: u32, b: u32, weight: f64) {
        debug_assert_ne!(a, b);
        self.adjacency[a as usize].push((b, weight));
        self.adjacency[b as usize].push((a, weight));
        self.node_weights[a as usize] += weight;
        self.node_weights[b as usize] += weight;
        self.total_edge_weight += weight;
    }

    /// Weighted degree of `node`.
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Neighbors of `node` as (neighbor, edge weight) pairs.
    pub fn neighbors(&self, node: usize) -> &[(u32, f64)] {
        &self.adjacency[node]
    }

    /// Sum of all edge weights, each edge counted once.
    pub fn total_edge_weight(&self) -> f64 {
        self.total_edge_weight
    }

    /// Number of nodes with no incident edges.
    pub fn isolated_nodes(&self) -> usize {
        self.adjacency.iter().filter(|adj| adj.is_empty()).count()
    }

    /// Aggregate graph of a clustering: one node per cluster, node
    /// weight the sum of member weights, edge weight the sum of
    /// inter-cluster edge weights. Intra-cluster edges are dropped
    /// (their mass is already reflected in the node weights).
    pub fn aggregate(&self, clustering: &Clustering) -> Graph {
        let mut reduced = Graph::with_nodes(clustering.num_clusters());

        for node in 0..self.nodes() {
            let c = clustering.get(node);
            reduced.node_weights[c] += self.node_weights[node];
        }

        let mut edge_memo: FxHashMap<(u32, u32), f64> = FxHashMap::default();
        for node in 0..self.nodes() {
            let c1 = clustering.get(node) as u32;
            for &(other, weight) in self.neighbors(node) {
                // each undirected edge visited from its lower endpoint
                if (other as usize) < node {
                    continue;
                }
                let c2 = clustering.get(other as usize) as u32;
                if c1 == c2 {
                    continue;
                }
                let key = if c1 < c2 { (c1, c2) } else { (c2, c1) };
                *edge_memo.entry(key).or_insert(0.0) += weight;
            }
        }

        let mut edges: Vec<_> = edge_memo.into_iter().collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0));
        for ((c1, c2), weight) in edges {
            reduced.adjacency[c1 as usize].push((c2, weight));
            reduced.adjacency[c2 as usize].push((c1, weight));
            reduced.total_edge_weight += weight;
        }

        reduced
    }
}
