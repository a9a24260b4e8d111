//! Multi-level Louvain community detection over weighted undirected
//! graphs, with a resolution parameter and seeded, deterministic
//! tie-breaking.

#![deny(missing_docs)]
#![deny(warnings)]

/// Cluster label bookkeeping
pub mod clustering;

/// Weighted undirected graph storage
pub mod graph;

/// Multi-level Louvain driver
pub mod louvain;

/// Modularity objective function
pub mod objective;

mod local_moving;


pub use clustering::Clustering;
pub use graph::Graph;
pub use louvain::Louvain;

trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.resize_with(len, T::default);
    }
}
