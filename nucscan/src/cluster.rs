//! Community detection over the shared-nearest-neighbor graph.

use crate::nn::NeighborGraph;
use log::info;
use modularity::{Graph, Louvain};
use nucleus_types::{AnalysisError, ClusterLabeling};
use vigil::Watch;

/// Partitions the graph by seeded multi-level modularity optimization.
///
/// Cluster ids are assigned by descending cluster size starting at 0, so
/// the labeling is independent of internal processing order. Runs with the
/// same graph, resolution, and seed produce identical labelings.
/// Cancellation is observed between local-move sweeps.
pub fn cluster(
    graph: &NeighborGraph,
    resolution: f64,
    seed: u64,
    watch: impl Watch,
) -> Result<ClusterLabeling, AnalysisError> {
    if graph.n_cells() == 0 {
        return Err(AnalysisError::EmptyResult(
            "cannot cluster an empty neighbor graph".into(),
        ));
    }

    let network: Graph = Louvain::build_graph(
        graph.n_cells(),
        graph.edges().iter().copied(),
    );
    let clustering = Louvain::new(resolution, seed).cluster(&network, watch)?;

    info!(
        "clustered {} cells into {} communities (resolution {resolution})",
        graph.n_cells(),
        clustering.num_clusters()
    );
    let labels: Vec<u32> = clustering.labels().iter().map(|&l| l as u32).collect();
    Ok(ClusterLabeling::new(graph.barcodes().to_vec(), labels))
}
