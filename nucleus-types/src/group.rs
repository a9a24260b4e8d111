use crate::error::AnalysisError;
use crate::metadata::CellMetadata;
use serde::{Deserialize, Serialize};

/// Cluster assignment over a filtered set of cells.
///
/// Clusters partition the cells exactly: one integer label per row, no
/// overlaps, no omissions. Labels are size-ranked (0 = largest cluster)
/// by the producing clusterer and immutable afterwards.
#[derive(Clone, Debug)]
pub struct ClusterLabeling {
    barcodes: Vec<String>,
    labels: Vec<u32>,
    n_clusters: u32,
}

impl ClusterLabeling {
    /// Build a labeling; `labels[i]` is the cluster of `barcodes[i]`.
    pub fn new(barcodes: Vec<String>, labels: Vec<u32>) -> ClusterLabeling {
        assert_eq!(barcodes.len(), labels.len());
        let n_clusters = labels.iter().max().map_or(0, |&m| m + 1);
        ClusterLabeling {
            barcodes,
            labels,
            n_clusters,
        }
    }

    /// Number of labeled cells.
    pub fn n_cells(&self) -> usize {
        self.labels.len()
    }

    /// Number of distinct clusters.
    pub fn n_clusters(&self) -> u32 {
        self.n_clusters
    }

    /// Barcodes in row order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Cluster labels in row order.
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Row indices of the cells in `cluster`.
    pub fn members(&self, cluster: u32) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == cluster)
            .map(|(i, _)| i)
            .collect()
    }

    /// Cluster sizes, indexed by cluster id.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_clusters as usize];
        for &l in &self.labels {
            sizes[l as usize] += 1;
        }
        sizes
    }
}

/// Structured key naming a comparison group: a cluster, optionally
/// restricted to one condition.
///
/// Carried as a tagged pair rather than a concatenated string so that
/// condition-wise splits of a cluster can never be misparsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Cluster id within the labeling
    pub cluster: u32,
    /// Restrict to cells with this condition label, if set
    pub condition: Option<String>,
}

impl GroupKey {
    /// Whole cluster, all conditions.
    pub fn cluster(cluster: u32) -> GroupKey {
        GroupKey {
            cluster,
            condition: None,
        }
    }

    /// One cluster restricted to one condition.
    pub fn cluster_condition(cluster: u32, condition: impl Into<String>) -> GroupKey {
        GroupKey {
            cluster,
            condition: Some(condition.into()),
        }
    }

    /// Row indices of the cells this key selects, via an explicit keyed
    /// join between cluster label and condition. Fails with `EmptyGroup`
    /// if no cell matches.
    pub fn resolve(&self, labeling: &ClusterLabeling, metadata: &CellMetadata) -> Result<Vec<usize>, AnalysisError> {
        let mut rows = Vec::new();
        for (row, (barcode, &label)) in labeling.barcodes().iter().zip(labeling.labels()).enumerate() {
            if label != self.cluster {
                continue;
            }
            match &self.condition {
                None => rows.push(row),
                Some(cond) => {
                    if metadata.get(barcode).map(|a| a.condition.as_str()) == Some(cond.as_str()) {
                        rows.push(row);
                    }
                }
            }
        }
        if rows.is_empty() {
            return Err(AnalysisError::EmptyGroup(format!("{self:?}")));
        }
        Ok(rows)
    }
}
