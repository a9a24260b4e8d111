//! Nearest-neighbor search in PCA space and shared-nearest-neighbor
//! graph refinement.

use crate::dim_red::Embedding;
use log::{info, warn};
use ndarray::{s, Array2, Axis};
use noisy_float::checkers::NumChecker;
use noisy_float::NoisyFloat;
use nucleus_types::AnalysisError;
use num_traits::Bounded;
use rayon::prelude::*;
use vpsearch::{BestCandidate, MetricSpace, Tree};

/// Edges whose Jaccard similarity falls below this floor are pruned.
pub const DEFAULT_SNN_FLOOR: f64 = 1.0 / 15.0;

/// Undirected shared-nearest-neighbor graph over the filtered cells.
///
/// No self loops; each edge is stored once with its lower endpoint first.
#[derive(Clone, Debug)]
pub struct NeighborGraph {
    barcodes: Vec<String>,
    neighbors: Array2<usize>,
    edges: Vec<(u32, u32, f64)>,
}

impl NeighborGraph {
    /// Number of cells (graph nodes).
    pub fn n_cells(&self) -> usize {
        self.barcodes.len()
    }

    /// Cell barcodes, in node order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Raw k-nearest-neighbor indices, one row per cell, nearest first.
    pub fn neighbors(&self) -> &Array2<usize> {
        &self.neighbors
    }

    /// SNN edges `(a, b, jaccard)` with `a < b`.
    pub fn edges(&self) -> &[(u32, u32, f64)] {
        &self.edges
    }

    /// Number of connected components after pruning.
    pub fn n_components(&self) -> usize {
        let mut parent: Vec<usize> = (0..self.n_cells()).collect();
        fn find(parent: &mut [usize], x: usize) -> usize {
            let mut root = x;
            while parent[root] != root {
                root = parent[root];
            }
            let mut cur = x;
            while parent[cur] != root {
                let next = parent[cur];
                parent[cur] = root;
                cur = next;
            }
            root
        }
        for &(a, b, _) in &self.edges {
            let ra = find(&mut parent, a as usize);
            let rb = find(&mut parent, b as usize);
            if ra != rb {
                parent[ra] = rb;
            }
        }
        (0..self.n_cells())
            .filter(|&i| find(&mut parent, i) == i)
            .count()
    }
}

#[derive(Clone, Debug)]
struct Sample<'a> {
    data: &'a [f64],
    idx: usize,
}

impl MetricSpace for Sample<'_> {
    type UserData = ();
    type Distance = NoisyFloat<f64, NumChecker>;

    fn distance(&self, other: &Self, _: &Self::UserData) -> Self::Distance {
        let d = self
            .data
            .iter()
            .zip(other.data)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>();
        NoisyFloat::new(d.sqrt())
    }
}

/// Custom search tracking the indices of the N nearest points.
struct CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    max_item_count: usize,
    max_observed_distance: Item::Distance,
    distance_x_index: Vec<(Item::Distance, usize)>,
}

impl<Item, Impl> CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Item::Distance as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Item::Distance as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    /// Insert a single index in the correct position given that
    /// `distance_x_index` is already sorted.
    fn insert_index(&mut self, index: usize, distance: Item::Distance) {
        let val = (distance, index);
        let idx = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(idx, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            self.max_observed_distance = self.distance_x_index.last().unwrap().0;
        }
    }
}

impl<'a, Item, Impl> BestCandidate<Item, Impl> for &'a mut CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl> + Clone,
    Item::Distance: Ord,
{
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Item::Distance, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Item, distance: Item::Distance, candidate_index: usize, _: &Item::UserData) {
        if self.max_item_count == 0 {
            return;
        }
        if distance < self.max_observed_distance || self.distance_x_index.len() < self.max_item_count {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Item::Distance {
        self.max_observed_distance
    }

    fn result(self, _: &Item::UserData) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

/// Exact k-nearest neighbors of each row of `data` by Euclidean distance,
/// via a vantage-point tree with parallel queries. Rows of the output are
/// sorted nearest first and exclude the query point itself.
pub fn knn(data: &Array2<f64>, k: usize) -> Array2<usize> {
    let (n, _) = data.dim();
    debug_assert!(k < n);

    let samples: Vec<Sample> = (0..n)
        .map(|idx| Sample {
            data: data.slice(s![idx, ..]).to_slice().unwrap(),
            idx,
        })
        .collect();
    info!("constructing vp-tree of {n} points");
    let vp = Tree::new_with_user_data_ref(&samples, &());

    let mut indices = Array2::from_elem((n, k), usize::MAX);
    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k + 1),
            |neighborhood, (cell, mut indices)| {
                neighborhood.clear();
                let query = &samples[cell];
                let mut j = 0;
                for (_, idx) in vp.find_nearest_custom(query, &(), neighborhood) {
                    if query.idx != idx && j < k {
                        indices[j] = idx;
                        j += 1;
                    }
                }
            },
        );
    indices
}

/// Builds the shared-nearest-neighbor graph from the first `d` components
/// of the PCA embedding.
///
/// Each cell is linked to its `m` nearest neighbors; edges are reweighted
/// by the Jaccard similarity of the two endpoint neighbor sets (self
/// included) and pruned below `snn_floor`. Disconnected components are
/// logged and tolerated, falling through as separate clusters.
pub fn build_graph(
    embedding: &Embedding,
    m: usize,
    d: usize,
    snn_floor: f64,
) -> Result<NeighborGraph, AnalysisError> {
    let n = embedding.scores().nrows();
    if n < 2 {
        return Err(AnalysisError::InputShape(
            "neighbor graph needs at least two cells".into(),
        ));
    }
    let d = d.min(embedding.k());
    let mut m = m;
    if m >= n {
        warn!("{} neighbors requested, but only {} available", m, n - 1);
        m = n - 1;
    }

    let data = embedding.scores().slice(s![.., ..d]).to_owned();
    let neighbors = knn(&data, m);

    // Sorted neighbor sets, self included, for Jaccard overlap scans.
    let sets: Vec<Vec<usize>> = (0..n)
        .map(|cell| {
            let mut set: Vec<usize> = neighbors.row(cell).to_vec();
            set.push(cell);
            set.sort_unstable();
            set
        })
        .collect();

    let mut edges = Vec::new();
    for cell in 0..n {
        for &other in neighbors.row(cell) {
            let (a, b) = if cell < other { (cell, other) } else { (other, cell) };
            // Each unordered pair is scored once, from its lower endpoint,
            // so mutual neighbors do not produce duplicate edges.
            if a == cell || !neighbors.row(other).iter().any(|&x| x == cell) {
                let shared = sorted_intersection(&sets[a], &sets[b]);
                let union = sets[a].len() + sets[b].len() - shared;
                let jaccard = shared as f64 / union as f64;
                if jaccard >= snn_floor {
                    edges.push((a as u32, b as u32, jaccard));
                }
            }
        }
    }
    edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));

    let graph = NeighborGraph {
        barcodes: embedding.barcodes().to_vec(),
        neighbors,
        edges,
    };
    let components = graph.n_components();
    if components > 1 {
        warn!("neighbor graph has {components} disconnected components; they will cluster separately");
    }
    Ok(graph)
}

fn sorted_intersection(a: &[usize], b: &[usize]) -> usize {
    let mut count = 0;
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}
