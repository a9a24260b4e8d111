#![allow(non_snake_case)]

//! Principal component analysis of the scaled feature matrix.
//!
//! The SVD backend operates on the dense `ScaledMatrix` (standardization
//! densifies upstream), so the solver surface is a plain `ArrayView2`
//! rather than a generic matrix trait.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use nucleus_types::{AnalysisError, ScaledMatrix};
use vigil::{NoOpWatch, Watch};

/// Block Krylov SVD backend.
pub mod bk_svd;


/// `(u, sigma, v)` with `u` cells-by-k, `sigma` descending singular
/// values, `v` features-by-k.
pub type SvdResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Singular values this far below the leading one (relatively) are treated
/// as numerically zero when checking rank.
const RANK_TOLERANCE: f64 = 1e-9;

/// Rank-k truncated SVD of a dense matrix. PCA is obtained by feeding the
/// centered/scaled matrix through [`reduce`].
pub trait Pca {
    /// Compute a rank `k` SVD, with cancellation/progress token `watch`.
    fn run_pca_cancellable(
        &self,
        matrix: &ArrayView2<f64>,
        k: usize,
        watch: impl Watch,
    ) -> Result<SvdResult, AnalysisError>;

    /// Compute a rank `k` SVD without cancellation/progress tracking.
    fn run_pca(&self, matrix: &ArrayView2<f64>, k: usize) -> Result<SvdResult, AnalysisError> {
        self.run_pca_cancellable(matrix, k, NoOpWatch)
    }
}

/// PCA output: component scores, loadings, and explained variance.
#[derive(Clone, Debug)]
pub struct Embedding {
    barcodes: Vec<String>,
    scores: Array2<f64>,
    loadings: Array2<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
}

impl Embedding {
    /// Cell barcodes, in row order of `scores`.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Component scores, cells by k, components in descending explained
    /// variance order.
    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    /// Component loadings, features by k. Columns are mutually
    /// orthonormal.
    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    /// Variance explained by each component.
    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    /// Fraction of the total variance explained by each component; the
    /// fractions sum to at most 1.
    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    /// Number of retained components.
    pub fn k(&self) -> usize {
        self.scores.ncols()
    }
}

/// Projects the scaled matrix onto its top `k` principal components.
///
/// Components come out in descending explained-variance order with a
/// deterministic sign: each component's largest-magnitude loading is
/// positive. Fails with `RankDeficiency` when `k` exceeds
/// `min(n_cells - 1, n_features)` or the numerical rank of the input.
pub fn reduce(
    scaled: &ScaledMatrix,
    k: usize,
    watch: impl Watch,
) -> Result<Embedding, AnalysisError> {
    let n_cells = scaled.n_cells();
    let n_features = scaled.n_features();

    // Columns are centered, so at most n_cells - 1 informative directions.
    let max_rank = n_features.min(n_cells.saturating_sub(1));
    if k == 0 || k > max_rank {
        return Err(AnalysisError::RankDeficiency {
            requested: k,
            max_rank,
        });
    }

    let values = scaled.values().view();
    let (u, sigma, v) = bk_svd::BkSvd::new().run_pca_cancellable(&values, k, watch)?;

    if sigma[k - 1] <= RANK_TOLERANCE * sigma[0].max(f64::MIN_POSITIVE) {
        let rank = sigma
            .iter()
            .take_while(|&&s| s > RANK_TOLERANCE * sigma[0])
            .count();
        return Err(AnalysisError::RankDeficiency {
            requested: k,
            max_rank: rank,
        });
    }

    let (u, v) = fix_signs(u, v);
    let mut scores = u;
    for (mut col, &s) in scores.axis_iter_mut(Axis(1)).zip(sigma.iter()) {
        col.mapv_inplace(|x| x * s);
    }

    let denom = (n_cells - 1) as f64;
    let explained_variance = sigma.mapv(|s| s * s / denom);
    let total_variance = values.iter().map(|x| x * x).sum::<f64>() / denom;
    let explained_variance_ratio = explained_variance.mapv(|v| v / total_variance);

    Ok(Embedding {
        barcodes: scaled.barcodes().to_vec(),
        scores,
        loadings: v,
        explained_variance,
        explained_variance_ratio,
    })
}

/// Singular vectors are unique up to sign; fix each component so its
/// largest-magnitude loading is positive.
fn fix_signs(mut u: Array2<f64>, mut v: Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    for comp in 0..v.ncols() {
        let mut extreme = 0.0f64;
        for &x in v.column(comp) {
            if x.abs() > extreme.abs() {
                extreme = x;
            }
        }
        if extreme < 0.0 {
            v.column_mut(comp).mapv_inplace(|x| -x);
            u.column_mut(comp).mapv_inplace(|x| -x);
        }
    }
    (u, v)
}
