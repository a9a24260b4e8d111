#![allow(non_snake_case)]

use super::{Pca, SvdResult};
use ndarray::{s, Array2, ArrayView2};
use ndarray_linalg::svddc::JobSvd;
use ndarray_linalg::{SVDDCInto, QR};
use nucleus_types::AnalysisError;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use vigil::Watch;

/// Based on "Randomized Block Krylov Methods for Stronger and Faster
/// Approximate Singular Value Decomposition", Cameron and Christopher
/// Musco, NIPS 2015
/// <https://papers.nips.cc/paper/5735-randomized-block-krylov-methods-for-stronger-and-faster-approximate-singular-value-decomposition.pdf>

/// Settings for Block Krylov SVD
pub struct BkSvd {
    /// Multiple of the requested k to use as block size in randomized
    /// projections, must be >= 1.0
    pub k_multiplier: f64,

    /// Number of power iterations to perform
    pub n_iter: usize,

    /// Seed for the randomized projection; a fixed seed makes the
    /// decomposition reproducible.
    pub seed: u64,
}

impl BkSvd {
    /// Create a new BkSvd with default settings.
    pub fn new() -> BkSvd {
        BkSvd {
            k_multiplier: 2.0,
            n_iter: 5,
            seed: 0,
        }
    }
}

impl Default for BkSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl Pca for BkSvd {
    fn run_pca_cancellable(
        &self,
        array: &ArrayView2<f64>,
        k: usize,
        watch: impl Watch,
    ) -> Result<SvdResult, AnalysisError> {
        let bsize = (k as f64 * self.k_multiplier).ceil() as usize;
        let (u, s, vt) = svd_bk(array, k, bsize, self.n_iter, self.seed, watch)?;
        Ok((u, s, vt.reversed_axes()))
    }
}

fn numeric(err: ndarray_linalg::error::LinalgError) -> AnalysisError {
    AnalysisError::Numeric(err.to_string())
}

/// Orthonormal basis for the column space of the stacked Krylov blocks.
/// A block matrix with at least as many columns as rows already spans the
/// whole space, where the basis is trivial.
fn krylov_q(K: &ArrayView2<f64>) -> Result<Array2<f64>, AnalysisError> {
    if K.ncols() >= K.nrows() {
        Ok(Array2::eye(K.nrows()))
    } else {
        Ok(K.qr().map_err(numeric)?.0)
    }
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `b`
/// projection dimensions and `n_iter` power iterations.
#[inline(never)]
pub fn svd_bk(
    A: &ArrayView2<f64>,
    k: usize,      // svd rank
    b: usize,      // size of blocks, must be >= k
    n_iter: usize, // number of blocks
    seed: u64,
    mut watch: impl Watch,
) -> Result<(Array2<f64>, ndarray::Array1<f64>, Array2<f64>), AnalysisError> {
    let (m, n) = A.dim();

    if m < 2 || n < 2 {
        return Err(AnalysisError::InputShape(
            "the input matrix must be at least 2x2".into(),
        ));
    }

    if k > std::cmp::min(m, n) {
        return Err(AnalysisError::RankDeficiency {
            requested: k,
            max_rank: std::cmp::min(m, n),
        });
    }

    let b = std::cmp::min(std::cmp::min(m, n), b);

    let mut rng = SmallRng::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    if m >= n {
        let mut B = Array2::from_shape_simple_fn((n, b), || unif.sample(&mut rng));
        let mut K = Array2::<f64>::zeros((n, b * n_iter));

        for i in 0..n_iter {
            B = A
                .dot(&B)
                .reversed_axes()
                .dot(A)
                .reversed_axes()
                .qr()
                .map_err(numeric)?
                .0;
            K.slice_mut(s![.., i * b..(i + 1) * b]).assign(&B);
            watch.checkpoint(i as f64 / n_iter as f64 * 0.8)?;
        }
        let Q = krylov_q(&K.view())?;
        watch.checkpoint(0.82)?;

        let (U, sigma, Va) = {
            let T = A.dot(&Q);
            watch.checkpoint(0.93)?;

            let svd = T.svddc_into(JobSvd::Some).map_err(numeric)?;
            (
                svd.0
                    .ok_or_else(|| AnalysisError::Numeric("SVD produced no U factor".into()))?
                    .slice(s![.., ..k])
                    .to_owned(),
                svd.1.slice(s![..k]).to_owned(),
                svd.2
                    .ok_or_else(|| AnalysisError::Numeric("SVD produced no V factor".into()))?
                    .slice(s![..k, ..])
                    .to_owned(),
            )
        };

        let Va = Va.dot(&Q.t());
        watch.checkpoint(1.0)?;
        Ok((U, sigma, Va))
    } else {
        // n > m
        let mut B = Array2::from_shape_simple_fn((b, m), || unif.sample(&mut rng));
        let mut K = Array2::<f64>::zeros((b * n_iter, m));

        for i in 0..n_iter {
            let T = B.dot(A).reversed_axes();
            B = A.dot(&T).qr().map_err(numeric)?.0.reversed_axes();
            K.slice_mut(s![i * b..(i + 1) * b, ..]).assign(&B);
            watch.checkpoint(i as f64 / n_iter as f64 * 0.8)?;
        }
        let Q = krylov_q(&K.t())?;
        watch.checkpoint(0.82)?;

        let (U, sigma, Va) = {
            let T = Q.t().dot(A);
            watch.checkpoint(0.93)?;

            let svd = T.svddc_into(JobSvd::Some).map_err(numeric)?;
            (
                svd.0
                    .ok_or_else(|| AnalysisError::Numeric("SVD produced no U factor".into()))?
                    .slice(s![.., ..k])
                    .to_owned(),
                svd.1.slice(s![..k]).to_owned(),
                svd.2
                    .ok_or_else(|| AnalysisError::Numeric("SVD produced no V factor".into()))?
                    .slice(s![..k, ..])
                    .to_owned(),
            )
        };

        let U = Q.dot(&U);
        watch.checkpoint(1.0)?;
        Ok((U, sigma, Va))
    }
}
