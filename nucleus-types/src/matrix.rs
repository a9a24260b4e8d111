use crate::error::AnalysisError;
use ndarray::Array2;
use sprs::{CsMat, TriMat};
use std::collections::HashSet;

/// Cell-by-gene integer count matrix with explicit identity.
///
/// Rows are cells (unique barcodes), columns are genes. Row and column
/// identity is carried alongside the matrix and is never implied by
/// position alone; subsetting operations produce new matrices with the
/// corresponding identity vectors subset in lock-step.
#[derive(Clone, Debug)]
pub struct CountMatrix {
    barcodes: Vec<String>,
    gene_ids: Vec<String>,
    counts: CsMat<u32>,
}

impl CountMatrix {
    /// Build a count matrix from (cell, gene, count) triplets.
    ///
    /// Duplicate coordinates are summed. Fails with `InputShape` if any
    /// index is out of range, a barcode or gene id repeats, or a cell
    /// ends up with no nonzero count.
    pub fn from_triplets(
        barcodes: Vec<String>,
        gene_ids: Vec<String>,
        entries: &[(usize, usize, u32)],
    ) -> Result<CountMatrix, AnalysisError> {
        let n_cells = barcodes.len();
        let n_genes = gene_ids.len();

        let unique_barcodes: HashSet<&str> = barcodes.iter().map(String::as_str).collect();
        if unique_barcodes.len() != n_cells {
            return Err(AnalysisError::InputShape("duplicate cell barcodes".into()));
        }
        let unique_genes: HashSet<&str> = gene_ids.iter().map(String::as_str).collect();
        if unique_genes.len() != n_genes {
            return Err(AnalysisError::InputShape("duplicate gene ids".into()));
        }

        let mut tri = TriMat::new((n_cells, n_genes));
        for &(cell, gene, count) in entries {
            if cell >= n_cells || gene >= n_genes {
                return Err(AnalysisError::InputShape(format!(
                    "entry ({cell}, {gene}) outside a {n_cells} x {n_genes} matrix"
                )));
            }
            if count > 0 {
                tri.add_triplet(cell, gene, count);
            }
        }
        let counts = tri.to_csr();

        for (row, vec) in counts.outer_iterator().enumerate() {
            if vec.nnz() == 0 {
                return Err(AnalysisError::InputShape(format!(
                    "cell {:?} has no nonzero counts",
                    barcodes[row]
                )));
            }
        }

        Ok(CountMatrix {
            barcodes,
            gene_ids,
            counts,
        })
    }

    /// Number of cells (rows).
    pub fn n_cells(&self) -> usize {
        self.counts.rows()
    }

    /// Number of genes (columns).
    pub fn n_genes(&self) -> usize {
        self.counts.cols()
    }

    /// Cell barcodes, in row order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Gene identifiers, in column order.
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// The underlying CSR count matrix.
    pub fn counts(&self) -> &CsMat<u32> {
        &self.counts
    }

    /// Order-preserving subset to the given cell rows.
    pub fn select_cells(&self, keep: &[usize]) -> CountMatrix {
        let mut tri = TriMat::new((keep.len(), self.n_genes()));
        let mut barcodes = Vec::with_capacity(keep.len());
        for (new_row, &old_row) in keep.iter().enumerate() {
            barcodes.push(self.barcodes[old_row].clone());
            for (gene, &count) in self.counts.outer_view(old_row).unwrap().iter() {
                tri.add_triplet(new_row, gene, count);
            }
        }
        CountMatrix {
            barcodes,
            gene_ids: self.gene_ids.clone(),
            counts: tri.to_csr(),
        }
    }
}

/// Library-size-normalized, log-transformed expression matrix.
///
/// Same sparsity pattern and identity as the `CountMatrix` it was derived
/// from; values are `ln(1 + scaled count)`.
#[derive(Clone, Debug)]
pub struct NormalizedMatrix {
    barcodes: Vec<String>,
    gene_ids: Vec<String>,
    values: CsMat<f64>,
}

impl NormalizedMatrix {
    /// Assemble from parts; the owning normalizer guarantees consistency.
    pub fn new(barcodes: Vec<String>, gene_ids: Vec<String>, values: CsMat<f64>) -> NormalizedMatrix {
        assert_eq!(barcodes.len(), values.rows());
        assert_eq!(gene_ids.len(), values.cols());
        NormalizedMatrix {
            barcodes,
            gene_ids,
            values,
        }
    }

    /// Number of cells (rows).
    pub fn n_cells(&self) -> usize {
        self.values.rows()
    }

    /// Number of genes (columns).
    pub fn n_genes(&self) -> usize {
        self.values.cols()
    }

    /// Cell barcodes, in row order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Gene identifiers, in column order.
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// The cell-major (CSR) value matrix.
    pub fn values(&self) -> &CsMat<f64> {
        &self.values
    }

    /// Gene-major (CSC) copy, for per-gene scans such as DE testing.
    pub fn to_gene_major(&self) -> CsMat<f64> {
        self.values.to_csc()
    }
}

/// Dense cell-by-selected-feature matrix, zero-centered and
/// variance-scaled per feature. Input to PCA only.
#[derive(Clone, Debug)]
pub struct ScaledMatrix {
    barcodes: Vec<String>,
    feature_ids: Vec<String>,
    values: Array2<f64>,
}

impl ScaledMatrix {
    /// Assemble from parts; the owning normalizer guarantees consistency.
    pub fn new(barcodes: Vec<String>, feature_ids: Vec<String>, values: Array2<f64>) -> ScaledMatrix {
        assert_eq!(barcodes.len(), values.nrows());
        assert_eq!(feature_ids.len(), values.ncols());
        ScaledMatrix {
            barcodes,
            feature_ids,
            values,
        }
    }

    /// Number of cells (rows).
    pub fn n_cells(&self) -> usize {
        self.values.nrows()
    }

    /// Number of selected features (columns).
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Cell barcodes, in row order.
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Selected feature identifiers, in column order.
    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// The dense scaled values.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }
}
