use crate::error::AnalysisError;
use crate::matrix::CountMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-cell annotations supplied at the input boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAttrs {
    /// Sample / library of origin
    pub sample: String,
    /// Tissue condition label used for condition-wise comparisons
    pub condition: String,
}

/// Cell metadata table, keyed by barcode.
///
/// Invariant: the key set is a superset of the matrix row set before
/// filtering, and exactly equal to it afterwards. A `BTreeMap` keeps
/// iteration order deterministic.
#[derive(Clone, Debug, Default)]
pub struct CellMetadata {
    cells: BTreeMap<String, CellAttrs>,
}

impl CellMetadata {
    /// Build a table from (barcode, attrs) pairs.
    pub fn new(rows: impl IntoIterator<Item = (String, CellAttrs)>) -> CellMetadata {
        CellMetadata {
            cells: rows.into_iter().collect(),
        }
    }

    /// Number of annotated cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// true if no cells are annotated.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Look up the annotations of one barcode.
    pub fn get(&self, barcode: &str) -> Option<&CellAttrs> {
        self.cells.get(barcode)
    }

    /// Iterate (barcode, attrs) in barcode order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CellAttrs)> {
        self.cells.iter()
    }

    /// Check that every matrix row has an annotation. Fails with
    /// `InputShape` naming the first orphaned barcode.
    pub fn validate_covers(&self, matrix: &CountMatrix) -> Result<(), AnalysisError> {
        for barcode in matrix.barcodes() {
            if !self.cells.contains_key(barcode) {
                return Err(AnalysisError::InputShape(format!(
                    "cell {barcode:?} present in the matrix but missing from the metadata table"
                )));
            }
        }
        Ok(())
    }

    /// Restrict the table to exactly the rows of `matrix`, in any order.
    /// Used after filtering so the key sets match exactly.
    pub fn subset_to(&self, matrix: &CountMatrix) -> Result<CellMetadata, AnalysisError> {
        self.validate_covers(matrix)?;
        let cells = matrix
            .barcodes()
            .iter()
            .map(|b| (b.clone(), self.cells[b].clone()))
            .collect();
        Ok(CellMetadata { cells })
    }
}

/// Per-gene annotations supplied at the input boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneAttrs {
    /// Human-readable gene symbol
    pub symbol: String,
    /// Gene biotype (e.g. protein_coding)
    pub biotype: String,
}

/// Gene metadata table, keyed by gene identifier. Used only for
/// annotation joins after differential expression.
#[derive(Clone, Debug, Default)]
pub struct GeneMetadata {
    genes: BTreeMap<String, GeneAttrs>,
}

impl GeneMetadata {
    /// Build a table from (gene id, attrs) pairs.
    pub fn new(rows: impl IntoIterator<Item = (String, GeneAttrs)>) -> GeneMetadata {
        GeneMetadata {
            genes: rows.into_iter().collect(),
        }
    }

    /// Look up the annotations of one gene.
    pub fn get(&self, gene_id: &str) -> Option<&GeneAttrs> {
        self.genes.get(gene_id)
    }

    /// Number of annotated genes.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// true if no genes are annotated.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}
