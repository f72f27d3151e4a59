//! Composite indices from the leading principal component of each item block.
//!
//! Each index is the loading-weighted mean of its items,
//! `Σ lⱼ·xⱼ / Σ lⱼ`, with loadings from the correlation-matrix PCA. With
//! non-negative loadings the index stays within the range of its items.
//! Indices are computed once on the imputed table and carried unchanged
//! through every later subset.

use crate::data::{Column, DataError, SurveyTable};
use crate::schema;
use crate::stats::pca::{Pca, PcaError};
use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("PCA for the '{block}' block failed: {source}")]
    Pca {
        block: &'static str,
        #[source]
        source: PcaError,
    },
    #[error("The leading loadings of the '{block}' block sum to zero; the index is undefined.")]
    ZeroLoadingSum { block: &'static str },
}

/// A named block of items that is reduced to one index column.
#[derive(Debug, Clone, Copy)]
pub struct IndexBlock {
    pub name: &'static str,
    pub items: &'static [&'static str],
    pub output: &'static str,
}

pub const MLG_BLOCK: IndexBlock = IndexBlock {
    name: "MLG",
    items: &schema::MLG_ITEMS,
    output: schema::MLG_INDEX,
};

pub const EU_BLOCK: IndexBlock = IndexBlock {
    name: "EU competence",
    items: &schema::EU_ITEMS,
    output: schema::EU_INDEX,
};

pub const SNE_BLOCK: IndexBlock = IndexBlock {
    name: "SNE competence",
    items: &schema::SNE_ITEMS,
    output: schema::SNE_INDEX,
};

pub const INDEX_BLOCKS: [IndexBlock; 3] = [MLG_BLOCK, EU_BLOCK, SNE_BLOCK];

#[derive(Debug, Clone)]
pub struct CompositeIndex {
    pub block: &'static str,
    pub column: &'static str,
    pub items: Vec<String>,
    pub loadings: Vec<f64>,
    pub eigenvalues: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

impl CompositeIndex {
    pub fn has_mixed_signs(&self) -> bool {
        self.loadings.iter().any(|&l| l < 0.0) && self.loadings.iter().any(|&l| l > 0.0)
    }
}

/// Adds one index column per block and returns the PCA summaries.
pub fn add_composite_indices(
    table: SurveyTable,
    blocks: &[IndexBlock],
) -> Result<(SurveyTable, Vec<CompositeIndex>), IndexError> {
    let mut table = table;
    let mut summaries = Vec::with_capacity(blocks.len());
    for block in blocks {
        let items = item_matrix(&table, block.items)?;
        let pca = Pca::new(true)
            .fit(items.view())
            .map_err(|source| IndexError::Pca {
                block: block.name,
                source,
            })?;
        let loadings = pca.leading_loadings();
        let total = loadings.sum();
        if total.abs() < 1e-12 {
            return Err(IndexError::ZeroLoadingSum { block: block.name });
        }

        let index: Array1<f64> = items.dot(&loadings) / total;
        let summary = CompositeIndex {
            block: block.name,
            column: block.output,
            items: block.items.iter().map(|s| s.to_string()).collect(),
            loadings: loadings.to_vec(),
            eigenvalues: pca.eigenvalues.to_vec(),
            explained_variance_ratio: pca.explained_variance_ratio.to_vec(),
        };
        if summary.has_mixed_signs() {
            log::warn!(
                "The {} loadings have mixed signs; '{}' can leave the range of its items.",
                block.name,
                block.output
            );
        }
        log::info!(
            "{} index: first component explains {:.1}% of item variance.",
            block.name,
            100.0 * summary.explained_variance_ratio[0]
        );

        table = table.with_column(block.output, Column::Numeric(index.mapv(Some).to_vec()))?;
        summaries.push(summary);
    }
    Ok((table, summaries))
}

fn item_matrix(table: &SurveyTable, items: &[&str]) -> Result<Array2<f64>, DataError> {
    let mut matrix = Array2::zeros((table.n_rows(), items.len()));
    for (j, item) in items.iter().enumerate() {
        let values = table.complete_numeric(item)?;
        for (i, v) in values.into_iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    Ok(matrix)
}
