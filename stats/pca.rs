//! Principal component analysis of a block of numeric items.
//!
//! With `scale = true` the decomposition is of the correlation matrix, which
//! is what the composite indices use. Components are sorted by decreasing
//! eigenvalue and every eigenvector is signed so that its entries sum to a
//! non-negative value, which makes the leading component point "up" on
//! Likert blocks.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcaError {
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] ndarray_linalg::error::LinalgError),
    #[error("Insufficient data for PCA: {rows} rows and {cols} columns (need at least 2 of each)")]
    InsufficientData { rows: usize, cols: usize },
    #[error("Column {0} has zero variance and cannot be standardized")]
    ZeroVariance(usize),
}

#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Eigenvalues in decreasing order.
    pub eigenvalues: Array1<f64>,
    /// One column per component, in the order of `eigenvalues`.
    pub loadings: Array2<f64>,
    pub explained_variance_ratio: Array1<f64>,
}

impl PcaResult {
    /// Loadings of the first principal component.
    pub fn leading_loadings(&self) -> Array1<f64> {
        self.loadings.column(0).to_owned()
    }
}

pub struct Pca {
    scale: bool,
}

impl Pca {
    pub fn new(scale: bool) -> Self {
        Self { scale }
    }

    pub fn fit(&self, data: ArrayView2<f64>) -> Result<PcaResult, PcaError> {
        let (rows, cols) = data.dim();
        if rows < 2 || cols < 2 {
            return Err(PcaError::InsufficientData { rows, cols });
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or(PcaError::InsufficientData { rows, cols })?;
        let mut centered = &data - &mean.insert_axis(Axis(0));

        if self.scale {
            for (j, mut column) in centered.axis_iter_mut(Axis(1)).enumerate() {
                let sd = (column.dot(&column) / (rows - 1) as f64).sqrt();
                if !(sd > 1e-12) {
                    return Err(PcaError::ZeroVariance(j));
                }
                column.mapv_inplace(|v| v / sd);
            }
        }

        let cov = centered.t().dot(&centered) / (rows - 1) as f64;
        let (eigenvalues, eigenvectors) = cov.eigh(UPLO::Lower)?;

        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]));

        let eigenvalues: Array1<f64> = order.iter().map(|&i| eigenvalues[i]).collect();
        let mut loadings = eigenvectors.select(Axis(1), &order);
        for mut component in loadings.axis_iter_mut(Axis(1)) {
            if component.sum() < 0.0 {
                component.mapv_inplace(|v| -v);
            }
        }

        let total = eigenvalues.sum();
        let explained_variance_ratio = &eigenvalues / total;

        Ok(PcaResult {
            eigenvalues,
            loadings,
            explained_variance_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn two_perfectly_correlated_columns_share_one_component() {
        let data = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let result = Pca::new(true).fit(data.view()).unwrap();
        assert_abs_diff_eq!(result.eigenvalues[0], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(result.eigenvalues[1], 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(result.explained_variance_ratio[0], 1.0, epsilon = 1e-10);

        let leading = result.leading_loadings();
        let expected = 1.0 / 2f64.sqrt();
        assert_abs_diff_eq!(leading[0], expected, epsilon = 1e-10);
        assert_abs_diff_eq!(leading[1], expected, epsilon = 1e-10);
    }

    #[test]
    fn components_are_sorted_and_sign_normalized() {
        let data = array![
            [1.0, 5.0, 2.0],
            [2.0, 4.0, 1.0],
            [3.0, 4.0, 3.0],
            [4.0, 2.0, 5.0],
            [5.0, 1.0, 4.0],
            [2.0, 3.0, 2.0],
        ];
        let result = Pca::new(true).fit(data.view()).unwrap();
        for w in result.eigenvalues.to_vec().windows(2) {
            assert!(w[0] >= w[1]);
        }
        for component in result.loadings.axis_iter(Axis(1)) {
            assert!(component.sum() >= 0.0);
        }
        // Eigenvalues of a correlation matrix sum to its dimension.
        assert_abs_diff_eq!(result.eigenvalues.sum(), 3.0, epsilon = 1e-10);
    }

    #[test]
    fn zero_variance_column_is_rejected() {
        let data = array![[1.0, 3.0], [2.0, 3.0], [3.0, 3.0]];
        assert!(matches!(
            Pca::new(true).fit(data.view()),
            Err(PcaError::ZeroVariance(1))
        ));
    }

    #[test]
    fn single_row_is_insufficient() {
        let data = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            Pca::new(true).fit(data.view()),
            Err(PcaError::InsufficientData { rows: 1, cols: 3 })
        ));
    }
}
