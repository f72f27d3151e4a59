//! Weighted least squares with conventional inference.
//!
//! The fit minimizes `Σ wᵢ (yᵢ − xᵢ'β)²`. Residuals are reported on the
//! response scale; weighted quantities (`σ̂`, studentized residuals) use
//! `√wᵢ · eᵢ`.

use crate::data::SurveyTable;
use crate::stats::design::{Design, DesignError, ModelSpec, build_design};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Eigh, Inverse, UPLO};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use thiserror::Error;

/// Ratio of smallest to largest eigenvalue of X'WX below which the design is
/// treated as rank deficient.
const RANK_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum FitError {
    #[error(transparent)]
    Design(#[from] DesignError),
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] ndarray_linalg::error::LinalgError),
    #[error(
        "The design matrix of '{model}' is rank deficient (eigenvalue ratio {ratio:.3e}); some coefficients are not identifiable."
    )]
    Singular { model: String, ratio: f64 },
    #[error("Model '{model}' has {rows} rows for {columns} coefficients; no residual degrees of freedom remain.")]
    NoResidualDf {
        model: String,
        rows: usize,
        columns: usize,
    },
    #[error("Cluster labels have length {found}, but the fit has {expected} rows.")]
    ClusterLengthMismatch { expected: usize, found: usize },
    #[error("Cluster-robust covariance needs at least two clusters, found {0}.")]
    TooFewClusters(usize),
    #[error("The HC2 adjustment for cluster '{cluster}' is not positive semidefinite (eigenvalue {eigenvalue:.3e}).")]
    NotPositiveSemidefinite { cluster: String, eigenvalue: f64 },
    #[error("Variance inflation factors need at least two terms; '{0}' has fewer.")]
    TooFewTerms(String),
    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),
}

#[derive(Debug, Clone)]
pub struct FStatistic {
    pub value: f64,
    pub df_numerator: usize,
    pub df_denominator: usize,
    pub p_value: f64,
}

/// A fitted model. Never modified after fitting.
#[derive(Debug, Clone)]
pub struct WlsFit {
    pub name: String,
    pub formula: String,
    pub design: Design,
    pub coefficients: Array1<f64>,
    pub std_errors: Array1<f64>,
    pub t_values: Array1<f64>,
    pub p_values: Array1<f64>,
    /// `σ̂² (X'WX)⁻¹`
    pub covariance: Array2<f64>,
    pub xtwx_inv: Array2<f64>,
    pub fitted: Array1<f64>,
    pub residuals: Array1<f64>,
    pub hat: Array1<f64>,
    pub sigma: f64,
    pub df_residual: usize,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: Option<FStatistic>,
}

impl WlsFit {
    pub fn n_obs(&self) -> usize {
        self.design.n_rows()
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.design.column_names.iter().position(|c| c == name)
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name).map(|j| self.coefficients[j])
    }

    /// Residuals on the weighted scale, `√wᵢ · eᵢ`.
    pub fn weighted_residuals(&self) -> Array1<f64> {
        &self.residuals * &self.design.weights.mapv(f64::sqrt)
    }

    /// Externally studentized residuals. Rows with leverage one have no
    /// leave-one-out estimate and get `NaN`.
    pub fn rstudent(&self) -> Array1<f64> {
        let wres = self.weighted_residuals();
        let rss = wres.dot(&wres);
        let df = self.df_residual as f64 - 1.0;
        wres.iter()
            .zip(self.hat.iter())
            .map(|(&r, &h)| {
                if h >= 1.0 - 1e-10 || df <= 0.0 {
                    return f64::NAN;
                }
                let s2 = (rss - r * r / (1.0 - h)) / df;
                r / (s2.max(0.0).sqrt() * (1.0 - h).sqrt())
            })
            .collect()
    }
}

/// Builds the design of `spec` on `table` and fits it.
pub fn fit_model(table: &SurveyTable, spec: &ModelSpec) -> Result<WlsFit, FitError> {
    let design = build_design(table, spec)?;
    fit_wls(&spec.name, &spec.formula(), design)
}

/// Fits the model described by `design`.
pub fn fit_wls(name: &str, formula: &str, design: Design) -> Result<WlsFit, FitError> {
    let n = design.n_rows();
    let p = design.n_columns();
    if n <= p {
        return Err(FitError::NoResidualDf {
            model: name.to_string(),
            rows: n,
            columns: p,
        });
    }

    let sqrt_w = design.weights.mapv(f64::sqrt);
    let xw = &design.x * &sqrt_w.view().insert_axis(Axis(1));
    let yw = &design.y * &sqrt_w;
    let (coefficients, xtwx_inv) = solve_least_squares(name, xw.view(), yw.view())?;

    let fitted = design.x.dot(&coefficients);
    let residuals = &design.y - &fitted;
    let wres = &residuals * &sqrt_w;
    let rss = wres.dot(&wres);
    let df_residual = n - p;
    let sigma2 = rss / df_residual as f64;

    let covariance = &xtwx_inv * sigma2;
    let std_errors = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    let t_values = &coefficients / &std_errors;
    let p_values = two_sided_t_p_values(&t_values, df_residual)?;

    let hat = leverage(xw.view(), xtwx_inv.view());

    let w_sum = design.weights.sum();
    let fitted_mean = design.weights.dot(&fitted) / w_sum;
    let mss: f64 = fitted
        .iter()
        .zip(design.weights.iter())
        .map(|(f, w)| w * (f - fitted_mean).powi(2))
        .sum();
    let r_squared = mss / (mss + rss);
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_residual as f64;

    let f_statistic = if p > 1 {
        let df_numerator = p - 1;
        let value = (mss / df_numerator as f64) / sigma2;
        let dist = FisherSnedecor::new(df_numerator as f64, df_residual as f64)
            .map_err(|e| FitError::Distribution(e.to_string()))?;
        Some(FStatistic {
            value,
            df_numerator,
            df_denominator: df_residual,
            p_value: dist.sf(value),
        })
    } else {
        None
    };

    log::debug!(
        "Fitted '{}' on {} rows with {} coefficients (R² = {:.4}).",
        name,
        n,
        p,
        r_squared
    );

    Ok(WlsFit {
        name: name.to_string(),
        formula: formula.to_string(),
        design,
        coefficients,
        std_errors,
        t_values,
        p_values,
        covariance,
        xtwx_inv,
        fitted,
        residuals,
        hat,
        sigma: sigma2.sqrt(),
        df_residual,
        r_squared,
        adj_r_squared,
        f_statistic,
    })
}

/// Ordinary least squares through the normal equations. Returns the
/// coefficients and `(X'X)⁻¹`; a rank-deficient `x` is an error.
pub(crate) fn solve_least_squares(
    model: &str,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
) -> Result<(Array1<f64>, Array2<f64>), FitError> {
    let xtx = x.t().dot(&x);
    let (eigenvalues, _) = xtx.eigh(UPLO::Lower)?;
    let max = eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    let ratio = if max > 0.0 { min / max } else { 0.0 };
    if !(ratio > RANK_TOLERANCE) {
        return Err(FitError::Singular {
            model: model.to_string(),
            ratio,
        });
    }
    let xtx_inv = xtx.inv()?;
    let beta = xtx_inv.dot(&x.t().dot(&y));
    Ok((beta, xtx_inv))
}

/// Diagonal of `X (X'X)⁻¹ X'` without forming the full matrix.
pub(crate) fn leverage(x: ArrayView2<f64>, xtx_inv: ArrayView2<f64>) -> Array1<f64> {
    let xa = x.dot(&xtx_inv);
    (&xa * &x).sum_axis(Axis(1))
}

pub(crate) fn two_sided_t_p_values(t: &Array1<f64>, df: usize) -> Result<Array1<f64>, FitError> {
    let dist =
        StudentsT::new(0.0, 1.0, df as f64).map_err(|e| FitError::Distribution(e.to_string()))?;
    Ok(t.mapv(|t| {
        if t.is_nan() {
            f64::NAN
        } else {
            2.0 * dist.cdf(-t.abs())
        }
    }))
}
