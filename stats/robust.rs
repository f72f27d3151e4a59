//! Cluster-robust covariance with the HC2 bias adjustment.
//!
//! For clusters `g = 1..G`, with `X̃ = W^½ X` and `ẽ = W^½ e`:
//!
//! ```text
//! H_gg = X̃_g (X'WX)⁻¹ X̃_g'
//! u_g  = X̃_g' (I − H_gg)^(−½) ẽ_g
//! V    = G/(G−1) · (X'WX)⁻¹ (Σ_g u_g u_g') (X'WX)⁻¹
//! ```
//!
//! Coefficient tests use a t distribution on the model's residual degrees of
//! freedom. With cluster fixed effects in the model, `I − H_gg` is singular
//! (the cluster indicator lies in the column space); the inverse square root
//! is then taken on the non-null eigenspace, along which the residuals
//! already vanish.

use crate::stats::wls::{FitError, WlsFit, two_sided_t_p_values};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use std::collections::BTreeMap;

/// Eigenvalues of `I − H_gg` within this distance of zero are treated as zero.
const NULL_EIGENVALUE: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct ClusterRobust {
    pub covariance: Array2<f64>,
    pub std_errors: Array1<f64>,
    pub t_values: Array1<f64>,
    pub p_values: Array1<f64>,
    pub n_clusters: usize,
}

/// HC2 cluster-robust covariance of `fit`, clustered by `clusters`, which
/// holds one label per fitted row.
pub fn cluster_robust_hc2(fit: &WlsFit, clusters: &[String]) -> Result<ClusterRobust, FitError> {
    let design = &fit.design;
    let n = design.n_rows();
    if clusters.len() != n {
        return Err(FitError::ClusterLengthMismatch {
            expected: n,
            found: clusters.len(),
        });
    }

    let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, c) in clusters.iter().enumerate() {
        members.entry(c.as_str()).or_default().push(i);
    }
    let g = members.len();
    if g < 2 {
        return Err(FitError::TooFewClusters(g));
    }

    let sqrt_w = design.weights.mapv(f64::sqrt);
    let xw = &design.x * &sqrt_w.view().insert_axis(Axis(1));
    let ew = &fit.residuals * &sqrt_w;
    let bread = &fit.xtwx_inv;

    let p = design.n_columns();
    let mut meat = Array2::<f64>::zeros((p, p));
    for (cluster, rows) in &members {
        let x_g = xw.select(Axis(0), rows);
        let e_g = ew.select(Axis(0), rows);
        let h_gg = x_g.dot(bread).dot(&x_g.t());
        let m = Array2::<f64>::eye(rows.len()) - &h_gg;

        let (eigenvalues, vectors) = m.eigh(UPLO::Lower)?;
        if let Some(&worst) = eigenvalues.iter().find(|&&v| v < -NULL_EIGENVALUE) {
            return Err(FitError::NotPositiveSemidefinite {
                cluster: cluster.to_string(),
                eigenvalue: worst,
            });
        }
        let inv_sqrt = eigenvalues.mapv(|v| if v > NULL_EIGENVALUE { 1.0 / v.sqrt() } else { 0.0 });
        // V diag(λ^-½) V' e
        let adjusted = vectors.dot(&(&inv_sqrt * &vectors.t().dot(&e_g)));

        let u_g = x_g.t().dot(&adjusted);
        let outer = u_g
            .view()
            .insert_axis(Axis(1))
            .dot(&u_g.view().insert_axis(Axis(0)));
        meat += &outer;
    }

    let adjustment = g as f64 / (g as f64 - 1.0);
    let covariance = bread.dot(&meat).dot(bread) * adjustment;
    let std_errors = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    let t_values = &fit.coefficients / &std_errors;
    let p_values = two_sided_t_p_values(&t_values, fit.df_residual)?;

    log::debug!(
        "Cluster-robust covariance for '{}' over {} clusters.",
        fit.name,
        g
    );

    Ok(ClusterRobust {
        covariance,
        std_errors,
        t_values,
        p_values,
        n_clusters: g,
    })
}
