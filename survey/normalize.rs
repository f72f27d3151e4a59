//! Order-preserving normalization of the composite indices.
//!
//! Several candidate transforms are fitted to each index and the one whose
//! output looks most normal by the Pearson χ²/df statistic is applied:
//!
//! - ordered quantile normalization, `Φ⁻¹((rank − ½)/n)` with average ranks
//! - Yeo–Johnson with λ by profile likelihood on `[−5, 5]`, standardized
//! - `asinh`, standardized
//! - plain standardization
//!
//! Every candidate is non-decreasing, strictly increasing on distinct values,
//! and maps tied inputs to tied outputs.

use crate::data::{Column, DataError, SurveyTable};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use thiserror::Error;

const LAMBDA_RANGE: (f64, f64) = (-5.0, 5.0);
const LAMBDA_TOLERANCE: f64 = 1e-4;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("At least 4 values are needed to choose a normalizing transform, found {0}.")]
    TooFewValues(usize),
    #[error("The input contains non-finite values.")]
    NonFinite,
    #[error("The input has zero variance.")]
    ZeroVariance,
    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),
}

/// A fitted transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    OrderNorm,
    YeoJohnson { lambda: f64, mean: f64, sd: f64 },
    Arcsinh { mean: f64, sd: f64 },
    Standardize { mean: f64, sd: f64 },
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::OrderNorm => write!(f, "orderNorm"),
            Transform::YeoJohnson { lambda, .. } => write!(f, "Yeo-Johnson (lambda = {lambda:.4})"),
            Transform::Arcsinh { .. } => write!(f, "arcsinh"),
            Transform::Standardize { .. } => write!(f, "standardize"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub transform: Transform,
    pub pearson_p_df: f64,
}

#[derive(Debug, Clone)]
pub struct Normalization {
    pub chosen: Transform,
    pub candidates: Vec<CandidateScore>,
    pub values: Vec<f64>,
}

/// Fits every candidate to `x` and keeps the most normal result.
pub fn best_normalize(x: &[f64]) -> Result<Normalization, NormalizeError> {
    let n = x.len();
    if n < 4 {
        return Err(NormalizeError::TooFewValues(n));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(NormalizeError::NonFinite);
    }
    let (_, sd) = mean_sd(x);
    if !(sd > 0.0) {
        return Err(NormalizeError::ZeroVariance);
    }

    let mut fitted: Vec<(Transform, Vec<f64>)> = Vec::with_capacity(4);
    fitted.push((Transform::OrderNorm, order_norm(x)?));
    fitted.push(yeo_johnson(x));
    fitted.push(standardized(x.iter().map(|v| v.asinh()).collect(), |mean, sd| {
        Transform::Arcsinh { mean, sd }
    }));
    fitted.push(standardized(x.to_vec(), |mean, sd| Transform::Standardize {
        mean,
        sd,
    }));

    let mut candidates = Vec::with_capacity(fitted.len());
    let mut best = 0;
    for (i, (transform, values)) in fitted.iter().enumerate() {
        let pearson_p_df = pearson_p_over_df(values)?;
        let current_best = candidates
            .get(best)
            .map_or(f64::INFINITY, |c: &CandidateScore| c.pearson_p_df);
        if pearson_p_df < current_best {
            best = i;
        }
        candidates.push(CandidateScore {
            transform: *transform,
            pearson_p_df,
        });
    }

    let (chosen, values) = fitted.swap_remove(best);
    Ok(Normalization {
        chosen,
        candidates,
        values,
    })
}

/// Normalizes each `(source, target)` column pair of `table`.
pub fn add_normalized_columns(
    table: SurveyTable,
    pairs: &[(&str, &str)],
) -> Result<(SurveyTable, Vec<(String, Normalization)>), NormalizeError> {
    let mut table = table;
    let mut results = Vec::with_capacity(pairs.len());
    for (source, target) in pairs {
        let values = table.complete_numeric(source)?;
        let normalization = best_normalize(&values)?;
        log::info!("'{}' normalized with {}.", source, normalization.chosen);
        table = table.with_column(
            target,
            Column::Numeric(normalization.values.iter().map(|v| Some(*v)).collect()),
        )?;
        results.push((source.to_string(), normalization));
    }
    Ok((table, results))
}

fn mean_sd(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

fn standardized(
    values: Vec<f64>,
    make: impl Fn(f64, f64) -> Transform,
) -> (Transform, Vec<f64>) {
    let (mean, sd) = mean_sd(&values);
    let out = values.iter().map(|v| (v - mean) / sd).collect();
    (make(mean, sd), out)
}

/// Average ranks, 1-based.
fn average_ranks(x: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let mut ranks = vec![0.0; x.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && x[order[end + 1]] == x[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &i in &order[start..=end] {
            ranks[i] = rank;
        }
        start = end + 1;
    }
    ranks
}

pub fn order_norm(x: &[f64]) -> Result<Vec<f64>, NormalizeError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| NormalizeError::Distribution(e.to_string()))?;
    let n = x.len() as f64;
    Ok(average_ranks(x)
        .into_iter()
        .map(|r| normal.inverse_cdf((r - 0.5) / n))
        .collect())
}

pub fn yeo_johnson_value(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < 1e-12 {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < 1e-12 {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn yeo_johnson_log_likelihood(x: &[f64], lambda: f64) -> f64 {
    let n = x.len() as f64;
    let transformed: Vec<f64> = x.iter().map(|&v| yeo_johnson_value(v, lambda)).collect();
    let mean = transformed.iter().sum::<f64>() / n;
    let var = transformed.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    let jacobian: f64 = x.iter().map(|v| v.signum() * v.abs().ln_1p()).sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

/// Yeo–Johnson with the profile-likelihood λ, standardized.
pub fn yeo_johnson(x: &[f64]) -> (Transform, Vec<f64>) {
    let lambda = golden_section_max(
        |l| yeo_johnson_log_likelihood(x, l),
        LAMBDA_RANGE.0,
        LAMBDA_RANGE.1,
        LAMBDA_TOLERANCE,
    );
    let transformed = x.iter().map(|&v| yeo_johnson_value(v, lambda)).collect();
    standardized(transformed, |mean, sd| Transform::YeoJohnson { lambda, mean, sd })
}

fn golden_section_max(f: impl Fn(f64) -> f64, lo: f64, hi: f64, tol: f64) -> f64 {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (lo, hi);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (f(c), f(d));
    while (b - a).abs() > tol {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

/// Pearson χ² goodness-of-fit to a normal with the sample mean and standard
/// deviation, divided by its degrees of freedom. Smaller is more normal.
pub fn pearson_p_over_df(x: &[f64]) -> Result<f64, NormalizeError> {
    let n = x.len();
    let classes = (2.0 * (n as f64).powf(0.4)).ceil() as usize;
    let (mean, sd) = mean_sd(x);
    let normal = Normal::new(mean, sd).map_err(|e| NormalizeError::Distribution(e.to_string()))?;

    let mut counts = vec![0usize; classes];
    for &v in x {
        let bin = (1.0 + classes as f64 * normal.cdf(v)).floor() as usize;
        // Values at the far right tail fall past the last class and are not counted.
        if (1..=classes).contains(&bin) {
            counts[bin - 1] += 1;
        }
    }
    let expected = n as f64 / classes as f64;
    let statistic: f64 = counts
        .iter()
        .map(|&c| (c as f64 - expected).powi(2) / expected)
        .sum();
    Ok(statistic / (classes - 3) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn skewed(n: usize) -> Vec<f64> {
        (1..=n).map(|i| ((i as f64) / 7.0).exp() % 13.0 + (i % 3) as f64).collect()
    }

    fn assert_monotone(x: &[f64], y: &[f64]) {
        for i in 0..x.len() {
            for j in 0..x.len() {
                if x[i] < x[j] {
                    assert!(y[i] < y[j], "order broken at {i}, {j}");
                } else if x[i] == x[j] {
                    assert_abs_diff_eq!(y[i], y[j], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn every_candidate_preserves_order_and_ties() {
        let mut x = skewed(60);
        x[10] = x[20];
        let result = best_normalize(&x).unwrap();
        assert_monotone(&x, &result.values);
        assert_monotone(&x, &order_norm(&x).unwrap());
        assert_monotone(&x, &yeo_johnson(&x).1);
        assert_eq!(result.candidates.len(), 4);
    }

    #[test]
    fn chosen_candidate_has_the_smallest_statistic() {
        let x = skewed(80);
        let result = best_normalize(&x).unwrap();
        let min = result
            .candidates
            .iter()
            .map(|c| c.pearson_p_df)
            .fold(f64::INFINITY, f64::min);
        let chosen = result
            .candidates
            .iter()
            .find(|c| c.transform == result.chosen)
            .unwrap();
        assert_eq!(chosen.pearson_p_df, min);
    }

    #[test]
    fn normalization_is_deterministic() {
        let x = skewed(50);
        let a = best_normalize(&x).unwrap();
        let b = best_normalize(&x).unwrap();
        assert_eq!(a.values, b.values);
        assert_eq!(a.chosen, b.chosen);
    }

    #[test]
    fn order_norm_uses_average_ranks() {
        let x = [3.0, 1.0, 3.0, 2.0];
        let z = order_norm(&x).unwrap();
        // Ranks 3.5, 1, 3.5, 2 over n = 4.
        let normal = Normal::new(0.0, 1.0).unwrap();
        assert_abs_diff_eq!(z[0], normal.inverse_cdf(3.0 / 4.0), epsilon = 1e-12);
        assert_abs_diff_eq!(z[1], normal.inverse_cdf(0.5 / 4.0), epsilon = 1e-12);
        assert_eq!(z[0], z[2]);
    }

    #[test]
    fn yeo_johnson_is_identity_at_lambda_one_and_log_at_zero() {
        for v in [-2.5, -0.3, 0.0, 0.7, 4.0] {
            assert_abs_diff_eq!(yeo_johnson_value(v, 1.0), v, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(yeo_johnson_value(3.0, 0.0), 4f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(yeo_johnson_value(-3.0, 2.0), -(4f64.ln()), epsilon = 1e-12);
    }

    #[test]
    fn golden_section_finds_a_parabola_peak() {
        let peak = golden_section_max(|l| -(l - 1.3).powi(2), -5.0, 5.0, 1e-6);
        assert_abs_diff_eq!(peak, 1.3, epsilon = 1e-5);
    }

    #[test]
    fn evenly_spread_values_score_as_normal() {
        // Quantiles of the fitted normal fall one per class.
        let x = order_norm(&(0..40).map(|i| i as f64).collect::<Vec<_>>()).unwrap();
        assert!(pearson_p_over_df(&x).unwrap() < 1.0);
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(matches!(
            best_normalize(&[1.0, 2.0, 3.0]),
            Err(NormalizeError::TooFewValues(3))
        ));
        assert!(matches!(
            best_normalize(&[2.0; 10]),
            Err(NormalizeError::ZeroVariance)
        ));
        assert!(matches!(
            best_normalize(&[1.0, f64::NAN, 2.0, 3.0]),
            Err(NormalizeError::NonFinite)
        ));
    }
}
