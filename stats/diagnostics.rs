//! Post-fit diagnostics: heteroskedasticity, outlying residuals, collinearity.

use crate::stats::wls::{FitError, WlsFit, solve_least_squares};
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::Determinant;
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};

/// Bonferroni threshold for the outlier test.
pub const OUTLIER_CUTOFF: f64 = 0.05;
/// Largest number of rows the outlier test reports.
pub const OUTLIER_MAX_ROWS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct BreuschPagan {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Koenker's studentized Breusch–Pagan test against the model's own
/// regressors.
///
/// The auxiliary regressions ignore the model weights: the residuals come
/// from an unweighted least-squares fit of the outcome on the design, and
/// `eᵢ² − mean(e²)` is regressed on the same design. The statistic is
/// `n · Σ fitted² / Σ (eᵢ² − mean(e²))²` on `p − 1` degrees of freedom.
pub fn breusch_pagan(fit: &WlsFit) -> Result<BreuschPagan, FitError> {
    let x = fit.design.x.view();
    let n = x.nrows();
    let (beta, _) = solve_least_squares(&fit.name, x, fit.design.y.view())?;
    let e = &fit.design.y - &x.dot(&beta);

    let sigma2 = e.dot(&e) / n as f64;
    let w = e.mapv(|v| v * v - sigma2);
    let (gamma, _) = solve_least_squares(&fit.name, x, w.view())?;
    let w_hat = x.dot(&gamma);

    let statistic = n as f64 * w_hat.dot(&w_hat) / w.dot(&w);
    let df = x.ncols() - 1;
    let dist = ChiSquared::new(df as f64).map_err(|e| FitError::Distribution(e.to_string()))?;
    Ok(BreuschPagan {
        statistic,
        df,
        p_value: dist.sf(statistic),
    })
}

#[derive(Debug, Clone)]
pub struct OutlierRow {
    /// Position among the fitted rows.
    pub fit_row: usize,
    /// Row of the table the model was fitted on.
    pub table_row: usize,
    pub rstudent: f64,
    pub p_unadjusted: f64,
    /// `n · p`, or `None` when that exceeds one.
    pub p_bonferroni: Option<f64>,
}

/// Bonferroni test on the externally studentized residuals.
///
/// Returns up to [`OUTLIER_MAX_ROWS`] rows whose Bonferroni p-value is below
/// [`OUTLIER_CUTOFF`], most extreme first. When no row qualifies, the single
/// row with the largest absolute studentized residual is returned instead.
pub fn outlier_test(fit: &WlsFit) -> Result<Vec<OutlierRow>, FitError> {
    let rstudent = fit.rstudent();
    let df = fit.df_residual as f64 - 1.0;
    let dist = StudentsT::new(0.0, 1.0, df).map_err(|e| FitError::Distribution(e.to_string()))?;

    let mut rows: Vec<(usize, f64, f64)> = rstudent
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_finite())
        .map(|(i, &r)| (i, r, 2.0 * dist.cdf(-r.abs())))
        .collect();
    let n = rows.len() as f64;
    rows.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));

    let significant = rows
        .iter()
        .take_while(|(_, _, p)| n * p < OUTLIER_CUTOFF)
        .count()
        .min(OUTLIER_MAX_ROWS);
    let keep = significant.max(1).min(rows.len());

    Ok(rows
        .into_iter()
        .take(keep)
        .map(|(i, r, p)| OutlierRow {
            fit_row: i,
            table_row: fit.design.rows[i],
            rstudent: r,
            p_unadjusted: p,
            p_bonferroni: Some(n * p).filter(|bp| *bp <= 1.0),
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct Gvif {
    pub term: String,
    pub gvif: f64,
    pub df: usize,
    /// `GVIF^(1/(2·df))`, comparable across terms of different size.
    pub adjusted: f64,
}

/// Generalized variance inflation factors, one per term.
pub fn gvif(fit: &WlsFit) -> Result<Vec<Gvif>, FitError> {
    let design = &fit.design;
    if design.terms.len() < 2 {
        return Err(FitError::TooFewTerms(fit.name.clone()));
    }

    // Drop the intercept and rescale the covariance to a correlation matrix.
    let keep: Vec<usize> = (0..design.n_columns())
        .filter(|&j| design.term_assign[j].is_some())
        .collect();
    let v = fit.covariance.select(Axis(0), &keep).select(Axis(1), &keep);
    let sd: Array1<f64> = v.diag().mapv(f64::sqrt);
    let r = &v / &sd.view().insert_axis(Axis(1)) / &sd.view().insert_axis(Axis(0));
    let det_r = r.det()?;

    let mut out = Vec::with_capacity(design.terms.len());
    for (t, term) in design.terms.iter().enumerate() {
        // Positions within `keep`.
        let inside: Vec<usize> = design
            .term_columns(t)
            .iter()
            .filter_map(|j| keep.iter().position(|k| k == j))
            .collect();
        let outside: Vec<usize> = (0..keep.len()).filter(|k| !inside.contains(k)).collect();
        let block = |idx: &[usize]| -> Array2<f64> { r.select(Axis(0), idx).select(Axis(1), idx) };
        let value = block(&inside).det()? * block(&outside).det()? / det_r;
        let df = inside.len();
        out.push(Gvif {
            term: term.clone(),
            gvif: value,
            df,
            adjusted: value.powf(1.0 / (2.0 * df as f64)),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, SurveyTable};
    use crate::stats::design::{ModelSpec, build_design};
    use crate::stats::wls::fit_wls;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn table(columns: Vec<(&str, Vec<f64>)>) -> SurveyTable {
        SurveyTable::from_columns(
            columns
                .into_iter()
                .map(|(name, v)| {
                    (
                        name.to_string(),
                        Column::Numeric(v.into_iter().map(Some).collect()),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    fn fit(table: &SurveyTable, terms: &[&str], weights: Option<&str>) -> WlsFit {
        let mut spec = ModelSpec::new("m", "y", terms);
        if let Some(w) = weights {
            spec = spec.weighted_by(w);
        }
        fit_wls("m", &spec.formula(), build_design(table, &spec).unwrap()).unwrap()
    }

    #[test]
    fn breusch_pagan_detects_variance_growing_with_x() {
        let mut rng = StdRng::seed_from_u64(11);
        let x: Vec<f64> = (0..200).map(|i| 1.0 + i as f64 / 20.0).collect();
        let hetero: Vec<f64> = x
            .iter()
            .map(|x| 1.0 + x + x * x * rng.gen_range(-1.0..1.0))
            .collect();
        let homo: Vec<f64> = x.iter().map(|x| 1.0 + x + rng.gen_range(-1.0..1.0)).collect();

        let t = table(vec![("x", x.clone()), ("y", hetero)]);
        let bp = breusch_pagan(&fit(&t, &["x"], None)).unwrap();
        assert_eq!(bp.df, 1);
        assert!(bp.p_value < 0.001, "p = {}", bp.p_value);

        let t = table(vec![("x", x), ("y", homo)]);
        let bp = breusch_pagan(&fit(&t, &["x"], None)).unwrap();
        assert!(bp.p_value > 0.001, "p = {}", bp.p_value);
    }

    #[test]
    fn breusch_pagan_ignores_model_weights() {
        let mut rng = StdRng::seed_from_u64(3);
        let x: Vec<f64> = (0..50).map(|_| rng.gen_range(0.0..4.0)).collect();
        let y: Vec<f64> = x.iter().map(|x| x + rng.gen_range(-1.0..1.0) * x).collect();
        let w: Vec<f64> = (0..50).map(|_| rng.gen_range(0.2..3.0)).collect();
        let t = table(vec![("x", x), ("y", y), ("w", w)]);
        let weighted = breusch_pagan(&fit(&t, &["x"], Some("w"))).unwrap();
        let unweighted = breusch_pagan(&fit(&t, &["x"], None)).unwrap();
        assert_abs_diff_eq!(weighted.statistic, unweighted.statistic, epsilon = 1e-10);
    }

    #[test]
    fn outlier_test_flags_a_planted_outlier() {
        let mut rng = StdRng::seed_from_u64(5);
        let x: Vec<f64> = (0..60).map(|i| i as f64 / 10.0).collect();
        let mut y: Vec<f64> = x.iter().map(|x| 2.0 * x + rng.gen_range(-0.3..0.3)).collect();
        y[17] += 8.0;
        let t = table(vec![("x", x), ("y", y)]);
        let rows = outlier_test(&fit(&t, &["x"], None)).unwrap();
        assert_eq!(rows[0].fit_row, 17);
        assert_eq!(rows[0].table_row, 17);
        assert!(rows[0].p_bonferroni.is_some_and(|p| p < OUTLIER_CUTOFF));
        assert!(rows.len() <= OUTLIER_MAX_ROWS);
    }

    #[test]
    fn outlier_test_falls_back_to_the_largest_residual() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        // Deterministic small wiggle, no outliers.
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, x)| x + if i % 2 == 0 { 0.5 } else { -0.5 } + if i == 9 { 0.4 } else { 0.0 })
            .collect();
        let t = table(vec![("x", x), ("y", y)]);
        let f = fit(&t, &["x"], None);
        let rows = outlier_test(&f).unwrap();
        assert_eq!(rows.len(), 1);
        let largest = f
            .rstudent()
            .iter()
            .cloned()
            .fold(0.0f64, |m, r| m.max(r.abs()));
        assert_abs_diff_eq!(rows[0].rstudent.abs(), largest, epsilon = 1e-12);
        assert!(rows[0].p_bonferroni.is_none() || rows[0].p_bonferroni.unwrap() >= OUTLIER_CUTOFF);
    }

    #[test]
    fn gvif_of_single_column_terms_matches_classic_vif() {
        let mut rng = StdRng::seed_from_u64(9);
        let a: Vec<f64> = (0..100).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let b: Vec<f64> = a.iter().map(|a| a + 0.5 * rng.gen_range(-1.0..1.0)).collect();
        let y: Vec<f64> = a
            .iter()
            .zip(&b)
            .map(|(a, b)| a - b + rng.gen_range(-1.0..1.0))
            .collect();

        // VIF of a = 1 / (1 − r²) with r = corr(a, b).
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        let (ma, mb) = (mean(&a), mean(&b));
        let sab: f64 = a.iter().zip(&b).map(|(a, b)| (a - ma) * (b - mb)).sum();
        let saa: f64 = a.iter().map(|a| (a - ma).powi(2)).sum();
        let sbb: f64 = b.iter().map(|b| (b - mb).powi(2)).sum();
        let r2 = sab * sab / (saa * sbb);

        let t = table(vec![("a", a), ("b", b), ("y", y)]);
        let out = gvif(&fit(&t, &["a", "b"], None)).unwrap();
        assert_eq!(out.len(), 2);
        for g in &out {
            assert_eq!(g.df, 1);
            assert_abs_diff_eq!(g.gvif, 1.0 / (1.0 - r2), epsilon = 1e-8);
            assert_abs_diff_eq!(g.adjusted, g.gvif.sqrt(), epsilon = 1e-10);
        }
    }

    #[test]
    fn gvif_needs_two_terms() {
        let t = table(vec![("x", vec![1.0, 2.0, 3.0, 4.0]), ("y", vec![1.0, 3.0, 2.0, 4.0])]);
        assert!(matches!(
            gvif(&fit(&t, &["x"], None)),
            Err(FitError::TooFewTerms(_))
        ));
    }
}
