//! Console report: descriptive statistics, model tables and diagnostics.
//!
//! Every `render_*` function returns the text block; the pipeline prints it.
//! The layout is for reading, not parsing.

use crate::data::{Column, DataError, SurveyTable, respondent_label};
use crate::impute::ImputationReport;
use crate::index::CompositeIndex;
use crate::normalize::Normalization;
use crate::outliers::OutlierDecision;
use crate::stats::diagnostics::{BreuschPagan, Gvif, OutlierRow};
use crate::stats::robust::ClusterRobust;
use crate::stats::wls::WlsFit;
use crate::weights::CountryWeight;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct NumericSummary {
    pub name: String,
    pub n: usize,
    pub missing: usize,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl NumericSummary {
    /// Summary of the observed values; `None` when nothing is observed.
    pub fn of(name: &str, values: &[Option<f64>]) -> Option<Self> {
        let mut observed: Vec<f64> = values.iter().flatten().copied().collect();
        if observed.is_empty() {
            return None;
        }
        observed.sort_by(f64::total_cmp);
        let n = observed.len();
        let mean = observed.iter().sum::<f64>() / n as f64;
        let sd = if n > 1 {
            (observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            f64::NAN
        };
        Some(Self {
            name: name.to_string(),
            n,
            missing: values.len() - n,
            mean,
            sd,
            min: observed[0],
            q1: quantile(&observed, 0.25),
            median: quantile(&observed, 0.5),
            q3: quantile(&observed, 0.75),
            max: observed[n - 1],
        })
    }
}

/// Linear-interpolation quantile of sorted data (the default "type 7" rule).
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryShare {
    pub level: String,
    pub count: usize,
    pub share: f64,
    pub weighted_share: Option<f64>,
}

/// Level counts and shares of a categorical column, in level order for
/// factors and sorted order for text. Missing cells are not counted.
pub fn proportions(
    table: &SurveyTable,
    column: &str,
    weight: Option<&str>,
) -> Result<Vec<CategoryShare>, DataError> {
    let labels = table.labels(column)?;
    let order: Vec<String> = match table.column(column)? {
        Column::Factor(factor) => factor.levels().to_vec(),
        _ => labels.iter().flatten().cloned().sorted().dedup().collect(),
    };
    let weights = match weight {
        Some(w) => Some(table.complete_numeric(w)?),
        None => None,
    };

    let mut counts: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    let mut total = 0usize;
    let mut total_weight = 0.0;
    for (row, label) in labels.iter().enumerate() {
        let Some(label) = label else { continue };
        let w = weights.as_ref().map_or(1.0, |w| w[row]);
        let entry = counts.entry(label.as_str()).or_default();
        entry.0 += 1;
        entry.1 += w;
        total += 1;
        total_weight += w;
    }

    Ok(order
        .iter()
        .map(|level| {
            let (count, w) = counts.get(level.as_str()).copied().unwrap_or_default();
            CategoryShare {
                level: level.clone(),
                count,
                share: count as f64 / total.max(1) as f64,
                weighted_share: weights.as_ref().map(|_| w / total_weight),
            }
        })
        .collect())
}

fn stars(p: f64) -> &'static str {
    if p < 0.001 {
        "***"
    } else if p < 0.01 {
        "**"
    } else if p < 0.05 {
        "*"
    } else if p < 0.1 {
        "."
    } else {
        ""
    }
}

fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n=== {title} ===");
}

pub fn render_imputation(report: &ImputationReport) -> String {
    let mut out = String::new();
    heading(&mut out, "Imputation");
    let _ = writeln!(
        out,
        "{} strata, {} cells filled, {} cells without donors.",
        report.strata,
        report.total_filled(),
        report.unresolved
    );
    for (column, n) in report.filled.iter().filter(|(_, n)| *n > 0) {
        let _ = writeln!(out, "  {column:<22} {n:>5}");
    }
    if !report.dropped_ids.is_empty() {
        let _ = writeln!(
            out,
            "Dropped {} respondent(s) still missing age or left-right: {}",
            report.dropped_ids.len(),
            report.dropped_ids.join(", ")
        );
    }
    out
}

pub fn render_weights(weights: &[CountryWeight]) -> String {
    let mut out = String::new();
    heading(&mut out, "Country weights");
    let _ = writeln!(out, "{:<16} {:>6} {:>9} {:>9}", "country", "n", "fraction", "weight");
    for w in weights {
        let _ = writeln!(
            out,
            "{:<16} {:>6} {:>9.4} {:>9.4}",
            w.country, w.frequency, w.fraction, w.weight
        );
    }
    out
}

pub fn render_descriptives(
    table: &SurveyTable,
    numeric: &[&str],
    categorical: &[&str],
    weight: &str,
) -> Result<String, DataError> {
    let mut out = String::new();
    heading(&mut out, &format!("Descriptive statistics (n = {})", table.n_rows()));
    let _ = writeln!(
        out,
        "{:<14} {:>5} {:>4} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "variable", "n", "NA", "mean", "sd", "min", "q1", "median", "q3", "max"
    );
    for name in numeric {
        if let Some(s) = NumericSummary::of(name, table.numeric(name)?) {
            let _ = writeln!(
                out,
                "{:<14} {:>5} {:>4} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
                s.name, s.n, s.missing, s.mean, s.sd, s.min, s.q1, s.median, s.q3, s.max
            );
        }
    }
    for name in categorical {
        let _ = writeln!(out, "\n{name}");
        for share in proportions(table, name, Some(weight))? {
            let _ = writeln!(
                out,
                "  {:<18} {:>5} {:>7.1}% {:>7.1}% (weighted)",
                share.level,
                share.count,
                100.0 * share.share,
                100.0 * share.weighted_share.unwrap_or(f64::NAN)
            );
        }
    }
    Ok(out)
}

pub fn render_indices(indices: &[CompositeIndex]) -> String {
    let mut out = String::new();
    heading(&mut out, "Composite indices (first principal component)");
    for index in indices {
        let _ = writeln!(
            out,
            "{} -> {}: {:.1}% of variance (eigenvalue {:.3})",
            index.block,
            index.column,
            100.0 * index.explained_variance_ratio[0],
            index.eigenvalues[0]
        );
        for (item, loading) in index.items.iter().zip(&index.loadings) {
            let _ = writeln!(out, "  {item:<12} {loading:>8.4}");
        }
    }
    out
}

pub fn render_normalizations(results: &[(String, Normalization)]) -> String {
    let mut out = String::new();
    heading(&mut out, "Normalizing transforms (Pearson P / df)");
    for (column, result) in results {
        let scores = result
            .candidates
            .iter()
            .map(|c| format!("{}: {:.3}", c.transform, c.pearson_p_df))
            .join("; ");
        let _ = writeln!(out, "{column}: chose {}\n  {scores}", result.chosen);
    }
    out
}

/// Coefficient table with conventional and cluster-robust inference.
pub fn render_model(fit: &WlsFit, robust: &ClusterRobust) -> String {
    let mut out = String::new();
    heading(&mut out, &format!("Model '{}'", fit.name));
    let _ = writeln!(out, "{}", fit.formula);
    let _ = writeln!(
        out,
        "{:<28} {:>10} {:>9} {:>10} {:>8} {:>9}",
        "term", "estimate", "se", "robust se", "t", "p"
    );
    for (j, name) in fit.design.column_names.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:<28} {:>10.4} {:>9.4} {:>10.4} {:>8.3} {:>9.4} {}",
            name,
            fit.coefficients[j],
            fit.std_errors[j],
            robust.std_errors[j],
            robust.t_values[j],
            robust.p_values[j],
            stars(robust.p_values[j])
        );
    }
    let _ = writeln!(
        out,
        "n = {}, residual df = {}, clusters = {}, sigma = {:.4}",
        fit.n_obs(),
        fit.df_residual,
        robust.n_clusters,
        fit.sigma
    );
    let _ = write!(
        out,
        "R² = {:.4}, adjusted R² = {:.4}",
        fit.r_squared, fit.adj_r_squared
    );
    if let Some(f) = &fit.f_statistic {
        let _ = write!(
            out,
            ", F({}, {}) = {:.3}, p = {:.3e}",
            f.df_numerator, f.df_denominator, f.value, f.p_value
        );
    }
    let _ = writeln!(out);
    out
}

pub fn render_diagnostics(
    model: &str,
    bp: &BreuschPagan,
    outliers: &[OutlierRow],
    ids: &[Option<String>],
    vifs: &[Gvif],
) -> String {
    let mut out = String::new();
    heading(&mut out, &format!("Diagnostics for '{model}'"));
    let _ = writeln!(
        out,
        "Studentized Breusch-Pagan: BP = {:.3}, df = {}, p = {:.4}",
        bp.statistic, bp.df, bp.p_value
    );
    let _ = writeln!(out, "Outlier test (Bonferroni):");
    for row in outliers {
        let id = respondent_label(ids, row.table_row);
        let bonferroni = row
            .p_bonferroni
            .map_or_else(|| "NA".to_string(), |p| format!("{p:.4}"));
        let _ = writeln!(
            out,
            "  {id:<10} rstudent = {:>7.3}  p = {:.3e}  Bonferroni p = {bonferroni}",
            row.rstudent, row.p_unadjusted
        );
    }
    let _ = writeln!(out, "{:<22} {:>9} {:>4} {:>12}", "term", "GVIF", "Df", "GVIF^(1/2Df)");
    for v in vifs {
        let _ = writeln!(
            out,
            "{:<22} {:>9.3} {:>4} {:>12.3}",
            v.term, v.gvif, v.df, v.adjusted
        );
    }
    out
}

pub fn render_outlier_decision(decision: &OutlierDecision) -> String {
    let mut out = String::new();
    heading(&mut out, "Outlier decisions");
    let _ = writeln!(
        out,
        "Base model: BP p = {:.4}, focal coefficient = {:.4}",
        decision.base_breusch_pagan.p_value, decision.base_focal
    );
    let _ = writeln!(
        out,
        "{:<10} {:>9} {:>11} {:>10} {:>10} {:>6} {:>8}",
        "id", "rstudent", "Bonf. p", "refit BP p", "focal", "rule", "dropped"
    );
    for c in &decision.candidates {
        let bonferroni = c
            .p_bonferroni
            .map_or_else(|| "NA".to_string(), |p| format!("{p:.4}"));
        let _ = writeln!(
            out,
            "{:<10} {:>9.3} {:>11} {:>10.4} {:>10.4} {:>6} {:>8}",
            c.id,
            c.rstudent,
            bonferroni,
            c.refit_bp_p_value,
            c.refit_focal,
            c.passes_rule,
            c.dropped
        );
    }
    let _ = writeln!(
        out,
        "Dropped: {}",
        if decision.dropped_ids.is_empty() {
            "none".to_string()
        } else {
            decision.dropped_ids.join(", ")
        }
    );
    out
}
