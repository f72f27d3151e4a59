//! # Outlier Removal
//!
//! The candidates are the rows flagged by the Bonferroni outlier test on the
//! base model. Under [`OutlierPolicy::Rule`] a candidate is dropped when
//! both of these hold for the refit without it (re-weighted, evaluated one
//! candidate at a time against the base model):
//!
//! - the Breusch–Pagan p-value is larger than the base model's;
//! - the focal coefficient keeps its sign.
//!
//! [`OutlierPolicy::Listed`] replaces the rule with a fixed list of
//! respondent ids. In both cases the candidate table is computed and
//! reported. Composite indices are never recomputed after removal.

use crate::data::{DataError, SurveyTable, respondent_label};
use crate::schema;
use crate::stats::design::ModelSpec;
use crate::stats::diagnostics::{BreuschPagan, breusch_pagan, outlier_test};
use crate::stats::wls::{FitError, WlsFit, fit_model};
use crate::weights::with_country_weights;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutlierError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error("Model '{model}' has no coefficient named '{name}'.")]
    UnknownCoefficient { model: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Drop candidates that pass the heteroskedasticity and sign checks.
    #[default]
    Rule,
    /// Drop exactly these respondents.
    Listed { ids: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct CandidateDecision {
    pub id: String,
    pub rstudent: f64,
    pub p_bonferroni: Option<f64>,
    pub refit_bp_p_value: f64,
    pub refit_focal: f64,
    pub passes_rule: bool,
    pub dropped: bool,
}

#[derive(Debug, Clone)]
pub struct OutlierDecision {
    pub policy: OutlierPolicy,
    pub base_breusch_pagan: BreuschPagan,
    pub base_focal: f64,
    pub candidates: Vec<CandidateDecision>,
    pub dropped_ids: Vec<String>,
}

/// The drop rule for one candidate.
pub fn passes_drop_rule(
    base_bp_p: f64,
    refit_bp_p: f64,
    base_focal: f64,
    refit_focal: f64,
) -> bool {
    refit_bp_p > base_bp_p
        && base_focal != 0.0
        && base_focal.signum() == refit_focal.signum()
}

fn focal_of(fit: &WlsFit, focal: &str) -> Result<f64, OutlierError> {
    fit.coefficient(focal)
        .ok_or_else(|| OutlierError::UnknownCoefficient {
            model: fit.name.clone(),
            name: focal.to_string(),
        })
}

/// Evaluates the outlier candidates of `spec` fitted on `table` and returns
/// the table without the dropped rows, re-weighted.
pub fn apply_outlier_policy(
    table: &SurveyTable,
    spec: &ModelSpec,
    focal: &str,
    policy: &OutlierPolicy,
) -> Result<(SurveyTable, OutlierDecision), OutlierError> {
    let base = fit_model(table, spec)?;
    let base_bp = breusch_pagan(&base)?;
    let base_focal = focal_of(&base, focal)?;
    let ids = table.labels(schema::ID)?;

    let mut candidates = Vec::new();
    let mut candidate_rows = Vec::new();
    for flagged in outlier_test(&base)? {
        let without = with_country_weights(&table.without_rows(&[flagged.table_row]))?;
        let refit = fit_model(&without, spec)?;
        let refit_bp = breusch_pagan(&refit)?;
        let refit_focal = focal_of(&refit, focal)?;
        let passes_rule =
            passes_drop_rule(base_bp.p_value, refit_bp.p_value, base_focal, refit_focal);
        let id = respondent_label(&ids, flagged.table_row);
        let dropped = match policy {
            OutlierPolicy::Rule => passes_rule,
            OutlierPolicy::Listed { ids: listed } => listed.contains(&id),
        };
        candidate_rows.push(flagged.table_row);
        candidates.push(CandidateDecision {
            id,
            rstudent: flagged.rstudent,
            p_bonferroni: flagged.p_bonferroni,
            refit_bp_p_value: refit_bp.p_value,
            refit_focal,
            passes_rule,
            dropped,
        });
    }

    let (drop_rows, dropped_ids): (Vec<usize>, Vec<String>) = match policy {
        OutlierPolicy::Rule => candidate_rows
            .iter()
            .zip(&candidates)
            .filter(|(_, c)| c.dropped)
            .map(|(&row, c)| (row, c.id.clone()))
            .unzip(),
        OutlierPolicy::Listed { ids: listed } => {
            for id in listed {
                if table.row_of_id(id)?.is_none() {
                    log::warn!("Listed outlier '{}' is not in the data.", id);
                }
            }
            let rows = (0..table.n_rows())
                .filter(|&r| ids[r].as_ref().is_some_and(|id| listed.contains(id)))
                .collect();
            (rows, listed.clone())
        }
    };
    log::info!(
        "Outlier policy dropped {} row(s); {} candidate(s) evaluated.",
        drop_rows.len(),
        candidates.len()
    );

    let trimmed = with_country_weights(&table.without_rows(&drop_rows))?;
    Ok((
        trimmed,
        OutlierDecision {
            policy: policy.clone(),
            base_breusch_pagan: base_bp,
            base_focal,
            candidates,
            dropped_ids,
        },
    ))
}
