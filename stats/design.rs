//! # Model Specifications and Design Matrices
//!
//! Turns a [`ModelSpec`] and a [`SurveyTable`] into the numeric pieces of a
//! weighted least-squares problem, following the usual formula conventions:
//!
//! - Intercept: always the first column, named `(Intercept)`.
//! - Unordered factors: treatment contrasts against the first level present
//!   in the fitted rows, one column per other level, named `{term}{level}`.
//! - Ordered factors: orthogonal polynomial contrasts over the levels present
//!   in the fitted rows, named `{term}.L`, `{term}.Q`, `{term}.C`, `{term}^4`…
//! - Numeric terms: one column named after the term.
//! - Missing values: rows with a missing outcome, weight or term are dropped
//!   before anything else. The surviving table rows are kept in
//!   [`Design::rows`] so per-row results can be mapped back to respondents.

use crate::data::{Column, DataError, Factor, SurveyTable};
use ndarray::{Array1, Array2};
use thiserror::Error;

pub const INTERCEPT: &str = "(Intercept)";

#[derive(Error, Debug)]
pub enum DesignError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Model '{model}' has no complete rows to fit.")]
    NoCompleteRows { model: String },
    #[error(
        "Term '{term}' of model '{model}' has a single level ('{level}') in the fitted rows, so no contrast can be formed."
    )]
    SingleLevel {
        model: String,
        term: String,
        level: String,
    },
    #[error("Term '{term}' is a {kind} column and cannot enter a model.")]
    UnsupportedTerm { term: String, kind: &'static str },
    #[error("Weight {value} at table row {row} is not a positive finite number.")]
    InvalidWeight { row: usize, value: f64 },
}

/// What to fit: an outcome, an ordered list of terms and an optional weight
/// column. Terms name table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub outcome: String,
    pub terms: Vec<String>,
    pub weights: Option<String>,
}

impl ModelSpec {
    pub fn new(name: &str, outcome: &str, terms: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            outcome: outcome.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            weights: None,
        }
    }

    pub fn weighted_by(mut self, column: &str) -> Self {
        self.weights = Some(column.to_string());
        self
    }

    /// A copy under a new name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Replaces `term` in place, keeping the term order.
    pub fn replacing_term(&self, term: &str, replacement: &str) -> Self {
        let mut spec = self.clone();
        for t in spec.terms.iter_mut() {
            if t == term {
                *t = replacement.to_string();
            }
        }
        spec
    }

    pub fn without_term(&self, term: &str) -> Self {
        let mut spec = self.clone();
        spec.terms.retain(|t| t != term);
        spec
    }

    /// `outcome ~ term + term + …`
    pub fn formula(&self) -> String {
        format!("{} ~ {}", self.outcome, self.terms.join(" + "))
    }
}

/// The numeric form of a model on a particular set of rows.
#[derive(Debug, Clone)]
pub struct Design {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub weights: Array1<f64>,
    pub column_names: Vec<String>,
    /// For every column of `x`, the index into `terms` it encodes; `None` for
    /// the intercept.
    pub term_assign: Vec<Option<usize>>,
    pub terms: Vec<String>,
    /// Table row of every design row.
    pub rows: Vec<usize>,
}

impl Design {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.x.ncols()
    }

    /// Design columns belonging to term `term`.
    pub fn term_columns(&self, term: usize) -> Vec<usize> {
        self.term_assign
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Some(term))
            .map(|(j, _)| j)
            .collect()
    }
}

/// Coding of one term over the fitted rows.
enum Coded {
    Numeric(Vec<f64>),
    Contrasts {
        names: Vec<String>,
        // rows × contrasts, row-major over the fitted rows
        values: Vec<Vec<f64>>,
    },
}

pub fn build_design(table: &SurveyTable, spec: &ModelSpec) -> Result<Design, DesignError> {
    let mut needed: Vec<&str> = vec![spec.outcome.as_str()];
    if let Some(w) = &spec.weights {
        needed.push(w.as_str());
    }
    needed.extend(spec.terms.iter().map(String::as_str));

    let mut complete = vec![true; table.n_rows()];
    for name in &needed {
        let column = table.column(name)?;
        for (row, keep) in complete.iter_mut().enumerate() {
            if column.is_missing(row) {
                *keep = false;
            }
        }
    }
    let rows: Vec<usize> = (0..table.n_rows()).filter(|&r| complete[r]).collect();
    if rows.is_empty() {
        return Err(DesignError::NoCompleteRows {
            model: spec.name.clone(),
        });
    }
    let dropped = table.n_rows() - rows.len();
    if dropped > 0 {
        log::debug!(
            "Model '{}': {} incomplete rows dropped before fitting.",
            spec.name,
            dropped
        );
    }

    let outcome = table.numeric(&spec.outcome)?;
    let y: Array1<f64> = rows.iter().filter_map(|&r| outcome[r]).collect();

    let weights: Array1<f64> = match &spec.weights {
        Some(name) => {
            let w = table.numeric(name)?;
            rows.iter()
                .map(|&r| match w[r] {
                    Some(v) if v.is_finite() && v > 0.0 => Ok(v),
                    other => Err(DesignError::InvalidWeight {
                        row: r,
                        value: other.unwrap_or(f64::NAN),
                    }),
                })
                .collect::<Result<_, _>>()?
        }
        None => Array1::ones(rows.len()),
    };

    let mut column_names = vec![INTERCEPT.to_string()];
    let mut term_assign = vec![None];
    let mut blocks: Vec<Coded> = Vec::with_capacity(spec.terms.len());
    for (t, term) in spec.terms.iter().enumerate() {
        let coded = code_term(spec, term, table.column(term)?, &rows)?;
        match &coded {
            Coded::Numeric(_) => {
                column_names.push(term.clone());
                term_assign.push(Some(t));
            }
            Coded::Contrasts { names, .. } => {
                for name in names {
                    column_names.push(name.clone());
                    term_assign.push(Some(t));
                }
            }
        }
        blocks.push(coded);
    }

    let mut x = Array2::zeros((rows.len(), column_names.len()));
    x.column_mut(0).fill(1.0);
    let mut j = 1;
    for block in &blocks {
        match block {
            Coded::Numeric(values) => {
                for (i, v) in values.iter().enumerate() {
                    x[[i, j]] = *v;
                }
                j += 1;
            }
            Coded::Contrasts { names, values } => {
                for (i, row) in values.iter().enumerate() {
                    for (k, v) in row.iter().enumerate() {
                        x[[i, j + k]] = *v;
                    }
                }
                j += names.len();
            }
        }
    }

    Ok(Design {
        x,
        y,
        weights,
        column_names,
        term_assign,
        terms: spec.terms.clone(),
        rows,
    })
}

fn code_term(
    spec: &ModelSpec,
    term: &str,
    column: &Column,
    rows: &[usize],
) -> Result<Coded, DesignError> {
    match column {
        Column::Numeric(values) => Ok(Coded::Numeric(
            rows.iter().filter_map(|&r| values[r]).collect(),
        )),
        Column::Factor(factor) => code_factor(spec, term, factor, rows),
        Column::Text(_) => Err(DesignError::UnsupportedTerm {
            term: term.to_string(),
            kind: column.kind_name(),
        }),
    }
}

fn code_factor(
    spec: &ModelSpec,
    term: &str,
    factor: &Factor,
    rows: &[usize],
) -> Result<Coded, DesignError> {
    let codes: Vec<usize> = rows.iter().filter_map(|&r| factor.codes()[r]).collect();

    // Unused levels are dropped; the remaining ones keep their order.
    let mut present = vec![false; factor.levels().len()];
    for &c in &codes {
        present[c] = true;
    }
    let used: Vec<usize> = (0..present.len()).filter(|&l| present[l]).collect();
    if used.len() < 2 {
        return Err(DesignError::SingleLevel {
            model: spec.name.clone(),
            term: term.to_string(),
            level: used
                .first()
                .map(|&l| factor.levels()[l].clone())
                .unwrap_or_default(),
        });
    }
    let position = |code: usize| used.iter().position(|&l| l == code).unwrap_or(0);

    if factor.is_ordered() {
        let contrasts = poly_contrasts(used.len());
        let names = (1..used.len())
            .map(|degree| format!("{term}{}", poly_suffix(degree)))
            .collect();
        let values = codes
            .iter()
            .map(|&c| contrasts.row(position(c)).to_vec())
            .collect();
        Ok(Coded::Contrasts { names, values })
    } else {
        let names = used[1..]
            .iter()
            .map(|&l| format!("{term}{}", factor.levels()[l]))
            .collect();
        let values = codes
            .iter()
            .map(|&c| {
                let p = position(c);
                (1..used.len()).map(|k| if k == p { 1.0 } else { 0.0 }).collect()
            })
            .collect();
        Ok(Coded::Contrasts { names, values })
    }
}

fn poly_suffix(degree: usize) -> String {
    match degree {
        1 => ".L".to_string(),
        2 => ".Q".to_string(),
        3 => ".C".to_string(),
        d => format!("^{d}"),
    }
}

/// Orthonormal polynomial contrasts for `k` equally spaced levels: a
/// `k × (k − 1)` matrix whose column `d − 1` is the degree-`d` polynomial
/// evaluated at the centered scores `1..=k`, orthogonal to all lower degrees,
/// scaled to unit length and signed so its leading coefficient is positive.
pub fn poly_contrasts(k: usize) -> Array2<f64> {
    let mean = (k as f64 + 1.0) / 2.0;
    let scores: Vec<f64> = (1..=k).map(|s| s as f64 - mean).collect();

    // Modified Gram–Schmidt over the powers 0..k of the centered scores.
    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(k);
    for degree in 0..k {
        let mut v: Array1<f64> = scores.iter().map(|s| s.powi(degree as i32)).collect();
        for q in &basis {
            let proj = q.dot(&v);
            v.scaled_add(-proj, q);
        }
        let norm = v.dot(&v).sqrt();
        basis.push(v / norm);
    }

    let mut contrasts = Array2::zeros((k, k.saturating_sub(1)));
    for (d, q) in basis.iter().enumerate().skip(1) {
        contrasts.column_mut(d - 1).assign(q);
    }
    contrasts
}
