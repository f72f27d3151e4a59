//! Stratified k-nearest-neighbour imputation.
//!
//! Neighbours are searched only among respondents of the same country and
//! sub-national entity type. Similarity is a Gower distance over the
//! imputable columns, computed on the original (pre-imputation) values.
//! Numeric columns take the median of the donors; categorical columns take
//! their mode, with ties broken by a seeded RNG. That tie-break is the only
//! randomized step of the whole pipeline.

use crate::data::{Column, DataError, SurveyTable, respondent_label};
use crate::schema;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImputeError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("The number of neighbours must be at least 1 (got {0}).")]
    InvalidNeighbourCount(usize),
    #[error("Column '{0}' is not part of the schema and cannot be imputed.")]
    UnknownColumn(String),
}

/// What the imputer did.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputationReport {
    pub strata: usize,
    /// Filled cells per column, schema order.
    pub filled: Vec<(String, usize)>,
    /// Cells left missing because their stratum had no donor.
    pub unresolved: usize,
    /// Respondent ids removed for missing required fields.
    pub dropped_ids: Vec<String>,
}

impl ImputationReport {
    pub fn total_filled(&self) -> usize {
        self.filled.iter().map(|(_, n)| n).sum()
    }
}

/// One imputable column, viewed uniformly for distance computation.
enum Values<'a> {
    Numeric { values: &'a [Option<f64>], range: f64 },
    Text(&'a [Option<String>]),
}

impl Values<'_> {
    /// Gower contribution in [0, 1], or `None` when either side is missing.
    fn distance(&self, a: usize, b: usize) -> Option<f64> {
        match self {
            Values::Numeric { values, range } => {
                let (x, y) = (values[a]?, values[b]?);
                Some(if *range > 0.0 { (x - y).abs() / range } else { 0.0 })
            }
            Values::Text(values) => {
                let (x, y) = (values[a].as_ref()?, values[b].as_ref()?);
                Some(if x == y { 0.0 } else { 1.0 })
            }
        }
    }
}

/// Imputes every imputable schema column of `table` and removes rows that
/// still miss a required field.
pub fn impute_knn(
    table: &SurveyTable,
    k: usize,
    seed: u64,
) -> Result<(SurveyTable, ImputationReport), ImputeError> {
    if k == 0 {
        return Err(ImputeError::InvalidNeighbourCount(k));
    }
    let targets = schema::imputable_columns();
    let strata = strata(table)?;
    log::info!(
        "Imputing {} columns over {} strata with k = {k}.",
        targets.len(),
        strata.len()
    );

    let original: Vec<Values> = targets
        .iter()
        .map(|name| column_values(table, name))
        .collect::<Result<_, _>>()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut imputed = table.clone();
    let mut filled = Vec::with_capacity(targets.len());
    let mut unresolved = 0usize;

    for name in &targets {
        let categorical = schema::column_spec(name)
            .map(|s| s.semantic.is_categorical())
            .ok_or_else(|| ImputeError::UnknownColumn(name.to_string()))?;
        let mut column = table.column(name)?.clone();
        let mut count = 0usize;

        for rows in strata.values() {
            let donors: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&r| !column.is_missing(r))
                .collect();
            let recipients: Vec<usize> = rows
                .iter()
                .copied()
                .filter(|&r| column.is_missing(r))
                .collect();
            for recipient in recipients {
                if donors.is_empty() {
                    unresolved += 1;
                    continue;
                }
                let neighbours = nearest(&original, recipient, &donors, k);
                fill(&mut column, recipient, &neighbours, categorical, &mut rng);
                count += 1;
            }
        }
        log::debug!("Column '{name}': filled {count} cells.");
        filled.push((name.to_string(), count));
        imputed = imputed.with_column(name, column)?;
    }

    let (imputed, dropped_ids) = drop_incomplete(imputed)?;
    if !dropped_ids.is_empty() {
        log::info!(
            "Removed {} row(s) still missing a required field after imputation: {}",
            dropped_ids.len(),
            dropped_ids.join(", ")
        );
    }
    Ok((
        imputed,
        ImputationReport {
            strata: strata.len(),
            filled,
            unresolved,
            dropped_ids,
        },
    ))
}

/// Row indices grouped by (country, entity type). A missing entity type is a
/// stratum of its own.
fn strata(
    table: &SurveyTable,
) -> Result<BTreeMap<(Option<String>, Option<String>), Vec<usize>>, DataError> {
    let countries = table.labels(schema::COUNTRY)?;
    let types = table.labels(schema::SNE_TYPE)?;
    let mut groups: BTreeMap<_, Vec<usize>> = BTreeMap::new();
    for (row, key) in countries.into_iter().zip(types).enumerate() {
        groups.entry(key).or_default().push(row);
    }
    Ok(groups)
}

fn column_values<'a>(table: &'a SurveyTable, name: &str) -> Result<Values<'a>, DataError> {
    match table.column(name)? {
        Column::Numeric(values) => {
            let (min, max) = values
                .iter()
                .flatten()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let range = if max > min { max - min } else { 0.0 };
            Ok(Values::Numeric { values, range })
        }
        Column::Text(values) => Ok(Values::Text(values)),
        Column::Factor(_) => Err(DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "numeric or text",
            found_type: "factor".to_string(),
        }),
    }
}

/// Average Gower distance over the columns observed in both rows.
fn gower(columns: &[Values], a: usize, b: usize) -> f64 {
    let (sum, used) = columns
        .iter()
        .filter_map(|c| c.distance(a, b))
        .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
    if used == 0 { f64::INFINITY } else { sum / used as f64 }
}

/// The `k` donors closest to `recipient`; ties resolve to the earlier row.
fn nearest(columns: &[Values], recipient: usize, donors: &[usize], k: usize) -> Vec<usize> {
    donors
        .iter()
        .map(|&d| (gower(columns, recipient, d), d))
        .sorted_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .take(k)
        .map(|(_, d)| d)
        .collect()
}

fn fill(
    column: &mut Column,
    recipient: usize,
    neighbours: &[usize],
    categorical: bool,
    rng: &mut StdRng,
) {
    match column {
        Column::Numeric(values) => {
            let donor_values: Vec<f64> = neighbours.iter().filter_map(|&n| values[n]).collect();
            values[recipient] = if categorical {
                mode(&donor_values, rng)
            } else {
                median(&donor_values)
            };
        }
        Column::Text(values) => {
            let donor_values: Vec<String> = neighbours
                .iter()
                .filter_map(|&n| values[n].clone())
                .collect();
            values[recipient] = mode(&donor_values, rng);
        }
        Column::Factor(_) => {}
    }
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted: Vec<f64> = values.iter().copied().sorted_by(f64::total_cmp).collect();
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Most frequent value; ties are broken uniformly at random.
fn mode<T: Clone + PartialEq>(values: &[T], rng: &mut StdRng) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for v in values {
        match counts.iter_mut().find(|(u, _)| u == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.clone(), 1)),
        }
    }
    let best = counts.iter().map(|(_, n)| *n).max()?;
    let tied: Vec<&T> = counts
        .iter()
        .filter(|(_, n)| *n == best)
        .map(|(v, _)| v)
        .collect();
    let pick = if tied.len() == 1 {
        0
    } else {
        rng.gen_range(0..tied.len())
    };
    Some(tied[pick].clone())
}

fn drop_incomplete(table: SurveyTable) -> Result<(SurveyTable, Vec<String>), DataError> {
    let mut incomplete = Vec::new();
    for row in 0..table.n_rows() {
        let mut missing = false;
        for name in schema::REQUIRED_AFTER_IMPUTATION {
            missing |= table.column(name)?.is_missing(row);
        }
        if missing {
            incomplete.push(row);
        }
    }
    if incomplete.is_empty() {
        return Ok((table, Vec::new()));
    }
    let ids = table.labels(schema::ID)?;
    let dropped = incomplete
        .iter()
        .map(|&r| respondent_label(&ids, r))
        .collect();
    Ok((table.without_rows(&incomplete), dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::SyntheticSurveyBuilder;

    #[test]
    fn imputation_fills_every_imputable_column_and_drops_the_orphan() {
        let raw = SyntheticSurveyBuilder::new(8)
            .with_missing_rate(0.1)
            .build_table();
        let (imputed, report) = impute_knn(&raw, 5, 1234).unwrap();

        assert_eq!(imputed.n_rows(), raw.n_rows() - 1);
        assert_eq!(report.dropped_ids.len(), 1);
        assert!(report.total_filled() > 0);
        for name in schema::imputable_columns() {
            assert_eq!(
                imputed.column(name).unwrap().missing_count(),
                0,
                "column {name} still has missing values"
            );
        }
    }

    #[test]
    fn grouping_columns_are_left_untouched() {
        let raw = SyntheticSurveyBuilder::new(6)
            .with_missing_rate(0.15)
            .without_orphan_row()
            .build_table();
        let (imputed, report) = impute_knn(&raw, 5, 7).unwrap();
        assert!(report.dropped_ids.is_empty());
        for name in [schema::ID, schema::COUNTRY, schema::SNE_TYPE, schema::REP_MOTIVATION] {
            assert_eq!(imputed.column(name).unwrap(), raw.column(name).unwrap());
        }
    }

    #[test]
    fn imputation_is_deterministic_for_a_fixed_seed() {
        let raw = SyntheticSurveyBuilder::new(6).with_missing_rate(0.2).build_table();
        let (a, _) = impute_knn(&raw, 5, 99).unwrap();
        let (b, _) = impute_knn(&raw, 5, 99).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn imputed_values_stay_on_the_observed_scale() {
        let raw = SyntheticSurveyBuilder::new(6).with_missing_rate(0.2).build_table();
        let (imputed, _) = impute_knn(&raw, 5, 3).unwrap();
        for v in imputed.numeric(schema::LEFT_RIGHT).unwrap().iter().flatten() {
            assert_eq!(v.fract(), 0.0, "ordinal imputed with a non-integer value {v}");
            assert!((1.0..=9.0).contains(v));
        }
    }

    #[test]
    fn median_and_mode_follow_their_definitions() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);

        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(mode(&["a", "b", "b"], &mut rng), Some("b"));
        let tied = mode(&["a", "b"], &mut rng).unwrap();
        assert!(tied == "a" || tied == "b");
    }

    #[test]
    fn zero_neighbours_is_rejected() {
        let raw = SyntheticSurveyBuilder::new(2).build_table();
        assert!(matches!(
            impute_knn(&raw, 0, 1),
            Err(ImputeError::InvalidNeighbourCount(0))
        ));
    }
}
