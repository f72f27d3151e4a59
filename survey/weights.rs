//! Per-country rebalancing weights.
//!
//! `weight = mean(fraction over countries) / fraction of this country`, so
//! every country ends up with the same total weight and the row mean of the
//! weights is one. The weights describe one particular row set: every subset
//! of respondents gets its own fresh weight column through
//! [`with_country_weights`], which never mutates its input.

use crate::data::{Column, DataError, SurveyTable};
use crate::schema;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CountryWeight {
    pub country: String,
    pub frequency: usize,
    pub fraction: f64,
    pub weight: f64,
}

/// Frequency, fraction and weight per country, sorted by country name.
pub fn weight_table(table: &SurveyTable) -> Result<Vec<CountryWeight>, DataError> {
    let countries = table.complete_labels(schema::COUNTRY)?;
    let mut frequencies: BTreeMap<&str, usize> = BTreeMap::new();
    for country in &countries {
        *frequencies.entry(country.as_str()).or_default() += 1;
    }

    let total = countries.len() as f64;
    let mean_fraction = 1.0 / frequencies.len().max(1) as f64;
    Ok(frequencies
        .into_iter()
        .map(|(country, frequency)| {
            let fraction = frequency as f64 / total;
            CountryWeight {
                country: country.to_string(),
                frequency,
                fraction,
                weight: mean_fraction / fraction,
            }
        })
        .collect())
}

/// A copy of `table` whose `weight` column matches its own country mix.
pub fn with_country_weights(table: &SurveyTable) -> Result<SurveyTable, DataError> {
    let weights = weight_table(table)?;
    let lookup: BTreeMap<&str, f64> = weights
        .iter()
        .map(|w| (w.country.as_str(), w.weight))
        .collect();
    let column = table
        .complete_labels(schema::COUNTRY)?
        .iter()
        .map(|country| lookup.get(country.as_str()).copied())
        .collect();
    table.clone().with_column(schema::WEIGHT, Column::Numeric(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table_of(countries: &[&str]) -> SurveyTable {
        SurveyTable::from_columns(vec![(
            schema::COUNTRY.to_string(),
            Column::Text(countries.iter().map(|c| Some(c.to_string())).collect()),
        )])
        .unwrap()
    }

    #[test]
    fn weights_average_to_one_and_balance_countries() {
        let table = table_of(&["A", "A", "A", "B", "C", "C"]);
        let weighted = with_country_weights(&table).unwrap();
        let w = weighted.complete_numeric(schema::WEIGHT).unwrap();

        let mean = w.iter().sum::<f64>() / w.len() as f64;
        assert_relative_eq!(mean, 1.0, epsilon = 1e-12);

        // Each country carries n / K total weight.
        let per_country = |c: &str| -> f64 {
            table
                .complete_labels(schema::COUNTRY)
                .unwrap()
                .iter()
                .zip(&w)
                .filter(|(country, _)| country.as_str() == c)
                .map(|(_, w)| w)
                .sum()
        };
        for c in ["A", "B", "C"] {
            assert_relative_eq!(per_country(c), 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn weight_table_reports_frequencies() {
        let table = table_of(&["B", "A", "B", "B"]);
        let rows = weight_table(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].country, "A");
        assert_eq!(rows[0].frequency, 1);
        assert_relative_eq!(rows[0].fraction, 0.25);
        assert_relative_eq!(rows[0].weight, 2.0);
        assert_relative_eq!(rows[1].weight, 0.5 / 0.75);
    }

    #[test]
    fn subsets_get_their_own_weights() {
        let table = table_of(&["A", "A", "B", "B", "C", "C"]);
        let full = with_country_weights(&table).unwrap();
        let subset = with_country_weights(&table.without_rows(&[0])).unwrap();

        let w_full = full.complete_numeric(schema::WEIGHT).unwrap();
        let w_subset = subset.complete_numeric(schema::WEIGHT).unwrap();
        assert!(w_full.iter().all(|&w| (w - 1.0).abs() < 1e-12));
        assert!(w_subset.iter().any(|&w| (w - 1.0).abs() > 1e-6));

        // The input table is never modified.
        assert!(!table.has_column(schema::WEIGHT));
    }

    #[test]
    fn recomputing_replaces_the_previous_weight_column() {
        let table = table_of(&["A", "B", "B"]);
        let once = with_country_weights(&table).unwrap();
        let twice = with_country_weights(&once.without_rows(&[0])).unwrap();
        assert_eq!(twice.column_names().len(), 2);
        let w = twice.complete_numeric(schema::WEIGHT).unwrap();
        assert!(w.iter().all(|&w| (w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn missing_country_is_an_error() {
        let table = SurveyTable::from_columns(vec![(
            schema::COUNTRY.to_string(),
            Column::Text(vec![Some("A".to_string()), None]),
        )])
        .unwrap();
        assert!(matches!(
            with_country_weights(&table),
            Err(DataError::MissingValuesFound(_))
        ));
    }
}
