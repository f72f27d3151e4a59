//! Coercion of raw columns to their semantic types.
//!
//! Runs after imputation. Numeric codes of categorical columns become labels
//! (`2.0` → `"2"`), and every categorical column becomes a [`Factor`] with the
//! level sequence declared in the schema. Ordered factors keep that order in
//! every later subset, because subsets copy the level list verbatim.

use crate::data::{Column, DataError, Factor, SurveyTable};
use crate::schema::{COLUMNS, Levels, Semantic};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypeError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Column '{column}' contains the value '{value}', which is not one of its declared levels.")]
    UnknownLevel { column: String, value: String },
    #[error("Column '{column}' holds the non-integer code {value}, which cannot be a category label.")]
    NonIntegerCode { column: String, value: f64 },
}

/// Applies the schema's semantic types to every schema column of `table`.
/// `countries` provides the level order of the country factor.
pub fn normalize_types(table: SurveyTable, countries: &[String]) -> Result<SurveyTable, TypeError> {
    let mut table = table;
    for spec in COLUMNS.iter() {
        let column = table.column(spec.name)?;
        let converted = match spec.semantic {
            Semantic::Text => continue,
            Semantic::Numeric => match column {
                Column::Numeric(_) => continue,
                other => {
                    return Err(DataError::ColumnWrongType {
                        column_name: spec.name.to_string(),
                        expected_type: "numeric",
                        found_type: other.kind_name().to_string(),
                    }
                    .into());
                }
            },
            Semantic::Factor(levels) => {
                let labels = labels_of(spec.name, column)?;
                let levels: Vec<String> = match levels {
                    Levels::Declared(levels) => levels.iter().map(|l| l.to_string()).collect(),
                    Levels::AllowList => countries.to_vec(),
                    Levels::Observed => observed_levels(&labels),
                };
                to_factor(spec.name, &labels, levels, false)?
            }
            Semantic::Ordered(levels) => {
                let labels = labels_of(spec.name, column)?;
                let levels = levels.iter().map(|l| l.to_string()).collect();
                to_factor(spec.name, &labels, levels, true)?
            }
        };
        table = table.with_column(spec.name, Column::Factor(converted))?;
    }
    log::info!("Applied semantic column types.");
    Ok(table)
}

/// Builds a factor column, reporting the first label outside `levels`.
pub fn to_factor(
    column: &str,
    labels: &[Option<String>],
    levels: Vec<String>,
    ordered: bool,
) -> Result<Factor, TypeError> {
    Factor::from_labels(labels, levels, ordered).map_err(|value| TypeError::UnknownLevel {
        column: column.to_string(),
        value,
    })
}

fn labels_of(name: &str, column: &Column) -> Result<Vec<Option<String>>, TypeError> {
    match column {
        Column::Text(values) => Ok(values.clone()),
        Column::Factor(factor) => Ok(factor.labels()),
        Column::Numeric(values) => values
            .iter()
            .map(|v| v.map(|v| code_label(name, v)).transpose())
            .collect(),
    }
}

fn code_label(name: &str, value: f64) -> Result<String, TypeError> {
    if value.fract() != 0.0 {
        return Err(TypeError::NonIntegerCode {
            column: name.to_string(),
            value,
        });
    }
    Ok(format!("{}", value as i64))
}

fn observed_levels(labels: &[Option<String>]) -> Vec<String> {
    labels
        .iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impute::impute_knn;
    use crate::schema;
    use crate::test_fixtures::SyntheticSurveyBuilder;

    fn countries() -> Vec<String> {
        schema::DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn ordinal_columns_keep_their_declared_order() {
        let raw = SyntheticSurveyBuilder::new(4).without_orphan_row().build_table();
        let typed = normalize_types(raw, &countries()).unwrap();

        let education = typed.factor(schema::EDUCATION).unwrap();
        assert!(education.is_ordered());
        assert_eq!(education.levels(), ["1", "2", "3"]);

        let left_right = typed.factor(schema::LEFT_RIGHT).unwrap();
        assert_eq!(left_right.levels().len(), 9);
        assert_eq!(left_right.levels()[8], "9");

        let channel = typed.factor(schema::REP_CHANNEL).unwrap();
        assert!(!channel.is_ordered());
        assert_eq!(channel.levels(), ["NONE", "COR", "CLRAE", "OTHER"]);

        let country = typed.factor(schema::COUNTRY).unwrap();
        assert_eq!(country.levels(), countries().as_slice());

        // Order survives subsetting.
        let subset = typed.take_rows(&[3, 1]);
        assert_eq!(subset.factor(schema::EDUCATION).unwrap().levels(), ["1", "2", "3"]);
    }

    #[test]
    fn likert_items_stay_numeric() {
        let raw = SyntheticSurveyBuilder::new(2).build_table();
        let typed = normalize_types(raw, &countries()).unwrap();
        assert!(typed.numeric("mlg_1").is_ok());
        assert!(typed.numeric(schema::AGE).is_ok());
    }

    #[test]
    fn non_integer_codes_are_rejected() {
        let raw = SyntheticSurveyBuilder::new(2).build_table();
        let mut education = raw.numeric(schema::EDUCATION).unwrap().to_vec();
        education[0] = Some(2.5);
        let raw = raw
            .with_column(schema::EDUCATION, Column::Numeric(education))
            .unwrap();
        assert!(matches!(
            normalize_types(raw, &countries()),
            Err(TypeError::NonIntegerCode { .. })
        ));
    }

    #[test]
    fn out_of_range_levels_are_rejected() {
        let raw = SyntheticSurveyBuilder::new(2).build_table();
        let mut lr = raw.numeric(schema::LEFT_RIGHT).unwrap().to_vec();
        lr[0] = Some(10.0);
        let raw = raw.with_column(schema::LEFT_RIGHT, Column::Numeric(lr)).unwrap();
        match normalize_types(raw, &countries()) {
            Err(TypeError::UnknownLevel { column, value }) => {
                assert_eq!(column, schema::LEFT_RIGHT);
                assert_eq!(value, "10");
            }
            other => panic!("Expected UnknownLevel, got {:?}", other),
        }
    }

    #[test]
    fn typing_runs_cleanly_after_imputation() {
        let raw = SyntheticSurveyBuilder::new(6).with_missing_rate(0.1).build_table();
        let (imputed, _) = impute_knn(&raw, 5, 1234).unwrap();
        let typed = normalize_types(imputed, &countries()).unwrap();
        let left_right = typed.factor(schema::LEFT_RIGHT).unwrap();
        assert!(left_right.codes().iter().all(Option::is_some));
    }
}
