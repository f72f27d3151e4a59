//! # Data Loading and the In-Memory Survey Table
//!
//! This module is the exclusive entry point for the survey file. It reads the
//! CSV with `polars`, validates it against the fixed schema in
//! [`crate::schema`], keeps only respondents from the allowed countries and
//! hands back a [`SurveyTable`]: a small column store whose cells may be
//! missing, which every later stage consumes and returns by value.
//!
//! - Strict Schema: every schema column must be present. Extra columns are
//!   ignored. `NA` and empty cells are read as missing.
//! - Fatal Input Errors: a missing file, a missing column or a non-numeric
//!   value in a numeric column aborts the run through [`DataError`].

use crate::schema::{self, COLUMNS, RawKind};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for loading and table access failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing values were found in the column '{0}' where complete data is required.")]
    MissingValuesFound(String),
    #[error("Column '{column}' has {found} rows, but the table has {expected}.")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("No rows remain after filtering to the allowed countries.")]
    NoRowsRetained,
}

/// A categorical column: integer codes into an ordered list of level labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<Option<usize>>,
    ordered: bool,
}

impl Factor {
    /// Builds a factor from labels and an explicit level sequence. Returns the
    /// first label that is not a level as the error value.
    pub fn from_labels<S: AsRef<str>>(
        labels: &[Option<S>],
        levels: Vec<String>,
        ordered: bool,
    ) -> Result<Self, String> {
        let codes = labels
            .iter()
            .map(|label| match label {
                None => Ok(None),
                Some(label) => {
                    let label = label.as_ref();
                    levels
                        .iter()
                        .position(|level| level == label)
                        .map(Some)
                        .ok_or_else(|| label.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            levels,
            codes,
            ordered,
        })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[Option<usize>] {
        &self.codes
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn label(&self, row: usize) -> Option<&str> {
        self.codes[row].map(|code| self.levels[code].as_str())
    }

    pub fn labels(&self) -> Vec<Option<String>> {
        (0..self.len())
            .map(|row| self.label(row).map(str::to_string))
            .collect()
    }

    /// Moves `reference` to the front of the level list, keeping the relative
    /// order of the other levels. Codes are remapped so labels are unchanged.
    pub fn relevel(&self, reference: &str) -> Option<Self> {
        let position = self.levels.iter().position(|l| l == reference)?;
        let mut levels = Vec::with_capacity(self.levels.len());
        levels.push(self.levels[position].clone());
        levels.extend(
            self.levels
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != position)
                .map(|(_, l)| l.clone()),
        );
        let remap = |code: usize| -> usize {
            if code == position {
                0
            } else if code < position {
                code + 1
            } else {
                code
            }
        };
        Some(Self {
            levels,
            codes: self.codes.iter().map(|c| c.map(remap)).collect(),
            ordered: self.ordered,
        })
    }

    fn take(&self, rows: &[usize]) -> Self {
        Self {
            levels: self.levels.clone(),
            codes: rows.iter().map(|&r| self.codes[r]).collect(),
            ordered: self.ordered,
        }
    }
}

/// A single table column. Every cell may be missing.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Factor(Factor),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(values) => values.len(),
            Column::Text(values) => values.len(),
            Column::Factor(factor) => factor.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(values) => values[row].is_none(),
            Column::Text(values) => values[row].is_none(),
            Column::Factor(factor) => factor.codes[row].is_none(),
        }
    }

    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_missing(row)).count()
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Text(_) => "text",
            Column::Factor(f) if f.is_ordered() => "ordered factor",
            Column::Factor(_) => "factor",
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            Column::Numeric(values) => Column::Numeric(rows.iter().map(|&r| values[r]).collect()),
            Column::Text(values) => {
                Column::Text(rows.iter().map(|&r| values[r].clone()).collect())
            }
            Column::Factor(factor) => Column::Factor(factor.take(rows)),
        }
    }
}

/// An in-memory table of named columns of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyTable {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl SurveyTable {
    pub fn from_columns(columns: Vec<(String, Column)>) -> Result<Self, DataError> {
        let n_rows = columns.first().map_or(0, |(_, c)| c.len());
        let mut table = Self {
            names: Vec::with_capacity(columns.len()),
            columns: Vec::with_capacity(columns.len()),
            n_rows,
        };
        for (name, column) in columns {
            table = table.with_column(&name, column)?;
        }
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, DataError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> Result<&[Option<f64>], DataError> {
        match self.column(name)? {
            Column::Numeric(values) => Ok(values),
            other => Err(wrong_type(name, "numeric", other.kind_name())),
        }
    }

    pub fn factor(&self, name: &str) -> Result<&Factor, DataError> {
        match self.column(name)? {
            Column::Factor(factor) => Ok(factor),
            other => Err(wrong_type(name, "factor", other.kind_name())),
        }
    }

    /// String labels of a text or factor column.
    pub fn labels(&self, name: &str) -> Result<Vec<Option<String>>, DataError> {
        match self.column(name)? {
            Column::Text(values) => Ok(values.clone()),
            Column::Factor(factor) => Ok(factor.labels()),
            other => Err(wrong_type(name, "text or factor", other.kind_name())),
        }
    }

    /// Like [`SurveyTable::labels`] but fails on any missing cell.
    pub fn complete_labels(&self, name: &str) -> Result<Vec<String>, DataError> {
        self.labels(name)?
            .into_iter()
            .map(|label| label.ok_or_else(|| DataError::MissingValuesFound(name.to_string())))
            .collect()
    }

    /// Numeric values of a column, failing on any missing cell.
    pub fn complete_numeric(&self, name: &str) -> Result<Vec<f64>, DataError> {
        self.numeric(name)?
            .iter()
            .map(|v| v.ok_or_else(|| DataError::MissingValuesFound(name.to_string())))
            .collect()
    }

    /// Adds a column, or replaces the column of the same name.
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, DataError> {
        if self.names.is_empty() {
            self.n_rows = column.len();
        }
        if column.len() != self.n_rows {
            return Err(DataError::LengthMismatch {
                column: name.to_string(),
                expected: self.n_rows,
                found: column.len(),
            });
        }
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name.to_string());
                self.columns.push(column);
            }
        }
        Ok(self)
    }

    /// A new table holding `rows` in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// A new table holding the rows where `keep` is true.
    pub fn filter_rows(&self, keep: &[bool]) -> Self {
        let rows: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&rows)
    }

    /// A new table without the given row indices.
    pub fn without_rows(&self, rows: &[usize]) -> Self {
        let drop: HashSet<usize> = rows.iter().copied().collect();
        let keep: Vec<bool> = (0..self.n_rows).map(|i| !drop.contains(&i)).collect();
        self.filter_rows(&keep)
    }

    /// Row index of the respondent with `id`, if present.
    pub fn row_of_id(&self, id: &str) -> Result<Option<usize>, DataError> {
        let ids = self.labels(schema::ID)?;
        Ok(ids.iter().position(|v| v.as_deref() == Some(id)))
    }
}

/// Respondent id of `row`, or its 1-based position when the id is missing.
pub fn respondent_label(ids: &[Option<String>], row: usize) -> String {
    ids[row]
        .clone()
        .unwrap_or_else(|| format!("row {}", row + 1))
}

fn wrong_type(column: &str, expected: &'static str, found: &str) -> DataError {
    DataError::ColumnWrongType {
        column_name: column.to_string(),
        expected_type: expected,
        found_type: found.to_string(),
    }
}

/// Reads the survey file, checks the schema and keeps only rows whose country
/// is in `countries`.
pub fn load_survey(path: &Path, countries: &[String]) -> Result<SurveyTable, DataError> {
    log::info!("Loading survey data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_null_values(Some(NullValues::AllColumnsSingle("NA".into()))),
                ),
        )
        .finish()?;

    let present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(missing) = COLUMNS.iter().find(|c| !present.contains(c.name)) {
        return Err(DataError::ColumnNotFound(missing.name.to_string()));
    }
    log::info!(
        "Read {} rows; all {} schema columns present.",
        df.height(),
        COLUMNS.len()
    );

    let mut columns = Vec::with_capacity(COLUMNS.len());
    for spec in COLUMNS.iter() {
        let column = match spec.raw {
            RawKind::Numeric => Column::Numeric(extract_numeric_column(&df, spec.name)?),
            RawKind::Text => Column::Text(extract_text_column(&df, spec.name)?),
        };
        columns.push((spec.name.to_string(), column));
    }
    let table = SurveyTable::from_columns(columns)?;

    let allowed: HashSet<&str> = countries.iter().map(String::as_str).collect();
    let keep: Vec<bool> = table
        .labels(schema::COUNTRY)?
        .iter()
        .map(|c| c.as_deref().is_some_and(|c| allowed.contains(c)))
        .collect();
    let filtered = table.filter_rows(&keep);
    log::info!(
        "Kept {} of {} rows from {} allowed countries.",
        filtered.n_rows(),
        table.n_rows(),
        countries.len()
    );
    if filtered.n_rows() == 0 {
        return Err(DataError::NoRowsRetained);
    }
    Ok(filtered)
}

fn extract_numeric_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<f64>>, DataError> {
    let series = df.column(column_name)?.as_materialized_series();
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| wrong_type(column_name, "f64 (numeric)", &format!("{:?}", series.dtype())))?;

    // A non-strict cast turns unparseable text into nulls.
    if casted.null_count() > series.null_count() {
        return Err(wrong_type(
            column_name,
            "f64 (numeric)",
            &format!("{:?}", series.dtype()),
        ));
    }

    let values: Vec<Option<f64>> = casted.f64()?.into_iter().collect();
    if values.iter().flatten().any(|v| !v.is_finite()) {
        return Err(wrong_type(column_name, "finite f64", "non-finite value"));
    }
    Ok(values)
}

fn extract_text_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<String>>, DataError> {
    let series = df.column(column_name)?.as_materialized_series();
    let casted = series.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect())
}
