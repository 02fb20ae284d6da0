//! # Mode Table Loading and Validation
//!
//! Entry point for user-provided survey data. A mode table holds one row per
//! decision-maker: an optional case identifier, the chosen mode (training data
//! only), case-specific attributes such as income or age, and per-alternative
//! attributes such as travel time by car or by bus.
//!
//! Files are read with `polars` and validated before anything reaches the
//! estimation core. Per-alternative columns are allowed to be absent: the
//! long-form builder treats a missing attribute as zero for that alternative,
//! so those columns are loaded only when present.

use ndarray::Array1;
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Describes which columns to pull out of a mode table file.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    /// Column holding the case identifier. Row positions are used when absent.
    pub case_id_column: Option<String>,
    /// Column holding the chosen mode label. Required for training data only.
    pub mode_column: Option<String>,
    /// Numeric columns that must exist.
    pub required_columns: Vec<String>,
    /// Numeric columns that are read when present and skipped otherwise.
    pub optional_columns: Vec<String>,
}

/// A validated wide table, one entry per decision-maker.
#[derive(Debug, Clone)]
pub struct ModeTable {
    pub case_ids: Vec<i64>,
    /// Chosen mode labels, present for training data.
    pub modes: Option<Vec<String>>,
    pub columns: BTreeMap<String, Array1<f64>>,
}

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
    #[error("Missing or null values were found in the required column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Column '{column}' has {found} values but the table has {expected} rows.")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("Case identifier {0} appears more than once.")]
    DuplicateCaseId(i64),
    #[error("The mode table contains no rows.")]
    EmptyTable,
}

impl ModeTable {
    /// Builds a table from in-memory columns, applying the same checks as the file loader.
    pub fn from_columns(
        case_ids: Vec<i64>,
        modes: Option<Vec<String>>,
        columns: BTreeMap<String, Array1<f64>>,
    ) -> Result<Self, DataError> {
        let n = case_ids.len();
        if n == 0 {
            return Err(DataError::EmptyTable);
        }

        let mut seen = HashSet::with_capacity(n);
        for &id in &case_ids {
            if !seen.insert(id) {
                return Err(DataError::DuplicateCaseId(id));
            }
        }

        if let Some(labels) = &modes {
            if labels.len() != n {
                return Err(DataError::LengthMismatch {
                    column: "mode".to_string(),
                    expected: n,
                    found: labels.len(),
                });
            }
        }

        for (name, values) in &columns {
            if values.len() != n {
                return Err(DataError::LengthMismatch {
                    column: name.clone(),
                    expected: n,
                    found: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.clone()));
            }
        }

        Ok(Self {
            case_ids,
            modes,
            columns,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.case_ids.len()
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.columns.get(name)
    }
}

/// Loads a mode table from a CSV file (or TSV when the extension is `.tsv`).
pub fn load_mode_table(path: &str, schema: &TableSchema) -> Result<ModeTable, DataError> {
    let file_path = Path::new(path);
    let separator = if file_path.extension().is_some_and(|ext| ext == "tsv") {
        b'\t'
    } else {
        b','
    };

    log::info!("Loading mode table from '{path}'");
    let df = CsvReader::new(File::open(file_path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    if df.height() == 0 {
        return Err(DataError::EmptyTable);
    }
    log::info!(
        "Read {} rows and {} columns.",
        df.height(),
        df.width()
    );

    internal::table_from_frame(&df, schema)
}

mod internal {
    use super::*;

    pub(super) fn has_column(df: &DataFrame, name: &str) -> bool {
        df.get_column_names().iter().any(|c| c.as_str() == name)
    }

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Array1<f64>, DataError> {
        if !has_column(df, column_name) {
            return Err(DataError::ColumnNotFound(column_name.to_string()));
        }
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let wrong_type = || DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        };
        let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
        if casted.null_count() > 0 {
            return Err(wrong_type());
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(Array1::from(values))
    }

    fn extract_case_ids(df: &DataFrame, column_name: &str) -> Result<Vec<i64>, DataError> {
        if !has_column(df, column_name) {
            return Err(DataError::ColumnNotFound(column_name.to_string()));
        }
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }
        let wrong_type = || DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "i64 (integer)",
            found_type: format!("{:?}", series.dtype()),
        };

        // The integer cast truncates floats, so fractional ids are caught first.
        if series.dtype().is_float() {
            let as_float = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
            let chunked = as_float.f64()?.rechunk();
            if chunked
                .into_no_null_iter()
                .any(|v| !v.is_finite() || v.fract() != 0.0)
            {
                return Err(wrong_type());
            }
        }

        // Values that do not parse as integers become nulls.
        let casted = series.cast(&DataType::Int64).map_err(|_| wrong_type())?;
        if casted.null_count() > 0 {
            return Err(wrong_type());
        }
        let chunked = casted.i64()?.rechunk();
        Ok(chunked.into_no_null_iter().collect())
    }

    fn extract_labels(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
        if !has_column(df, column_name) {
            return Err(DataError::ColumnNotFound(column_name.to_string()));
        }
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }
        let as_text = series.cast(&DataType::String)?;
        let labels = as_text
            .str()?
            .into_iter()
            .map(|value| value.unwrap_or_default().trim().to_string())
            .collect();
        Ok(labels)
    }

    pub(super) fn table_from_frame(
        df: &DataFrame,
        schema: &TableSchema,
    ) -> Result<ModeTable, DataError> {
        let n = df.height();

        let case_ids = match &schema.case_id_column {
            Some(name) => extract_case_ids(df, name)?,
            None => (0..n as i64).collect(),
        };

        let modes = match &schema.mode_column {
            Some(name) => Some(extract_labels(df, name)?),
            None => None,
        };

        let mut columns = BTreeMap::new();
        for name in &schema.required_columns {
            columns.insert(name.clone(), extract_numeric_column(df, name)?);
        }

        let mut skipped = Vec::new();
        for name in &schema.optional_columns {
            if columns.contains_key(name) {
                continue;
            }
            if has_column(df, name) {
                columns.insert(name.clone(), extract_numeric_column(df, name)?);
            } else {
                skipped.push(name.as_str());
            }
        }
        if !skipped.is_empty() {
            log::info!(
                "Alternative attributes absent from the table (treated as 0): {}",
                skipped.join(", ")
            );
        }

        ModeTable::from_columns(case_ids, modes, columns)
    }
}
