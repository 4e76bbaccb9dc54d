//! # Data Loading and Validation Module
//!
//! This module is the only entry point for user-provided data. It reads the
//! expression table (CSV), validates it against a fixed schema, and turns it
//! into the `ndarray` structures the statistical stages work on.
//!
//! - Fixed schema: a `Patient_id` column, a `Diagnosis` column, and one column
//!   per gene. Every column that is not one of the first two is a gene.
//! - User-centric errors: failures are assumed to be input errors, and
//!   `DataError` says exactly which column or row is at fault.
//! - Nothing is silently dropped. An unknown diagnosis label aborts the load.

use crate::types::{Diagnosis, GeneSet, Group, GroupSet};
use log::{debug, info};
use ndarray::{Array2, Axis, ShapeBuilder};
use polars::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Name of the subject identifier column.
pub const SUBJECT_ID_COLUMN: &str = "Patient_id";
/// Name of the diagnosis label column.
pub const DIAGNOSIS_COLUMN: &str = "Diagnosis";

/// A comprehensive error type for all data loading and validation failures.
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
    #[error("The input file has no gene columns besides 'Patient_id' and 'Diagnosis'.")]
    NoGeneColumns,
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. Expression values must be finite."
    )]
    NonFiniteValuesFound(String),
    #[error(
        "Negative value {value} found in column '{column_name}' at row {row}. Expression values must be non-negative."
    )]
    NegativeValuesFound {
        column_name: String,
        row: usize,
        value: f64,
    },
    #[error(
        "Unrecognized diagnosis '{label}' at row {row}. Expected one of: normal, early neoplasia, cancer."
    )]
    UnrecognizedDiagnosis { row: usize, label: String },
    #[error("Input file contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
    #[error("No subjects carry the diagnosis '{0}'.")]
    EmptyGroup(Diagnosis),
    #[error("Expression matrix has inconsistent dimensions: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// The validated sample table: one row per subject, one column per gene.
#[derive(Debug, Clone)]
pub struct ExpressionTable {
    pub subject_ids: Vec<String>,
    pub diagnoses: Vec<Diagnosis>,
    pub genes: GeneSet,
    /// Shape: [n_subjects, n_genes].
    pub values: Array2<f64>,
}

impl ExpressionTable {
    pub fn n_subjects(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.values.ncols()
    }

    /// Number of subjects per diagnosis label.
    pub fn diagnosis_counts(&self) -> BTreeMap<Diagnosis, usize> {
        let mut counts = BTreeMap::new();
        for &diagnosis in &self.diagnoses {
            *counts.entry(diagnosis).or_insert(0) += 1;
        }
        counts
    }

    /// Rows sharing `diagnosis`, with the identifier and diagnosis columns dropped.
    pub fn group(&self, diagnosis: Diagnosis) -> Group {
        let rows: Vec<usize> = self
            .diagnoses
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == diagnosis)
            .map(|(i, _)| i)
            .collect();
        Group::new(diagnosis, self.values.select(Axis(0), &rows))
    }

    /// Splits the table into the three disjoint diagnosis groups.
    pub fn partition(&self) -> Result<GroupSet, DataError> {
        let build = |diagnosis: Diagnosis| -> Result<Group, DataError> {
            let group = self.group(diagnosis);
            if group.n_subjects() == 0 {
                return Err(DataError::EmptyGroup(diagnosis));
            }
            info!(
                "{diagnosis} count: {}\tRow size: {}",
                group.n_subjects(),
                group.n_genes()
            );
            Ok(group)
        };

        Ok(GroupSet {
            normal: build(Diagnosis::Normal)?,
            early_neoplasia: build(Diagnosis::EarlyNeoplasia)?,
            cancer: build(Diagnosis::Cancer)?,
        })
    }
}

/// Loads and validates an expression table from a comma-separated file.
pub fn load_expression_table(path: &Path) -> Result<ExpressionTable, DataError> {
    info!("Loading expression data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None),
        )
        .finish()?;

    debug!("Parsed {} rows x {} columns", df.height(), df.width());
    internal::validate_frame(&df)
}

mod internal {
    use super::*;

    const MINIMUM_ROWS: usize = 1;

    pub(super) fn validate_frame(df: &DataFrame) -> Result<ExpressionTable, DataError> {
        if df.height() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: df.height(),
                required: MINIMUM_ROWS,
            });
        }

        let column_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let columns_set: HashSet<&str> = column_names.iter().map(String::as_str).collect();
        for required in [SUBJECT_ID_COLUMN, DIAGNOSIS_COLUMN] {
            if !columns_set.contains(required) {
                return Err(DataError::ColumnNotFound(required.to_string()));
            }
        }

        let gene_names: Vec<String> = column_names
            .into_iter()
            .filter(|name| name != SUBJECT_ID_COLUMN && name != DIAGNOSIS_COLUMN)
            .collect();
        if gene_names.is_empty() {
            return Err(DataError::NoGeneColumns);
        }

        let diagnoses = extract_diagnoses(df)?;
        let subject_ids = extract_subject_ids(df)?;

        let n_rows = df.height();
        let mut buffer = Vec::with_capacity(n_rows * gene_names.len());
        for gene in &gene_names {
            let mut column = extract_expression_column(df, gene)?;
            buffer.append(&mut column);
        }
        let values = Array2::from_shape_vec((n_rows, gene_names.len()).f(), buffer)?;

        info!(
            "Data validation successful: {} subjects, {} genes",
            n_rows,
            gene_names.len()
        );

        Ok(ExpressionTable {
            subject_ids,
            diagnoses,
            genes: GeneSet::new(gene_names),
            values,
        })
    }

    fn extract_diagnoses(df: &DataFrame) -> Result<Vec<Diagnosis>, DataError> {
        let column = df.column(DIAGNOSIS_COLUMN)?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(DIAGNOSIS_COLUMN.to_string()));
        }
        let casted = column.cast(&DataType::String)?;
        let labels = casted.str()?;

        let mut diagnoses = Vec::with_capacity(df.height());
        for (i, label) in labels.into_iter().enumerate() {
            let label = label.unwrap_or_default();
            let diagnosis = label
                .parse::<Diagnosis>()
                .map_err(|_| DataError::UnrecognizedDiagnosis {
                    row: i + 1,
                    label: label.to_string(),
                })?;
            diagnoses.push(diagnosis);
        }
        Ok(diagnoses)
    }

    /// Missing identifiers fall back to the 1-based row number.
    fn extract_subject_ids(df: &DataFrame) -> Result<Vec<String>, DataError> {
        let casted = df.column(SUBJECT_ID_COLUMN)?.cast(&DataType::String)?;
        let ids = casted.str()?;
        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| match id {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => (i + 1).to_string(),
            })
            .collect())
    }

    fn extract_expression_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        // A failed non-strict cast shows up as fresh nulls.
        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();

        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        if let Some((i, &value)) = values.iter().enumerate().find(|(_, v)| **v < 0.0) {
            return Err(DataError::NegativeValuesFound {
                column_name: column_name.to_string(),
                row: i + 1,
                value,
            });
        }
        Ok(values)
    }
}
