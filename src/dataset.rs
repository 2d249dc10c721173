//! In-memory tabular dataset handed to the loaders.
//!
//! A [`Dataset`] is an ordered sequence of named, typed columns of equal
//! length. The loaders never mutate it; they only derive column subsets for
//! the staging load.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{LoaderError, LoaderResult};

/// Logical type of a column's values.
///
/// Repeated columns report the element type; see [`ColumnValues::is_repeated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    String,
    Date,
    Timestamp,
}

impl ColumnType {
    /// Whether values of this type are scalar numerics. Drives the default
    /// key/update classification: numeric columns default to the update set,
    /// everything else to the key set.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int64 | ColumnType::Float64)
    }
}

/// The values of one column. Missing values are `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Bool(Vec<Option<bool>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
    Int64Array(Vec<Option<Vec<i64>>>),
    StringArray(Vec<Option<Vec<String>>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
            ColumnValues::String(v) => v.len(),
            ColumnValues::Date(v) => v.len(),
            ColumnValues::Timestamp(v) => v.len(),
            ColumnValues::Int64Array(v) => v.len(),
            ColumnValues::StringArray(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The logical type of the column; for repeated columns, the element type.
    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValues::Bool(_) => ColumnType::Bool,
            ColumnValues::Int64(_) | ColumnValues::Int64Array(_) => ColumnType::Int64,
            ColumnValues::Float64(_) => ColumnType::Float64,
            ColumnValues::String(_) | ColumnValues::StringArray(_) => ColumnType::String,
            ColumnValues::Date(_) => ColumnType::Date,
            ColumnValues::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// Whether the column holds repeated (array) values.
    pub fn is_repeated(&self) -> bool {
        matches!(
            self,
            ColumnValues::Int64Array(_) | ColumnValues::StringArray(_)
        )
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// An ordered collection of equally sized, uniquely named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    /// Creates a dataset, validating that column names are unique and all
    /// columns have the same number of rows.
    pub fn new(columns: Vec<Column>) -> LoaderResult<Self> {
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(LoaderError::Configuration(format!(
                    "duplicate column name {:?} in dataset",
                    column.name
                )));
            }
        }

        if let Some(first) = columns.first() {
            let expected = first.values.len();
            for column in &columns {
                if column.values.len() != expected {
                    return Err(LoaderError::Configuration(format!(
                        "column {:?} has {} row(s), expected {}",
                        column.name,
                        column.values.len(),
                        expected
                    )));
                }
            }
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.name.clone())
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.columns
            .first()
            .map(|column| column.values.len())
            .unwrap_or(0)
    }

    /// Returns a new dataset containing only the named columns, in the given
    /// order. Names with no matching column are skipped.
    pub fn select(&self, names: &[String]) -> Dataset {
        let columns = names
            .iter()
            .filter_map(|name| self.column(name).cloned())
            .collect();

        Dataset { columns }
    }
}
