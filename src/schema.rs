//! Table schemas and the reconciliation of a live schema against a dataset.

use tracing::{debug, warn};

use crate::client::SchemaFetch;
use crate::dataset::Dataset;

/// Mode of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Required => "REQUIRED",
            FieldMode::Repeated => "REPEATED",
        }
    }
}

/// A single field descriptor of a table schema.
///
/// `data_type` is the warehouse type name as reported by the service
/// (e.g. `STRING`, `ARRAY<INT64>`); it is passed through verbatim when a
/// table has to be created from an explicit schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: String,
    pub mode: FieldMode,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            mode,
        }
    }
}

/// An ordered sequence of field descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    /// Names of all `REPEATED` fields, in schema order.
    pub fn repeated_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.mode == FieldMode::Repeated)
            .map(|field| field.name.clone())
            .collect()
    }

    /// Returns a copy retaining only the named fields, in schema order.
    pub fn pruned_to(&self, keep: &[String]) -> TableSchema {
        let fields = self
            .fields
            .iter()
            .filter(|field| keep.iter().any(|name| *name == field.name))
            .cloned()
            .collect();

        TableSchema { fields }
    }
}

/// The schema a load job declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSchema {
    /// No authoritative schema; the warehouse infers one from the data.
    Autodetect,
    /// An explicit schema; auto-detection is disabled.
    Explicit(TableSchema),
}

impl LoadSchema {
    pub fn is_autodetect(&self) -> bool {
        matches!(self, LoadSchema::Autodetect)
    }
}

/// Decides the schema a load should declare, given the live schema of the
/// destination table (or the reason it could not be fetched).
///
/// A found schema is pruned to the fields present in the dataset: table
/// fields the dataset does not carry are dropped from the declared schema and
/// stay untouched in the destination. Both `NotFound` and `Unavailable`
/// degrade to auto-detect; a missing table is the expected first-run case,
/// while an unavailable schema is logged since it may hide a connectivity
/// problem rather than a missing table.
pub fn resolve_load_schema(fetch: SchemaFetch, dataset: &Dataset) -> LoadSchema {
    match fetch {
        SchemaFetch::Found(schema) => {
            let pruned = schema.pruned_to(&dataset.column_names());
            debug!(
                fields = pruned.fields.len(),
                "using live table schema pruned to the dataset's columns"
            );
            LoadSchema::Explicit(pruned)
        }
        SchemaFetch::NotFound => {
            debug!("no live table schema; falling back to schema auto-detection");
            LoadSchema::Autodetect
        }
        SchemaFetch::Unavailable(reason) => {
            warn!(
                %reason,
                "table schema could not be fetched; falling back to schema auto-detection"
            );
            LoadSchema::Autodetect
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnValues};

    fn dataset_with(names: &[&str]) -> Dataset {
        Dataset::new(
            names
                .iter()
                .map(|name| Column::new(*name, ColumnValues::Int64(vec![Some(1)])))
                .collect(),
        )
        .unwrap()
    }

    fn live_schema() -> TableSchema {
        TableSchema::new(vec![
            Field::new("a", "STRING", FieldMode::Nullable),
            Field::new("b", "INT64", FieldMode::Required),
            Field::new("c", "ARRAY<STRING>", FieldMode::Repeated),
        ])
    }

    #[test]
    fn found_schema_is_pruned_to_dataset_columns() {
        let dataset = dataset_with(&["a", "c"]);
        let resolved = resolve_load_schema(SchemaFetch::Found(live_schema()), &dataset);

        let LoadSchema::Explicit(schema) = resolved else {
            panic!("expected an explicit schema");
        };
        assert_eq!(schema.field_names(), vec!["a", "c"]);
        assert_eq!(schema.repeated_field_names(), vec!["c"]);
    }

    #[test]
    fn missing_table_resolves_to_autodetect() {
        let dataset = dataset_with(&["a"]);
        let resolved = resolve_load_schema(SchemaFetch::NotFound, &dataset);
        assert!(resolved.is_autodetect());
    }

    #[test]
    fn unavailable_schema_resolves_to_autodetect() {
        let dataset = dataset_with(&["a"]);
        let resolved = resolve_load_schema(
            SchemaFetch::Unavailable("connection reset".to_string()),
            &dataset,
        );
        assert!(resolved.is_autodetect());
    }

    #[test]
    fn pruning_keeps_schema_order() {
        let dataset = dataset_with(&["c", "a"]);
        let resolved = resolve_load_schema(SchemaFetch::Found(live_schema()), &dataset);

        let LoadSchema::Explicit(schema) = resolved else {
            panic!("expected an explicit schema");
        };
        // Schema order wins over dataset order.
        assert_eq!(schema.field_names(), vec!["a", "c"]);
    }
}
