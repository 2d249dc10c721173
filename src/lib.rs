//! Batch loading of columnar datasets into Google BigQuery.
//!
//! Two workflows are provided. [`AppendLoader`] submits a single load job
//! appending the dataset to its destination table. [`MergeLoader`] stages the
//! dataset into a temporary table, upserts it into the destination with a
//! key-based merge wrapped in an explicit transaction, and drops the staging
//! table afterwards.
//!
//! Before every load the destination's live schema is reconciled against the
//! dataset: a found schema is pruned to the dataset's columns and declared
//! explicitly, while a missing or unavailable schema falls back to
//! auto-detection.
//!
//! ```no_run
//! use bq_loader::{
//!     BigQueryClient, Column, ColumnValues, Dataset, LoadSpec, MergeLoader, TableRef,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client =
//!         BigQueryClient::new_with_key_path("my-project".to_string(), "sa-key.json").await?;
//!
//!     let dataset = Dataset::new(vec![
//!         Column::new("id", ColumnValues::String(vec![Some("a".to_string())])),
//!         Column::new("amount", ColumnValues::Float64(vec![Some(10.0)])),
//!     ])?;
//!
//!     let spec = LoadSpec::new(TableRef::new("my-project", "analytics", "sales")?, "nightly")
//!         .with_key_columns(["id"]);
//!     let report = MergeLoader::new(client, spec).execute(&dataset).await?;
//!     println!("merged under job {}", report.merge_job_id);
//!
//!     Ok(())
//! }
//! ```

mod bigquery;
mod client;
mod config;
mod dataset;
mod error;
mod loader;
mod schema;
mod statement;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bigquery::{BigQueryClient, BigQueryJob};
pub use client::{
    CreateDisposition, JobOutcome, LoadRequest, RemoteJobError, SchemaFetch, TableRef,
    WarehouseClient, WarehouseJob, WriteDisposition,
};
pub use config::{LoadSpec, STAGING_TABLE_SUFFIX};
pub use dataset::{Column, ColumnType, ColumnValues, Dataset};
pub use error::{LoaderError, LoaderResult};
pub use loader::{AppendLoader, MergeLoader, MergeReport};
pub use schema::{Field, FieldMode, LoadSchema, TableSchema, resolve_load_schema};
pub use statement::{MergeStatement, drop_table_statement};
