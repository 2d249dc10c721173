//! The append and merge load workflows.
//!
//! The merge workflow stages the dataset into a temporary table, merges it
//! into the destination with a key-based upsert, and drops the staging table.
//! Stages run strictly in sequence: the merge only starts once the staging
//! load committed, and the cleanup only after the merge committed.

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::client::{
    CreateDisposition, JobOutcome, LoadRequest, SchemaFetch, TableRef, WarehouseClient,
    WarehouseJob, WriteDisposition,
};
use crate::config::LoadSpec;
use crate::dataset::Dataset;
use crate::error::{LoaderError, LoaderResult};
use crate::schema::{LoadSchema, resolve_load_schema};
use crate::statement::{MergeStatement, drop_table_statement};

/// Stage suffix of the staging load job id.
const STAGING_LOAD_STAGE: &str = "temptable";
/// Stage suffix of the merge job id.
const MERGE_STAGE: &str = "merge_data";
/// Stage suffix of the staging-table drop job id.
const CLEANUP_STAGE: &str = "delete_temp_data";

/// Job ids of the three completed merge-workflow stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub load_job_id: String,
    pub merge_job_id: String,
    pub cleanup_job_id: String,
}

/// Loads a dataset into a staging table and upserts it into the destination.
pub struct MergeLoader<C> {
    client: C,
    spec: LoadSpec,
}

impl<C: WarehouseClient> MergeLoader<C> {
    pub fn new(client: C, spec: LoadSpec) -> Self {
        Self { client, spec }
    }

    pub fn spec(&self) -> &LoadSpec {
        &self.spec
    }

    /// Runs the three-stage workflow: staging load, merge, staging cleanup.
    ///
    /// A load failure stops the pipeline before any merge or cleanup
    /// statement is submitted. A merge failure leaves the staging table in
    /// place for inspection. A cleanup failure is reported, but the merge's
    /// effect is already permanent at that point.
    pub async fn execute(&self, dataset: &Dataset) -> LoaderResult<MergeReport> {
        let destination = &self.spec.destination;
        let staging = self.spec.staging_table();

        // The effective columns come from the destination table, not the
        // staging table: fields the destination carries but the dataset does
        // not are dropped from the declared schema.
        let fetch = self.client.fetch_table_schema(destination).await;
        let load_schema = resolve_load_schema(fetch, dataset);
        let load_columns = load_columns_for(&load_schema, dataset);
        let projected = dataset.select(&load_columns);

        let mut load_job = self
            .client
            .submit_load(LoadRequest {
                dataset: &projected,
                destination: &staging,
                schema: &load_schema,
                create_disposition: CreateDisposition::CreateIfNeeded,
                write_disposition: WriteDisposition::Truncate,
                job_id: job_id(&self.spec.job_id_prefix, Some(STAGING_LOAD_STAGE)),
            })
            .await?;
        info!(job_id = %load_job.id(), table = %staging, "staging load job submitted");

        match self.await_job(&mut load_job).await? {
            JobOutcome::Success => {}
            JobOutcome::Failed(errors) => {
                return Err(LoaderError::Load {
                    job_id: load_job.id().to_string(),
                    errors,
                });
            }
        }
        let load_job_id = load_job.id().to_string();
        info!(job_id = %load_job_id, "staging load completed");

        // Repeated modes are only known once the data has landed, so the
        // realized staging schema is fetched after the load.
        let repeated_fields = match self.client.fetch_table_schema(&staging).await {
            SchemaFetch::Found(schema) => schema.repeated_field_names(),
            SchemaFetch::NotFound => {
                warn!(table = %staging, "staging table schema missing after load; assuming no repeated fields");
                Vec::new()
            }
            SchemaFetch::Unavailable(reason) => {
                warn!(table = %staging, %reason, "staging table schema unavailable; assuming no repeated fields");
                Vec::new()
            }
        };

        let (key_columns, update_columns) = classify_columns(&self.spec, dataset)?;
        let statement = MergeStatement {
            destination,
            staging: &staging,
            key_columns: &key_columns,
            update_columns: &update_columns,
            load_columns: &load_columns,
            repeated_fields: &repeated_fields,
        }
        .render()?;

        let mut merge_job = self
            .client
            .submit_query(&statement, &job_id(&self.spec.job_id_prefix, Some(MERGE_STAGE)))
            .await?;
        info!(job_id = %merge_job.id(), table = %destination, "merge job submitted");

        match self.await_job(&mut merge_job).await? {
            JobOutcome::Success => {}
            JobOutcome::Failed(errors) => {
                return Err(LoaderError::Merge {
                    job_id: merge_job.id().to_string(),
                    staging_table: staging.to_string(),
                    errors,
                });
            }
        }
        let merge_job_id = merge_job.id().to_string();
        info!(job_id = %merge_job_id, "merge completed");

        let mut cleanup_job = self
            .client
            .submit_query(
                &drop_table_statement(&staging),
                &job_id(&self.spec.job_id_prefix, Some(CLEANUP_STAGE)),
            )
            .await?;
        info!(job_id = %cleanup_job.id(), table = %staging, "staging cleanup job submitted");

        match self.await_job(&mut cleanup_job).await? {
            JobOutcome::Success => {}
            JobOutcome::Failed(errors) => {
                return Err(LoaderError::Cleanup {
                    job_id: cleanup_job.id().to_string(),
                    merge_job_id,
                    staging_table: staging.to_string(),
                    errors,
                });
            }
        }

        Ok(MergeReport {
            load_job_id,
            merge_job_id,
            cleanup_job_id: cleanup_job.id().to_string(),
        })
    }

    /// Waits for a job, bounded by the spec's stage timeout. On expiry a
    /// best-effort cancellation is requested before failing.
    async fn await_job(&self, job: &mut C::Job) -> LoaderResult<JobOutcome> {
        match self.spec.stage_timeout {
            Some(limit) => match timeout(limit, job.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(job_id = %job.id(), "stage timeout exceeded; requesting job cancellation");
                    if let Err(error) = job.cancel().await {
                        warn!(job_id = %job.id(), %error, "job cancellation request failed");
                    }
                    Err(LoaderError::Timeout {
                        job_id: job.id().to_string(),
                        timeout: limit,
                    })
                }
            },
            None => job.wait().await,
        }
    }
}

/// Loads a dataset directly into the destination table, appending to any
/// existing rows and creating the table if absent.
pub struct AppendLoader<C> {
    client: C,
    spec: LoadSpec,
}

impl<C: WarehouseClient> AppendLoader<C> {
    pub fn new(client: C, spec: LoadSpec) -> Self {
        Self { client, spec }
    }

    pub fn spec(&self) -> &LoadSpec {
        &self.spec
    }

    /// Submits the load and returns the job handle without waiting for
    /// completion; polling is left to the caller.
    pub async fn execute(&self, dataset: &Dataset) -> LoaderResult<C::Job> {
        let destination = &self.spec.destination;

        let fetch = self.client.fetch_table_schema(destination).await;
        let load_schema = resolve_load_schema(fetch, dataset);
        let load_columns = load_columns_for(&load_schema, dataset);
        let projected = dataset.select(&load_columns);

        let job = self
            .client
            .submit_load(LoadRequest {
                dataset: &projected,
                destination,
                schema: &load_schema,
                create_disposition: CreateDisposition::CreateIfNeeded,
                write_disposition: WriteDisposition::Append,
                job_id: job_id(&self.spec.job_id_prefix, None),
            })
            .await?;
        info!(job_id = %job.id(), table = %destination, "append load job submitted");

        Ok(job)
    }
}

/// Builds `<prefix>[_<stage>]_<UTC timestamp>` job ids. The timestamp gives
/// traceability and per-invocation uniqueness at the expected call cadence.
fn job_id(prefix: &str, stage: Option<&str>) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    match stage {
        Some(stage) => format!("{prefix}_{stage}_{timestamp}"),
        None => format!("{prefix}_{timestamp}"),
    }
}

/// The columns the staging load will carry, in declaration order.
fn load_columns_for(schema: &LoadSchema, dataset: &Dataset) -> Vec<String> {
    match schema {
        LoadSchema::Explicit(table_schema) => table_schema.field_names(),
        LoadSchema::Autodetect => dataset.column_names(),
    }
}

/// Resolves the key/update column split for the merge.
///
/// Caller-supplied sets win. Otherwise keys default to every column that is
/// not a scalar numeric (repeated columns included) and updates to the scalar
/// numeric columns. An empty key set is unusable: the match predicate would
/// degrade to match-everything semantics.
fn classify_columns(spec: &LoadSpec, dataset: &Dataset) -> LoaderResult<(Vec<String>, Vec<String>)> {
    let is_scalar_numeric = |column: &crate::dataset::Column| {
        column.values.column_type().is_numeric() && !column.values.is_repeated()
    };

    let key_columns: Vec<String> = if spec.key_columns.is_empty() {
        dataset
            .columns()
            .iter()
            .filter(|column| !is_scalar_numeric(column))
            .map(|column| column.name.clone())
            .collect()
    } else {
        spec.key_columns.clone()
    };

    if key_columns.is_empty() {
        return Err(LoaderError::Configuration(
            "no key columns were supplied and none could be inferred from the dataset".to_string(),
        ));
    }

    let update_columns: Vec<String> = if spec.update_columns.is_empty() {
        dataset
            .columns()
            .iter()
            .filter(|column| is_scalar_numeric(column))
            .map(|column| column.name.clone())
            .collect()
    } else {
        spec.update_columns.clone()
    };

    Ok((key_columns, update_columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnValues};

    fn spec() -> LoadSpec {
        LoadSpec::new(
            TableRef::new("my-project", "analytics", "sales").unwrap(),
            "nightly",
        )
    }

    fn sales_dataset() -> Dataset {
        Dataset::new(vec![
            Column::new("id", ColumnValues::String(vec![Some("a".to_string())])),
            Column::new("region", ColumnValues::String(vec![Some("eu".to_string())])),
            Column::new("amount", ColumnValues::Float64(vec![Some(10.0)])),
        ])
        .unwrap()
    }

    #[test]
    fn job_ids_carry_stage_and_timestamp() {
        let id = job_id("nightly", Some(STAGING_LOAD_STAGE));
        let suffix = id.strip_prefix("nightly_temptable_").unwrap();
        assert_eq!(suffix.len(), 14);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));

        let id = job_id("nightly", None);
        let suffix = id.strip_prefix("nightly_").unwrap();
        assert_eq!(suffix.len(), 14);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn classification_defaults_split_on_numeric_types() {
        let (keys, updates) = classify_columns(&spec(), &sales_dataset()).unwrap();
        assert_eq!(keys, vec!["id", "region"]);
        assert_eq!(updates, vec!["amount"]);
    }

    #[test]
    fn repeated_numeric_columns_default_into_the_key_set() {
        let dataset = Dataset::new(vec![
            Column::new("scores", ColumnValues::Int64Array(vec![Some(vec![1, 2])])),
            Column::new("total", ColumnValues::Int64(vec![Some(3)])),
        ])
        .unwrap();

        let (keys, updates) = classify_columns(&spec(), &dataset).unwrap();
        assert_eq!(keys, vec!["scores"]);
        assert_eq!(updates, vec!["total"]);
    }

    #[test]
    fn caller_supplied_classification_wins() {
        let spec = spec()
            .with_key_columns(["id"])
            .with_update_columns(["region", "amount"]);

        let (keys, updates) = classify_columns(&spec, &sales_dataset()).unwrap();
        assert_eq!(keys, vec!["id"]);
        assert_eq!(updates, vec!["region", "amount"]);
    }

    #[test]
    fn all_numeric_dataset_without_keys_is_a_configuration_error() {
        let dataset = Dataset::new(vec![
            Column::new("a", ColumnValues::Int64(vec![Some(1)])),
            Column::new("b", ColumnValues::Float64(vec![Some(2.0)])),
        ])
        .unwrap();

        let result = classify_columns(&spec(), &dataset);
        assert!(matches!(result, Err(LoaderError::Configuration(_))));
    }
}
