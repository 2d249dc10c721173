//! The production [`WarehouseClient`] implementation for Google BigQuery.

use std::fmt;
use std::fs;

use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::query_parameter::QueryParameter;
use gcp_bigquery_client::model::query_parameter_type::QueryParameterType;
use gcp_bigquery_client::model::query_parameter_value::QueryParameterValue;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::{QueryResponse, ResultSet};
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use serde_json::{Map, Number, Value};
use tracing::{debug, info, warn};

use crate::client::{
    CreateDisposition, JobOutcome, LoadRequest, RemoteJobError, SchemaFetch, TableRef,
    WarehouseClient, WarehouseJob, WriteDisposition,
};
use crate::dataset::{ColumnType, ColumnValues, Dataset};
use crate::error::LoaderResult;
use crate::schema::{Field, FieldMode, LoadSchema, TableSchema};

/// Maximum number of rows sent per insert request.
const MAX_INSERT_ROWS: usize = 500;

/// A client for loading data into and querying Google BigQuery.
///
/// Work is carried out during submission: the REST query and insert paths are
/// synchronous, so the returned [`BigQueryJob`] handles already hold their
/// terminal outcome. Jobs are submitted without any retry policy so job ids
/// and semantics stay deterministic.
pub struct BigQueryClient {
    project_id: String,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a Google Cloud service account
    /// key file.
    pub async fn new_with_key_path(
        project_id: String,
        sa_key_path: &str,
    ) -> LoaderResult<BigQueryClient> {
        let sa_key = fs::read_to_string(sa_key_path).map_err(BQError::from)?;
        let key = parse_service_account_key(sa_key).map_err(BQError::from)?;
        let client = Client::from_service_account_key(key, false).await?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] from a service account key string.
    pub async fn new_with_key(project_id: String, sa_key: &str) -> LoaderResult<BigQueryClient> {
        let key = parse_service_account_key(sa_key).map_err(BQError::from)?;
        let client = Client::from_service_account_key(key, false).await?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Creates a new [`BigQueryClient`] with overridden endpoint URLs, for
    /// testing against emulators or mock servers.
    pub async fn new_with_custom_urls(
        project_id: String,
        auth_base_url: String,
        v2_base_url: String,
        sa_key: &str,
    ) -> LoaderResult<BigQueryClient> {
        let key = parse_service_account_key(sa_key).map_err(BQError::from)?;
        let client = ClientBuilder::new()
            .with_auth_base_url(auth_base_url)
            .with_v2_base_url(v2_base_url)
            .build_from_service_account_key(key, false)
            .await?;

        Ok(BigQueryClient { project_id, client })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Executes an SQL statement and returns the raw response.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, BQError> {
        self.client.job().query(&self.project_id, request).await
    }

    /// Reads a table's column descriptors from `INFORMATION_SCHEMA.COLUMNS`.
    /// An empty result means the table does not exist.
    async fn information_schema_columns(&self, table: &TableRef) -> Result<Vec<Field>, BQError> {
        let query = format!(
            "select column_name, data_type, is_nullable from `{}.{}.INFORMATION_SCHEMA.COLUMNS` where table_name = @table_name order by ordinal_position",
            table.project, table.dataset
        );

        let mut request = QueryRequest::new(query);
        let parameter = QueryParameter {
            name: Some("table_name".to_string()),
            parameter_type: Some(QueryParameterType {
                r#type: "string".to_string(),
                array_type: None,
                struct_types: None,
            }),
            parameter_value: Some(QueryParameterValue {
                value: Some(table.table.clone()),
                array_values: None,
                struct_values: None,
            }),
        };
        request.query_parameters = Some(vec![parameter]);

        let response = self.query(request).await?;
        let mut result_set = ResultSet::new_from_query_response(response);

        let mut fields = Vec::new();
        while result_set.next_row() {
            let name = result_set
                .get_string_by_name("column_name")?
                .unwrap_or_default();
            let data_type = result_set
                .get_string_by_name("data_type")?
                .unwrap_or_default();
            let is_nullable = result_set
                .get_string_by_name("is_nullable")?
                .unwrap_or_default();

            let mode = if data_type.to_ascii_lowercase().starts_with("array<") {
                FieldMode::Repeated
            } else if is_nullable.eq_ignore_ascii_case("yes") {
                FieldMode::Nullable
            } else {
                FieldMode::Required
            };

            fields.push(Field::new(name, data_type, mode));
        }

        Ok(fields)
    }

    async fn create_table_if_missing(
        &self,
        table: &TableRef,
        fields: &[Field],
    ) -> LoaderResult<()> {
        if fields.is_empty() {
            warn!(table = %table, "no fields available to create the table with; skipping creation");
            return Ok(());
        }

        debug!(table = %table, "ensuring table exists");
        let query = format!(
            "create table if not exists `{table}` {}",
            create_columns_spec(fields)
        );
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    async fn truncate_table(&self, table: &TableRef) -> LoaderResult<()> {
        debug!(table = %table, "truncating table");
        let query = format!("truncate table `{table}`");
        self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    /// Streams the dataset's rows into the table in bounded batches.
    async fn insert_rows(&self, table: &TableRef, dataset: &Dataset) -> LoaderResult<JobOutcome> {
        let row_count = dataset.row_count();
        let mut remote_errors = Vec::new();

        let mut start = 0;
        while start < row_count {
            let end = (start + MAX_INSERT_ROWS).min(row_count);

            let mut insert_request = TableDataInsertAllRequest::new();
            for row in start..end {
                insert_request.add_row(None, row_to_json(dataset, row))?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&table.project, &table.dataset, &table.table, insert_request)
                .await?;

            if let Some(insert_errors) = response.insert_errors {
                for insert_error in insert_errors {
                    for error in insert_error.errors.unwrap_or_default() {
                        remote_errors.push(error_proto_to_remote(error));
                    }
                }
            }

            start = end;
        }

        if remote_errors.is_empty() {
            Ok(JobOutcome::Success)
        } else {
            Ok(JobOutcome::Failed(remote_errors))
        }
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    type Job = BigQueryJob;

    async fn fetch_table_schema(&self, table: &TableRef) -> SchemaFetch {
        match self.information_schema_columns(table).await {
            Ok(fields) if fields.is_empty() => SchemaFetch::NotFound,
            Ok(fields) => SchemaFetch::Found(TableSchema::new(fields)),
            Err(error) => SchemaFetch::Unavailable(error.to_string()),
        }
    }

    async fn submit_load(&self, request: LoadRequest<'_>) -> LoaderResult<Self::Job> {
        let LoadRequest {
            dataset,
            destination,
            schema,
            create_disposition,
            write_disposition,
            job_id,
        } = request;

        // The insert path has no server-side schema inference, so in
        // auto-detect mode the declared fields are derived from the typed
        // dataset columns.
        let fields = match schema {
            LoadSchema::Explicit(table_schema) => table_schema.fields.clone(),
            LoadSchema::Autodetect => derive_fields(dataset),
        };

        if create_disposition == CreateDisposition::CreateIfNeeded {
            self.create_table_if_missing(destination, &fields).await?;
        }
        if write_disposition == WriteDisposition::Truncate {
            self.truncate_table(destination).await?;
        }

        let outcome = self.insert_rows(destination, dataset).await?;
        info!(job_id = %job_id, table = %destination, rows = dataset.row_count(), "load finished");

        Ok(BigQueryJob::new(job_id, outcome))
    }

    async fn submit_query(&self, sql: &str, job_id: &str) -> LoaderResult<Self::Job> {
        debug!(job_id = %job_id, "submitting query");
        let response = self.query(QueryRequest::new(sql.to_string())).await?;

        let outcome = match response.errors {
            Some(errors) if !errors.is_empty() => {
                JobOutcome::Failed(errors.into_iter().map(error_proto_to_remote).collect())
            }
            _ => JobOutcome::Success,
        };

        Ok(BigQueryJob::new(job_id.to_string(), outcome))
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Handle to a BigQuery job. The outcome is already resolved at submission
/// time, so waiting returns immediately.
#[derive(Debug, Clone)]
pub struct BigQueryJob {
    id: String,
    outcome: JobOutcome,
}

impl BigQueryJob {
    fn new(id: String, outcome: JobOutcome) -> Self {
        Self { id, outcome }
    }
}

#[async_trait]
impl WarehouseJob for BigQueryJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self) -> LoaderResult<JobOutcome> {
        Ok(self.outcome.clone())
    }

    async fn cancel(&mut self) -> LoaderResult<()> {
        debug!(job_id = %self.id, "cancel requested for a job that already reached a terminal state");
        Ok(())
    }
}

fn error_proto_to_remote(error: ErrorProto) -> RemoteJobError {
    RemoteJobError {
        reason: error.reason,
        message: error.message.unwrap_or_default(),
        location: error.location,
    }
}

/// Maps a dataset column type to a BigQuery data type name.
fn bigquery_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bool => "bool",
        ColumnType::Int64 => "int64",
        ColumnType::Float64 => "float64",
        ColumnType::String => "string",
        ColumnType::Date => "date",
        ColumnType::Timestamp => "timestamp",
    }
}

/// Derives field descriptors from the dataset's typed columns.
fn derive_fields(dataset: &Dataset) -> Vec<Field> {
    dataset
        .columns()
        .iter()
        .map(|column| {
            let element = bigquery_type(column.values.column_type());
            if column.values.is_repeated() {
                Field::new(
                    column.name.clone(),
                    format!("array<{element}>"),
                    FieldMode::Repeated,
                )
            } else {
                Field::new(column.name.clone(), element, FieldMode::Nullable)
            }
        })
        .collect()
}

fn column_spec(field: &Field) -> String {
    let mut spec = format!("`{}` {}", field.name, field.data_type);
    if field.mode == FieldMode::Required && !field.data_type.to_ascii_lowercase().starts_with("array<")
    {
        spec.push_str(" not null");
    }
    spec
}

fn create_columns_spec(fields: &[Field]) -> String {
    let columns = fields
        .iter()
        .map(column_spec)
        .collect::<Vec<_>>()
        .join(",");

    format!("({columns})")
}

fn row_to_json(dataset: &Dataset, row: usize) -> Map<String, Value> {
    let mut object = Map::new();
    for column in dataset.columns() {
        object.insert(column.name.clone(), cell_to_json(&column.values, row));
    }
    object
}

fn cell_to_json(values: &ColumnValues, row: usize) -> Value {
    match values {
        ColumnValues::Bool(v) => v
            .get(row)
            .and_then(|cell| *cell)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnValues::Int64(v) => v
            .get(row)
            .and_then(|cell| *cell)
            .map(|value| Value::Number(value.into()))
            .unwrap_or(Value::Null),
        ColumnValues::Float64(v) => v
            .get(row)
            .and_then(|cell| *cell)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ColumnValues::String(v) => v
            .get(row)
            .and_then(|cell| cell.clone())
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnValues::Date(v) => v
            .get(row)
            .and_then(|cell| *cell)
            .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        ColumnValues::Timestamp(v) => v
            .get(row)
            .and_then(|cell| *cell)
            .map(|timestamp| Value::String(timestamp.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnValues::Int64Array(v) => v
            .get(row)
            .and_then(|cell| cell.clone())
            .map(|items| {
                Value::Array(
                    items
                        .into_iter()
                        .map(|value| Value::Number(value.into()))
                        .collect(),
                )
            })
            .unwrap_or(Value::Null),
        ColumnValues::StringArray(v) => v
            .get(row)
            .and_then(|cell| cell.clone())
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use chrono::NaiveDate;

    #[test]
    fn derive_fields_maps_types_and_modes() {
        let dataset = Dataset::new(vec![
            Column::new("id", ColumnValues::String(vec![None])),
            Column::new("amount", ColumnValues::Float64(vec![None])),
            Column::new("tags", ColumnValues::StringArray(vec![None])),
        ])
        .unwrap();

        let fields = derive_fields(&dataset);
        assert_eq!(fields[0], Field::new("id", "string", FieldMode::Nullable));
        assert_eq!(
            fields[1],
            Field::new("amount", "float64", FieldMode::Nullable)
        );
        assert_eq!(
            fields[2],
            Field::new("tags", "array<string>", FieldMode::Repeated)
        );
    }

    #[test]
    fn create_columns_spec_marks_required_scalars_not_null() {
        let fields = vec![
            Field::new("id", "STRING", FieldMode::Required),
            Field::new("amount", "FLOAT64", FieldMode::Nullable),
            Field::new("tags", "ARRAY<STRING>", FieldMode::Repeated),
        ];

        assert_eq!(
            create_columns_spec(&fields),
            "(`id` STRING not null,`amount` FLOAT64,`tags` ARRAY<STRING>)"
        );
    }

    #[test]
    fn rows_serialize_with_nulls_and_arrays() {
        let dataset = Dataset::new(vec![
            Column::new("id", ColumnValues::String(vec![Some("a".to_string()), None])),
            Column::new("n", ColumnValues::Int64(vec![None, Some(7)])),
            Column::new(
                "day",
                ColumnValues::Date(vec![NaiveDate::from_ymd_opt(2024, 3, 1), None]),
            ),
            Column::new(
                "tags",
                ColumnValues::StringArray(vec![Some(vec!["x".to_string()]), None]),
            ),
        ])
        .unwrap();

        let first = row_to_json(&dataset, 0);
        assert_eq!(first["id"], Value::String("a".to_string()));
        assert_eq!(first["n"], Value::Null);
        assert_eq!(first["day"], Value::String("2024-03-01".to_string()));
        assert_eq!(
            first["tags"],
            Value::Array(vec![Value::String("x".to_string())])
        );

        let second = row_to_json(&dataset, 1);
        assert_eq!(second["id"], Value::Null);
        assert_eq!(second["n"], Value::Number(7.into()));
        assert_eq!(second["tags"], Value::Null);
    }
}
