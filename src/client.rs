//! Warehouse-facing types and the client seam the loaders are built against.
//!
//! The loaders never construct a client themselves; a [`WarehouseClient`] is
//! injected so the workflows can be exercised against a fake in tests.

use std::fmt;

use async_trait::async_trait;

use crate::dataset::Dataset;
use crate::error::{LoaderError, LoaderResult};
use crate::schema::{LoadSchema, TableSchema};

/// Fully qualified reference to a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Creates a table reference, validating that every part stays within the
    /// safe identifier character set used for SQL interpolation.
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> LoaderResult<Self> {
        let project = project.into();
        let dataset = dataset.into();
        let table = table.into();

        // Project ids may contain hyphens; dataset and table ids may not.
        if !is_valid_part(&project, true) {
            return Err(LoaderError::Configuration(format!(
                "project id {project:?} contains characters outside the safe identifier set"
            )));
        }
        for (label, part) in [("dataset", &dataset), ("table", &table)] {
            if !is_valid_part(part, false) {
                return Err(LoaderError::Configuration(format!(
                    "{label} id {part:?} contains characters outside the safe identifier set"
                )));
            }
        }

        Ok(Self {
            project,
            dataset,
            table,
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

fn is_valid_part(part: &str, allow_hyphen: bool) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_hyphen && c == '-'))
}

/// Policy governing whether a missing destination table may be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// Create the table if it does not exist.
    CreateIfNeeded,
    /// Fail the load if the table does not exist.
    CreateNever,
}

/// Policy governing how loaded data interacts with existing table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// New rows are appended; existing rows are untouched.
    Append,
    /// The table contents are fully replaced by the loaded data.
    Truncate,
}

/// Result of fetching a live table schema.
///
/// `NotFound` and `Unavailable` are distinct so a connectivity failure is not
/// silently mistaken for a missing table, even though the schema reconciler
/// degrades both to auto-detect.
#[derive(Debug, Clone)]
pub enum SchemaFetch {
    Found(TableSchema),
    NotFound,
    Unavailable(String),
}

/// A single error reported by the warehouse for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobError {
    pub reason: Option<String>,
    pub message: String,
    pub location: Option<String>,
}

impl RemoteJobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            reason: None,
            message: message.into(),
            location: None,
        }
    }
}

impl fmt::Display for RemoteJobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.reason {
            write!(f, "{reason}: ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {location})")?;
        }
        Ok(())
    }
}

/// Terminal state of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(Vec<RemoteJobError>),
}

/// A load job submission: the projected dataset, where it goes, and under
/// which schema and dispositions it is written.
#[derive(Debug)]
pub struct LoadRequest<'a> {
    pub dataset: &'a Dataset,
    pub destination: &'a TableRef,
    pub schema: &'a LoadSchema,
    pub create_disposition: CreateDisposition,
    pub write_disposition: WriteDisposition,
    pub job_id: String,
}

/// The warehouse operations the loaders consume.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    type Job: WarehouseJob + Send;

    /// Fetches the live schema of a table. Never fails: transport problems
    /// are reported as [`SchemaFetch::Unavailable`].
    async fn fetch_table_schema(&self, table: &TableRef) -> SchemaFetch;

    /// Submits a load job writing the request's dataset into its destination.
    async fn submit_load(&self, request: LoadRequest<'_>) -> LoaderResult<Self::Job>;

    /// Submits a SQL statement for execution under the given job id.
    async fn submit_query(&self, sql: &str, job_id: &str) -> LoaderResult<Self::Job>;
}

/// Handle to an asynchronous remote job.
#[async_trait]
pub trait WarehouseJob {
    /// The unique id the job was submitted under.
    fn id(&self) -> &str;

    /// Blocks until the job reaches a terminal state.
    async fn wait(&mut self) -> LoaderResult<JobOutcome>;

    /// Requests best-effort cancellation of the remote job.
    async fn cancel(&mut self) -> LoaderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ref_display_is_fully_qualified() {
        let table = TableRef::new("my-project", "analytics", "sales").unwrap();
        assert_eq!(table.to_string(), "my-project.analytics.sales");
    }

    #[test]
    fn table_ref_rejects_unsafe_parts() {
        assert!(TableRef::new("my-project", "analytics", "sales; drop table x").is_err());
        assert!(TableRef::new("my-project", "data-set", "sales").is_err());
        assert!(TableRef::new("", "analytics", "sales").is_err());
    }

    #[test]
    fn remote_job_error_display() {
        let error = RemoteJobError {
            reason: Some("invalidQuery".to_string()),
            message: "syntax error".to_string(),
            location: Some("query".to_string()),
        };
        assert_eq!(error.to_string(), "invalidQuery: syntax error (at query)");
        assert_eq!(RemoteJobError::new("boom").to_string(), "boom");
    }
}
