//! Error types for the loader workflows.

use std::time::Duration;

use gcp_bigquery_client::error::BQError;
use thiserror::Error;

use crate::client::RemoteJobError;

/// Convenient result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors that can occur while loading or merging a dataset.
///
/// Each remote-stage variant carries the job id of the failed stage and the
/// full list of errors the warehouse reported for it, so callers can diagnose
/// a failure without re-querying the service.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The caller-supplied or inferred configuration is unusable.
    #[error("invalid loader configuration: {0}")]
    Configuration(String),

    /// The staging or destination load job completed with remote errors.
    #[error(
        "load job {job_id} reported {count} remote error(s): [{details}]",
        count = .errors.len(),
        details = format_remote_errors(.errors)
    )]
    Load {
        job_id: String,
        errors: Vec<RemoteJobError>,
    },

    /// The merge statement failed. The staging table is left in place so an
    /// operator can inspect the staged data.
    #[error(
        "merge job {job_id} reported {count} remote error(s); staging table {staging_table} \
         was left in place for inspection: [{details}]",
        count = .errors.len(),
        details = format_remote_errors(.errors)
    )]
    Merge {
        job_id: String,
        staging_table: String,
        errors: Vec<RemoteJobError>,
    },

    /// Dropping the staging table failed after the merge committed. The merge
    /// result is permanent; only the staging table needs manual removal.
    #[error(
        "cleanup job {job_id} reported {count} remote error(s); merge job {merge_job_id} already \
         committed, staging table {staging_table} requires manual removal: [{details}]",
        count = .errors.len(),
        details = format_remote_errors(.errors)
    )]
    Cleanup {
        job_id: String,
        merge_job_id: String,
        staging_table: String,
        errors: Vec<RemoteJobError>,
    },

    /// A stage did not reach a terminal state within the configured timeout.
    /// A best-effort cancellation was requested for the remote job.
    #[error("job {job_id} did not reach a terminal state within {timeout:?}")]
    Timeout { job_id: String, timeout: Duration },

    /// An error returned by the BigQuery client itself.
    #[error("BigQuery client error: {0}")]
    Client(#[from] BQError),
}

impl LoaderError {
    /// Returns the remote-reported errors attached to this error, if any.
    pub fn remote_errors(&self) -> &[RemoteJobError] {
        match self {
            LoaderError::Load { errors, .. }
            | LoaderError::Merge { errors, .. }
            | LoaderError::Cleanup { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn format_remote_errors(errors: &[RemoteJobError]) -> String {
    errors
        .iter()
        .map(|error| error.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
