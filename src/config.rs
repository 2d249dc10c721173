//! Configuration for a single load invocation.

use std::time::Duration;

use crate::client::TableRef;

/// Suffix appended to the destination table name to derive the staging table.
pub const STAGING_TABLE_SUFFIX: &str = "_temptable";

/// Configuration for one load or merge invocation.
#[derive(Debug, Clone)]
pub struct LoadSpec {
    /// The destination table.
    pub destination: TableRef,

    /// Prefix for job ids; a stage suffix and a UTC timestamp are appended.
    pub job_id_prefix: String,

    /// Identity columns for the merge workflow. When empty, all non-numeric
    /// dataset columns are used.
    pub key_columns: Vec<String>,

    /// Columns overwritten on match. When empty, all scalar numeric dataset
    /// columns are used.
    pub update_columns: Vec<String>,

    /// Upper bound on how long a single stage may wait for its remote job.
    /// `None` waits indefinitely.
    pub stage_timeout: Option<Duration>,
}

impl LoadSpec {
    /// Creates a spec with no explicit column classification and no timeout.
    pub fn new(destination: TableRef, job_id_prefix: impl Into<String>) -> Self {
        Self {
            destination,
            job_id_prefix: job_id_prefix.into(),
            key_columns: Vec::new(),
            update_columns: Vec::new(),
            stage_timeout: None,
        }
    }

    /// Sets the identity columns used to match rows during the merge.
    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the columns overwritten when a merge match is found.
    pub fn with_update_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Bounds each stage's wait on its remote job. On expiry the job is
    /// cancelled best-effort and the workflow fails.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// The staging table for the merge workflow.
    ///
    /// The name is derived deterministically from the destination table
    /// alone, so concurrent merge invocations against the same destination
    /// race on the same staging table. Callers must run at most one merge
    /// per destination table at a time.
    pub fn staging_table(&self) -> TableRef {
        TableRef {
            project: self.destination.project.clone(),
            dataset: self.destination.dataset.clone(),
            table: format!("{}{STAGING_TABLE_SUFFIX}", self.destination.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_table_appends_the_fixed_suffix() {
        let spec = LoadSpec::new(
            TableRef::new("my-project", "analytics", "sales").unwrap(),
            "nightly",
        );
        let staging = spec.staging_table();
        assert_eq!(staging.to_string(), "my-project.analytics.sales_temptable");
    }

    #[test]
    fn builder_setters() {
        let spec = LoadSpec::new(
            TableRef::new("my-project", "analytics", "sales").unwrap(),
            "nightly",
        )
        .with_key_columns(["id"])
        .with_update_columns(["amount"])
        .with_stage_timeout(Duration::from_secs(60));

        assert_eq!(spec.key_columns, vec!["id"]);
        assert_eq!(spec.update_columns, vec!["amount"]);
        assert_eq!(spec.stage_timeout, Some(Duration::from_secs(60)));
    }
}
