//! An in-memory [`WarehouseClient`] for exercising the load workflows
//! without a live warehouse.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    CreateDisposition, JobOutcome, LoadRequest, SchemaFetch, TableRef, WarehouseClient,
    WarehouseJob, WriteDisposition,
};
use crate::error::LoaderResult;
use crate::schema::LoadSchema;

/// A recorded load submission.
#[derive(Debug, Clone)]
pub struct RecordedLoad {
    pub destination: String,
    pub columns: Vec<String>,
    pub autodetect: bool,
    pub create_disposition: CreateDisposition,
    pub write_disposition: WriteDisposition,
    pub job_id: String,
    pub row_count: usize,
}

/// A recorded query submission.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub sql: String,
    pub job_id: String,
}

#[derive(Default)]
struct Inner {
    schemas: HashMap<String, SchemaFetch>,
    load_outcomes: VecDeque<JobOutcome>,
    query_outcomes: VecDeque<JobOutcome>,
    load_delays: VecDeque<Duration>,
    loads: Vec<RecordedLoad>,
    queries: Vec<RecordedQuery>,
    cancellations: Vec<String>,
}

/// A fake warehouse that records every submission and replays scripted
/// schemas and job outcomes. Outcomes default to success when nothing was
/// scripted. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    inner: Arc<Mutex<Inner>>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the schema fetch result for a table. Tables without an entry
    /// report [`SchemaFetch::NotFound`].
    pub fn set_schema(&self, table: &TableRef, fetch: SchemaFetch) {
        self.lock().schemas.insert(table.to_string(), fetch);
    }

    /// Queues the outcome of the next unscripted load job.
    pub fn push_load_outcome(&self, outcome: JobOutcome) {
        self.lock().load_outcomes.push_back(outcome);
    }

    /// Queues the outcome of the next unscripted query job.
    pub fn push_query_outcome(&self, outcome: JobOutcome) {
        self.lock().query_outcomes.push_back(outcome);
    }

    /// Makes the next load job's `wait` sleep before resolving.
    pub fn delay_next_load(&self, delay: Duration) {
        self.lock().load_delays.push_back(delay);
    }

    pub fn loads(&self) -> Vec<RecordedLoad> {
        self.lock().loads.clone()
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.lock().queries.clone()
    }

    /// Job ids for which cancellation was requested, in request order.
    pub fn cancellations(&self) -> Vec<String> {
        self.lock().cancellations.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake warehouse lock poisoned")
    }
}

#[async_trait]
impl WarehouseClient for FakeWarehouse {
    type Job = FakeJob;

    async fn fetch_table_schema(&self, table: &TableRef) -> SchemaFetch {
        self.lock()
            .schemas
            .get(&table.to_string())
            .cloned()
            .unwrap_or(SchemaFetch::NotFound)
    }

    async fn submit_load(&self, request: LoadRequest<'_>) -> LoaderResult<Self::Job> {
        let mut inner = self.lock();
        inner.loads.push(RecordedLoad {
            destination: request.destination.to_string(),
            columns: request.dataset.column_names(),
            autodetect: matches!(request.schema, LoadSchema::Autodetect),
            create_disposition: request.create_disposition,
            write_disposition: request.write_disposition,
            job_id: request.job_id.clone(),
            row_count: request.dataset.row_count(),
        });

        let outcome = inner
            .load_outcomes
            .pop_front()
            .unwrap_or(JobOutcome::Success);
        let delay = inner.load_delays.pop_front();

        Ok(FakeJob {
            id: request.job_id,
            outcome,
            delay,
            inner: Arc::clone(&self.inner),
        })
    }

    async fn submit_query(&self, sql: &str, job_id: &str) -> LoaderResult<Self::Job> {
        let mut inner = self.lock();
        inner.queries.push(RecordedQuery {
            sql: sql.to_string(),
            job_id: job_id.to_string(),
        });

        let outcome = inner
            .query_outcomes
            .pop_front()
            .unwrap_or(JobOutcome::Success);

        Ok(FakeJob {
            id: job_id.to_string(),
            outcome,
            delay: None,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Job handle returned by [`FakeWarehouse`].
pub struct FakeJob {
    id: String,
    outcome: JobOutcome,
    delay: Option<Duration>,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl WarehouseJob for FakeJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait(&mut self) -> LoaderResult<JobOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.outcome.clone())
    }

    async fn cancel(&mut self) -> LoaderResult<()> {
        self.inner
            .lock()
            .expect("fake warehouse lock poisoned")
            .cancellations
            .push(self.id.clone());
        Ok(())
    }
}
