//! Scan jobs
//!
//! One [`ScanJob`] runs the lifecycle for one table:
//!
//! ```text
//! resolve credentials → descriptor → open → describe → lease (lock + plan)
//!   → execute → release connection → commit watermark
//! ```
//!
//! Every step up to and including execution can be cancelled through the
//! job's [`CancellationToken`]. A cancelled or failed job releases its
//! connection and commits nothing. The [`Scanner`] runs many jobs concurrently
//! and reports each table separately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionFactory, ScopedConnection};
use crate::credentials::SharedCredentialStore;
use crate::descriptor::ConnectionDescriptor;
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{Error, Result};
use crate::introspect::{MetadataIntrospector, Timeouts};
use crate::planner::{ExtractionPlanner, QueryPlan, ScanLease};
use crate::render::render_plan;
use crate::retry::RetryConfig;
use crate::target::ScanTarget;
use crate::types::{Row, Value};
use crate::watermark::WatermarkStore;

/// What an executor observed while consuming a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Rows consumed
    pub rows: u64,
    /// Largest non-NULL value of the plan's watermark column
    pub max_value: Option<Value>,
}

impl ExecutionReport {
    /// Account for one row
    pub fn observe(&mut self, plan: &QueryPlan, row: &Row) -> Result<()> {
        self.rows += 1;

        let Some(column) = plan.watermark_column.as_deref() else {
            return Ok(());
        };
        let value = match row.get_by_name(column) {
            Some(v) if !v.is_null() => v,
            _ => return Ok(()),
        };

        self.max_value = match self.max_value.take() {
            None => Some(value.clone()),
            Some(current) => Some(current.max_of(value.clone()).ok_or_else(|| {
                Error::query(format!(
                    "{}.{} returned values that cannot be compared",
                    plan.table, column
                ))
            })?),
        };
        Ok(())
    }
}

/// Runs a plan against a live connection.
///
/// `execute` must only return `Ok` once the whole result set was consumed;
/// the watermark is committed from the returned report.
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    /// Execute a plan
    async fn execute(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        plan: &QueryPlan,
    ) -> Result<ExecutionReport>;
}

/// Destination for scanned rows
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Accept one batch of rows in plan order
    async fn write(&self, plan: &QueryPlan, rows: Vec<Row>) -> Result<()>;
}

/// Executor that streams the rendered plan into a [`RowSink`] in batches
pub struct StreamingExecutor {
    sink: Arc<dyn RowSink>,
    batch_size: usize,
}

impl StreamingExecutor {
    /// Create an executor writing batches of `batch_size` rows
    pub fn new(sink: Arc<dyn RowSink>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl PlanExecutor for StreamingExecutor {
    async fn execute(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        plan: &QueryPlan,
    ) -> Result<ExecutionReport> {
        let (sql, params) = render_plan(plan, dialect, None);
        debug!(table = %plan.table, sql = %sql, "Executing scan");

        let mut stream = conn.query_stream(&sql, &params).await?;
        let mut report = ExecutionReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(row) = stream.next().await? {
            report.observe(plan, &row)?;
            batch.push(row);
            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.sink.write(plan, full).await?;
            }
        }
        if !batch.is_empty() {
            self.sink.write(plan, batch).await?;
        }
        Ok(report)
    }
}

/// Result of one successful table scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    /// `host:port/schema.table`
    pub target: String,
    /// Caller job id, if any
    pub job_id: Option<String>,
    /// Whether a full snapshot was taken
    pub full: bool,
    /// Rows consumed
    pub rows: u64,
    /// Watermark the plan started from
    pub previous_watermark: Option<Value>,
    /// Watermark in effect after the commit
    pub watermark: Option<Value>,
    /// Wall time
    pub duration: Duration,
}

/// Per-table result of [`Scanner::scan_all`]
#[derive(Debug)]
pub struct ScanOutcome {
    /// `host:port/schema.table`
    pub target: String,
    /// Summary or the error that stopped this table
    pub result: Result<ScanSummary>,
}

impl ScanOutcome {
    /// Whether the scan succeeded
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// One table scan with its own cancellation token
#[derive(Debug, Clone)]
pub struct ScanJob {
    target: ScanTarget,
    cancel: CancellationToken,
}

impl ScanJob {
    /// Create a job with a fresh token
    pub fn new(target: ScanTarget) -> Self {
        Self {
            target,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an existing token (e.g. a child of a shutdown token)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Target
    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    /// Token that cancels this job
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn guard<T>(&self, step: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            result = step => result,
        }
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            table: self.target.table_name().to_string(),
        }
    }
}

/// Runs scan jobs against shared credentials, introspector and planner
pub struct Scanner {
    credentials: SharedCredentialStore,
    introspector: MetadataIntrospector,
    planner: ExtractionPlanner,
    executor: Arc<dyn PlanExecutor>,
    max_concurrent_scans: usize,
    shutdown: CancellationToken,
}

impl Scanner {
    /// Create a scanner with default retry, timeouts and concurrency
    pub fn new(
        credentials: SharedCredentialStore,
        factory: Arc<dyn ConnectionFactory>,
        store: Arc<dyn WatermarkStore>,
        executor: Arc<dyn PlanExecutor>,
    ) -> Self {
        Self {
            credentials,
            introspector: MetadataIntrospector::new(factory),
            planner: ExtractionPlanner::new(store),
            executor,
            max_concurrent_scans: 4,
            shutdown: CancellationToken::new(),
        }
    }

    /// Set the retry policy for connect and describe
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.introspector = self.introspector.with_retry(retry);
        self
    }

    /// Set connect and describe timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.introspector = self.introspector.with_timeouts(timeouts);
        self
    }

    /// Set how many tables are scanned at once
    pub fn with_max_concurrent_scans(mut self, max: usize) -> Self {
        self.max_concurrent_scans = max.max(1);
        self
    }

    /// Use an external shutdown token; every job gets a child of it
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Planner (for watermark inspection and resets)
    pub fn planner(&self) -> &ExtractionPlanner {
        &self.planner
    }

    /// Credential store
    pub fn credentials(&self) -> &SharedCredentialStore {
        &self.credentials
    }

    /// Cancel every running and future job
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Create a job whose token is a child of the scanner's shutdown token
    pub fn job(&self, target: ScanTarget) -> ScanJob {
        ScanJob::new(target).with_cancellation(self.shutdown.child_token())
    }

    /// Scan one target
    pub async fn scan(&self, target: ScanTarget) -> Result<ScanSummary> {
        self.run_job(&self.job(target)).await
    }

    /// Scan many targets, at most `max_concurrent_scans` at a time.
    ///
    /// A failing table never affects the others; outcomes come back in
    /// completion order.
    pub async fn scan_all(&self, targets: impl IntoIterator<Item = ScanTarget>) -> Vec<ScanOutcome> {
        stream::iter(targets)
            .map(|target| async move {
                let job = self.job(target);
                let label = job.target().label();
                let result = self.run_job(&job).await;
                ScanOutcome {
                    target: label,
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent_scans)
            .collect()
            .await
    }

    /// Run a job's full lifecycle
    pub async fn run_job(&self, job: &ScanJob) -> Result<ScanSummary> {
        let target = job.target();
        let label = target.label();
        let started = Instant::now();

        let result = self.run_lifecycle(job).await;
        match &result {
            Ok(summary) => info!(
                target = %label,
                job_id = ?target.request().job_id,
                full = summary.full,
                rows = summary.rows,
                watermark = ?summary.watermark,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scan completed"
            ),
            Err(Error::Cancelled { .. }) => warn!(target = %label, "Scan cancelled"),
            Err(e) => error!(
                target = %label,
                category = %e.category(),
                "Scan failed: {}",
                e
            ),
        }
        result.map(|mut summary| {
            summary.duration = started.elapsed();
            summary
        })
    }

    async fn run_lifecycle(&self, job: &ScanJob) -> Result<ScanSummary> {
        let target = job.target();

        let credentials = self.credentials.snapshot().resolve_target(target)?;
        let descriptor = ConnectionDescriptor::from_target(target, &credentials)?;

        let conn = job.guard(self.introspector.open(&descriptor)).await?;
        let scanned = self.scan_with(job, &conn).await;
        if let Err(e) = conn.release().await {
            warn!(target = %target.label(), "Failed to close connection: {}", e);
        }
        let (lease, report) = scanned?;

        if job.is_cancelled() {
            return Err(job.cancelled());
        }

        let full = lease.plan().is_full();
        let previous_watermark = lease.prior().cloned();
        let watermark = lease.commit(report.max_value).await?;

        Ok(ScanSummary {
            target: target.label(),
            job_id: target.request().job_id.clone(),
            full,
            rows: report.rows,
            previous_watermark,
            watermark,
            duration: Duration::ZERO,
        })
    }

    async fn scan_with(
        &self,
        job: &ScanJob,
        conn: &ScopedConnection,
    ) -> Result<(ScanLease, ExecutionReport)> {
        let target = job.target();
        let metadata = job
            .guard(self.introspector.describe_table(
                conn,
                target.effective_schema(),
                target.table_name(),
            ))
            .await?;

        let lease = job.guard(self.planner.begin(target, &metadata)).await?;
        let dialect = dialect_for(conn.database_type());
        let report = job
            .guard(
                self.executor
                    .execute(conn.connection(), dialect.as_ref(), lease.plan()),
            )
            .await?;
        Ok((lease, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanKind;

    fn plan() -> QueryPlan {
        QueryPlan {
            schema: None,
            table: "events".into(),
            columns: vec!["id".into(), "ts".into()],
            kind: PlanKind::Full,
            order_by: vec!["ts".into()],
            watermark_column: Some("ts".into()),
        }
    }

    fn row(id: i64, ts: Value) -> Row {
        Row::new(vec!["id".into(), "ts".into()], vec![Value::Int64(id), ts])
    }

    #[test]
    fn test_report_tracks_max_and_skips_nulls() {
        let plan = plan();
        let mut report = ExecutionReport::default();
        report.observe(&plan, &row(1, Value::Int64(10))).unwrap();
        report.observe(&plan, &row(2, Value::Null)).unwrap();
        report.observe(&plan, &row(3, Value::Int32(42))).unwrap();
        report.observe(&plan, &row(4, Value::Int64(17))).unwrap();

        assert_eq!(report.rows, 4);
        assert_eq!(report.max_value, Some(Value::Int32(42)));
    }

    #[test]
    fn test_report_rejects_mixed_values() {
        let plan = plan();
        let mut report = ExecutionReport::default();
        report.observe(&plan, &row(1, Value::Int64(10))).unwrap();
        assert!(report.observe(&plan, &row(2, Value::from("x"))).is_err());
    }

    #[test]
    fn test_report_without_watermark_column() {
        let mut plan = plan();
        plan.watermark_column = None;
        let mut report = ExecutionReport::default();
        report.observe(&plan, &row(1, Value::Int64(10))).unwrap();
        assert_eq!(report.rows, 1);
        assert!(report.max_value.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_guard() {
        let target = ScanTarget::builder("postgres", "pg", "events")
            .update_all(true)
            .build()
            .unwrap();
        let job = ScanJob::new(target);
        job.cancel();

        let result: Result<()> = job.guard(std::future::pending()).await;
        assert!(matches!(result, Err(Error::Cancelled { ref table }) if table == "events"));
    }
}
