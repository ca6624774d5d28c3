//! Testing utilities
//!
//! In-memory stand-ins for a database driver and a plan executor so the
//! scan lifecycle can be exercised without a server.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_scan::testing::*;
//!
//! let factory = MockConnectionFactory::new().with_table(
//!     TableMetadata::new("orders")
//!         .with_column(ColumnMetadata::new("id", "bigint").primary_key(1))
//!         .with_column(ColumnMetadata::new("ts", "timestamp")),
//!     vec![mock_row(&[("id", Value::Int64(1)), ("ts", Value::Int64(100))])],
//! );
//! factory.fail_next_connects(ConnectionFailure::Network, 2);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, ConnectionFactory};
use crate::descriptor::{ConnectionDescriptor, DatabaseType};
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{ConnectionFailure, Error, Result};
use crate::job::{ExecutionReport, PlanExecutor, RowSink};
use crate::planner::QueryPlan;
use crate::render::render_plan;
use crate::types::{Row, TableMetadata, Value};

/// Build a row from `(column, value)` pairs
pub fn mock_row(fields: &[(&str, Value)]) -> Row {
    let (columns, values) = fields
        .iter()
        .map(|(c, v)| (c.to_string(), v.clone()))
        .unzip();
    Row::new(columns, values)
}

// ============================================================================
// Mock Connection Factory
// ============================================================================

#[derive(Debug, Clone)]
struct MockTable {
    metadata: TableMetadata,
    rows: Vec<Row>,
}

#[derive(Default)]
struct MockState {
    tables: Mutex<HashMap<String, MockTable>>,
    connect_failures: Mutex<VecDeque<ConnectionFailure>>,
    describe_failures: Mutex<VecDeque<ConnectionFailure>>,
    connect_delay: Mutex<Option<Duration>>,
    describe_delay: Mutex<Option<Duration>>,
    query_delay: Mutex<Option<Duration>>,
    unsupported: Mutex<HashSet<DatabaseType>>,
    rejected_users: Mutex<HashSet<String>>,
    queries: Mutex<Vec<(String, Vec<Value>)>>,
    connect_attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// A connection factory backed by in-memory tables
#[derive(Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnectionFactory")
            .field("tables", &self.state.tables.lock().len())
            .field("opened", &self.opened())
            .field("closed", &self.closed())
            .finish()
    }
}

impl MockConnectionFactory {
    /// Create a factory with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its rows
    pub fn with_table(self, metadata: TableMetadata, rows: Vec<Row>) -> Self {
        self.set_rows(metadata, rows);
        self
    }

    /// Refuse connections for a database type
    pub fn without_driver(self, database_type: DatabaseType) -> Self {
        self.state.unsupported.lock().insert(database_type);
        self
    }

    /// Reject a user with an authentication failure
    pub fn rejecting_user(self, user: impl Into<String>) -> Self {
        self.state.rejected_users.lock().insert(user.into());
        self
    }

    /// Delay every connect
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = Some(delay);
        self
    }

    /// Delay every column listing
    pub fn with_describe_delay(self, delay: Duration) -> Self {
        *self.state.describe_delay.lock() = Some(delay);
        self
    }

    /// Delay every data query
    pub fn with_query_delay(self, delay: Duration) -> Self {
        *self.state.query_delay.lock() = Some(delay);
        self
    }

    /// Replace a table's metadata and rows
    pub fn set_rows(&self, metadata: TableMetadata, rows: Vec<Row>) {
        self.state.tables.lock().insert(
            metadata.name.to_lowercase(),
            MockTable { metadata, rows },
        );
    }

    /// Append rows to an existing table
    pub fn push_rows(&self, table: &str, rows: Vec<Row>) {
        if let Some(t) = self.state.tables.lock().get_mut(&table.to_lowercase()) {
            t.rows.extend(rows);
        }
    }

    /// Fail the next `times` connects with `kind`
    pub fn fail_next_connects(&self, kind: ConnectionFailure, times: usize) {
        let mut failures = self.state.connect_failures.lock();
        failures.extend(std::iter::repeat(kind).take(times));
    }

    /// Fail the next `times` column listings with `kind`
    pub fn fail_next_describes(&self, kind: ConnectionFailure, times: usize) {
        let mut failures = self.state.describe_failures.lock();
        failures.extend(std::iter::repeat(kind).take(times));
    }

    /// Connect calls, including failed ones
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(AtomicOrdering::SeqCst)
    }

    /// Connections handed out
    pub fn opened(&self) -> usize {
        self.state.opened.load(AtomicOrdering::SeqCst)
    }

    /// Connections closed
    pub fn closed(&self) -> usize {
        self.state.closed.load(AtomicOrdering::SeqCst)
    }

    /// Connections handed out and not yet closed
    pub fn open_connections(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Every query executed, in order
    pub fn queries(&self) -> Vec<(String, Vec<Value>)> {
        self.state.queries.lock().clone()
    }

    fn failure(kind: ConnectionFailure, target: &str) -> Error {
        Error::connection(kind, target, format!("injected {} failure", kind))
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn Connection>> {
        self.state
            .connect_attempts
            .fetch_add(1, AtomicOrdering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let host_port = descriptor.host_port();
        let injected = self.state.connect_failures.lock().pop_front();
        if let Some(kind) = injected {
            return Err(Self::failure(kind, &host_port));
        }
        if self.state.rejected_users.lock().contains(descriptor.user()) {
            return Err(Self::failure(ConnectionFailure::Authentication, &host_port));
        }

        self.state.opened.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            dialect: dialect_for(descriptor.database_type()),
            target: host_port,
            closed: AtomicBool::new(false),
        }))
    }

    fn supports(&self, database_type: DatabaseType) -> bool {
        !self.state.unsupported.lock().contains(&database_type)
    }
}

// ============================================================================
// Mock Connection
// ============================================================================

/// A connection answering column listings and plan queries from memory
pub struct MockConnection {
    state: Arc<MockState>,
    dialect: Box<dyn SqlDialect>,
    target: String,
    closed: AtomicBool,
}

impl MockConnection {
    fn is_column_listing(sql: &str) -> bool {
        sql.contains("pk_ordinal")
    }

    fn is_existence_check(sql: &str) -> bool {
        sql.contains("EXISTS(") || sql.contains("COUNT(*)")
    }

    fn listed_table(&self, sql: &str) -> Option<MockTable> {
        self.state
            .tables
            .lock()
            .values()
            .find(|t| sql.contains(&format!("'{}'", t.metadata.name)))
            .cloned()
    }

    fn selected_table(&self, sql: &str) -> Option<MockTable> {
        self.state
            .tables
            .lock()
            .values()
            .find(|t| sql.contains(&self.dialect.quote_identifier(&t.metadata.name)))
            .cloned()
    }

    fn list_columns(table: &MockTable) -> Vec<Row> {
        table
            .metadata
            .columns
            .iter()
            .map(|c| {
                mock_row(&[
                    ("column_name", Value::String(c.name.clone())),
                    ("data_type", Value::String(c.type_name.clone())),
                    ("nullable", Value::Bool(c.nullable)),
                    (
                        "pk_ordinal",
                        c.primary_key_ordinal
                            .map(|n| Value::Int32(n as i32))
                            .unwrap_or(Value::Null),
                    ),
                ])
            })
            .collect()
    }

    /// Evaluate `col > ?` and `ORDER BY col` the way a database would
    fn select(&self, table: MockTable, sql: &str, params: &[Value]) -> Vec<Row> {
        let quoted = |name: &str| self.dialect.quote_identifier(name);
        let columns = &table.metadata.columns;

        let filter = columns
            .iter()
            .find(|c| sql.contains(&format!("{} > ", quoted(&c.name))))
            .map(|c| c.name.clone());
        let order = columns
            .iter()
            .find(|c| sql.contains(&format!("ORDER BY {}", quoted(&c.name))))
            .map(|c| c.name.clone());

        let mut rows: Vec<Row> = table
            .rows
            .into_iter()
            .filter(|row| match (&filter, params.first()) {
                (Some(col), Some(after)) => row
                    .get_by_name(col)
                    .and_then(|v| v.compare(after))
                    .is_some_and(|o| o == Ordering::Greater),
                _ => true,
            })
            .collect();

        if let Some(col) = order {
            rows.sort_by(|a, b| match (a.get_by_name(&col), b.get_by_name(&col)) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
        rows
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(Error::query("connection is closed"));
        }
        self.state
            .queries
            .lock()
            .push((sql.to_string(), params.to_vec()));

        if Self::is_column_listing(sql) {
            let delay = *self.state.describe_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let injected = self.state.describe_failures.lock().pop_front();
            if let Some(kind) = injected {
                return Err(MockConnectionFactory::failure(kind, &self.target));
            }
            return Ok(self
                .listed_table(sql)
                .map(|t| Self::list_columns(&t))
                .unwrap_or_default());
        }

        if Self::is_existence_check(sql) {
            let exists = self.listed_table(sql).is_some();
            return Ok(vec![mock_row(&[("exists", Value::Bool(exists))])]);
        }

        let delay = *self.state.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let table = self
            .selected_table(sql)
            .ok_or_else(|| Error::query_with_sql("relation does not exist", sql))?;
        Ok(self.select(table, sql, params))
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(AtomicOrdering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, AtomicOrdering::SeqCst) {
            self.state.closed.fetch_add(1, AtomicOrdering::SeqCst);
        }
        Ok(())
    }
}

// ============================================================================
// Recording Executor / Collecting Sink
// ============================================================================

/// Executor that renders and runs each plan, keeping plans and rows
#[derive(Debug, Clone, Default)]
pub struct RecordingExecutor {
    plans: Arc<Mutex<Vec<QueryPlan>>>,
    rows: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    fail_message: Arc<Mutex<Option<String>>>,
}

impl RecordingExecutor {
    /// Create a new recording executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every execution with a query error
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        *self.fail_message.lock() = Some(message.into());
        self
    }

    /// Plans executed so far
    pub fn plans(&self) -> Vec<QueryPlan> {
        self.plans.lock().clone()
    }

    /// Rows returned for a table across all executions
    pub fn rows_for(&self, table: &str) -> Vec<Row> {
        self.rows.lock().get(table).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PlanExecutor for RecordingExecutor {
    async fn execute(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        plan: &QueryPlan,
    ) -> Result<ExecutionReport> {
        self.plans.lock().push(plan.clone());

        let fail_message = self.fail_message.lock().clone();
        if let Some(message) = fail_message {
            return Err(Error::query(message));
        }

        let (sql, params) = render_plan(plan, dialect, None);
        let rows = conn.query(&sql, &params).await?;

        let mut report = ExecutionReport::default();
        for row in &rows {
            report.observe(plan, row)?;
        }
        self.rows
            .lock()
            .entry(plan.table.clone())
            .or_default()
            .extend(rows);
        Ok(report)
    }
}

/// Sink that keeps every batch it receives
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    batches: Arc<Mutex<Vec<(String, Vec<Row>)>>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch sizes in arrival order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(|(_, b)| b.len()).collect()
    }

    /// All rows in arrival order
    pub fn rows(&self) -> Vec<Row> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, b)| b.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl RowSink for CollectingSink {
    async fn write(&self, plan: &QueryPlan, rows: Vec<Row>) -> Result<()> {
        self.batches.lock().push((plan.table.clone(), rows));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use crate::target::ScanTarget;
    use crate::types::ColumnMetadata;

    fn descriptor() -> ConnectionDescriptor {
        let target = ScanTarget::builder("postgres", "pg", "orders")
            .database("shop")
            .update_all(true)
            .build()
            .unwrap();
        ConnectionDescriptor::from_target(&target, &Credentials::new("scanner", "pw")).unwrap()
    }

    fn factory() -> MockConnectionFactory {
        MockConnectionFactory::new().with_table(
            TableMetadata::new("orders")
                .with_column(ColumnMetadata::new("id", "bigint").primary_key(1))
                .with_column(ColumnMetadata::new("ts", "bigint")),
            vec![
                mock_row(&[("id", Value::Int64(1)), ("ts", Value::Int64(300))]),
                mock_row(&[("id", Value::Int64(2)), ("ts", Value::Int64(100))]),
                mock_row(&[("id", Value::Int64(3)), ("ts", Value::Int64(200))]),
            ],
        )
    }

    #[tokio::test]
    async fn test_mock_filters_and_orders() {
        let factory = factory();
        let conn = factory.connect(&descriptor()).await.unwrap();

        let rows = conn
            .query(
                r#"SELECT "id", "ts" FROM "orders" WHERE "ts" > $1 ORDER BY "ts" ASC"#,
                &[Value::Int64(100)],
            )
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get_by_name("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Int64(3)), Some(Value::Int64(1))]);
    }

    #[tokio::test]
    async fn test_mock_injected_failures_and_close_count() {
        let factory = factory();
        factory.fail_next_connects(ConnectionFailure::Network, 1);

        let err = factory.connect(&descriptor()).await.err().unwrap();
        assert!(err.is_retriable());

        let conn = factory.connect(&descriptor()).await.unwrap();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(factory.connect_attempts(), 2);
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 1);
        assert!(!conn.is_valid().await);
    }
}
