//! Connection traits and the scoped connection guard

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, warn};

use crate::descriptor::{ConnectionDescriptor, DatabaseType};
use crate::error::Result;
use crate::types::{Row, Value};

/// A live database connection.
///
/// Implementations live outside this crate (one per driver). The scanner only
/// issues read queries.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return a row stream.
    ///
    /// The default buffers the whole result through [`Connection::query`];
    /// drivers with server-side cursors should override it.
    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let rows = self.query(sql, params).await?;
        Ok(Box::new(VecRowStream::new(rows)))
    }

    /// Execute a query and return the first row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Check if the connection is usable
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Streaming row iterator
pub trait RowStream: Send {
    /// Get the next row
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>>;
}

/// Row stream over an already materialized result
pub struct VecRowStream {
    rows: std::vec::IntoIter<Row>,
}

impl VecRowStream {
    /// Wrap a row vector
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowStream for VecRowStream {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        let row = self.rows.next();
        Box::pin(async move { Ok(row) })
    }
}

/// Opens connections from a descriptor
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection.
    ///
    /// Failures must be reported as `Error::Connection` with the matching
    /// [`ConnectionFailure`](crate::error::ConnectionFailure) kind so callers
    /// can tell retriable network trouble from bad credentials.
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn Connection>>;

    /// Whether this factory has a driver for the database type
    fn supports(&self, database_type: DatabaseType) -> bool;
}

/// A connection that is closed exactly once.
///
/// Call [`ScopedConnection::release`] on the normal path. If the guard is
/// dropped instead (early return, error, cancelled future) the close is
/// spawned onto the current runtime.
pub struct ScopedConnection {
    conn: Option<Box<dyn Connection>>,
    database_type: DatabaseType,
    label: String,
    opened_at: Instant,
}

impl ScopedConnection {
    /// Wrap an open connection; `label` identifies it in logs
    pub fn new(
        conn: Box<dyn Connection>,
        database_type: DatabaseType,
        label: impl Into<String>,
    ) -> Self {
        Self {
            conn: Some(conn),
            database_type,
            label: label.into(),
            opened_at: Instant::now(),
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_ref()
            .expect("connection already released")
            .as_ref()
    }

    /// Database type the connection was opened for
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Log label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Close the connection now
    pub async fn release(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => {
                debug!(
                    connection = %self.label,
                    held_ms = self.opened_at.elapsed().as_millis() as u64,
                    "Releasing connection"
                );
                conn.close().await
            }
            None => Ok(()),
        }
    }
}

impl std::ops::Deref for ScopedConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl std::fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("database_type", &self.database_type)
            .field("label", &self.label)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let label = std::mem::take(&mut self.label);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = conn.close().await {
                            warn!(connection = %label, "Failed to close dropped connection: {}", e);
                        } else {
                            debug!(connection = %label, "Closed dropped connection");
                        }
                    });
                }
                Err(_) => {
                    warn!(connection = %label, "Connection dropped outside a runtime; not closed");
                }
            }
        }
    }
}
