//! Metadata introspection
//!
//! [`MetadataIntrospector`] opens connections from a [`ConnectionDescriptor`]
//! and reads column metadata through the dialect's `information_schema`
//! query. Both steps run under a timeout and are retried with backoff when
//! the failure is retriable. Connections are handed back as
//! [`ScopedConnection`] guards and never kept by the introspector.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::connection::{ConnectionFactory, ScopedConnection};
use crate::descriptor::ConnectionDescriptor;
use crate::dialect::{dialect_for, SqlDialect};
use crate::error::{Error, Result};
use crate::retry::{retry, RetryConfig};
use crate::types::{ColumnMetadata, Row, TableMetadata};

/// Timeouts applied to each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Connection establishment
    pub connect: Duration,
    /// Metadata description
    pub describe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            describe: Duration::from_secs(30),
        }
    }
}

/// Opens connections and describes tables
pub struct MetadataIntrospector {
    factory: Arc<dyn ConnectionFactory>,
    retry: RetryConfig,
    timeouts: Timeouts,
}

impl MetadataIntrospector {
    /// Create an introspector with default retry and timeouts
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            retry: RetryConfig::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry policy
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Timeouts
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Open a connection for a descriptor.
    ///
    /// Unsupported drivers and authentication failures are returned at once;
    /// network failures and timeouts are retried.
    pub async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<ScopedConnection> {
        let database_type = descriptor.database_type();
        let host_port = descriptor.host_port();

        if !self.factory.supports(database_type) {
            return Err(Error::unsupported_driver(
                host_port,
                format!(
                    "no driver registered for {} ({})",
                    database_type,
                    descriptor.driver_class_name()
                ),
            ));
        }

        let connect_timeout = self.timeouts.connect;
        let factory = self.factory.as_ref();
        let target = host_port.as_str();
        let conn = retry(&self.retry, "open", move || async move {
            match tokio::time::timeout(connect_timeout, factory.connect(descriptor)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(
                    target,
                    format!("connect timed out after {:?}", connect_timeout),
                )),
            }
        })
        .await?;

        let label = match descriptor.table_name() {
            Some(table) => format!("{}/{}", host_port, table),
            None => host_port.clone(),
        };
        info!(
            host_port = %host_port,
            database_type = %database_type,
            url = %descriptor.redacted_url(),
            "Opened connection"
        );
        Ok(ScopedConnection::new(conn, database_type, label))
    }

    /// Describe a table's columns in ordinal order.
    ///
    /// Fails with `SchemaNotFound` when the table has no visible columns.
    pub async fn describe_table(
        &self,
        conn: &ScopedConnection,
        schema: Option<&str>,
        table: &str,
    ) -> Result<TableMetadata> {
        let dialect = dialect_for(conn.database_type());
        let dialect = dialect.as_ref();
        let describe_timeout = self.timeouts.describe;
        let label = conn.label();

        let metadata = retry(&self.retry, "describe", move || async move {
            match tokio::time::timeout(describe_timeout, describe_once(conn, dialect, schema, table))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(
                    label,
                    format!("describe {} timed out after {:?}", table, describe_timeout),
                )),
            }
        })
        .await?;

        debug!(
            table = %metadata.qualified_name(),
            columns = metadata.columns.len(),
            "Described table"
        );
        Ok(metadata)
    }

    /// Whether the table is visible to the connection's user
    pub async fn table_exists(
        &self,
        conn: &ScopedConnection,
        schema: Option<&str>,
        table: &str,
    ) -> Result<bool> {
        let sql = dialect_for(conn.database_type()).table_exists_sql(schema, table);
        let row = conn.query_one(&sql, &[]).await?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get(0))
            .and_then(|v| v.as_bool().or_else(|| v.as_i64().map(|n| n > 0)))
            .unwrap_or(false))
    }
}

async fn describe_once(
    conn: &ScopedConnection,
    dialect: &dyn SqlDialect,
    schema: Option<&str>,
    table: &str,
) -> Result<TableMetadata> {
    let sql = dialect.list_columns_sql(schema, table);
    let rows = conn.query(&sql, &[]).await?;

    if rows.is_empty() {
        return Err(Error::SchemaNotFound {
            schema: schema.unwrap_or_default().to_string(),
            table: table.to_string(),
        });
    }

    let mut metadata = TableMetadata::new(table);
    if let Some(s) = schema {
        metadata = metadata.with_schema(s);
    }
    for row in &rows {
        metadata = metadata.with_column(column_from_row(row, &sql)?);
    }
    Ok(metadata)
}

/// Map one `list_columns_sql` row to column metadata
fn column_from_row(row: &Row, sql: &str) -> Result<ColumnMetadata> {
    let text = |name: &str| {
        row.get_by_name(name)
            .and_then(|v| v.as_string())
            .ok_or_else(|| {
                Error::query_with_sql(format!("column listing is missing '{}'", name), sql)
            })
    };

    let mut column = ColumnMetadata::new(text("column_name")?, text("data_type")?);
    column.nullable = row
        .get_by_name("nullable")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let pk_ordinal = row
        .get_by_name("pk_ordinal")
        .and_then(|v| v.as_i64())
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0);
    if let Some(ordinal) = pk_ordinal {
        column = column.primary_key(ordinal);
    }
    Ok(column)
}
