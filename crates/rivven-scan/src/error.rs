//! Error types for rivven-scan
//!
//! Errors are classified so callers can decide between retrying and aborting:
//! - Retriable: network failures and timeouts while connecting or describing
//! - Fatal: configuration, unknown credentials, authentication, missing schema
//!   objects, non-comparable watermark columns

use std::fmt;
use thiserror::Error;

/// Result type for rivven-scan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed descriptor, catalog, scan target or config file
    Configuration,
    /// Host not present in the credential catalog
    Credentials,
    /// Connection establishment or session failure
    Connection,
    /// Table or column missing
    Schema,
    /// Watermark column cannot be ordered
    UnsupportedType,
    /// Query execution failed
    Query,
    /// Watermark persistence failed
    WatermarkStore,
    /// Scan was cancelled before commit
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection)
    }
}

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailure {
    /// Network unreachable, connection refused or reset
    Network,
    /// Credentials rejected by the server
    Authentication,
    /// No driver/factory available for the requested dialect
    UnsupportedDriver,
    /// Connect or describe exceeded the caller-supplied timeout
    Timeout,
}

impl ConnectionFailure {
    /// Network failures and timeouts are worth another attempt; the rest are not
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Authentication => write!(f, "authentication"),
            Self::UnsupportedDriver => write!(f, "unsupported driver"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Main error type for rivven-scan
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Malformed descriptor, catalog or scan target
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// No credentials known for the host
    #[error("no credentials for host {host_port} (database {database})")]
    CredentialNotFound { host_port: String, database: String },

    /// Connection failed
    #[error("connection error ({kind}) to {target}: {message}")]
    Connection {
        kind: ConnectionFailure,
        target: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Table not found
    #[error("table not found: {schema}.{table}")]
    SchemaNotFound { schema: String, table: String },

    /// Column not found
    #[error("column not found: {column} in table {table}")]
    ColumnNotFound { table: String, column: String },

    /// Watermark column is not monotonically comparable
    #[error("unsupported watermark column type: {table}.{column} is {type_name}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        type_name: String,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
    },

    /// Watermark persistence failed
    #[error("watermark store error: {message}")]
    WatermarkStore { message: String },

    /// Scan was cancelled before the watermark was committed
    #[error("scan of {table} cancelled")]
    Cancelled { table: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::CredentialNotFound { .. } => ErrorCategory::Credentials,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::SchemaNotFound { .. } | Self::ColumnNotFound { .. } => ErrorCategory::Schema,
            Self::UnsupportedColumnType { .. } => ErrorCategory::UnsupportedType,
            Self::Query { .. } => ErrorCategory::Query,
            Self::WatermarkStore { .. } => ErrorCategory::WatermarkStore,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is retriable
    ///
    /// Only network failures and timeouts qualify; authentication and
    /// unsupported-driver failures are connection errors that abort.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection { kind, .. } => kind.is_retriable(),
            _ => false,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(
        kind: ConnectionFailure,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            kind,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        kind: ConnectionFailure,
        target: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            kind,
            target: target.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network connection error
    pub fn network(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::connection(ConnectionFailure::Network, target, message)
    }

    /// Create an authentication error
    pub fn authentication(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::connection(ConnectionFailure::Authentication, target, message)
    }

    /// Create a timeout error
    pub fn timeout(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::connection(ConnectionFailure::Timeout, target, message)
    }

    /// Create an unsupported-driver error
    pub fn unsupported_driver(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::connection(ConnectionFailure::UnsupportedDriver, target, message)
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a watermark store error
    pub fn watermark_store(message: impl Into<String>) -> Self {
        Self::WatermarkStore {
            message: message.into(),
        }
    }

    /// The connection failure kind, if this is a connection error
    pub fn connection_failure(&self) -> Option<ConnectionFailure> {
        match self {
            Self::Connection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Credentials => write!(f, "credentials"),
            Self::Connection => write!(f, "connection"),
            Self::Schema => write!(f, "schema"),
            Self::UnsupportedType => write!(f, "unsupported_type"),
            Self::Query => write!(f, "query"),
            Self::WatermarkStore => write!(f, "watermark_store"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
