//! # rivven-scan
//!
//! Metadata scanning and incremental extraction planning over JDBC-style
//! relational sources.
//!
//! The crate resolves credentials for a scan target, opens a connection
//! through a pluggable [`ConnectionFactory`](connection::ConnectionFactory),
//! reads the table's column metadata, plans either a full snapshot or a
//! `column > last watermark` scan, and commits the new high watermark once the
//! plan's result set was consumed.
//!
//! ## Features
//!
//! - **Credential catalog**: `jdbc-user-password.json` with per-database overrides and atomic reload
//! - **Dialects**: PostgreSQL, MySQL, MariaDB, SQL Server and Oracle metadata queries and paging
//! - **Retries**: exponential backoff with jitter for connect and describe, bounded by timeouts
//! - **Watermarks**: in-memory or file-backed store, per-key serialization, no regression
//! - **Scanner**: many tables concurrently, per-table outcome, cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_scan::prelude::*;
//!
//! let config = ScannerConfig::from_file("scanner.yaml").await?;
//! let scanner = Scanner::new(
//!     config.load_credentials().await?,
//!     Arc::new(MyDriverFactory::default()),
//!     config.watermark_store().await?,
//!     Arc::new(StreamingExecutor::new(sink, config.batch_size)),
//! )
//! .with_retry(config.retry_config())
//! .with_timeouts(config.timeouts())
//! .with_max_concurrent_scans(config.max_concurrent_scans);
//!
//! let target = ScanTarget::from_json(r#"{
//!     "dbType": "mysql", "host": "db1", "database": "sales",
//!     "tableName": "orders", "updateAll": 0,
//!     "updateColumnDependency": "gmt_modified"
//! }"#)?;
//!
//! for outcome in scanner.scan_all([target]).await {
//!     println!("{}: {:?}", outcome.target, outcome.result.map(|s| s.rows));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod credentials;
pub mod descriptor;
pub mod dialect;
pub mod error;
pub mod introspect;
pub mod job;
pub mod planner;
pub mod render;
pub mod retry;
pub mod secret;
pub mod security;
pub mod target;
pub mod testing;
pub mod types;
pub mod watermark;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{ConnectionFailure, Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnKind, ColumnMetadata, Row, TableMetadata, Value};

    // Descriptors, credentials and targets
    pub use crate::credentials::{CredentialStore, Credentials, SharedCredentialStore};
    pub use crate::descriptor::{ConnectionDescriptor, DatabaseType};
    pub use crate::secret::SensitiveString;
    pub use crate::target::{ScanRequest, ScanTarget, UpdateMode};

    // Connections and dialects
    pub use crate::connection::{
        Connection, ConnectionFactory, RowStream, ScopedConnection, VecRowStream,
    };
    pub use crate::dialect::{
        dialect_for, MariaDbDialect, MySqlDialect, OracleDialect, PostgresDialect, SqlDialect,
        SqlServerDialect,
    };

    // Introspection and planning
    pub use crate::introspect::{MetadataIntrospector, Timeouts};
    pub use crate::planner::{plan_scan, ExtractionPlanner, PlanKind, QueryPlan, ScanLease};
    pub use crate::render::{render_page, render_plan};
    pub use crate::retry::{retry, RetryConfig};
    pub use crate::watermark::{
        FileWatermarkStore, KeyedLocks, MemoryWatermarkStore, Watermark, WatermarkKey,
        WatermarkStore,
    };

    // Jobs and configuration
    pub use crate::config::{RetryPolicyConfig, ScannerConfig};
    pub use crate::job::{
        ExecutionReport, PlanExecutor, RowSink, ScanJob, ScanOutcome, ScanSummary, Scanner,
        StreamingExecutor,
    };
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use secret::SensitiveString;
pub use types::Value;
