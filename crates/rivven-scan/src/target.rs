//! Scan targets
//!
//! A [`ScanTarget`] is one unit of scan work: which table on which host, and
//! whether the run is a full reload or incremental on a watermark column.
//!
//! Scan requests arrive as JSON in the shape external callers already send:
//!
//! ```json
//! {
//!   "jobId": "nightly-42",
//!   "dbType": "mysql",
//!   "host": "db1.internal",
//!   "port": "3306",
//!   "database": "sales",
//!   "tableName": "orders",
//!   "updateAll": 0,
//!   "updateColumnDependency": "gmt_modified"
//! }
//! ```
//!
//! `updateAll == 1` means full reload; any other value (or absence) means
//! incremental. Deserialization runs the same validation as the builder, so a
//! `ScanTarget` that exists is always valid.

use serde::{Deserialize, Serialize};

use crate::descriptor::DatabaseType;
use crate::error::{Error, Result};
use crate::security::validate_sql_identifier;
use crate::watermark::WatermarkKey;

/// Fields common to every scan request, whatever the source kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Caller-assigned job identifier, echoed in logs and reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// How rows are selected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateMode {
    /// Full snapshot; the column, if any, still yields a watermark to commit
    Full {
        /// Optional watermark column
        column: Option<String>,
    },
    /// Only rows beyond the last committed watermark
    Incremental {
        /// Watermark column
        column: String,
    },
}

impl UpdateMode {
    /// Watermark column, if any
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Full { column } => column.as_deref(),
            Self::Incremental { column } => Some(column),
        }
    }

    /// Whether this is a full reload
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

/// A validated scan target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScanTarget", into = "RawScanTarget")]
pub struct ScanTarget {
    request: ScanRequest,
    db_type: DatabaseType,
    host: String,
    port: u16,
    schema: Option<String>,
    database: Option<String>,
    table_name: String,
    mode: UpdateMode,
}

impl ScanTarget {
    /// Start building a target
    pub fn builder(
        db_type: impl Into<String>,
        host: impl Into<String>,
        table_name: impl Into<String>,
    ) -> ScanTargetBuilder {
        ScanTargetBuilder {
            raw: RawScanTarget {
                request: ScanRequest::default(),
                db_type: db_type.into(),
                host: host.into(),
                port: None,
                schema: None,
                database: None,
                table_name: table_name.into(),
                update_all: None,
                update_column_dependency: None,
            },
        }
    }

    /// Parse and validate a JSON scan request
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawScanTarget = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid scan request: {}", e)))?;
        Self::try_from(raw)
    }

    /// Common request fields
    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// Dialect
    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port (dialect default when the request left it empty)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, the credential catalog key
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Schema (equal to database for MySQL-family targets)
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Database (equal to schema for MySQL-family targets)
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Schema used for metadata lookups and SELECTs.
    ///
    /// MySQL-family targets use the database; others use the schema only and
    /// leave the default (`public`, `dbo`, the login user) to the dialect.
    pub fn effective_schema(&self) -> Option<&str> {
        if self.db_type.is_mysql_family() {
            self.schema().or(self.database())
        } else {
            self.schema()
        }
    }

    /// Table name
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Selection mode
    pub fn mode(&self) -> &UpdateMode {
        &self.mode
    }

    /// Whether this is a full reload
    pub fn update_all(&self) -> bool {
        self.mode.is_full()
    }

    /// Watermark column, if any
    pub fn update_column_dependency(&self) -> Option<&str> {
        self.mode.column()
    }

    /// Key under which this target's watermark is stored
    pub fn watermark_key(&self) -> Option<WatermarkKey> {
        self.mode
            .column()
            .map(|column| {
                WatermarkKey::new(self.watermark_scope(), self.table_name.clone(), column)
            })
    }

    /// `host:port[/database][/schema]`, database omitted when it is the schema
    fn watermark_scope(&self) -> String {
        let mut scope = self.host_port();
        let schema = self.effective_schema();
        if let Some(db) = self.database().filter(|db| Some(*db) != schema) {
            scope.push('/');
            scope.push_str(db);
        }
        if let Some(schema) = schema {
            scope.push('/');
            scope.push_str(schema);
        }
        scope
    }

    /// Short label for logs: `host:port/schema.table`
    pub fn label(&self) -> String {
        match self.effective_schema() {
            Some(s) => format!("{}/{}.{}", self.host_port(), s, self.table_name),
            None => format!("{}/{}", self.host_port(), self.table_name),
        }
    }
}

/// Builder for [`ScanTarget`]
#[derive(Debug, Clone)]
pub struct ScanTargetBuilder {
    raw: RawScanTarget,
}

impl ScanTargetBuilder {
    /// Set job id
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.raw.request.job_id = Some(id.into());
        self
    }

    /// Set port
    pub fn port(mut self, port: u16) -> Self {
        self.raw.port = Some(PortValue::Number(port));
        self
    }

    /// Set schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.raw.schema = Some(schema.into());
        self
    }

    /// Set database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.raw.database = Some(database.into());
        self
    }

    /// Full reload
    pub fn update_all(mut self, full: bool) -> Self {
        self.raw.update_all = Some(FlagValue::Bool(full));
        self
    }

    /// Watermark column
    pub fn update_column_dependency(mut self, column: impl Into<String>) -> Self {
        self.raw.update_column_dependency = Some(column.into());
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<ScanTarget> {
        ScanTarget::try_from(self.raw)
    }
}

/// Wire shape of a scan request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScanTarget {
    #[serde(flatten)]
    request: ScanRequest,
    db_type: String,
    host: String,
    #[serde(default)]
    port: Option<PortValue>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    database: Option<String>,
    table_name: String,
    #[serde(default)]
    update_all: Option<FlagValue>,
    #[serde(default)]
    update_column_dependency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FlagValue {
    /// `1` (or `true`) means full reload; everything else is incremental
    fn is_full(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n == 1,
            Self::Text(s) => s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
        }
    }
}

impl TryFrom<RawScanTarget> for ScanTarget {
    type Error = Error;

    fn try_from(raw: RawScanTarget) -> Result<Self> {
        let db_type: DatabaseType = raw.db_type.parse()?;

        let host = raw.host.trim().to_string();
        if host.is_empty() {
            return Err(Error::config(format!(
                "scan target {}: host must not be empty",
                raw.table_name
            )));
        }

        let port = match raw.port {
            None => db_type.default_port(),
            Some(PortValue::Number(p)) => p,
            Some(PortValue::Text(s)) if s.trim().is_empty() => db_type.default_port(),
            Some(PortValue::Text(s)) => s.trim().parse().map_err(|_| {
                Error::config(format!("scan target {}: invalid port '{}'", host, s))
            })?,
        };

        let table_name = raw.table_name.trim().to_string();
        validate_sql_identifier(&table_name)?;

        let non_empty = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let mut schema = non_empty(raw.schema);
        let mut database = non_empty(raw.database);
        for ident in [&schema, &database].into_iter().flatten() {
            validate_sql_identifier(ident)?;
        }

        if db_type.is_mysql_family() {
            match (&schema, &database) {
                (Some(s), Some(d)) if s != d => {
                    return Err(Error::config(format!(
                        "scan target {}: {} schema '{}' must equal database '{}'",
                        table_name, db_type, s, d
                    )));
                }
                (Some(s), None) => database = Some(s.clone()),
                (None, Some(d)) => schema = Some(d.clone()),
                _ => {}
            }
        }

        let column = non_empty(raw.update_column_dependency);
        if let Some(c) = &column {
            validate_sql_identifier(c)?;
        }

        let full = raw.update_all.as_ref().is_some_and(FlagValue::is_full);
        let mode = if full {
            UpdateMode::Full { column }
        } else {
            match column {
                Some(column) => UpdateMode::Incremental { column },
                None => {
                    return Err(Error::config(format!(
                        "scan target {}: incremental scan requires updateColumnDependency",
                        table_name
                    )));
                }
            }
        };

        Ok(Self {
            request: raw.request,
            db_type,
            host,
            port,
            schema,
            database,
            table_name,
            mode,
        })
    }
}

impl From<ScanTarget> for RawScanTarget {
    fn from(target: ScanTarget) -> Self {
        let full = target.mode.is_full();
        let column = target.mode.column().map(str::to_string);
        Self {
            request: target.request,
            db_type: target.db_type.as_str().to_string(),
            host: target.host,
            port: Some(PortValue::Number(target.port)),
            schema: target.schema,
            database: target.database,
            table_name: target.table_name,
            update_all: Some(FlagValue::Int(if full { 1 } else { 0 })),
            update_column_dependency: column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_target_from_json() {
        let json = r#"{
            "jobId": "job-1",
            "dbType": "mysql",
            "host": "db1",
            "port": "3307",
            "database": "sales",
            "tableName": "orders",
            "updateAll": 0,
            "updateColumnDependency": "gmt_modified"
        }"#;
        let target = ScanTarget::from_json(json).unwrap();

        assert_eq!(target.db_type(), DatabaseType::MySQL);
        assert_eq!(target.port(), 3307);
        assert_eq!(target.host_port(), "db1:3307");
        assert_eq!(target.schema(), Some("sales"));
        assert!(!target.update_all());
        assert_eq!(target.update_column_dependency(), Some("gmt_modified"));
        assert_eq!(target.request().job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_update_all_flag_values() {
        let full = r#"{"dbType":"postgres","host":"pg","tableName":"t","updateAll":1}"#;
        assert!(ScanTarget::from_json(full).unwrap().update_all());

        let other = r#"{"dbType":"postgres","host":"pg","tableName":"t","updateAll":2,
                        "updateColumnDependency":"id"}"#;
        assert!(!ScanTarget::from_json(other).unwrap().update_all());
    }

    #[test]
    fn test_incremental_requires_column() {
        let err = ScanTarget::builder("postgres", "pg", "events")
            .update_all(false)
            .update_column_dependency("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let json = r#"{"dbType":"postgres","host":"pg","tableName":"events"}"#;
        assert!(ScanTarget::from_json(json).is_err());
    }

    #[test]
    fn test_default_port() {
        let target = ScanTarget::builder("postgres", "pg", "events")
            .update_all(true)
            .build()
            .unwrap();
        assert_eq!(target.port(), 5432);
        assert!(target.watermark_key().is_none());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let json = r#"{"dbType":"mysql","host":"db","port":"abc","tableName":"t","updateAll":1}"#;
        assert!(ScanTarget::from_json(json).is_err());
    }

    #[test]
    fn test_mysql_schema_database_unified() {
        let target = ScanTarget::builder("mysql", "db", "orders")
            .schema("sales")
            .update_all(true)
            .build()
            .unwrap();
        assert_eq!(target.database(), Some("sales"));

        assert!(ScanTarget::builder("mysql", "db", "orders")
            .schema("a")
            .database("b")
            .update_all(true)
            .build()
            .is_err());
    }

    #[test]
    fn test_serialize_roundtrip_keeps_wire_shape() {
        let target = ScanTarget::builder("postgres", "pg", "events")
            .schema("public")
            .update_column_dependency("ts")
            .build()
            .unwrap();
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["dbType"], "postgres");
        assert_eq!(json["tableName"], "events");
        assert_eq!(json["updateAll"], 0);

        let back: ScanTarget = serde_json::from_value(json).unwrap();
        assert_eq!(back, target);
    }

    #[test]
    fn test_watermark_key_and_label() {
        let target = ScanTarget::builder("postgres", "pg", "events")
            .schema("public")
            .update_column_dependency("ts")
            .build()
            .unwrap();
        let key = target.watermark_key().unwrap();
        assert_eq!(key.scope, "pg:5432/public");
        assert_eq!(key.table, "events");
        assert_eq!(key.column, "ts");
        assert_eq!(target.label(), "pg:5432/public.events");
    }

    #[test]
    fn test_watermark_key_scoped_by_server_and_schema() {
        let key = |target: ScanTargetBuilder| target.build().unwrap().watermark_key().unwrap();

        let sales = key(ScanTarget::builder("mysql", "db1", "orders")
            .database("sales")
            .update_column_dependency("gmt_modified"));
        let billing = key(ScanTarget::builder("mysql", "db2", "orders")
            .database("billing")
            .update_column_dependency("gmt_modified"));
        assert_eq!(sales.scope, "db1:3306/sales");
        assert_eq!(billing.scope, "db2:3306/billing");
        assert_ne!(sales, billing);

        let shop = key(ScanTarget::builder("postgres", "pg", "orders")
            .database("shop")
            .schema("public")
            .update_column_dependency("ts"));
        let crm = key(ScanTarget::builder("postgres", "pg", "orders")
            .database("crm")
            .schema("public")
            .update_column_dependency("ts"));
        assert_eq!(shop.scope, "pg:5432/shop/public");
        assert_ne!(shop, crm);
    }
}
