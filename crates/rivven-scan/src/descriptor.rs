//! Connection descriptors
//!
//! A [`ConnectionDescriptor`] is the immutable record of how to reach one
//! database/schema/table: driver class, JDBC URL, credentials and the logical
//! names. It is built once per scan job, either through
//! [`ConnectionDescriptor::builder`] or derived from a [`ScanTarget`] and the
//! credentials resolved for it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::secret::SensitiveString;
use crate::security::validate_sql_identifier;
use crate::target::ScanTarget;

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// MySQL
    MySQL,
    /// MariaDB
    MariaDB,
    /// PostgreSQL
    PostgreSQL,
    /// SQL Server
    SqlServer,
    /// Oracle
    Oracle,
}

impl DatabaseType {
    /// Whether schema and database name the same thing for this dialect
    #[inline]
    pub const fn is_mysql_family(self) -> bool {
        matches!(self, Self::MySQL | Self::MariaDB)
    }

    /// Driver class conventionally used for this dialect
    pub const fn default_driver_class(self) -> &'static str {
        match self {
            Self::MySQL => "com.mysql.cj.jdbc.Driver",
            Self::MariaDB => "org.mariadb.jdbc.Driver",
            Self::PostgreSQL => "org.postgresql.Driver",
            Self::SqlServer => "com.microsoft.sqlserver.jdbc.SQLServerDriver",
            Self::Oracle => "oracle.jdbc.OracleDriver",
        }
    }

    /// Default listening port
    pub const fn default_port(self) -> u16 {
        match self {
            Self::MySQL | Self::MariaDB => 3306,
            Self::PostgreSQL => 5432,
            Self::SqlServer => 1433,
            Self::Oracle => 1521,
        }
    }

    /// Lower-case name used in scan requests and configuration
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MySQL => "mysql",
            Self::MariaDB => "mariadb",
            Self::PostgreSQL => "postgres",
            Self::SqlServer => "sqlserver",
            Self::Oracle => "oracle",
        }
    }

    /// Build the JDBC URL for a host, port and database
    pub fn jdbc_url(self, host: &str, port: u16, database: Option<&str>) -> String {
        let db = database.unwrap_or("");
        match self {
            Self::MySQL => format!("jdbc:mysql://{}:{}/{}", host, port, db),
            Self::MariaDB => format!("jdbc:mariadb://{}:{}/{}", host, port, db),
            Self::PostgreSQL => format!("jdbc:postgresql://{}:{}/{}", host, port, db),
            Self::SqlServer if db.is_empty() => format!("jdbc:sqlserver://{}:{}", host, port),
            Self::SqlServer => format!("jdbc:sqlserver://{}:{};databaseName={}", host, port, db),
            Self::Oracle => format!("jdbc:oracle:thin:@//{}:{}/{}", host, port, db),
        }
    }
}

impl FromStr for DatabaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Self::MySQL),
            "mariadb" => Ok(Self::MariaDB),
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSQL),
            "sqlserver" | "mssql" | "sql server" => Ok(Self::SqlServer),
            "oracle" => Ok(Self::Oracle),
            other => Err(Error::config(format!(
                "unrecognized database type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySQL => write!(f, "MySQL"),
            Self::MariaDB => write!(f, "MariaDB"),
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Oracle => write!(f, "Oracle"),
        }
    }
}

/// How to reach one database/schema/table
///
/// Equality and hashing use `(url, schema, table_name)` only, so descriptors
/// can key connection or metadata caches regardless of credentials.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    driver_class_name: String,
    url: String,
    user: String,
    password: SensitiveString,
    database_type: DatabaseType,
    table_name: Option<String>,
    schema: Option<String>,
    database: Option<String>,
}

impl ConnectionDescriptor {
    /// Start building a descriptor
    pub fn builder() -> DescriptorBuilder {
        DescriptorBuilder::default()
    }

    /// Derive a descriptor from a scan target and its resolved credentials
    pub fn from_target(target: &ScanTarget, credentials: &Credentials) -> Result<Self> {
        let db_type = target.db_type();
        Self::builder()
            .driver_class_name(db_type.default_driver_class())
            .url(db_type.jdbc_url(target.host(), target.port(), target.database()))
            .database_type(db_type.as_str())
            .user(credentials.user.clone())
            .password(credentials.password.clone())
            .table_name(target.table_name())
            .schema_opt(target.schema().map(str::to_string))
            .database_opt(target.database().map(str::to_string))
            .build()
    }

    /// Driver class name (identifies the dialect driver)
    pub fn driver_class_name(&self) -> &str {
        &self.driver_class_name
    }

    /// JDBC URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// User name
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password
    pub fn password(&self) -> &SensitiveString {
        &self.password
    }

    /// Dialect
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Table name
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    /// Schema (equal to database for MySQL-family dialects)
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Database (equal to schema for MySQL-family dialects)
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// `host:port` portion of the URL, used in error context and logs
    pub fn host_port(&self) -> String {
        host_port_of(&self.url).unwrap_or_else(|| "unknown".to_string())
    }

    /// URL with any embedded password replaced by `***`
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

impl PartialEq for ConnectionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url && self.schema == other.schema && self.table_name == other.table_name
    }
}

impl Eq for ConnectionDescriptor {}

impl Hash for ConnectionDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
        self.schema.hash(state);
        self.table_name.hash(state);
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("driver_class_name", &self.driver_class_name)
            .field("url", &self.redacted_url())
            .field("user", &self.user)
            .field("password", &self.password)
            .field("database_type", &self.database_type)
            .field("table_name", &self.table_name)
            .field("schema", &self.schema)
            .field("database", &self.database)
            .finish()
    }
}

/// Builder for [`ConnectionDescriptor`]
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    driver_class_name: String,
    url: String,
    user: String,
    password: Option<SensitiveString>,
    database_type: String,
    table_name: Option<String>,
    schema: Option<String>,
    database: Option<String>,
}

impl DescriptorBuilder {
    /// Set driver class name
    pub fn driver_class_name(mut self, name: impl Into<String>) -> Self {
        self.driver_class_name = name.into();
        self
    }

    /// Set JDBC URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set user
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set password
    pub fn password(mut self, password: impl Into<SensitiveString>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set database type name (`mysql`, `postgres`, ...)
    pub fn database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = db_type.into();
        self
    }

    /// Set table name
    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    /// Set schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    fn schema_opt(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    fn database_opt(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    /// Validate and build.
    ///
    /// Fails with a configuration error when the driver class or URL is empty,
    /// the database type is unknown, an identifier is malformed, or a
    /// MySQL-family descriptor names different schema and database.
    pub fn build(self) -> Result<ConnectionDescriptor> {
        if self.driver_class_name.trim().is_empty() {
            return Err(Error::config("driver class name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(Error::config("connection url must not be empty"));
        }
        let database_type: DatabaseType = self.database_type.parse()?;

        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let table_name = non_empty(self.table_name);
        let mut schema = non_empty(self.schema);
        let mut database = non_empty(self.database);

        for ident in [&table_name, &schema, &database].into_iter().flatten() {
            validate_sql_identifier(ident)?;
        }

        if database_type.is_mysql_family() {
            match (&schema, &database) {
                (Some(s), Some(d)) if s != d => {
                    return Err(Error::config(format!(
                        "{} schema '{}' must equal database '{}'",
                        database_type, s, d
                    )));
                }
                (Some(s), None) => database = Some(s.clone()),
                (None, Some(d)) => schema = Some(d.clone()),
                _ => {}
            }
        }

        Ok(ConnectionDescriptor {
            driver_class_name: self.driver_class_name,
            url: self.url,
            user: self.user,
            password: self.password.unwrap_or_else(|| SensitiveString::new("")),
            database_type,
            table_name,
            schema,
            database,
        })
    }
}

/// Extract `host:port` from a JDBC or plain URL
fn host_port_of(url: &str) -> Option<String> {
    let rest = url.strip_prefix("jdbc:").unwrap_or(url);
    let after = &rest[rest.find("//")? + 2..];
    let authority = after
        .split(|c| c == '/' || c == ';' || c == '?')
        .next()
        .unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    if host_port.is_empty() {
        None
    } else {
        Some(host_port.to_string())
    }
}

fn redact_url(raw: &str) -> String {
    let (prefix, rest) = match raw.strip_prefix("jdbc:") {
        Some(rest) => ("jdbc:", rest),
        None => ("", raw),
    };
    match url::Url::parse(rest) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            format!("{}{}", prefix, parsed)
        }
        Err(_) => format!("{}***", prefix),
    }
}
