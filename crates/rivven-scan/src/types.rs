//! Value and metadata types for rivven-scan
//!
//! - `Value`: the SQL values a watermark or query parameter can hold
//! - `Row`: ordered column values returned by a connection
//! - `ColumnMetadata` / `TableMetadata`: what the introspector reports
//! - `ColumnKind`: coarse type family used to decide watermark eligibility

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// SQL value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, CHAR)
    String(String),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Timestamp without timezone (TIMESTAMP, DATETIME)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "VARCHAR",
            Self::Date(_) => "DATE",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Decimal(d) if d.fract().is_zero() => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Date(d) => Some(d.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Null => None,
        }
    }

    /// Compare two values of the same family.
    ///
    /// Integers and decimals compare across widths, a naive timestamp compares
    /// with a date at midnight. Returns `None` for NULL, for mixed families,
    /// and for NaN floats.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::DateTimeTz(a), Self::DateTimeTz(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::DateTime(b)) => Some(a.and_time(NaiveTime::default()).cmp(b)),
            (Self::DateTime(a), Self::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::default()))),
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => None,
            },
        }
    }

    /// Return whichever of the two values is greater, or `None` when they
    /// cannot be compared.
    pub fn max_of(self, other: Value) -> Option<Value> {
        match self.compare(&other)? {
            Ordering::Less => Some(other),
            _ => Some(self),
        }
    }

    fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int32(n) => Some(Decimal::from(*n)),
            Self::Int64(n) => Some(Decimal::from(*n)),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_string() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "NULL"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }
}

/// Coarse type family of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// TINYINT .. BIGINT, SERIAL
    Integer,
    /// DECIMAL / NUMERIC / MONEY
    Decimal,
    /// REAL / FLOAT / DOUBLE
    Float,
    /// CHAR / VARCHAR / TEXT
    Text,
    /// DATE
    Date,
    /// TIMESTAMP / DATETIME with or without time zone
    Timestamp,
    /// TIME of day
    Time,
    /// BOOLEAN / BIT
    Boolean,
    /// BLOB / BYTEA / BINARY
    Binary,
    /// JSON / JSONB / XML
    Document,
    /// Anything else (UUID, arrays, spatial, vendor types)
    Other,
}

impl ColumnKind {
    /// Classify a vendor type name as reported by `information_schema`
    pub fn classify(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();
        let base = base.trim_end_matches(" unsigned");

        match base {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2"
            | "int4" | "int8" | "serial" | "bigserial" | "smallserial" => Self::Integer,
            "decimal" | "numeric" | "number" | "money" | "smallmoney" => Self::Decimal,
            "real" | "float" | "float4" | "float8" | "double" | "double precision"
            | "binary_float" | "binary_double" => Self::Float,
            "char" | "varchar" | "nchar" | "nvarchar" | "varchar2" | "nvarchar2" | "text"
            | "tinytext" | "mediumtext" | "longtext" | "character" | "character varying"
            | "bpchar" | "string" => Self::Text,
            "date" => Self::Date,
            "time" | "time without time zone" | "time with time zone" | "timetz" => Self::Time,
            "boolean" | "bool" | "bit" => Self::Boolean,
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" | "binary" | "varbinary"
            | "image" | "raw" => Self::Binary,
            "json" | "jsonb" | "xml" => Self::Document,
            other if other.starts_with("timestamp")
                || other.starts_with("datetime")
                || other == "smalldatetime" =>
            {
                Self::Timestamp
            }
            _ => Self::Other,
        }
    }

    /// Whether values of this kind increase monotonically and compare totally,
    /// making the column usable as an incremental watermark.
    ///
    /// Floats are excluded: rounding makes strict `>` filters lose rows.
    pub const fn is_watermark_eligible(self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Decimal | Self::Text | Self::Date | Self::Timestamp
        )
    }
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQL type name (vendor-specific)
    pub type_name: String,
    /// Whether column is nullable
    pub nullable: bool,
    /// Primary key ordinal (1-based, None if not PK)
    pub primary_key_ordinal: Option<u32>,
    /// Column ordinal (1-based)
    pub ordinal: u32,
}

impl ColumnMetadata {
    /// Create basic column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            primary_key_ordinal: None,
            ordinal: 0,
        }
    }

    /// Mark the column NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark the column as part of the primary key
    pub fn primary_key(mut self, ordinal: u32) -> Self {
        self.primary_key_ordinal = Some(ordinal);
        self.nullable = false;
        self
    }

    /// Check if this column is part of the primary key
    #[inline]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key_ordinal.is_some()
    }

    /// Type family of this column
    #[inline]
    pub fn kind(&self) -> ColumnKind {
        ColumnKind::classify(&self.type_name)
    }
}

/// Table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Schema (or database for MySQL)
    pub schema: Option<String>,
    /// Table name
    pub name: String,
    /// Column metadata (in ordinal order)
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Create new table metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Set the schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a column, assigning the next ordinal
    pub fn with_column(mut self, mut column: ColumnMetadata) -> Self {
        column.ordinal = self.columns.len() as u32 + 1;
        self.columns.push(column);
        self
    }

    /// Get fully qualified name
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    /// Get column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get primary key columns
    pub fn primary_key_columns(&self) -> Vec<&ColumnMetadata> {
        let mut pk_cols: Vec<_> = self.columns.iter().filter(|c| c.is_primary_key()).collect();
        pk_cols.sort_by_key(|c| c.primary_key_ordinal);
        pk_cols
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_compare_same_family() {
        assert_eq!(
            Value::Int64(5).compare(&Value::Int32(7)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Decimal(Decimal::new(105, 1)).compare(&Value::Int64(10)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_value_compare_mixed_family() {
        assert_eq!(Value::from("10").compare(&Value::Int64(10)), None);
        assert_eq!(Value::Null.compare(&Value::Int64(1)), None);
        assert_eq!(Value::Float64(f64::NAN).compare(&Value::Float64(1.0)), None);
    }

    #[test]
    fn test_value_compare_date_and_timestamp() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let noon = day.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(
            Value::Date(day).compare(&Value::DateTime(noon)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_value_max_of() {
        assert_eq!(
            Value::Int64(3).max_of(Value::Int64(9)),
            Some(Value::Int64(9))
        );
        assert_eq!(Value::Int64(3).max_of(Value::from("x")), None);
    }

    #[test]
    fn test_column_kind_classify() {
        assert_eq!(ColumnKind::classify("BIGINT"), ColumnKind::Integer);
        assert_eq!(ColumnKind::classify("int unsigned"), ColumnKind::Integer);
        assert_eq!(ColumnKind::classify("decimal(10,2)"), ColumnKind::Decimal);
        assert_eq!(ColumnKind::classify("varchar(255)"), ColumnKind::Text);
        assert_eq!(
            ColumnKind::classify("timestamp with time zone"),
            ColumnKind::Timestamp
        );
        assert_eq!(ColumnKind::classify("datetime2"), ColumnKind::Timestamp);
        assert_eq!(ColumnKind::classify("jsonb"), ColumnKind::Document);
        assert_eq!(ColumnKind::classify("uuid"), ColumnKind::Other);
    }

    #[test]
    fn test_watermark_eligibility() {
        assert!(ColumnKind::Timestamp.is_watermark_eligible());
        assert!(ColumnKind::Integer.is_watermark_eligible());
        assert!(ColumnKind::Text.is_watermark_eligible());
        assert!(!ColumnKind::Float.is_watermark_eligible());
        assert!(!ColumnKind::Boolean.is_watermark_eligible());
        assert!(!ColumnKind::Document.is_watermark_eligible());
    }

    #[test]
    fn test_row_operations() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int32(1), Value::String("Alice".into())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int32(1)));
        assert_eq!(
            row.get_by_name("NAME"),
            Some(&Value::String("Alice".into()))
        );
    }

    #[test]
    fn test_table_metadata() {
        let table = TableMetadata::new("users")
            .with_schema("public")
            .with_column(ColumnMetadata::new("id", "integer").primary_key(1))
            .with_column(ColumnMetadata::new("updated_at", "timestamp"));

        assert_eq!(table.qualified_name(), "public.users");
        assert_eq!(table.primary_key_columns().len(), 1);
        assert_eq!(table.column("UPDATED_AT").map(|c| c.ordinal), Some(2));
        assert!(!table.column("id").unwrap().nullable);
    }
}
