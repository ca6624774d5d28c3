//! SQL dialects for metadata queries and scan SELECTs
//!
//! PostgreSQL and MySQL/MariaDB SELECTs are built with sea-query; SQL Server
//! and Oracle have no sea-query backend and are rendered by hand.
//!
//! Every `list_columns_sql` returns the same result shape, in ordinal order:
//!
//! | column | meaning |
//! |--------|---------|
//! | `column_name` | column name |
//! | `data_type` | vendor type name |
//! | `nullable` | boolean-like (`true`/`1`/`'YES'`/`'Y'`) |
//! | `pk_ordinal` | 1-based position in the primary key, NULL otherwise |

use crate::descriptor::DatabaseType;
use crate::security::escape_string_literal;
use sea_query::{
    Alias, Asterisk, Expr, IntoIden, MysqlQueryBuilder, Order, PostgresQueryBuilder, Query,
    SelectStatement, TableRef,
};

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn sea_select(
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    where_clause: Option<&str>,
    order_by: Option<&[(&str, bool)]>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(sea_table_ref(schema, table));

    if columns.is_empty() {
        stmt.column(Asterisk);
    } else {
        for col in columns {
            stmt.column(Alias::new(*col));
        }
    }

    if let Some(w) = where_clause {
        stmt.and_where(Expr::cust(w));
    }

    for (col, asc) in order_by.unwrap_or_default() {
        stmt.order_by(
            Alias::new(*col),
            if *asc { Order::Asc } else { Order::Desc },
        );
    }

    if let Some(l) = limit {
        stmt.limit(l);
    }
    if let Some(o) = offset {
        stmt.offset(o);
    }
    stmt
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a 1-based parameter index (e.g., $1, ?, @p1)
    fn placeholder(&self, index: usize) -> String;

    /// Get the SQL for checking table existence (one row, one boolean-like column)
    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Get the SQL for listing columns
    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Get the LIMIT/OFFSET syntax
    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String;

    /// Build a SELECT statement
    #[allow(clippy::too_many_arguments)]
    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String;
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = '{}' AND table_name = '{}')",
            schema, table
        )
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                c.column_name,
                c.data_type,
                c.is_nullable = 'YES' as nullable,
                pk.ordinal_position as pk_ordinal
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT ku.column_name, ku.ordinal_position
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage ku
                    ON tc.constraint_name = ku.constraint_name
                    AND tc.table_schema = ku.table_schema
                    AND tc.table_name = ku.table_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = '{schema}'
                    AND tc.table_name = '{table}'
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_schema = '{schema}' AND c.table_name = '{table}'
            ORDER BY c.ordinal_position"#
        )
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(l) = limit {
            sql.push_str(&format!(" LIMIT {}", l));
        }
        if let Some(o) = offset {
            sql.push_str(&format!(" OFFSET {}", o));
        }
        sql
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        sea_select(schema, table, columns, where_clause, order_by, limit, offset)
            .to_string(PostgresQueryBuilder)
    }
}

// ===========================================================================
// MySQL
// ===========================================================================

/// MySQL dialect. The schema argument is the database name.
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE {} AND table_name = '{}')",
            mysql_schema_filter("table_schema", schema),
            escape_string_literal(table)
        )
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            r#"SELECT
                c.column_name AS column_name,
                c.data_type AS data_type,
                c.is_nullable = 'YES' AS nullable,
                k.ordinal_position AS pk_ordinal
            FROM information_schema.columns c
            LEFT JOIN information_schema.key_column_usage k
                ON k.table_schema = c.table_schema
                AND k.table_name = c.table_name
                AND k.column_name = c.column_name
                AND k.constraint_name = 'PRIMARY'
            WHERE {} AND c.table_name = '{}'
            ORDER BY c.ordinal_position"#,
            mysql_schema_filter("c.table_schema", schema),
            escape_string_literal(table)
        )
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            // MySQL has no OFFSET without LIMIT
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {}", o),
            (None, None) => String::new(),
        }
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        sea_select(schema, table, columns, where_clause, order_by, limit, offset)
            .to_string(MysqlQueryBuilder)
    }
}

fn mysql_schema_filter(column: &str, schema: Option<&str>) -> String {
    match schema {
        Some(db) => format!("{} = '{}'", column, escape_string_literal(db)),
        None => format!("{} = DATABASE()", column),
    }
}

// ===========================================================================
// MariaDB
// ===========================================================================

/// MariaDB dialect; identical to MySQL for everything the scanner issues
#[derive(Debug, Clone, Default)]
pub struct MariaDbDialect;

impl SqlDialect for MariaDbDialect {
    fn name(&self) -> &'static str {
        "MariaDB"
    }

    fn quote_identifier(&self, name: &str) -> String {
        MySqlDialect.quote_identifier(name)
    }

    fn placeholder(&self, index: usize) -> String {
        MySqlDialect.placeholder(index)
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        MySqlDialect.table_exists_sql(schema, table)
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        MySqlDialect.list_columns_sql(schema, table)
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        MySqlDialect.limit_offset_sql(limit, offset)
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        MySqlDialect.build_select(schema, table, columns, where_clause, order_by, limit, offset)
    }
}

// ===========================================================================
// SQL Server (manual SQL)
// ===========================================================================

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("dbo"));
        let table = escape_string_literal(table);
        format!(
            "SELECT CASE WHEN EXISTS(SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}') THEN 1 ELSE 0 END",
            schema, table
        )
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("dbo"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                c.COLUMN_NAME as column_name,
                c.DATA_TYPE as data_type,
                CASE c.IS_NULLABLE WHEN 'YES' THEN 1 ELSE 0 END as nullable,
                pk.ORDINAL_POSITION as pk_ordinal
            FROM INFORMATION_SCHEMA.COLUMNS c
            LEFT JOIN (
                SELECT ku.COLUMN_NAME, ku.ORDINAL_POSITION
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                    AND tc.TABLE_SCHEMA = '{schema}'
                    AND tc.TABLE_NAME = '{table}'
            ) pk ON c.COLUMN_NAME = pk.COLUMN_NAME
            WHERE c.TABLE_SCHEMA = '{schema}' AND c.TABLE_NAME = '{table}'
            ORDER BY c.ORDINAL_POSITION"#
        )
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        // OFFSET-FETCH requires ORDER BY
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", o, l),
            (Some(l), None) => format!(" OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY", l),
            (None, Some(o)) => format!(" OFFSET {} ROWS", o),
            (None, None) => String::new(),
        }
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let mut sql = manual_select(self, schema, table, columns, where_clause);
        match order_by.filter(|o| !o.is_empty()) {
            Some(orders) => sql.push_str(&order_clause(self, orders)),
            None if limit.is_some() || offset.is_some() => sql.push_str(" ORDER BY (SELECT NULL)"),
            None => {}
        }
        sql.push_str(&self.limit_offset_sql(limit, offset));
        sql
    }
}

// ===========================================================================
// Oracle (manual SQL, 12c+ row limiting)
// ===========================================================================

/// Oracle dialect. Without an explicit schema the connected user's schema is used.
#[derive(Debug, Clone, Default)]
pub struct OracleDialect;

impl OracleDialect {
    fn owner_filter(column: &str, schema: Option<&str>) -> String {
        match schema {
            Some(s) => format!("{} = '{}'", column, escape_string_literal(s)),
            None => format!("{} = USER", column),
        }
    }
}

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "Oracle"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn table_exists_sql(&self, schema: Option<&str>, table: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM all_tables WHERE {} AND table_name = '{}'",
            Self::owner_filter("owner", schema),
            escape_string_literal(table)
        )
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                c.column_name AS column_name,
                c.data_type AS data_type,
                c.nullable AS nullable,
                pk.position AS pk_ordinal
            FROM all_tab_columns c
            LEFT JOIN (
                SELECT cc.owner, cc.table_name, cc.column_name, cc.position
                FROM all_constraints k
                JOIN all_cons_columns cc
                    ON k.owner = cc.owner
                    AND k.constraint_name = cc.constraint_name
                WHERE k.constraint_type = 'P'
            ) pk ON pk.owner = c.owner
                AND pk.table_name = c.table_name
                AND pk.column_name = c.column_name
            WHERE {} AND c.table_name = '{}'
            ORDER BY c.column_id"#,
            Self::owner_filter("c.owner", schema),
            table
        )
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(o) = offset {
            sql.push_str(&format!(" OFFSET {} ROWS", o));
        }
        if let Some(l) = limit {
            sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", l));
        }
        sql
    }

    fn build_select(
        &self,
        schema: Option<&str>,
        table: &str,
        columns: &[&str],
        where_clause: Option<&str>,
        order_by: Option<&[(&str, bool)]>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> String {
        let mut sql = manual_select(self, schema, table, columns, where_clause);
        if let Some(orders) = order_by.filter(|o| !o.is_empty()) {
            sql.push_str(&order_clause(self, orders));
        }
        sql.push_str(&self.limit_offset_sql(limit, offset));
        sql
    }
}

fn manual_select(
    dialect: &dyn SqlDialect,
    schema: Option<&str>,
    table: &str,
    columns: &[&str],
    where_clause: Option<&str>,
) -> String {
    let table_name = match schema {
        Some(s) => format!(
            "{}.{}",
            dialect.quote_identifier(s),
            dialect.quote_identifier(table)
        ),
        None => dialect.quote_identifier(table),
    };

    let cols = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", cols, table_name);
    if let Some(w) = where_clause {
        sql.push_str(&format!(" WHERE {}", w));
    }
    sql
}

fn order_clause(dialect: &dyn SqlDialect, orders: &[(&str, bool)]) -> String {
    let parts: Vec<_> = orders
        .iter()
        .map(|(col, asc)| {
            format!(
                "{} {}",
                dialect.quote_identifier(col),
                if *asc { "ASC" } else { "DESC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// Get the dialect for a database type
pub fn dialect_for(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::MySQL => Box::new(MySqlDialect),
        DatabaseType::MariaDB => Box::new(MariaDbDialect),
        DatabaseType::SqlServer => Box::new(SqlServerDialect),
        DatabaseType::Oracle => Box::new(OracleDialect),
    }
}
