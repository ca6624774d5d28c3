//! SQL injection guards for rivven-scan.
//!
//! Scan targets arrive from external callers, so table, schema and watermark
//! column names are validated before they reach any generated SQL, and
//! string literals embedded in `information_schema` lookups are escaped.

use crate::error::Error;

/// Validate a SQL identifier (schema, table or column name).
///
/// Rules:
/// - Must not be empty
/// - Maximum 128 characters (the SQL Server / Oracle limit, the tightest we target)
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters, underscores and `$`
///
/// # Examples
///
/// ```
/// use rivven_scan::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("orders").is_ok());
/// assert!(validate_sql_identifier("gmt_modified").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("1abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 128 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 128)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '$' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Escape a string value for interpolation into a single-quoted SQL literal.
///
/// Only used for the `information_schema` lookups the dialects return as
/// complete SQL strings; plan rendering always binds values as parameters.
///
/// ```
/// use rivven_scan::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("orders"), "orders");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
