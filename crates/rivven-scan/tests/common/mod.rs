#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rivven_scan::prelude::*;
use rivven_scan::testing::{mock_row, MockConnectionFactory, RecordingExecutor};

pub const CATALOG: &str = r#"[
    {
        "hostPort": "pg:5432",
        "user": "scanner",
        "password": "pg-secret",
        "databaseList": [
            { "database": "shop", "user": "shop_reader", "password": "shop-secret" }
        ]
    },
    { "hostPort": "db1:3306", "user": "root", "password": "mysql-secret" }
]"#;

pub fn credentials() -> SharedCredentialStore {
    SharedCredentialStore::new(CredentialStore::from_json_str(CATALOG).unwrap())
}

pub fn orders_metadata() -> TableMetadata {
    TableMetadata::new("orders")
        .with_column(ColumnMetadata::new("id", "bigint").primary_key(1))
        .with_column(ColumnMetadata::new("ts", "bigint").not_null())
        .with_column(ColumnMetadata::new("note", "varchar"))
}

pub fn order(id: i64, ts: i64) -> Row {
    mock_row(&[
        ("id", Value::Int64(id)),
        ("ts", Value::Int64(ts)),
        ("note", Value::Null),
    ])
}

pub fn orders(ts: &[i64]) -> Vec<Row> {
    ts.iter()
        .enumerate()
        .map(|(i, ts)| order(i as i64 + 1, *ts))
        .collect()
}

pub fn incremental(table: &str) -> ScanTarget {
    ScanTarget::builder("postgres", "pg", table)
        .database("shop")
        .update_column_dependency("ts")
        .build()
        .unwrap()
}

pub fn full(table: &str) -> ScanTarget {
    ScanTarget::builder("postgres", "pg", table)
        .database("shop")
        .update_all(true)
        .update_column_dependency("ts")
        .build()
        .unwrap()
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig::fixed_delay(3, Duration::from_millis(10))
}

pub fn scanner(
    factory: &MockConnectionFactory,
    store: Arc<dyn WatermarkStore>,
    executor: &RecordingExecutor,
) -> Scanner {
    Scanner::new(
        credentials(),
        Arc::new(factory.clone()),
        store,
        Arc::new(executor.clone()),
    )
    .with_retry(fast_retry())
}
