//! Connection opening and table description: retries, timeouts, failures

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use rivven_scan::prelude::*;
use rivven_scan::testing::MockConnectionFactory;

fn descriptor(target: &ScanTarget) -> ConnectionDescriptor {
    let creds = credentials().snapshot().resolve_target(target).unwrap();
    ConnectionDescriptor::from_target(target, &creds).unwrap()
}

fn introspector(factory: &MockConnectionFactory) -> MetadataIntrospector {
    MetadataIntrospector::new(Arc::new(factory.clone())).with_retry(fast_retry())
}

fn kind(err: &Error) -> Option<ConnectionFailure> {
    err.connection_failure()
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_are_retried() {
    let factory = MockConnectionFactory::new().with_table(orders_metadata(), vec![]);
    factory.fail_next_connects(ConnectionFailure::Network, 2);

    let conn = introspector(&factory)
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap();
    assert_eq!(conn.database_type(), DatabaseType::PostgreSQL);
    assert_eq!(factory.connect_attempts(), 3);

    conn.release().await.unwrap();
    assert_eq!(factory.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_capped() {
    let factory = MockConnectionFactory::new();
    factory.fail_next_connects(ConnectionFailure::Network, 10);

    let err = introspector(&factory)
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ConnectionFailure::Network));
    // first attempt plus three retries
    assert_eq!(factory.connect_attempts(), 4);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    // the shop override user is rejected; the host default would not be
    let factory = MockConnectionFactory::new().rejecting_user("shop_reader");

    let err = introspector(&factory)
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ConnectionFailure::Authentication));
    assert!(!err.is_retriable());
    assert_eq!(factory.connect_attempts(), 1);
}

#[tokio::test]
async fn test_unsupported_driver() {
    let factory = MockConnectionFactory::new().without_driver(DatabaseType::Oracle);
    let target = ScanTarget::builder("oracle", "db1", "orders")
        .port(3306)
        .update_all(true)
        .build()
        .unwrap();

    let err = introspector(&factory)
        .open(&descriptor(&target))
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ConnectionFailure::UnsupportedDriver));
    assert_eq!(factory.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let factory = MockConnectionFactory::new().with_connect_delay(Duration::from_secs(60));
    let introspector = MetadataIntrospector::new(Arc::new(factory.clone()))
        .with_retry(RetryConfig::no_retry())
        .with_timeouts(Timeouts {
            connect: Duration::from_secs(1),
            describe: Duration::from_secs(1),
        });

    let err = introspector
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ConnectionFailure::Timeout));
    assert_eq!(factory.opened(), 0);
}

#[tokio::test]
async fn test_describe_table() {
    let factory = MockConnectionFactory::new().with_table(orders_metadata(), vec![]);
    let introspector = introspector(&factory);
    let conn = introspector
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap();

    let table = introspector.describe_table(&conn, None, "orders").await.unwrap();
    assert_eq!(table.column_names(), vec!["id", "ts", "note"]);
    assert_eq!(table.primary_key_columns().len(), 1);
    assert!(!table.column("ts").unwrap().nullable);
    assert!(table.column("note").unwrap().nullable);
    assert_eq!(table.column("ts").unwrap().kind(), ColumnKind::Integer);

    assert!(introspector.table_exists(&conn, None, "orders").await.unwrap());
    assert!(!introspector.table_exists(&conn, None, "invoices").await.unwrap());

    let err = introspector
        .describe_table(&conn, Some("public"), "invoices")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaNotFound { ref table, .. } if table == "invoices"));

    conn.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_describe_retries_then_times_out() {
    let factory = MockConnectionFactory::new().with_table(orders_metadata(), vec![]);
    factory.fail_next_describes(ConnectionFailure::Network, 1);
    let introspector = introspector(&factory);
    let conn = introspector
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap();

    let table = introspector.describe_table(&conn, None, "orders").await.unwrap();
    assert_eq!(table.columns.len(), 3);
    conn.release().await.unwrap();

    let slow = MockConnectionFactory::new()
        .with_table(orders_metadata(), vec![])
        .with_describe_delay(Duration::from_secs(60));
    let introspector = MetadataIntrospector::new(Arc::new(slow.clone()))
        .with_retry(RetryConfig::fixed_delay(1, Duration::from_millis(10)))
        .with_timeouts(Timeouts {
            connect: Duration::from_secs(1),
            describe: Duration::from_secs(2),
        });
    let conn = introspector
        .open(&descriptor(&incremental("orders")))
        .await
        .unwrap();

    let err = introspector
        .describe_table(&conn, None, "orders")
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(ConnectionFailure::Timeout));

    conn.release().await.unwrap();
    assert_eq!(slow.open_connections(), 0);
}
