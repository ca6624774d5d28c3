//! Loading scanner configuration and the credential catalog from disk

mod common;

use std::time::Duration;

use common::*;
use rivven_scan::prelude::*;

#[tokio::test]
async fn test_config_file_wires_stores() {
    let dir = tempfile::tempdir().unwrap();
    let catalog_path = dir.path().join("jdbc-user-password.json");
    tokio::fs::write(&catalog_path, CATALOG).await.unwrap();

    std::env::set_var("RIVVEN_SCAN_TEST_WATERMARKS", dir.path().join("wm"));
    let yaml = format!(
        r#"
credentials_path: {}
watermark_dir: ${{RIVVEN_SCAN_TEST_WATERMARKS}}
connect_timeout_ms: 2500
max_concurrent_scans: 2
retry:
  max_retries: 1
"#,
        catalog_path.display()
    );
    let config_path = dir.path().join("scanner.yaml");
    tokio::fs::write(&config_path, yaml).await.unwrap();

    let config = ScannerConfig::from_file(&config_path).await.unwrap();
    assert_eq!(config.timeouts().connect, Duration::from_millis(2500));
    assert_eq!(config.retry_config().max_retries, 1);

    let credentials = config.load_credentials().await.unwrap();
    assert_eq!(credentials.resolve("db1:3306", None).unwrap().user, "root");

    let store = config.watermark_store().await.unwrap();
    store
        .commit(&Watermark::new(
            WatermarkKey::new("db1:3306/sales", "orders", "ts"),
            Value::Int64(9),
        ))
        .await
        .unwrap();
    assert!(dir
        .path()
        .join("wm")
        .join("db1%3A3306%2Fsales.orders.ts.json")
        .exists());
}

#[tokio::test]
async fn test_missing_files_are_configuration_errors() {
    let err = ScannerConfig::from_file("/nonexistent/scanner.yaml")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let config = ScannerConfig::from_yaml_str("credentials_path: /nonexistent/creds.json").unwrap();
    let err = config.load_credentials().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_credential_reload_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    tokio::fs::write(&path, CATALOG).await.unwrap();

    let shared = SharedCredentialStore::new(CredentialStore::from_file(&path).await.unwrap());
    let before = shared.snapshot();

    tokio::fs::write(
        &path,
        r#"[{"hostPort": "db.example.com:5432", "user": "etl", "password": "x"}]"#,
    )
    .await
    .unwrap();
    shared.reload_from_file(&path).await.unwrap();

    assert!(shared.resolve("db.example.com:5432", None).is_ok());
    assert!(shared.resolve("pg:5432", None).is_err());
    // readers holding the old snapshot still see the whole old catalog
    assert!(before.resolve("pg:5432", Some("shop")).is_ok());

    tokio::fs::write(&path, "{ not json").await.unwrap();
    assert!(shared.reload_from_file(&path).await.is_err());
    assert!(shared.resolve("db.example.com:5432", None).is_ok());
}
