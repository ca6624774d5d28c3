//! Credential catalog and lookup
//!
//! The catalog is a JSON document listing, per `host:port`, a default
//! user/password and optional per-database overrides:
//!
//! ```json
//! [
//!   {
//!     "hostPort": "db1.internal:3306",
//!     "user": "scanner",
//!     "password": "default-secret",
//!     "databaseList": [
//!       { "database": "billing", "user": "billing_ro", "password": "other-secret" }
//!     ]
//!   }
//! ]
//! ```
//!
//! The whole document is validated when loaded; a malformed entry aborts the
//! load instead of surfacing later as an ambiguous lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::secret::SensitiveString;
use crate::target::ScanTarget;

/// A resolved user/password pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub user: String,
    /// Password
    pub password: SensitiveString,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(user: impl Into<String>, password: impl Into<SensitiveString>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// One host entry of the catalog document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEntry {
    /// `host:port`
    pub host_port: String,
    /// Default user for the host
    pub user: String,
    /// Default password for the host
    pub password: SensitiveString,
    /// Per-database overrides
    #[serde(default)]
    pub database_list: Vec<DatabaseCredential>,
}

/// Per-database override inside a [`CredentialEntry`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCredential {
    /// Database name
    pub database: String,
    /// User for this database
    pub user: String,
    /// Password for this database
    pub password: SensitiveString,
}

#[derive(Debug, Clone)]
struct HostCredentials {
    default: Credentials,
    overrides: HashMap<String, Credentials>,
}

/// Read-only credential lookup built once from a catalog
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    hosts: HashMap<String, HostCredentials>,
}

impl CredentialStore {
    /// Build a store from parsed catalog entries, rejecting malformed ones
    pub fn from_entries(entries: Vec<CredentialEntry>) -> Result<Self> {
        let mut hosts = HashMap::with_capacity(entries.len());

        for entry in entries {
            let host_port = normalize_host_port(&entry.host_port)?;
            if entry.user.trim().is_empty() {
                return Err(Error::config(format!(
                    "credential catalog: empty default user for {}",
                    host_port
                )));
            }

            let mut overrides = HashMap::with_capacity(entry.database_list.len());
            for db in entry.database_list {
                let database = db.database.trim().to_string();
                if database.is_empty() {
                    return Err(Error::config(format!(
                        "credential catalog: override without database name for {}",
                        host_port
                    )));
                }
                if db.user.trim().is_empty() {
                    return Err(Error::config(format!(
                        "credential catalog: empty user for {}/{}",
                        host_port, database
                    )));
                }
                if overrides
                    .insert(database.clone(), Credentials::new(db.user, db.password))
                    .is_some()
                {
                    return Err(Error::config(format!(
                        "credential catalog: duplicate database {} for {}",
                        database, host_port
                    )));
                }
            }

            let host = HostCredentials {
                default: Credentials::new(entry.user, entry.password),
                overrides,
            };
            if hosts.insert(host_port.clone(), host).is_some() {
                return Err(Error::config(format!(
                    "credential catalog: duplicate entry for {}",
                    host_port
                )));
            }
        }

        debug!(hosts = hosts.len(), "Built credential store");
        Ok(Self { hosts })
    }

    /// Parse a JSON catalog document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<CredentialEntry> = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("credential catalog is not valid: {}", e)))?;
        Self::from_entries(entries)
    }

    /// Load a JSON catalog file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!(
                "failed to read credential catalog {}: {}",
                path.display(),
                e
            ))
        })?;
        let store = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            hosts = store.len(),
            "Loaded credential catalog"
        );
        Ok(store)
    }

    /// Resolve credentials for a host and optional database.
    ///
    /// A database-specific override wins over the host default.
    pub fn resolve(&self, host_port: &str, database: Option<&str>) -> Result<Credentials> {
        let key = host_port.trim().to_lowercase();
        let host = self
            .hosts
            .get(&key)
            .ok_or_else(|| Error::CredentialNotFound {
                host_port: host_port.to_string(),
                database: database.unwrap_or_default().to_string(),
            })?;

        let creds = database
            .and_then(|db| host.overrides.get(db.trim()))
            .unwrap_or(&host.default);
        Ok(creds.clone())
    }

    /// Resolve credentials for a scan target
    pub fn resolve_target(&self, target: &ScanTarget) -> Result<Credentials> {
        self.resolve(&target.host_port(), target.database())
    }

    /// Whether the host is known
    pub fn contains_host(&self, host_port: &str) -> bool {
        self.hosts.contains_key(&host_port.trim().to_lowercase())
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether the store has no hosts
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn normalize_host_port(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let (host, port) = trimmed.rsplit_once(':').ok_or_else(|| {
        Error::config(format!(
            "credential catalog: hostPort '{}' is not host:port",
            raw
        ))
    })?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(Error::config(format!(
            "credential catalog: hostPort '{}' is not host:port",
            raw
        )));
    }
    Ok(trimmed.to_lowercase())
}

/// A credential store that can be swapped at runtime.
///
/// Readers take a snapshot `Arc`; `reload` replaces the whole store at once,
/// so a lookup never sees half of an old catalog and half of a new one.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentialStore {
    inner: Arc<RwLock<Arc<CredentialStore>>>,
}

impl SharedCredentialStore {
    /// Wrap a store
    pub fn new(store: CredentialStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(store))),
        }
    }

    /// Current catalog snapshot
    pub fn snapshot(&self) -> Arc<CredentialStore> {
        self.inner.read().clone()
    }

    /// Replace the catalog
    pub fn reload(&self, store: CredentialStore) {
        *self.inner.write() = Arc::new(store);
    }

    /// Re-read a catalog file; the current catalog stays if the new one is invalid
    pub async fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let store = CredentialStore::from_file(path).await?;
        self.reload(store);
        Ok(())
    }

    /// Resolve against the current snapshot
    pub fn resolve(&self, host_port: &str, database: Option<&str>) -> Result<Credentials> {
        self.snapshot().resolve(host_port, database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "hostPort": "db1:3306",
            "user": "scanner",
            "password": "default-pw",
            "databaseList": [
                { "database": "billing", "user": "billing_ro", "password": "billing-pw" }
            ]
        },
        { "hostPort": "PG:5432", "user": "pg_scanner", "password": "pg-pw" }
    ]"#;

    #[test]
    fn test_override_wins_over_default() {
        let store = CredentialStore::from_json_str(CATALOG).unwrap();

        let creds = store.resolve("db1:3306", Some("billing")).unwrap();
        assert_eq!(creds.user, "billing_ro");
        assert_eq!(creds.password.expose_secret(), "billing-pw");

        let creds = store.resolve("db1:3306", Some("sales")).unwrap();
        assert_eq!(creds.user, "scanner");

        let creds = store.resolve("db1:3306", None).unwrap();
        assert_eq!(creds.user, "scanner");
    }

    #[test]
    fn test_host_lookup_is_case_insensitive() {
        let store = CredentialStore::from_json_str(CATALOG).unwrap();
        assert_eq!(store.resolve("pg:5432", None).unwrap().user, "pg_scanner");
        assert!(store.contains_host(" PG:5432 "));
    }

    #[test]
    fn test_unknown_host() {
        let store = CredentialStore::from_json_str(CATALOG).unwrap();
        let err = store
            .resolve("db.example.com:5432", Some("sales"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CredentialNotFound { ref host_port, .. } if host_port == "db.example.com:5432"
        ));
    }

    #[test]
    fn test_malformed_entries_rejected() {
        let bad_host = r#"[{ "hostPort": "db1", "user": "u", "password": "p" }]"#;
        assert!(matches!(
            CredentialStore::from_json_str(bad_host),
            Err(Error::Configuration { .. })
        ));

        let empty_user = r#"[{ "hostPort": "db1:1", "user": " ", "password": "p" }]"#;
        assert!(CredentialStore::from_json_str(empty_user).is_err());

        let dup_host = r#"[
            { "hostPort": "db1:1", "user": "u", "password": "p" },
            { "hostPort": "DB1:1", "user": "v", "password": "q" }
        ]"#;
        assert!(CredentialStore::from_json_str(dup_host).is_err());

        let dup_db = r#"[{ "hostPort": "db1:1", "user": "u", "password": "p", "databaseList": [
            { "database": "a", "user": "x", "password": "1" },
            { "database": "a", "user": "y", "password": "2" }
        ]}]"#;
        assert!(CredentialStore::from_json_str(dup_db).is_err());

        assert!(CredentialStore::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_shared_store_reload_swaps_whole_catalog() {
        let shared = SharedCredentialStore::new(CredentialStore::from_json_str(CATALOG).unwrap());
        let before = shared.snapshot();

        let replacement =
            r#"[{ "hostPort": "db2:3306", "user": "fresh", "password": "fresh-pw" }]"#;
        shared.reload(CredentialStore::from_json_str(replacement).unwrap());

        assert!(before.contains_host("db1:3306"));
        assert!(shared.resolve("db1:3306", None).is_err());
        assert_eq!(shared.resolve("db2:3306", None).unwrap().user, "fresh");
    }
}
