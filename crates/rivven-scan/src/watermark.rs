//! Watermark persistence
//!
//! A watermark is the highest value of a table's update-dependency column seen
//! by the last fully consumed scan. It is keyed by `(scope, table, column)`,
//! where the scope is the server's `host:port` plus the effective schema, so
//! same-named tables on different servers or schemas never share a watermark.
//!
//! | Store | Use Case |
//! |-------|----------|
//! | `MemoryWatermarkStore` | Tests, single-process runs without restart |
//! | `FileWatermarkStore` | Single-node production |
//!
//! Stores must make `commit` atomic per key: after a crash the stored value is
//! either the old watermark or the new one, never a torn write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Value;

/// Identifies one watermark
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatermarkKey {
    /// `host:port` or `host:port/schema`
    pub scope: String,
    /// Table name
    pub table: String,
    /// Update-dependency column
    pub column: String,
}

impl WatermarkKey {
    /// Create a key
    pub fn new(
        scope: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.scope, self.table, self.column)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9._-]` so a scope maps to a
/// unique file name fragment
fn encode_scope(scope: &str) -> String {
    let mut out = String::with_capacity(scope.len());
    for b in scope.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// A committed watermark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Key
    pub key: WatermarkKey,
    /// Highest observed value of the column
    pub value: Value,
    /// When the value was committed
    pub committed_at: DateTime<Utc>,
}

impl Watermark {
    /// Create a watermark stamped with the current time
    pub fn new(key: WatermarkKey, value: Value) -> Self {
        Self {
            key,
            value,
            committed_at: Utc::now(),
        }
    }
}

/// Storage for committed watermarks
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Load the watermark for a key
    async fn load(&self, key: &WatermarkKey) -> Result<Option<Watermark>>;

    /// Atomically replace the watermark for `watermark.key`
    async fn commit(&self, watermark: &Watermark) -> Result<()>;

    /// Forget a watermark (forces the next scan to be a full one)
    async fn delete(&self, key: &WatermarkKey) -> Result<()>;

    /// All stored watermarks
    async fn list(&self) -> Result<Vec<Watermark>>;
}

/// In-memory watermark store
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    entries: RwLock<HashMap<WatermarkKey, Watermark>>,
}

impl MemoryWatermarkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn commit(&self, watermark: &Watermark) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(watermark.key.clone(), watermark.clone());
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

/// File-based watermark store.
///
/// One JSON file per key, named `{scope}.{table}.{column}.json` with the
/// scope percent-encoded:
/// ```text
/// watermark_dir/
///   db1%3A3306%2Fsales.orders.gmt_modified.json
///   pg%3A5432.orders.ts.json
/// ```
///
/// Writes go to a temp file that is then renamed over the target, so a crash
/// mid-write leaves the previous watermark intact. Existing files are loaded
/// into an in-memory cache on startup; unreadable files are skipped with a
/// warning.
pub struct FileWatermarkStore {
    dir: PathBuf,
    cache: RwLock<HashMap<WatermarkKey, Watermark>>,
}

impl FileWatermarkStore {
    /// Open (and create if needed) a watermark directory
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::watermark_store(format!("failed to create watermark directory: {}", e))
        })?;

        let store = Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        };
        store.load_all().await?;
        Ok(store)
    }

    /// Directory path
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file_path(&self, key: &WatermarkKey) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.json",
            encode_scope(&key.scope),
            key.table,
            key.column
        ))
    }

    async fn load_all(&self) -> Result<()> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::watermark_store(format!(
                    "failed to read watermark directory: {}",
                    e
                )))
            }
        };

        let mut cache = self.cache.write().await;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            Error::watermark_store(format!("failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Watermark>(&content) {
                    Ok(wm) => {
                        cache.insert(wm.key.clone(), wm);
                        loaded += 1;
                    }
                    Err(e) => warn!("Failed to parse watermark file {:?}: {}", path, e),
                },
                Err(e) => warn!("Failed to read watermark file {:?}: {}", path, e),
            }
        }

        if loaded > 0 {
            debug!("Loaded {} watermarks from {:?}", loaded, self.dir);
        }
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self, key: &WatermarkKey) -> Result<Option<Watermark>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn commit(&self, watermark: &Watermark) -> Result<()> {
        let path = self.file_path(&watermark.key);
        let content = serde_json::to_string_pretty(watermark)
            .map_err(|e| Error::watermark_store(format!("failed to serialize watermark: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| Error::watermark_store(format!("failed to write watermark file: {}", e)))?;
        fs::rename(&temp_path, &path).await.map_err(|e| {
            Error::watermark_store(format!("failed to rename watermark file: {}", e))
        })?;

        self.cache
            .write()
            .await
            .insert(watermark.key.clone(), watermark.clone());

        debug!("Committed watermark {} = {}", watermark.key, watermark.value);
        Ok(())
    }

    async fn delete(&self, key: &WatermarkKey) -> Result<()> {
        let path = self.file_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::watermark_store(format!(
                    "failed to delete watermark file: {}",
                    e
                )))
            }
        }
        self.cache.write().await.remove(key);
        debug!("Deleted watermark {}", key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        let mut all: Vec<_> = self.cache.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

/// One async mutex per watermark key.
///
/// Holding the guard serializes the read-plan-execute-commit cycle for a key.
/// Entries nobody holds are pruned on the next acquisition.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: parking_lot::Mutex<HashMap<WatermarkKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    /// Create an empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &WatermarkKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.retain(|k, m| k == key || Arc::strong_count(m) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Whether some task currently holds `key`
    pub fn is_locked(&self, key: &WatermarkKey) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|m| m.try_lock().is_err())
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
