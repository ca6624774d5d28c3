//! Incremental extraction planning
//!
//! A [`QueryPlan`] is either a full snapshot of a table or the rows whose
//! update-dependency column is strictly greater than the last committed
//! watermark, ordered ascending by that column.
//!
//! [`ExtractionPlanner::begin`] takes the per-key lock, reads the watermark and
//! plans; the returned [`ScanLease`] keeps the lock until it is committed or
//! dropped. A dropped lease commits nothing, so an interrupted scan is simply
//! re-planned from the last committed value.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::target::ScanTarget;
use crate::types::{ColumnKind, ColumnMetadata, TableMetadata, Value};
use crate::watermark::{KeyedLocks, Watermark, WatermarkKey, WatermarkStore};

/// What a plan selects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanKind {
    /// Every row of the table
    Full,
    /// Rows with `column > after`
    Incremental {
        /// Update-dependency column
        column: String,
        /// Last committed watermark (exclusive lower bound)
        after: Value,
    },
}

/// Abstract query over one table; rendered to SQL by [`crate::render`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Schema (database for MySQL), if any
    pub schema: Option<String>,
    /// Table name
    pub table: String,
    /// Projected columns in ordinal order
    pub columns: Vec<String>,
    /// Full or incremental
    pub kind: PlanKind,
    /// Ascending sort columns
    pub order_by: Vec<String>,
    /// Column whose maximum becomes the next watermark
    pub watermark_column: Option<String>,
}

impl QueryPlan {
    /// Whether this is a full snapshot
    pub fn is_full(&self) -> bool {
        matches!(self.kind, PlanKind::Full)
    }

    /// The `(column, lower bound)` filter of an incremental plan
    pub fn filter(&self) -> Option<(&str, &Value)> {
        match &self.kind {
            PlanKind::Full => None,
            PlanKind::Incremental { column, after } => Some((column.as_str(), after)),
        }
    }
}

/// Build the plan for a target.
///
/// Pure: the same `(target, prior, metadata)` always yields the same plan.
///
/// - full mode, or no usable prior watermark: full snapshot, ordered by the
///   dependency column when there is one (else by primary key)
/// - otherwise: `column > prior`, ordered by the column
pub fn plan_scan(
    target: &ScanTarget,
    prior: Option<&Value>,
    metadata: &TableMetadata,
) -> Result<QueryPlan> {
    let watermark_column = match target.update_column_dependency() {
        Some(name) => Some(watermark_column(target, metadata, name)?),
        None => None,
    };

    let prior = prior.filter(|v| !v.is_null());
    let kind = match (&watermark_column, prior) {
        (Some(column), Some(after)) if !target.update_all() => {
            check_watermark_value(target, column, after)?;
            PlanKind::Incremental {
                column: column.name.clone(),
                after: after.clone(),
            }
        }
        _ => PlanKind::Full,
    };

    let order_by = match &watermark_column {
        Some(column) => vec![column.name.clone()],
        None => metadata
            .primary_key_columns()
            .into_iter()
            .map(|c| c.name.clone())
            .collect(),
    };

    Ok(QueryPlan {
        schema: target.effective_schema().map(str::to_string),
        table: target.table_name().to_string(),
        columns: metadata.column_names().into_iter().map(str::to_string).collect(),
        kind,
        order_by,
        watermark_column: watermark_column.map(|c| c.name.clone()),
    })
}

fn watermark_column<'m>(
    target: &ScanTarget,
    metadata: &'m TableMetadata,
    name: &str,
) -> Result<&'m ColumnMetadata> {
    let column = metadata.column(name).ok_or_else(|| Error::ColumnNotFound {
        table: target.table_name().to_string(),
        column: name.to_string(),
    })?;

    if !column.kind().is_watermark_eligible() {
        return Err(Error::UnsupportedColumnType {
            table: target.table_name().to_string(),
            column: column.name.clone(),
            type_name: column.type_name.clone(),
        });
    }
    Ok(column)
}

/// A stored watermark must belong to the column's type family
fn check_watermark_value(target: &ScanTarget, column: &ColumnMetadata, value: &Value) -> Result<()> {
    if fits_column(column.kind(), value) {
        Ok(())
    } else {
        Err(Error::UnsupportedColumnType {
            table: target.table_name().to_string(),
            column: column.name.clone(),
            type_name: format!(
                "{} (stored watermark is {})",
                column.type_name,
                value.sql_type()
            ),
        })
    }
}

/// Plans scans and commits watermarks, one in-flight cycle per key
pub struct ExtractionPlanner {
    store: Arc<dyn WatermarkStore>,
    locks: Arc<KeyedLocks>,
}

impl ExtractionPlanner {
    /// Create a planner over a watermark store
    pub fn new(store: Arc<dyn WatermarkStore>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Watermark store
    pub fn store(&self) -> &Arc<dyn WatermarkStore> {
        &self.store
    }

    /// Last committed watermark for a target, if it tracks one
    pub async fn prior_watermark(&self, target: &ScanTarget) -> Result<Option<Value>> {
        match target.watermark_key() {
            Some(key) => Ok(self.store.load(&key).await?.map(|w| w.value)),
            None => Ok(None),
        }
    }

    /// See [`plan_scan`]
    pub fn plan_scan(
        &self,
        target: &ScanTarget,
        prior: Option<&Value>,
        metadata: &TableMetadata,
    ) -> Result<QueryPlan> {
        plan_scan(target, prior, metadata)
    }

    /// Lock the target's key, read its watermark and plan.
    ///
    /// A second `begin` for the same key waits until the first lease is
    /// committed or dropped, then plans from whatever was committed.
    pub async fn begin(&self, target: &ScanTarget, metadata: &TableMetadata) -> Result<ScanLease> {
        let key = target.watermark_key();
        let guard = match &key {
            Some(k) => Some(self.locks.lock(k).await),
            None => None,
        };

        let prior = match &key {
            Some(k) => self.store.load(k).await?.map(|w| w.value),
            None => None,
        };
        let plan = plan_scan(target, prior.as_ref(), metadata)?;
        let column_kind = plan
            .watermark_column
            .as_deref()
            .and_then(|name| metadata.column(name))
            .map(ColumnMetadata::kind);

        debug!(
            table = %target.table_name(),
            full = plan.is_full(),
            prior = ?prior,
            "Planned scan"
        );

        Ok(ScanLease {
            store: self.store.clone(),
            key,
            column_kind,
            prior,
            plan,
            _guard: guard,
        })
    }

    /// Commit a new maximum for the target's key outside a lease.
    ///
    /// Waits for any in-flight lease on the same key. Must not be called
    /// while holding a lease for that key.
    pub async fn commit_watermark(&self, target: &ScanTarget, value: Value) -> Result<Option<Value>> {
        let key = target.watermark_key().ok_or_else(|| {
            Error::config(format!(
                "{} has no update-dependency column to track",
                target.label()
            ))
        })?;
        let _guard = self.locks.lock(&key).await;
        commit_max(self.store.as_ref(), &key, value).await
    }

    /// Forget the target's watermark so the next scan is a full snapshot
    pub async fn reset_watermark(&self, target: &ScanTarget) -> Result<()> {
        if let Some(key) = target.watermark_key() {
            let _guard = self.locks.lock(&key).await;
            self.store.delete(&key).await?;
            info!(watermark = %key, "Reset watermark");
        }
        Ok(())
    }
}

/// An exclusive planning slot for one watermark key
pub struct ScanLease {
    store: Arc<dyn WatermarkStore>,
    key: Option<WatermarkKey>,
    column_kind: Option<ColumnKind>,
    prior: Option<Value>,
    plan: QueryPlan,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl ScanLease {
    /// The plan to execute
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Watermark the plan was derived from
    pub fn prior(&self) -> Option<&Value> {
        self.prior.as_ref()
    }

    /// Watermark key, when the target tracks one
    pub fn key(&self) -> Option<&WatermarkKey> {
        self.key.as_ref()
    }

    /// Commit after the plan's result set was fully consumed.
    ///
    /// `max_value` is the largest dependency value seen; `None` (empty result)
    /// keeps the current watermark. A value outside the column's type family
    /// is rejected with [`Error::Query`]. Returns the watermark now in effect.
    pub async fn commit(self, max_value: Option<Value>) -> Result<Option<Value>> {
        match (&self.key, max_value) {
            (Some(key), Some(value)) if !value.is_null() => {
                if let Some(kind) = self.column_kind {
                    if !fits_column(kind, &value) {
                        return Err(Error::query(format!(
                            "watermark {} cannot take a {} value for a {:?} column",
                            key,
                            value.sql_type(),
                            kind
                        )));
                    }
                }
                commit_max(self.store.as_ref(), key, value).await
            }
            _ => Ok(self.prior.clone()),
        }
    }
}

impl std::fmt::Debug for ScanLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLease")
            .field("key", &self.key)
            .field("prior", &self.prior)
            .field("plan", &self.plan)
            .finish()
    }
}

fn fits_column(kind: ColumnKind, value: &Value) -> bool {
    match kind {
        ColumnKind::Integer | ColumnKind::Decimal => {
            matches!(value, Value::Int32(_) | Value::Int64(_) | Value::Decimal(_))
        }
        ColumnKind::Text => matches!(value, Value::String(_)),
        ColumnKind::Date => matches!(value, Value::Date(_)),
        ColumnKind::Timestamp => {
            matches!(value, Value::DateTime(_) | Value::DateTimeTz(_) | Value::Date(_))
        }
        _ => false,
    }
}

/// Store `value` unless the stored watermark is already at least as large.
/// Caller holds the key lock.
async fn commit_max(
    store: &dyn WatermarkStore,
    key: &WatermarkKey,
    value: Value,
) -> Result<Option<Value>> {
    if let Some(current) = store.load(key).await? {
        match value.compare(&current.value) {
            Some(Ordering::Greater) => {}
            Some(Ordering::Equal) => return Ok(Some(current.value)),
            Some(Ordering::Less) => {
                warn!(
                    watermark = %key,
                    stored = %current.value,
                    offered = %value,
                    "Ignoring watermark lower than the committed one"
                );
                return Ok(Some(current.value));
            }
            None => {
                return Err(Error::watermark_store(format!(
                    "watermark {} = {} cannot be compared with {}",
                    key,
                    current.value.sql_type(),
                    value.sql_type()
                )))
            }
        }
    }

    store.commit(&Watermark::new(key.clone(), value.clone())).await?;
    info!(watermark = %key, value = %value, "Committed watermark");
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::MemoryWatermarkStore;
    use chrono::NaiveDate;

    fn orders() -> TableMetadata {
        TableMetadata::new("orders")
            .with_schema("shop")
            .with_column(ColumnMetadata::new("id", "bigint").primary_key(1))
            .with_column(ColumnMetadata::new("ts", "timestamp"))
            .with_column(ColumnMetadata::new("price", "double precision"))
            .with_column(ColumnMetadata::new("payload", "jsonb"))
    }

    fn incremental(column: &str) -> ScanTarget {
        ScanTarget::builder("postgres", "pg", "orders")
            .schema("shop")
            .update_all(false)
            .update_column_dependency(column)
            .build()
            .unwrap()
    }

    fn ts(day: u32) -> Value {
        Value::DateTime(
            NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_incremental_plan_filters_and_orders() {
        let plan = plan_scan(&incremental("ts"), Some(&ts(5)), &orders()).unwrap();
        assert_eq!(plan.filter(), Some(("ts", &ts(5))));
        assert_eq!(plan.order_by, vec!["ts".to_string()]);
        assert_eq!(plan.watermark_column.as_deref(), Some("ts"));
        assert_eq!(plan.columns, vec!["id", "ts", "price", "payload"]);
        assert_eq!(plan.schema.as_deref(), Some("shop"));
    }

    #[test]
    fn test_first_run_is_full_scan() {
        let plan = plan_scan(&incremental("ts"), None, &orders()).unwrap();
        assert!(plan.is_full());
        assert_eq!(plan.order_by, vec!["ts".to_string()]);

        let plan = plan_scan(&incremental("ts"), Some(&Value::Null), &orders()).unwrap();
        assert!(plan.is_full());
    }

    #[test]
    fn test_full_target_ignores_prior() {
        let target = ScanTarget::builder("postgres", "pg", "orders")
            .update_all(true)
            .build()
            .unwrap();
        let plan = plan_scan(&target, Some(&Value::Int64(9)), &orders()).unwrap();
        assert!(plan.is_full());
        assert_eq!(plan.order_by, vec!["id".to_string()]);
        assert!(plan.watermark_column.is_none());
    }

    #[test]
    fn test_plan_is_idempotent() {
        let target = incremental("id");
        let prior = Value::Int64(100);
        assert_eq!(
            plan_scan(&target, Some(&prior), &orders()).unwrap(),
            plan_scan(&target, Some(&prior), &orders()).unwrap()
        );
    }

    #[test]
    fn test_unsupported_and_missing_columns() {
        assert!(matches!(
            plan_scan(&incremental("price"), None, &orders()),
            Err(Error::UnsupportedColumnType { .. })
        ));
        assert!(matches!(
            plan_scan(&incremental("payload"), None, &orders()),
            Err(Error::UnsupportedColumnType { .. })
        ));
        assert!(matches!(
            plan_scan(&incremental("nope"), None, &orders()),
            Err(Error::ColumnNotFound { .. })
        ));
        // stored value from another type family
        assert!(matches!(
            plan_scan(&incremental("ts"), Some(&Value::from("abc")), &orders()),
            Err(Error::UnsupportedColumnType { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_never_regresses() {
        let planner = ExtractionPlanner::new(Arc::new(MemoryWatermarkStore::new()));
        let target = incremental("id");

        let now = planner
            .commit_watermark(&target, Value::Int64(50))
            .await
            .unwrap();
        assert_eq!(now, Some(Value::Int64(50)));

        let now = planner
            .commit_watermark(&target, Value::Int32(10))
            .await
            .unwrap();
        assert_eq!(now, Some(Value::Int64(50)));
        assert_eq!(
            planner.prior_watermark(&target).await.unwrap(),
            Some(Value::Int64(50))
        );
    }

    #[tokio::test]
    async fn test_dropped_lease_commits_nothing() {
        let planner = ExtractionPlanner::new(Arc::new(MemoryWatermarkStore::new()));
        let target = incremental("id");

        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert!(lease.plan().is_full());
        drop(lease);

        assert!(planner.prior_watermark(&target).await.unwrap().is_none());
        // the lock was released with the lease
        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert_eq!(
            lease.commit(Some(Value::Int64(3))).await.unwrap(),
            Some(Value::Int64(3))
        );
    }

    #[tokio::test]
    async fn test_empty_result_keeps_watermark() {
        let planner = ExtractionPlanner::new(Arc::new(MemoryWatermarkStore::new()));
        let target = incremental("id");
        planner
            .commit_watermark(&target, Value::Int64(7))
            .await
            .unwrap();

        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert_eq!(lease.prior(), Some(&Value::Int64(7)));
        assert_eq!(lease.commit(None).await.unwrap(), Some(Value::Int64(7)));
    }

    #[tokio::test]
    async fn test_commit_rejects_value_of_another_type() {
        let planner = ExtractionPlanner::new(Arc::new(MemoryWatermarkStore::new()));
        let target = incremental("ts");

        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert!(lease.plan().is_full());
        let err = lease.commit(Some(Value::from("abc"))).await.unwrap_err();
        assert!(matches!(err, Error::Query { .. }));
        assert!(planner.store().list().await.unwrap().is_empty());

        // the rejected commit released the key
        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert_eq!(lease.commit(Some(ts(3))).await.unwrap(), Some(ts(3)));
        assert!(!plan_scan(&target, Some(&ts(3)), &orders()).unwrap().is_full());
    }

    #[tokio::test]
    async fn test_reset_forces_full_scan() {
        let planner = ExtractionPlanner::new(Arc::new(MemoryWatermarkStore::new()));
        let target = incremental("id");
        planner
            .commit_watermark(&target, Value::Int64(7))
            .await
            .unwrap();
        planner.reset_watermark(&target).await.unwrap();

        let lease = planner.begin(&target, &orders()).await.unwrap();
        assert!(lease.plan().is_full());
    }
}
