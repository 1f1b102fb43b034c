//! Snapshot version store: dense version numbers per config key, a single
//! current pointer moved by an atomic transactional swap, and an explicit
//! baseline pointer. Partial unique indexes in the schema back the
//! one-current / one-baseline invariants even if a swap is miscoded.

use crate::errors::EngineError;
use crate::model::{ConfigKey, Snapshot};
use crate::storage::store::{now_rfc3339, Store};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;

/// Comparison of one derived metric across two snapshot versions.
#[derive(Debug, Clone, Serialize)]
pub struct MetricComparison {
    pub value_a: f64,
    pub value_b: f64,
    pub delta: f64,
    /// None when `value_a` is zero (percent change undefined).
    pub percent_change: Option<f64>,
}

/// Result of comparing two versions of the same config key. Only metrics
/// defined on both referenced transactions appear.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub config_key: ConfigKey,
    pub version_a: i64,
    pub version_b: i64,
    pub metrics: BTreeMap<String, MetricComparison>,
}

impl Store {
    /// Allocates the next version for the config key, atomically demotes the
    /// old current snapshot and promotes the new one. The whole step is a
    /// single immediate SQLite transaction, so concurrent writers for the
    /// same key serialize on the swap and readers never observe zero or two
    /// current snapshots.
    pub fn record_new_version(
        &self,
        key: &ConfigKey,
        transaction_id: i64,
    ) -> Result<Snapshot, EngineError> {
        let storage_key = key.storage_key();
        let created_at = now_rfc3339();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_swap_err)?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT config_key FROM transactions WHERE id = ?1",
                params![transaction_id],
                |r| r.get(0),
            )
            .optional()?;
        match owner {
            None => {
                return Err(EngineError::NotFound(format!(
                    "transaction {}",
                    transaction_id
                )))
            }
            Some(owner) if owner != storage_key => {
                return Err(EngineError::Validation(format!(
                    "transaction {} does not belong to config '{}'",
                    transaction_id, key
                )))
            }
            Some(_) => {}
        }

        let next_version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM snapshots WHERE config_key = ?1",
            params![storage_key],
            |r| r.get(0),
        )?;

        tx.execute(
            "UPDATE snapshots SET is_current = 0 WHERE config_key = ?1 AND is_current = 1",
            params![storage_key],
        )?;
        tx.execute(
            "INSERT INTO snapshots(config_key, version, transaction_id, is_current, is_baseline, created_at)
             VALUES (?1, ?2, ?3, 1, 0, ?4)",
            params![storage_key, next_version, transaction_id, created_at],
        )
        .map_err(map_swap_err)?;

        tx.commit().map_err(map_swap_err)?;
        tracing::debug!(config = %key, version = next_version, "snapshot promoted to current");

        Ok(Snapshot {
            config_key: key.clone(),
            version: next_version,
            transaction_id,
            is_current: true,
            is_baseline: false,
            created_at,
        })
    }

    /// Moves the current pointer to an existing version. No new version is
    /// allocated and no transaction is written; history is never rewritten.
    /// Idempotent when the target is already current.
    pub fn checkout(&self, key: &ConfigKey, version: i64) -> Result<Snapshot, EngineError> {
        let storage_key = key.storage_key();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_swap_err)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT transaction_id FROM snapshots WHERE config_key = ?1 AND version = ?2",
                params![storage_key, version],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!(
                "snapshot version {} for config '{}'",
                version, key
            )));
        }

        tx.execute(
            "UPDATE snapshots SET is_current = 0 WHERE config_key = ?1 AND is_current = 1",
            params![storage_key],
        )?;
        tx.execute(
            "UPDATE snapshots SET is_current = 1 WHERE config_key = ?1 AND version = ?2",
            params![storage_key, version],
        )
        .map_err(map_swap_err)?;
        tx.commit().map_err(map_swap_err)?;
        tracing::debug!(config = %key, version, "checked out snapshot");

        drop(conn);
        self.get_snapshot(key, version)
    }

    /// Marks one version as the regression baseline, clearing any previous
    /// baseline for the key. Only this call ever moves the baseline flag.
    pub fn designate_baseline(&self, key: &ConfigKey, version: i64) -> Result<Snapshot, EngineError> {
        let storage_key = key.storage_key();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_swap_err)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT transaction_id FROM snapshots WHERE config_key = ?1 AND version = ?2",
                params![storage_key, version],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(EngineError::NotFound(format!(
                "snapshot version {} for config '{}'",
                version, key
            )));
        }

        tx.execute(
            "UPDATE snapshots SET is_baseline = 0 WHERE config_key = ?1 AND is_baseline = 1",
            params![storage_key],
        )?;
        tx.execute(
            "UPDATE snapshots SET is_baseline = 1 WHERE config_key = ?1 AND version = ?2",
            params![storage_key, version],
        )
        .map_err(map_swap_err)?;
        tx.commit().map_err(map_swap_err)?;
        tracing::debug!(config = %key, version, "baseline designated");

        drop(conn);
        self.get_snapshot(key, version)
    }

    pub fn get_snapshot(&self, key: &ConfigKey, version: i64) -> Result<Snapshot, EngineError> {
        let conn = self.conn.lock().unwrap();
        let snap = conn
            .query_row(
                "SELECT version, transaction_id, is_current, is_baseline, created_at
                 FROM snapshots WHERE config_key = ?1 AND version = ?2",
                params![key.storage_key(), version],
                |r| decode_snapshot(key, r),
            )
            .optional()?;
        snap.ok_or_else(|| {
            EngineError::NotFound(format!("snapshot version {} for config '{}'", version, key))
        })
    }

    pub fn current_snapshot(&self, key: &ConfigKey) -> Result<Option<Snapshot>, EngineError> {
        self.snapshot_by_flag(key, "is_current")
    }

    pub fn baseline_snapshot(&self, key: &ConfigKey) -> Result<Option<Snapshot>, EngineError> {
        self.snapshot_by_flag(key, "is_baseline")
    }

    fn snapshot_by_flag(&self, key: &ConfigKey, flag: &str) -> Result<Option<Snapshot>, EngineError> {
        debug_assert!(flag == "is_current" || flag == "is_baseline");
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT version, transaction_id, is_current, is_baseline, created_at
             FROM snapshots WHERE config_key = ?1 AND {} = 1",
            flag
        );
        let snap = conn
            .query_row(&sql, params![key.storage_key()], |r| decode_snapshot(key, r))
            .optional()?;
        Ok(snap)
    }

    /// All versions for a key, ascending.
    pub fn list_versions(&self, key: &ConfigKey) -> Result<Vec<Snapshot>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT version, transaction_id, is_current, is_baseline, created_at
             FROM snapshots WHERE config_key = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![key.storage_key()], |r| decode_snapshot(key, r))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Compares every derived metric defined on both referenced transactions.
    pub fn compare(
        &self,
        key: &ConfigKey,
        version_a: i64,
        version_b: i64,
    ) -> Result<ComparisonReport, EngineError> {
        let snap_a = self.get_snapshot(key, version_a)?;
        let snap_b = self.get_snapshot(key, version_b)?;
        let metrics_a = self.get_transaction(snap_a.transaction_id)?.derived_metrics;
        let metrics_b = self.get_transaction(snap_b.transaction_id)?.derived_metrics;

        let a = metrics_a.present();
        let b = metrics_b.present();

        let mut metrics = BTreeMap::new();
        for (name, value_a) in &a {
            let Some(value_b) = b.get(name) else { continue };
            let delta = value_b - value_a;
            let percent_change = if *value_a == 0.0 {
                None
            } else {
                Some(delta / value_a * 100.0)
            };
            metrics.insert(
                name.clone(),
                MetricComparison {
                    value_a: *value_a,
                    value_b: *value_b,
                    delta,
                    percent_change,
                },
            );
        }

        Ok(ComparisonReport {
            config_key: key.clone(),
            version_a,
            version_b,
            metrics,
        })
    }
}

fn decode_snapshot(key: &ConfigKey, row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        config_key: key.clone(),
        version: row.get(0)?,
        transaction_id: row.get(1)?,
        is_current: row.get::<_, i64>(2)? != 0,
        is_baseline: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
    })
}

/// Busy locks and unique-index violations on the pointer swap are transient
/// from the caller's view: retry the whole call.
fn map_swap_err(e: rusqlite::Error) -> EngineError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        match err.code {
            rusqlite::ErrorCode::DatabaseBusy
            | rusqlite::ErrorCode::DatabaseLocked
            | rusqlite::ErrorCode::ConstraintViolation => {
                return EngineError::Conflict(e.to_string())
            }
            _ => {}
        }
    }
    EngineError::Storage(e)
}
