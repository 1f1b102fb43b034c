use crate::delta;
use crate::errors::EngineError;
use crate::model::{CategoryMetric, ConfigKey, DerivedMetrics, RawCounts, Severity, Transaction};
use crate::thresholds::DeltaThresholds;
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Append-only transaction log plus the snapshot version store, backed by
/// SQLite. Clone is cheap; all clones share one connection.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

pub struct StoreStats {
    pub transactions: Option<u64>,
    pub snapshots: Option<u64>,
    pub last_transaction_id: Option<i64>,
    pub last_ingest_at: Option<String>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, for tests and embedded use.
    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Appends one immutable transaction with its write-time derived metrics
    /// and category rows, returning the new id and the category metrics that
    /// were persisted. The prior-rate lookup and the delta computation run
    /// inside the same SQLite transaction as the insert, so each delta is
    /// against the most recent committed transaction for the key even with
    /// concurrent same-key writers. All rows commit atomically; a reader
    /// never sees a transaction without its category metrics.
    pub fn append_transaction(
        &self,
        key: &ConfigKey,
        raw: &RawCounts,
        derived: &DerivedMetrics,
        commit: Option<&str>,
        tags: &[String],
        thresholds: &DeltaThresholds,
    ) -> Result<(i64, Vec<CategoryMetric>), EngineError> {
        let created_at = now_rfc3339();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let prior_rates = latest_category_rates(&tx, &key.storage_key())?;
        let categories = delta::compute(&raw.per_category, &prior_rates, thresholds);

        tx.execute(
            "INSERT INTO transactions(config_key, created_at, commit_id, raw_json, metrics_json, tags_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.storage_key(),
                created_at,
                commit,
                serde_json::to_string(raw)?,
                serde_json::to_string(derived)?,
                serde_json::to_string(tags)?,
            ],
        )?;
        let transaction_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO category_metrics(transaction_id, category, total, detected,
                                              detection_rate, delta_from_previous, severity)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for c in &categories {
                stmt.execute(params![
                    transaction_id,
                    c.category,
                    c.total as i64,
                    c.detected as i64,
                    c.detection_rate,
                    c.delta_from_previous,
                    c.severity.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(transaction_id, config = %key, "transaction appended");
        Ok((transaction_id, categories))
    }

    pub fn get_transaction(&self, transaction_id: i64) -> Result<Transaction, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, config_key, created_at, commit_id, raw_json, metrics_json, tags_json
             FROM transactions WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![transaction_id], decode_transaction_row)
            .optional()?;
        match row {
            Some(r) => r,
            None => Err(EngineError::NotFound(format!(
                "transaction {}",
                transaction_id
            ))),
        }
    }

    /// Committed transactions for a config key, most recent first. `before`
    /// restricts to strictly earlier timestamps; `tag` keeps only rows
    /// carrying that tag. All predicates apply before the limit, so
    /// `limit` with a tag returns the newest N tagged rows.
    pub fn list_for_config(
        &self,
        key: &ConfigKey,
        limit: u32,
        before: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Vec<Transaction>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, config_key, created_at, commit_id, raw_json, metrics_json, tags_json
             FROM transactions
             WHERE config_key = ?1
               AND (?2 IS NULL OR created_at < ?2)
               AND (?4 IS NULL OR EXISTS (
                     SELECT 1 FROM json_each(transactions.tags_json)
                     WHERE json_each.value = ?4))
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![key.storage_key(), before, limit, tag],
            decode_transaction_row,
        )?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    pub fn category_metrics_for(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<CategoryMetric>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, total, detected, detection_rate, delta_from_previous, severity
             FROM category_metrics WHERE transaction_id = ?1 ORDER BY category ASC",
        )?;
        let rows = stmt.query_map(params![transaction_id], |row| {
            Ok(CategoryMetric {
                category: row.get(0)?,
                total: row.get::<_, i64>(1)? as u64,
                detected: row.get::<_, i64>(2)? as u64,
                detection_rate: row.get(3)?,
                delta_from_previous: row.get(4)?,
                severity: Severity::parse(&row.get::<_, String>(5)?),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn stats_best_effort(&self) -> anyhow::Result<StoreStats> {
        let conn = self.conn.lock().unwrap();

        let transactions: Option<u64> = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok();
        let snapshots: Option<u64> = conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok();

        let last: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, created_at FROM transactions ORDER BY id DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        let (last_id, last_at) = match last {
            Some((id, at)) => (Some(id), Some(at)),
            None => (None, None),
        };

        Ok(StoreStats {
            transactions,
            snapshots,
            last_transaction_id: last_id,
            last_ingest_at: last_at,
        })
    }
}

/// Latest defined detection rate per category for a config key, as seen by
/// `conn`. Replayed in transaction order so later rows win. Called on the
/// open write transaction in `append_transaction` so the rates cannot go
/// stale between the read and the insert.
fn latest_category_rates(
    conn: &Connection,
    storage_key: &str,
) -> Result<BTreeMap<String, f64>, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT cm.category, cm.detection_rate
         FROM category_metrics cm
         JOIN transactions t ON cm.transaction_id = t.id
         WHERE t.config_key = ?1 AND cm.detection_rate IS NOT NULL
         ORDER BY t.id ASC",
    )?;
    let rows = stmt.query_map(params![storage_key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for r in rows {
        let (category, rate) = r?;
        out.insert(category, rate);
    }
    Ok(out)
}

type DecodedRow = Result<Transaction, EngineError>;

fn decode_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecodedRow> {
    let id: i64 = row.get(0)?;
    let config_key: String = row.get(1)?;
    let created_at: String = row.get(2)?;
    let commit: Option<String> = row.get(3)?;
    let raw_json: String = row.get(4)?;
    let metrics_json: String = row.get(5)?;
    let tags_json: String = row.get(6)?;

    let decode = move || -> Result<Transaction, EngineError> {
        Ok(Transaction {
            id,
            config_key: ConfigKey::from_storage_key(&config_key)?,
            created_at,
            commit,
            raw_counts: serde_json::from_str(&raw_json)?,
            derived_metrics: serde_json::from_str(&metrics_json)?,
            tags: serde_json::from_str(&tags_json)?,
        })
    };
    Ok(decode())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
