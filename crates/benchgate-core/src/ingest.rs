//! Ingestion pipeline: validate raw counts, derive metrics, append the
//! transaction with its category deltas, and promote a new snapshot version.

use crate::errors::EngineError;
use crate::metrics;
use crate::model::{CategoryMetric, ConfigKey, DerivedMetrics, RawCounts};
use crate::storage::Store;
use crate::thresholds::DeltaThresholds;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub config_key: ConfigKey,
    pub raw_counts: RawCounts,
    /// Commit identifier of the code under evaluation, if known.
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// What the producer gets back after a run is recorded.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub transaction_id: i64,
    pub snapshot_version: i64,
    pub derived_metrics: DerivedMetrics,
    pub category_deltas: Vec<CategoryMetric>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Per-category severity weights for risk-weighted recall. Categories
    /// not listed use weight 1.0.
    pub weights: HashMap<String, f64>,
    pub thresholds: DeltaThresholds,
}

/// Rejects malformed raw counts before anything is written.
pub fn validate(raw: &RawCounts) -> Result<(), EngineError> {
    for (name, c) in &raw.per_category {
        if name.is_empty() {
            return Err(EngineError::Validation("empty category name".into()));
        }
        if c.detected > c.total {
            return Err(EngineError::Validation(format!(
                "category '{}': detected ({}) exceeds total ({})",
                name, c.detected, c.total
            )));
        }
    }
    for v in &raw.latencies_ms {
        if !v.is_finite() || *v < 0.0 {
            return Err(EngineError::Validation(format!(
                "latency sample {} is not a non-negative finite number",
                v
            )));
        }
    }
    for (label, v) in [
        ("cost_per_second", raw.cost_per_second),
        ("savings_realized", raw.savings_realized),
        ("savings_missed", raw.savings_missed),
    ] {
        if !v.is_finite() || v < 0.0 {
            return Err(EngineError::Validation(format!(
                "{} must be a non-negative finite number, got {}",
                label, v
            )));
        }
    }
    Ok(())
}

/// Records one benchmark run end to end and promotes it to the current
/// snapshot for its config key.
pub fn ingest(
    store: &Store,
    req: &IngestRequest,
    opts: &IngestOptions,
) -> Result<IngestReceipt, EngineError> {
    validate(&req.raw_counts)?;

    let derived = metrics::derive(&req.raw_counts, &opts.weights);

    // Deltas are computed inside the append's SQLite transaction, against
    // whatever prior run actually committed last for this key.
    let (transaction_id, category_deltas) = store.append_transaction(
        &req.config_key,
        &req.raw_counts,
        &derived,
        req.commit.as_deref(),
        &req.tags,
        &opts.thresholds,
    )?;
    let snapshot = store.record_new_version(&req.config_key, transaction_id)?;

    tracing::debug!(
        config = %req.config_key,
        transaction_id,
        version = snapshot.version,
        "run ingested"
    );

    Ok(IngestReceipt {
        transaction_id,
        snapshot_version: snapshot.version,
        derived_metrics: derived,
        category_deltas,
    })
}
