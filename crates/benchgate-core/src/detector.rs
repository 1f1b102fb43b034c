//! Regression detection: current snapshot vs the designated baseline.

use crate::errors::EngineError;
use crate::model::{ConfigKey, P95_LATENCY_MS};
use crate::storage::Store;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// One metric's movement relative to the baseline. `drop` is oriented so
/// that positive always means "got worse": baseline minus current for
/// higher-is-better metrics, current minus baseline for latency.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDrift {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    pub drop: f64,
    pub regressed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionReport {
    pub config_key: ConfigKey,
    pub baseline_version: i64,
    pub current_version: i64,
    pub threshold: f64,
    pub generated_at: String,
    pub entries: Vec<MetricDrift>,
}

impl RegressionReport {
    pub fn regressed(&self) -> bool {
        self.entries.iter().any(|e| e.regressed)
    }

    pub fn regressions(&self) -> impl Iterator<Item = &MetricDrift> {
        self.entries.iter().filter(|e| e.regressed)
    }

    /// Writes the report as pretty JSON (entries are already sorted by
    /// metric name, so output is git-diffable).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("failed to write report JSON")?;
        Ok(())
    }
}

/// Compares the current snapshot's metrics to the baseline's for every
/// derived metric defined on both, flagging drops past `threshold`. Pure
/// read; no state changes on any path, including errors.
pub fn detect(
    store: &Store,
    key: &ConfigKey,
    threshold: f64,
) -> Result<RegressionReport, EngineError> {
    let baseline = store
        .baseline_snapshot(key)?
        .ok_or_else(|| EngineError::NoBaseline(key.to_string()))?;
    let current = store
        .current_snapshot(key)?
        .ok_or_else(|| EngineError::NoCurrent(key.to_string()))?;

    let baseline_metrics = store
        .get_transaction(baseline.transaction_id)?
        .derived_metrics
        .present();
    let current_metrics = store
        .get_transaction(current.transaction_id)?
        .derived_metrics
        .present();

    let mut entries = Vec::new();
    for (name, baseline_value) in &baseline_metrics {
        let Some(current_value) = current_metrics.get(name) else {
            continue;
        };
        // Latency regresses upward; everything else regresses downward.
        let drop = if name == P95_LATENCY_MS {
            current_value - baseline_value
        } else {
            baseline_value - current_value
        };
        entries.push(MetricDrift {
            metric: name.clone(),
            baseline: *baseline_value,
            current: *current_value,
            drop,
            regressed: drop > threshold,
        });
    }

    let report = RegressionReport {
        config_key: key.clone(),
        baseline_version: baseline.version,
        current_version: current.version,
        threshold,
        generated_at: chrono::Utc::now().to_rfc3339(),
        entries,
    };
    if report.regressed() {
        tracing::warn!(
            config = %key,
            regressions = report.regressions().count(),
            "regression detected against baseline v{}",
            baseline.version
        );
    }
    Ok(report)
}
