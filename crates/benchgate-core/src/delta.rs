//! Category delta tracking: change in per-category detection rate against
//! the most recent prior transaction for the same config key.

use crate::model::{CategoryCounts, CategoryMetric, Severity};
use crate::thresholds::DeltaThresholds;
use std::collections::BTreeMap;

/// Classifies one delta. `None` (no prior data or no cases in this run) is
/// handled by the caller; this only sees defined deltas.
pub fn classify(delta: f64, t: &DeltaThresholds) -> Severity {
    if delta <= t.severe {
        Severity::SevereRegression
    } else if delta <= t.moderate {
        Severity::ModerateRegression
    } else if delta >= t.improvement {
        Severity::Improvement
    } else {
        Severity::Stable
    }
}

/// Computes per-category metrics for a new run.
///
/// `prior_rates` holds the latest defined detection rate per category for
/// this config key (absent for categories never seen with cases). A category
/// with `total = 0` in the new run gets a null rate, a null delta, and
/// severity `no_data` regardless of history.
pub fn compute(
    per_category: &BTreeMap<String, CategoryCounts>,
    prior_rates: &BTreeMap<String, f64>,
    thresholds: &DeltaThresholds,
) -> Vec<CategoryMetric> {
    let mut out = Vec::with_capacity(per_category.len());
    for (name, counts) in per_category {
        let rate = if counts.total == 0 {
            None
        } else {
            Some(counts.detected as f64 / counts.total as f64)
        };
        let delta = match rate {
            Some(r) => prior_rates.get(name).map(|prev| r - prev),
            None => None,
        };
        let severity = match (rate, delta) {
            (None, _) => Severity::NoData,
            (Some(_), None) => Severity::Stable, // first sample for this pair
            (Some(_), Some(d)) => classify(d, thresholds),
        };
        out.push(CategoryMetric {
            category: name.clone(),
            total: counts.total,
            detected: counts.detected,
            detection_rate: rate,
            delta_from_previous: delta,
            severity,
        });
    }
    out
}
