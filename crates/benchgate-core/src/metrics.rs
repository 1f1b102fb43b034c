//! Pure metric formulas. No state, no I/O.
//!
//! Every function returns `None` when the metric is undefined for the input
//! (empty sample, zero denominator). Callers must not see NaN or inf.

use crate::model::{CategoryCounts, DerivedMetrics, RawCounts};
use std::collections::{BTreeMap, HashMap};

pub fn precision(tp: u64, fp: u64) -> Option<f64> {
    ratio(tp as f64, (tp + fp) as f64)
}

pub fn recall(tp: u64, fn_count: u64) -> Option<f64> {
    ratio(tp as f64, (tp + fn_count) as f64)
}

pub fn f1(precision: Option<f64>, recall: Option<f64>) -> Option<f64> {
    let (p, r) = (precision?, recall?);
    ratio(2.0 * p * r, p + r)
}

/// Recall with each category's contribution scaled by a severity weight.
/// Unknown categories fall back to weight 1.0.
pub fn risk_weighted_recall(
    per_category: &BTreeMap<String, CategoryCounts>,
    weights: &HashMap<String, f64>,
) -> Option<f64> {
    let mut num = 0.0;
    let mut den = 0.0;
    for (name, counts) in per_category {
        let w = weights.get(name).copied().unwrap_or(1.0);
        num += w * counts.detected as f64;
        den += w * counts.total as f64;
    }
    ratio(num, den)
}

/// FN / (FN + FP). 1.0 = purely conservative (only misses, no false alarms),
/// 0.0 = purely aggressive. `None` if there were no detection errors at all.
pub fn conservatism_index(fn_count: u64, fp: u64) -> Option<f64> {
    ratio(fn_count as f64, (fn_count + fp) as f64)
}

/// 95th percentile by nearest rank: sort ascending, take the value at index
/// `ceil(0.95 * n) - 1`, clamped to the valid range.
pub fn p95_latency(samples: &[f64]) -> Option<f64> {
    percentile(samples, 0.95)
}

pub fn percentile(samples: &[f64], q: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let idx = ((q * n as f64).ceil() as usize).saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

/// Cost of running inference for the run: mean latency in seconds times the
/// per-second cost. `None` with no latency samples.
pub fn inference_cost(latencies_ms: &[f64], cost_per_second: f64) -> Option<f64> {
    if latencies_ms.is_empty() {
        return None;
    }
    let avg_ms = latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64;
    Some((avg_ms / 1000.0) * cost_per_second)
}

/// Potential savings per unit of inference cost. `None` when cost is zero or
/// undefined so a zero-cost run never surfaces as infinite ROI.
pub fn roi_ratio(total_potential_savings: f64, inference_cost: Option<f64>) -> Option<f64> {
    let cost = inference_cost?;
    if cost <= 0.0 {
        return None;
    }
    Some(total_potential_savings / cost)
}

/// Derives the full metric set for one run. Called once at write time; the
/// result is persisted with the transaction and never recomputed.
pub fn derive(raw: &RawCounts, weights: &HashMap<String, f64>) -> DerivedMetrics {
    let p = precision(raw.true_positives, raw.false_positives);
    let r = recall(raw.true_positives, raw.false_negatives);
    let cost = inference_cost(&raw.latencies_ms, raw.cost_per_second);
    DerivedMetrics {
        precision: p,
        recall: r,
        f1: f1(p, r),
        risk_weighted_recall: risk_weighted_recall(&raw.per_category, weights),
        conservatism_index: conservatism_index(raw.false_negatives, raw.false_positives),
        p95_latency_ms: p95_latency(&raw.latencies_ms),
        roi_ratio: roi_ratio(raw.total_potential_savings(), cost),
        extra: BTreeMap::new(),
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}
