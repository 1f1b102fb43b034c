use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies one evaluation configuration. Transactions sharing a key are
/// directly comparable; transactions with different keys are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub model_version: String,
    pub dataset_version: String,
    pub prompt_version: String,
    pub environment: String,
}

impl ConfigKey {
    pub fn new(
        model_version: impl Into<String>,
        dataset_version: impl Into<String>,
        prompt_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            dataset_version: dataset_version.into(),
            prompt_version: prompt_version.into(),
            environment: environment.into(),
        }
    }

    /// Canonical storage form. JSON keeps opaque field values collision-free
    /// (a separator join would not survive fields containing the separator).
    pub fn storage_key(&self) -> String {
        serde_json::to_string(self).expect("config key serializes")
    }

    pub fn from_storage_key(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.model_version, self.dataset_version, self.prompt_version, self.environment
        )
    }
}

/// Per-category hit counts for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub total: u64,
    pub detected: u64,
}

/// Raw counts for one benchmark run, exactly as the producer measured them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCounts {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    #[serde(default)]
    pub latencies_ms: Vec<f64>,
    #[serde(default)]
    pub per_category: BTreeMap<String, CategoryCounts>,
    #[serde(default)]
    pub cost_per_second: f64,
    #[serde(default)]
    pub savings_realized: f64,
    #[serde(default)]
    pub savings_missed: f64,
}

impl RawCounts {
    /// Savings the run could have captured in total (realized plus missed).
    pub fn total_potential_savings(&self) -> f64 {
        self.savings_realized + self.savings_missed
    }
}

/// Derived scalar metrics, computed once at transaction write time.
///
/// `None` means the metric was undefined for the input (division by zero,
/// empty sample), which downstream must distinguish from "not computed".
/// `extra` is an open map for experimental metrics; the named fields are the
/// ones comparisons and regression detection are typed against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub risk_weighted_recall: Option<f64>,
    pub conservatism_index: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub roi_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

/// Metric name used to invert the regression direction for latency.
pub const P95_LATENCY_MS: &str = "p95_latency_ms";

impl DerivedMetrics {
    /// Metrics that actually have a value, keyed by name. Extras included.
    pub fn present(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let named = [
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1),
            ("risk_weighted_recall", self.risk_weighted_recall),
            ("conservatism_index", self.conservatism_index),
            (P95_LATENCY_MS, self.p95_latency_ms),
            ("roi_ratio", self.roi_ratio),
        ];
        for (name, v) in named {
            if let Some(v) = v {
                out.insert(name.to_string(), v);
            }
        }
        for (name, v) in &self.extra {
            out.insert(name.clone(), *v);
        }
        out
    }
}

/// One immutable recorded benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub config_key: ConfigKey,
    pub created_at: String,
    /// Commit identifier of the model/pipeline code that produced the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub raw_counts: RawCounts,
    pub derived_metrics: DerivedMetrics,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A versioned pointer associating a ConfigKey with one Transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub config_key: ConfigKey,
    pub version: i64,
    pub transaction_id: i64,
    pub is_current: bool,
    pub is_baseline: bool,
    pub created_at: String,
}

/// Severity class for a per-category detection-rate move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    SevereRegression,
    ModerateRegression,
    Stable,
    Improvement,
    NoData,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::SevereRegression => "severe_regression",
            Severity::ModerateRegression => "moderate_regression",
            Severity::Stable => "stable",
            Severity::Improvement => "improvement",
            Severity::NoData => "no_data",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "severe_regression" => Severity::SevereRegression,
            "moderate_regression" => Severity::ModerateRegression,
            "improvement" => Severity::Improvement,
            "no_data" => Severity::NoData,
            _ => Severity::Stable,
        }
    }
}

/// Per-category detection-rate sample tied to one Transaction.
///
/// `delta_from_previous` is against the most recent earlier transaction
/// sharing the same config key and category, or `None` for the first one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryMetric {
    pub category: String,
    pub total: u64,
    pub detected: u64,
    pub detection_rate: Option<f64>,
    pub delta_from_previous: Option<f64>,
    pub severity: Severity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_roundtrip() {
        let key = ConfigKey::new("gpt-4o", "claims-v3", "p7", "staging");
        let s = key.storage_key();
        let back = ConfigKey::from_storage_key(&s).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_storage_key_is_collision_free_on_separators() {
        // Fields containing plausible separator characters must not collide.
        let a = ConfigKey::new("m/1", "d", "p", "e");
        let b = ConfigKey::new("m", "1/d", "p", "e");
        assert_ne!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_present_skips_undefined_metrics() {
        let m = DerivedMetrics {
            precision: Some(0.9),
            recall: None,
            ..Default::default()
        };
        let present = m.present();
        assert_eq!(present.get("precision"), Some(&0.9));
        assert!(!present.contains_key("recall"));
    }
}
