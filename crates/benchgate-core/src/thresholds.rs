use serde::{Deserialize, Serialize};

/// Boundaries for classifying a per-category detection-rate delta.
///
/// Defaults: delta <= -0.15 severe, (-0.15, -0.05] moderate, (-0.05, 0.05)
/// stable, >= 0.05 improvement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DeltaThresholds {
    pub severe: f64,
    pub moderate: f64,
    pub improvement: f64,
}

impl Default for DeltaThresholds {
    fn default() -> Self {
        Self {
            severe: -0.15,
            moderate: -0.05,
            improvement: 0.05,
        }
    }
}

/// Default drop threshold for baseline regression detection.
pub const DEFAULT_DETECT_THRESHOLD: f64 = 0.05;
