//! Console summaries for the CLI. Output goes to stderr, leaving stdout for
//! machine-readable JSON.

use crate::detector::RegressionReport;
use crate::ingest::IngestReceipt;
use crate::model::Severity;
use crate::storage::versions::ComparisonReport;

pub fn print_receipt(receipt: &IngestReceipt) {
    eprintln!(
        "Recorded transaction {} as snapshot v{}",
        receipt.transaction_id, receipt.snapshot_version
    );
    for (name, value) in receipt.derived_metrics.present() {
        eprintln!("  {:<22} {:.4}", name, value);
    }
    for c in &receipt.category_deltas {
        match c.severity {
            Severity::NoData => eprintln!("  [{}] no data", c.category),
            _ => {
                let delta = c
                    .delta_from_previous
                    .map(|d| format!("{:+.4}", d))
                    .unwrap_or_else(|| "first sample".to_string());
                eprintln!(
                    "  [{}] rate={:.4} delta={} ({})",
                    c.category,
                    c.detection_rate.unwrap_or(0.0),
                    delta,
                    c.severity.as_str()
                );
            }
        }
    }
}

pub fn print_comparison(report: &ComparisonReport) {
    eprintln!(
        "Compare {} v{} -> v{}",
        report.config_key, report.version_a, report.version_b
    );
    for (name, m) in &report.metrics {
        let pct = m
            .percent_change
            .map(|p| format!("{:+.2}%", p))
            .unwrap_or_else(|| "n/a".to_string());
        eprintln!(
            "  {:<22} {:.4} -> {:.4} (delta {:+.4}, {})",
            name, m.value_a, m.value_b, m.delta, pct
        );
    }
}

pub fn print_regressions(report: &RegressionReport) {
    eprintln!(
        "Detect {} current v{} vs baseline v{} (threshold {})",
        report.config_key, report.current_version, report.baseline_version, report.threshold
    );
    for e in &report.entries {
        if e.regressed {
            eprintln!(
                "REGRESSED [{}]: baseline {:.4} -> current {:.4} (drop {:.4})",
                e.metric, e.baseline, e.current, e.drop
            );
        }
    }
    let flagged = report.regressions().count();
    eprintln!(
        "Results: metrics={} regressed={}",
        report.entries.len(),
        flagged
    );
}
