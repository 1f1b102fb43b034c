use benchgate_core::detector::detect;
use benchgate_core::errors::EngineError;
use benchgate_core::ingest::{ingest, IngestOptions, IngestRequest};
use benchgate_core::model::{ConfigKey, RawCounts};
use benchgate_core::storage::Store;
use tempfile::tempdir;

fn key() -> ConfigKey {
    ConfigKey::new("claude-x", "claims-v3", "p7", "prod")
}

fn run(tp: u64, fn_count: u64, p95: f64) -> IngestRequest {
    IngestRequest {
        config_key: key(),
        raw_counts: RawCounts {
            true_positives: tp,
            false_positives: 2,
            false_negatives: fn_count,
            latencies_ms: vec![p95],
            ..Default::default()
        },
        commit: None,
        tags: vec![],
    }
}

#[test]
fn test_detect_without_baseline_fails_and_mutates_nothing() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest(&store, &run(8, 2, 100.0), &IngestOptions::default())?;

    let err = detect(&store, &key(), 0.05).unwrap_err();
    assert!(matches!(err, EngineError::NoBaseline(_)));

    // Nothing changed: still one version, still current, still no baseline.
    let versions = store.list_versions(&key())?;
    assert_eq!(versions.len(), 1);
    assert!(versions[0].is_current);
    assert!(store.baseline_snapshot(&key())?.is_none());
    Ok(())
}

#[test]
fn test_detect_on_empty_config_fails() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    // Zero snapshots: no baseline exists either, so that precondition trips.
    let err = detect(&store, &key(), 0.05).unwrap_err();
    assert!(matches!(err, EngineError::NoBaseline(_)));
    Ok(())
}

#[test]
fn test_recall_drop_past_threshold_is_flagged() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    // Baseline: recall 8/10 = 0.8. Current: recall 6/10 = 0.6.
    ingest(&store, &run(8, 2, 100.0), &IngestOptions::default())?;
    store.designate_baseline(&key(), 1)?;
    ingest(&store, &run(6, 4, 100.0), &IngestOptions::default())?;

    let rep = detect(&store, &key(), 0.05)?;
    assert!(rep.regressed());
    let recall = rep.entries.iter().find(|e| e.metric == "recall").unwrap();
    assert!(recall.regressed);
    assert!((recall.drop - 0.2).abs() < 1e-9);

    // Latency unchanged: not flagged.
    let lat = rep
        .entries
        .iter()
        .find(|e| e.metric == "p95_latency_ms")
        .unwrap();
    assert!(!lat.regressed);
    Ok(())
}

#[test]
fn test_drop_within_threshold_is_not_flagged() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    // Recall 0.80 -> 0.79: inside the default gate.
    ingest(&store, &run(80, 20, 100.0), &IngestOptions::default())?;
    store.designate_baseline(&key(), 1)?;
    ingest(&store, &run(79, 21, 100.0), &IngestOptions::default())?;

    let rep = detect(&store, &key(), 0.05)?;
    assert!(!rep.regressed());
    Ok(())
}

#[test]
fn test_latency_regression_direction_is_inverted() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    ingest(&store, &run(8, 2, 100.0), &IngestOptions::default())?;
    store.designate_baseline(&key(), 1)?;
    // Same quality, much slower.
    ingest(&store, &run(8, 2, 900.0), &IngestOptions::default())?;

    let rep = detect(&store, &key(), 50.0)?;
    let lat = rep
        .entries
        .iter()
        .find(|e| e.metric == "p95_latency_ms")
        .unwrap();
    assert!(lat.regressed);
    assert!((lat.drop - 800.0).abs() < 1e-9);

    // Quality metrics did not move, so nothing else is flagged.
    assert_eq!(rep.regressions().count(), 1);
    Ok(())
}

#[test]
fn test_detect_respects_checked_out_current() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    ingest(&store, &run(8, 2, 100.0), &IngestOptions::default())?;
    store.designate_baseline(&key(), 1)?;
    ingest(&store, &run(4, 6, 100.0), &IngestOptions::default())?;

    // v2 regresses; rolling back to v1 clears the gate.
    assert!(detect(&store, &key(), 0.05)?.regressed());
    store.checkout(&key(), 1)?;
    let rep = detect(&store, &key(), 0.05)?;
    assert!(!rep.regressed());
    assert_eq!(rep.current_version, 1);
    Ok(())
}

#[test]
fn test_report_export_is_valid_json() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Store::memory()?;
    store.init_schema()?;

    ingest(&store, &run(8, 2, 100.0), &IngestOptions::default())?;
    store.designate_baseline(&key(), 1)?;
    ingest(&store, &run(6, 4, 100.0), &IngestOptions::default())?;

    let rep = detect(&store, &key(), 0.05)?;
    let path = dir.path().join("reports/regressions.json");
    rep.save(&path)?;

    let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(parsed["baseline_version"], 1);
    assert_eq!(parsed["current_version"], 2);
    assert!(parsed["entries"].as_array().unwrap().len() >= 3);
    Ok(())
}
