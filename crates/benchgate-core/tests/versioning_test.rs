use benchgate_core::errors::EngineError;
use benchgate_core::ingest::{ingest, IngestOptions, IngestRequest};
use benchgate_core::model::{ConfigKey, DerivedMetrics, RawCounts};
use benchgate_core::storage::Store;
use benchgate_core::thresholds::DeltaThresholds;

fn key() -> ConfigKey {
    ConfigKey::new("claude-x", "claims-v3", "p7", "prod")
}

fn ingest_run(store: &Store, tp: u64, fn_count: u64) -> anyhow::Result<i64> {
    let req = IngestRequest {
        config_key: key(),
        raw_counts: RawCounts {
            true_positives: tp,
            false_positives: 1,
            false_negatives: fn_count,
            latencies_ms: vec![100.0],
            ..Default::default()
        },
        commit: None,
        tags: vec![],
    };
    Ok(ingest(store, &req, &IngestOptions::default())?.snapshot_version)
}

#[test]
fn test_versions_are_dense_and_exactly_one_current() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    for i in 0..5 {
        let v = ingest_run(&store, 8 + i, 2)?;
        assert_eq!(v, (i + 1) as i64);
    }

    let versions = store.list_versions(&key())?;
    let numbers: Vec<i64> = versions.iter().map(|s| s.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    let current: Vec<&_> = versions.iter().filter(|s| s.is_current).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].version, 5);
    Ok(())
}

#[test]
fn test_checkout_moves_pointer_without_new_version() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest_run(&store, 8, 2)?;
    ingest_run(&store, 9, 1)?;
    let txns_before = store.list_for_config(&key(), 10, None, None)?.len();

    let snap = store.checkout(&key(), 1)?;
    assert_eq!(snap.version, 1);
    assert!(snap.is_current);

    // No new version, no new transaction.
    assert_eq!(store.list_versions(&key())?.len(), 2);
    assert_eq!(
        store.list_for_config(&key(), 10, None, None)?.len(),
        txns_before
    );

    // Idempotent: checking out the same version again changes nothing.
    let again = store.checkout(&key(), 1)?;
    assert_eq!(again.version, 1);
    assert!(again.is_current);
    let current = store.current_snapshot(&key())?.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.transaction_id, snap.transaction_id);

    // Next ingest still allocates the next dense version.
    let v = ingest_run(&store, 7, 3)?;
    assert_eq!(v, 3);
    let current = store.current_snapshot(&key())?.unwrap();
    assert_eq!(current.version, 3);
    Ok(())
}

#[test]
fn test_checkout_missing_version_is_not_found() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest_run(&store, 8, 2)?;

    let err = store.checkout(&key(), 42).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    // Pointer untouched.
    assert_eq!(store.current_snapshot(&key())?.unwrap().version, 1);
    Ok(())
}

#[test]
fn test_baseline_moves_only_by_designation() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest_run(&store, 8, 2)?;
    assert!(store.baseline_snapshot(&key())?.is_none());

    store.designate_baseline(&key(), 1)?;
    assert_eq!(store.baseline_snapshot(&key())?.unwrap().version, 1);

    // Ingestion never touches the baseline flag.
    ingest_run(&store, 9, 1)?;
    ingest_run(&store, 9, 1)?;
    assert_eq!(store.baseline_snapshot(&key())?.unwrap().version, 1);

    // Re-designation clears the old flag; at most one baseline.
    store.designate_baseline(&key(), 3)?;
    let versions = store.list_versions(&key())?;
    let baselines: Vec<i64> = versions
        .iter()
        .filter(|s| s.is_baseline)
        .map(|s| s.version)
        .collect();
    assert_eq!(baselines, vec![3]);

    let err = store.designate_baseline(&key(), 42).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    Ok(())
}

#[test]
fn test_record_new_version_rejects_foreign_transaction() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest_run(&store, 8, 2)?;
    let txn = &store.list_for_config(&key(), 1, None, None)?[0];

    let other = ConfigKey::new("claude-x", "claims-v3", "p8", "prod");
    let err = store.record_new_version(&other, txn.id).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = store.record_new_version(&key(), 999).unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    Ok(())
}

#[test]
fn test_compare_version_to_itself_is_all_zero() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    ingest_run(&store, 8, 2)?;

    let cmp = store.compare(&key(), 1, 1)?;
    assert!(!cmp.metrics.is_empty());
    for (_, m) in &cmp.metrics {
        assert_eq!(m.delta, 0.0);
        assert_eq!(m.percent_change, Some(0.0));
    }
    Ok(())
}

#[test]
fn test_compare_skips_metrics_missing_on_either_side() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    // First version has latency metrics, second does not (no samples).
    ingest_run(&store, 8, 2)?;
    let req = IngestRequest {
        config_key: key(),
        raw_counts: RawCounts {
            true_positives: 9,
            false_positives: 1,
            false_negatives: 1,
            latencies_ms: vec![],
            ..Default::default()
        },
        commit: None,
        tags: vec![],
    };
    ingest(&store, &req, &IngestOptions::default())?;

    let cmp = store.compare(&key(), 1, 2)?;
    assert!(cmp.metrics.contains_key("precision"));
    assert!(!cmp.metrics.contains_key("p95_latency_ms"));
    Ok(())
}

#[test]
fn test_compare_percent_change_undefined_from_zero() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    // Write metrics directly so value_a is exactly zero.
    let zero = DerivedMetrics {
        precision: Some(0.0),
        ..Default::default()
    };
    let half = DerivedMetrics {
        precision: Some(0.5),
        ..Default::default()
    };
    let raw = RawCounts::default();
    let thresholds = DeltaThresholds::default();
    let (t1, _) = store.append_transaction(&key(), &raw, &zero, None, &[], &thresholds)?;
    let (t2, _) = store.append_transaction(&key(), &raw, &half, None, &[], &thresholds)?;
    store.record_new_version(&key(), t1)?;
    store.record_new_version(&key(), t2)?;

    let cmp = store.compare(&key(), 1, 2)?;
    let m = &cmp.metrics["precision"];
    assert_eq!(m.delta, 0.5);
    assert_eq!(m.percent_change, None);
    Ok(())
}
