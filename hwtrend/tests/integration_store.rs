//! Integration tests for the store lifecycle: ingest, consolidation across
//! bands, and fetches through a separate reader.

use std::time::Duration;

use hwtrend::query::{FetchRequest, Sample};
use hwtrend::schema::{ArchiveSchema, ConsolidationFn, TierConfig};
use hwtrend::store::{Store, StoreOptions, StoreReader};
use tempfile::tempdir;

/// Aligned on every step of the default schema (7200s).
const T: u64 = 1_699_999_200;

fn open_default(dir: &std::path::Path) -> Store {
    Store::open(dir, ArchiveSchema::sensor_default(), StoreOptions::default()).unwrap()
}

fn reading(i: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let jitter = ((i * 37) % 23) as f64;
    40.0 + jitter * 0.5
}

fn fetch(reader: &StoreReader, key: &str, start: u64, end: u64, step: u64, cf: ConsolidationFn) -> Vec<Sample> {
    let request = FetchRequest::between(start, end)
        .with_consolidation_fn(cf)
        .with_resolution(Duration::from_secs(step));
    reader.fetch_at(key, &request, end).into_samples()
}

#[test]
fn test_primary_resolution_scenario() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());

    store.ingest_at("k", 10.0, 0).unwrap();
    store.ingest_at("k", 12.0, 30).unwrap();
    store.ingest_at("k", 11.0, 60).unwrap();

    let request = FetchRequest::between(0, 90).with_resolution(Duration::from_secs(30));
    let result = store.fetch_at("k", &request, 90);

    assert_eq!(result.step(), 30);
    assert!(!result.may_be_incomplete());
    assert_eq!(result.known_points(), vec![(0, 10.0), (30_000, 12.0), (60_000, 11.0)]);
}

#[test]
fn test_gap_becomes_unknown_rows() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());

    // Five missed primary steps between the two readings
    store.ingest_at("k", 1.0, T).unwrap();
    store.ingest_at("k", 2.0, T + 6 * 30).unwrap();

    let samples = fetch(&store.reader(), "k", T, T + 210, 30, ConsolidationFn::Average);
    let values: Vec<Option<f64>> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![Some(1.0), None, None, None, None, None, Some(2.0)]);
}

#[test]
fn test_unknown_key_is_empty() {
    let temp_dir = tempdir().unwrap();
    let store = open_default(temp_dir.path());

    assert!(store.fetch_at("no_such_temp1_input", &FetchRequest::default(), T).is_empty());
    assert!(store.reader().fetch_at("../escape", &FetchRequest::default(), T).is_empty());
}

#[test]
fn test_equal_timestamp_overwrites_and_older_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());

    store.ingest_at("k", 10.0, T).unwrap();
    store.ingest_at("k", 12.0, T + 30).unwrap();
    store.ingest_at("k", 20.0, T + 30).unwrap();
    assert!(store.ingest_at("k", 99.0, T + 29).is_err());
    store.ingest_at("k", 11.0, T + 60).unwrap();

    let samples = fetch(&store.reader(), "k", T, T + 90, 30, ConsolidationFn::Average);
    let values: Vec<Option<f64>> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![Some(10.0), Some(20.0), Some(11.0)]);
}

#[test]
fn test_bands_stay_consistent() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());
    let key = "coretemp-isa-0000_Package_id_0_temp1_input";

    // One hour of readings every 5 seconds
    for i in 0..720 {
        store.ingest_at(key, reading(i), T + i * 5).unwrap();
    }
    let reader = store.reader();
    let end = T + 3_600;

    for cf in [ConsolidationFn::Average, ConsolidationFn::Min, ConsolidationFn::Max] {
        let fine = fetch(&reader, key, T, end, 30, cf);
        let coarse = fetch(&reader, key, T, end, 300, cf);
        assert_eq!(fine.len(), 120, "{cf}");
        assert_eq!(coarse.len(), 12, "{cf}");

        for row in &coarse {
            let members: Vec<f64> = fine
                .iter()
                .filter(|s| s.timestamp_ms >= row.timestamp_ms && s.timestamp_ms < row.timestamp_ms + 300_000)
                .map(|s| s.value.unwrap())
                .collect();
            assert_eq!(members.len(), 10);

            let expected = cf.apply(&members).unwrap();
            let actual = row.value.unwrap();
            assert!((expected - actual).abs() < 1e-9, "{cf} at {}: {expected} != {actual}", row.timestamp_ms);
        }
    }
}

#[test]
fn test_fetch_output_is_step_spaced() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());

    // Irregular intervals including a long pause
    let mut t = T;
    for i in 0..400 {
        store.ingest_at("k", reading(i), t).unwrap();
        t += if i % 50 == 49 { 1_000 } else { 7 + i % 11 };
    }

    let reader = store.reader();
    for step in [30, 300, 1_800, 7_200] {
        let result = reader.fetch_at(
            "k",
            &FetchRequest::between(T, t).with_resolution(Duration::from_secs(step)),
            t,
        );
        assert_eq!(result.step(), step);
        assert!(!result.is_empty());
        assert!(
            result
                .samples()
                .windows(2)
                .all(|w| w[1].timestamp_ms - w[0].timestamp_ms == step * 1000)
        );
    }
}

#[test]
fn test_xff_decides_row_knowledge() {
    let temp_dir = tempdir().unwrap();
    let schema = ArchiveSchema::new(
        vec![
            TierConfig::new(Duration::from_secs(30), 100).unwrap(),
            TierConfig::new(Duration::from_secs(300), 100).unwrap(),
        ],
        vec![ConsolidationFn::Average],
        0.5,
    )
    .unwrap();
    let mut store = Store::open(temp_dir.path(), schema, StoreOptions::default()).unwrap();

    // First 5-minute row: 4 of 10 windows known
    for i in 0..4 {
        store.ingest_at("k", 1.0, T + i * 30).unwrap();
    }
    // Second row: 6 of 10 windows known
    for i in 0..6 {
        store.ingest_at("k", f64::from(u32::try_from(i).unwrap()), T + 300 + i * 30).unwrap();
    }
    store.ingest_at("k", 100.0, T + 600).unwrap();

    let samples = fetch(&store.reader(), "k", T, T + 630, 300, ConsolidationFn::Average);
    assert_eq!(samples[0].value, None);
    assert_eq!(samples[1].value, Some(2.5));
}

#[test]
fn test_reader_sees_writes_without_reopening() {
    let temp_dir = tempdir().unwrap();
    let mut store = open_default(temp_dir.path());
    let reader = StoreReader::new(temp_dir.path());

    store.ingest_at("k", 1.0, T).unwrap();
    assert_eq!(reader.series_keys().unwrap(), vec!["k".to_string()]);

    store.ingest_at("k", 2.0, T + 30).unwrap();
    let samples = fetch(&reader, "k", T, T + 60, 30, ConsolidationFn::Average);
    assert_eq!(samples.last().and_then(|s| s.value), Some(2.0));

    let info = reader.info("k").unwrap();
    assert_eq!(info.last_update, Some(T + 30));
    assert_eq!(info.primary_step, 30);
    assert_eq!(info.bands.len(), 12);
    assert_eq!(info.bands[0].newest_row, Some(T));
}

#[test]
fn test_start_outside_retention_is_flagged() {
    let temp_dir = tempdir().unwrap();
    let schema = ArchiveSchema::new(
        vec![TierConfig::new(Duration::from_secs(30), 10).unwrap()],
        vec![ConsolidationFn::Average],
        0.5,
    )
    .unwrap();
    let mut store = Store::open(temp_dir.path(), schema, StoreOptions::default()).unwrap();

    for i in 0..40 {
        store.ingest_at("k", 1.0, T + i * 30).unwrap();
    }

    let result = store.fetch_at("k", &FetchRequest::between(T, T + 1_200), T + 1_200);
    assert!(result.may_be_incomplete());
    // Only the retained rows plus the pending one
    assert_eq!(result.len(), 11);
    assert_eq!(result.samples()[0].timestamp_ms, (T + 870) * 1000);
}
