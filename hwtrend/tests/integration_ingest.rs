//! End-to-end tests: the ingest loop writes archives, the query service
//! reads them through its own reader.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hwtrend::ingest::{CycleReport, DEFAULT_INTERVAL, IngestLoop};
use hwtrend::schema::ArchiveSchema;
use hwtrend::snapshot::Snapshot;
use hwtrend::store::{Store, StoreOptions, StoreReader};
use hwtrend::{ChartState, QueryService, Result, TypeRules};
use serde_json::json;
use tempfile::tempdir;

/// Aligned on the 30s primary step.
const T: u64 = 1_700_000_010;

fn shipped_rules() -> TypeRules {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config/sensor_types.json");
    TypeRules::load(path).unwrap()
}

/// A source whose fan speed ramps by 10 RPM per cycle.
fn ramping_source() -> impl FnMut() -> Result<Snapshot> {
    let mut cycle = 0u32;
    move || {
        cycle += 1;
        let json = json!({
            "coretemp-isa-0000": {
                "Adapter": "ISA adapter",
                "Package id 0": { "temp1_input": 50.0, "temp1_max": 100.0 }
            },
            "nct6775-isa-0290": {
                "Adapter": "ISA adapter",
                "fan2": { "fan2_input": f64::from(1000 + cycle * 10) },
                "in1": { "in1_input": 1.05 }
            }
        });
        Snapshot::from_json(&json)
    }
}

fn service(dir: &Path, chart_state: &Path) -> QueryService {
    QueryService::new(StoreReader::new(dir), shipped_rules(), ChartState::load(chart_state))
}

#[test]
fn test_ingest_then_query() {
    let temp_dir = tempdir().unwrap();
    let data_dir = temp_dir.path().join("rrd");
    let store = Store::open(&data_dir, ArchiveSchema::sensor_default(), StoreOptions::default()).unwrap();
    let mut ingest = IngestLoop::new(store, ramping_source(), DEFAULT_INTERVAL);

    // Ten minutes of cycles every 5 seconds
    for i in 0..120 {
        let report = ingest.run_cycle_at(T + i * 5).unwrap();
        assert_eq!(
            report,
            CycleReport {
                ingested: 4,
                rejected: 0,
                failed: 0
            }
        );
    }

    let service = service(&data_dir, &temp_dir.path().join("chart_state.json"));

    let counts: Vec<(String, usize)> = service.types().into_iter().map(|t| (t.id, t.count)).collect();
    assert_eq!(
        counts,
        vec![
            ("temperature".to_string(), 1),
            ("fan".to_string(), 1),
            ("voltage".to_string(), 1)
        ]
    );

    let fans = service.sensors_by_type("fan").unwrap();
    assert_eq!(fans.len(), 1);
    assert_eq!(fans[0].id, "nct6775-isa-0290_fan2_fan2_input");
    assert_eq!(fans[0].device_label, "Nct6775 0290");

    let start = T.to_string();
    let end = (T + 600).to_string();
    let points = service.range_data_at(&fans[0].id, Some(&start), Some(&end), Some("30s"), T + 600);
    assert_eq!(points.len(), 20);
    assert_eq!(points[0].0, T * 1000);
    // Six cycles per 30s row: 1010..1060 average to 1035
    assert!((points[0].1 - 1035.0).abs() < 1e-9);
    assert!(points.windows(2).all(|w| w[1].1 > w[0].1));

    // Non-typed keys are still fetchable directly
    let max_key = "coretemp-isa-0000_Package_id_0_temp1_max";
    assert_eq!(
        service.range_data_at(max_key, Some(&start), Some(&end), Some("5m"), T + 600)[0].1,
        100.0
    );
}

#[test]
fn test_missed_cycles_stay_gaps() {
    let temp_dir = tempdir().unwrap();
    let data_dir = temp_dir.path().join("rrd");
    let store = Store::open(&data_dir, ArchiveSchema::sensor_default(), StoreOptions::default()).unwrap();
    let mut ingest = IngestLoop::new(store, ramping_source(), Duration::from_secs(30));

    ingest.run_cycle_at(T).unwrap();
    ingest.run_cycle_at(T + 30).unwrap();
    // Daemon down for two minutes
    ingest.run_cycle_at(T + 180).unwrap();

    let reader = StoreReader::new(&data_dir);
    let request = hwtrend::FetchRequest::between(T, T + 210).with_resolution(Duration::from_secs(30));
    let result = reader.fetch_at("coretemp-isa-0000_Package_id_0_temp1_input", &request, T + 210);

    let known: Vec<bool> = result.samples().iter().map(|s| s.value.is_some()).collect();
    assert_eq!(known, vec![true, true, false, false, false, false, true]);
}

#[test]
fn test_chart_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let data_dir = temp_dir.path().join("rrd");
    let state_path = temp_dir.path().join("static").join("chart_state.json");

    service(&data_dir, &state_path)
        .update_chart_state(json!({"fan": {"hidden": ["nct6775-isa-0290_fan2_fan2_input"]}}))
        .unwrap();

    let restarted = service(&data_dir, &state_path);
    assert_eq!(
        restarted.chart_state(),
        json!({"fan": {"hidden": ["nct6775-isa-0290_fan2_fan2_input"]}})
    );
    // No archives yet: every type is listed with no members
    assert!(restarted.types().iter().all(|t| t.count == 0));
}
