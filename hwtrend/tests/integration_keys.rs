//! Integration tests for key derivation and type classification against a
//! real `sensors -j` snapshot.

use hwtrend::classify::TypeRules;
use hwtrend::key::{derive, device_label_for_key, short_name_for_key};
use hwtrend::snapshot::Snapshot;

const SENSORS_JSON: &str = r#"{
   "coretemp-isa-0000":{
      "Adapter": "ISA adapter",
      "Package id 0":{
         "temp1_input": 48.000,
         "temp1_max": 100.000,
         "temp1_crit": 100.000,
         "temp1_crit_alarm": 0.000
      },
      "Core 0":{
         "temp2_input": 45.000,
         "temp2_max": 100.000
      }
   },
   "nct6775-isa-0290":{
      "Adapter": "ISA adapter",
      "in0":{
         "in0_input": 0.912,
         "in0_min": 0.000
      },
      "fan1":{
         "fan1_input": 1210.000,
         "fan1_pulses": 2.000
      }
   },
   "nvme-pci-0100":{
      "Adapter": "PCI adapter",
      "Composite":{
         "temp1_input": 38.850,
         "temp1_alarm": 0.000
      }
   }
}"#;

fn rules() -> TypeRules {
    TypeRules::from_json(
        r#"{
            "types": {
                "temperature": { "matches": ["temp\\d+_input"], "name": "Temperature", "unit": "°C" },
                "fan": { "matches": ["fan\\d+_input"], "name": "Fans", "unit": " RPM" },
                "voltage": { "matches": ["in\\d+_input"], "name": "Voltage", "unit": " V" }
            }
        }"#,
    )
    .unwrap()
}

fn snapshot_keys() -> Vec<String> {
    let snapshot = Snapshot::parse(SENSORS_JSON).unwrap();
    let mut keys = Vec::new();
    snapshot.walk(|path, _| keys.push(derive(path).key));
    keys
}

#[test]
fn test_device_label_scenario() {
    let derived = derive(&["nct6775-isa-0290", "fan1", "input"]);
    assert_eq!(derived.device_label, "Nct6775 0290");
    assert_eq!(derive(&["nvme-pci-0100", "Composite", "temp1_input"]).device_label, "Nvme 0100");
}

#[test]
fn test_temperature_scenario() {
    assert_eq!(rules().classify("coretemp_Package_id_0_temp1_input"), Some("temperature"));
}

#[test]
fn test_snapshot_keys_cover_every_numeric_leaf() {
    let mut keys = snapshot_keys();
    keys.sort();
    let mut expected = vec![
        "coretemp-isa-0000_Package_id_0_temp1_input",
        "coretemp-isa-0000_Package_id_0_temp1_max",
        "coretemp-isa-0000_Package_id_0_temp1_crit",
        "coretemp-isa-0000_Package_id_0_temp1_crit_alarm",
        "coretemp-isa-0000_Core_0_temp2_input",
        "coretemp-isa-0000_Core_0_temp2_max",
        "nct6775-isa-0290_in0_in0_input",
        "nct6775-isa-0290_in0_in0_min",
        "nct6775-isa-0290_fan1_fan1_input",
        "nct6775-isa-0290_fan1_fan1_pulses",
        "nvme-pci-0100_Composite_temp1_input",
        "nvme-pci-0100_Composite_temp1_alarm",
    ];
    expected.sort_unstable();
    assert_eq!(keys, expected);
}

#[test]
fn test_group_snapshot_keys() {
    let index = rules().group(snapshot_keys());

    assert_eq!(
        index.members("temperature").unwrap(),
        &[
            "coretemp-isa-0000_Core_0_temp2_input".to_string(),
            "coretemp-isa-0000_Package_id_0_temp1_input".to_string(),
            "nvme-pci-0100_Composite_temp1_input".to_string(),
        ]
    );
    assert_eq!(index.members("fan").unwrap(), &["nct6775-isa-0290_fan1_fan1_input".to_string()]);
    assert_eq!(index.members("voltage").unwrap(), &["nct6775-isa-0290_in0_in0_input".to_string()]);
}

#[test]
fn test_labels_from_keys() {
    let key = "nvme-pci-0100_Composite_temp1_input";
    assert_eq!(device_label_for_key(key), "Nvme 0100");
    assert_eq!(short_name_for_key(key), "Composite");
    assert_eq!(short_name_for_key("nct6775-isa-0290_fan1_fan1_input"), "fan1");
}
