use std::collections::BTreeMap;

use skew_core::Version;
use skew_featuregate::{FeatureGate, FeatureSpecs, MutableVersionedFeatureGate, PreRelease, VersionedFeatureGate};

const TABLE: &str = r#"
ServerSideApply:
  default: true
  lockToDefault: true
  preRelease: GA
Watchlist:
  - version: "1.30"
    default: false
    preRelease: ALPHA
  - version: "1.32"
    default: true
    preRelease: BETA
"#;

#[test]
fn gate_built_from_yaml_table() {
    let table: BTreeMap<String, FeatureSpecs> = serde_yaml::from_str(TABLE).unwrap();
    assert!(!table["ServerSideApply"].is_versioned());
    assert!(table["Watchlist"].is_versioned());

    let gate = VersionedFeatureGate::new("kube");
    for (name, specs) in table {
        gate.add(&name, specs).unwrap();
    }
    gate.close();

    gate.set_emulation_version(&Version::major_minor(1, 31)).unwrap();
    assert!(gate.enabled("ServerSideApply"));
    assert!(!gate.enabled("Watchlist"));
    assert_eq!(
        table_stage(&gate, "Watchlist"),
        Some("Watchlist=true|false (ALPHA - default=false)".to_string())
    );

    gate.set_emulation_version(&Version::major_minor(1, 32)).unwrap();
    assert!(gate.enabled("Watchlist"));
    assert_eq!(
        table_stage(&gate, "Watchlist"),
        Some(format!("Watchlist=true|false ({} - default=true)", PreRelease::Beta))
    );

    assert!(gate.set("ServerSideApply=false").is_err());
    gate.set("Watchlist=false").unwrap();
    assert!(!gate.enabled("Watchlist"));
    assert!(gate.validate().is_empty());
}

fn table_stage(gate: &VersionedFeatureGate, name: &str) -> Option<String> {
    gate.known_features().into_iter().find(|k| k.starts_with(&format!("{}=", name)))
}
