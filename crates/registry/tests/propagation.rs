use std::collections::BTreeMap;
use std::sync::Arc;

use skew_core::{EffectiveVersion, Version};
use skew_registry::{default_registry, ComponentGlobalsConfig, ComponentGlobalsRegistry, RegistryError, VersionMapping};

fn ev(binary: &str) -> Arc<EffectiveVersion> {
    Arc::new(EffectiveVersion::from_binary_str(binary).unwrap())
}

/// kube 1.x maps to wardle 1.(x-30), wardle to sample 1.(x-1).
fn chain() -> ComponentGlobalsRegistry {
    let r = ComponentGlobalsRegistry::new();
    r.register("kube", ev("1.32.0"), None).unwrap();
    r.register("wardle", ev("1.2.0"), None).unwrap();
    r.register("sample", ev("1.1.0"), None).unwrap();
    let kube_to_wardle: VersionMapping = Arc::new(|v: &Version| {
        (v.major() == 1 && v.minor() >= 30).then(|| Version::major_minor(1, v.minor() - 30))
    });
    let wardle_to_sample: VersionMapping = Arc::new(|v: &Version| Some(v.offset_minor(-1)));
    r.set_emulation_version_mapping("kube", "wardle", kube_to_wardle).unwrap();
    r.set_emulation_version_mapping("wardle", "sample", wardle_to_sample).unwrap();
    r
}

fn emulation(r: &ComponentGlobalsRegistry, c: &str) -> Version {
    r.effective_version_for(c).unwrap().emulation_version().unwrap()
}

#[test]
fn declaring_mappings_propagates_current_defaults() {
    let r = chain();
    assert_eq!(emulation(&r, "wardle"), Version::major_minor(1, 2));
    assert_eq!(emulation(&r, "sample"), Version::major_minor(1, 1));
}

#[test]
fn configured_version_flows_through_the_chain() {
    let r = chain();
    r.set_emulation_version_config(BTreeMap::from([("kube".to_string(), Version::major_minor(1, 31))]));
    r.set().unwrap();
    assert_eq!(emulation(&r, "kube"), Version::major_minor(1, 31));
    assert_eq!(emulation(&r, "wardle"), Version::major_minor(1, 1));
    assert_eq!(emulation(&r, "sample"), Version::major_minor(1, 0));
    assert_eq!(
        r.effective_version_for("sample").unwrap().min_compatibility_version(),
        Some(Version::major_minor(1, 0))
    );
    assert!(r.validate().is_empty());
}

#[test]
fn set_is_idempotent() {
    let r = chain();
    r.set_emulation_version_config(BTreeMap::from([("kube".to_string(), Version::major_minor(1, 31))]));
    r.set().unwrap();
    let first: Vec<String> = r.components().iter().map(|c| r.effective_version_for(c).unwrap().to_string()).collect();
    r.set().unwrap();
    let second: Vec<String> = r.components().iter().map(|c| r.effective_version_for(c).unwrap().to_string()).collect();
    assert_eq!(first, second);
}

#[test]
fn second_incoming_edge_is_rejected() {
    let r = chain();
    let err = r
        .set_emulation_version_mapping("kube", "sample", Arc::new(|v: &Version| Some(v.clone())))
        .unwrap_err();
    assert_eq!(err.to_string(), "EmulationVersion mapping of sample already exists from another component");

    let err = r
        .set_emulation_version_mapping("kube", "wardle", Arc::new(|v: &Version| Some(v.clone())))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateMapping { .. }));
}

#[test]
fn derived_component_cannot_be_configured() {
    let r = chain();
    r.set_emulation_version_config(BTreeMap::from([("wardle".to_string(), Version::major_minor(1, 1))]));
    let err = r.set().unwrap_err();
    assert_eq!(err.to_string(), "EmulationVersion of wardle is set by mapping, cannot set it by flag");
    assert_eq!(emulation(&r, "wardle"), Version::major_minor(1, 2));
}

#[test]
fn unregistered_configured_component() {
    let r = chain();
    let cfg = ComponentGlobalsConfig::from_flags(Some("nope=1.0"), None, &[]).unwrap();
    r.apply_config(&cfg).unwrap();
    assert_eq!(r.set().unwrap_err().to_string(), "component not registered: nope");
}

#[test]
fn apply_config_rejects_bad_versions() {
    let r = chain();
    let cfg = ComponentGlobalsConfig::from_flags(Some("kube=1.31.2"), None, &[]).unwrap();
    let err = r.apply_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("is not in the format of major.minor"), "{}", err);
}

#[test]
fn min_compatibility_configuration_overrides_default() {
    let r = chain();
    let cfg = ComponentGlobalsConfig::from_flags(Some("kube=1.32"), Some("kube=1.30"), &[]).unwrap();
    r.apply_config(&cfg).unwrap();
    r.set().unwrap();
    let kube = r.effective_version_for("kube").unwrap();
    assert_eq!(kube.min_compatibility_version(), Some(Version::major_minor(1, 30)));
    assert!(kube.validate().is_empty());
}

#[test]
fn default_registry_is_shared() {
    let a = default_registry() as *const ComponentGlobalsRegistry;
    let b = default_registry() as *const ComponentGlobalsRegistry;
    assert_eq!(a, b);
    assert_eq!(default_registry().default_component(), "kube");
}
