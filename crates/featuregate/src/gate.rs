use std::collections::BTreeMap;

use parking_lot::RwLock;
use skew_core::{parse_bool, Version};
use tracing::debug;

use crate::{FeatureGate, FeatureGateError, FeatureSpecs, MutableVersionedFeatureGate, PreRelease, VersionedSpec};

const ALL_ALPHA: &str = "AllAlpha";
const ALL_BETA: &str = "AllBeta";

#[derive(Debug, Default)]
struct GateState {
    known: BTreeMap<String, FeatureSpecs>,
    overrides: BTreeMap<String, bool>,
    emulation: Option<Version>,
    closed: bool,
}

impl GateState {
    fn check(&self, feature: &str, value: bool, emulation: Option<&Version>) -> Result<(), FeatureGateError> {
        let specs = self.known.get(feature).ok_or_else(|| FeatureGateError::Unrecognized(feature.to_string()))?;
        match specs.at(emulation) {
            None => Err(FeatureGateError::NotIntroduced {
                feature: feature.to_string(),
                value,
                version: emulation.cloned().unwrap_or_default(),
            }),
            Some(spec) if spec.lock_to_default && spec.default != value => {
                Err(FeatureGateError::Locked { feature: feature.to_string(), value, locked: spec.default })
            }
            Some(_) => Ok(()),
        }
    }

    fn override_errors(&self, emulation: Option<&Version>) -> Vec<FeatureGateError> {
        self.overrides
            .iter()
            .filter_map(|(f, v)| self.check(f, *v, emulation).err())
            .collect()
    }
}

/// Feature gate whose defaults follow the emulation version it is synced to.
#[derive(Debug)]
pub struct VersionedFeatureGate {
    component: String,
    state: RwLock<GateState>,
}

impl VersionedFeatureGate {
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into(), state: RwLock::new(GateState::default()) }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Register a feature. Re-adding an identical definition is a no-op.
    pub fn add(&self, name: &str, specs: FeatureSpecs) -> Result<(), FeatureGateError> {
        let specs = match specs {
            FeatureSpecs::Versioned(v) if v.is_empty() => return Err(FeatureGateError::EmptySpecs(name.to_string())),
            FeatureSpecs::Versioned(mut v) => {
                v.sort_by(|a: &VersionedSpec, b: &VersionedSpec| a.version.cmp(&b.version));
                FeatureSpecs::Versioned(v)
            }
            s => s,
        };
        let mut st = self.state.write();
        if st.closed {
            return Err(FeatureGateError::Closed(name.to_string()));
        }
        match st.known.get(name) {
            Some(existing) if *existing == specs => Ok(()),
            Some(_) => Err(FeatureGateError::Conflict(name.to_string())),
            None => {
                st.known.insert(name.to_string(), specs);
                Ok(())
            }
        }
    }

    /// Names of all registered features, sorted.
    pub fn feature_names(&self) -> Vec<String> {
        self.state.read().known.keys().cloned().collect()
    }

    /// Operator-supplied values currently in force.
    pub fn overrides(&self) -> BTreeMap<String, bool> {
        self.state.read().overrides.clone()
    }
}

impl FeatureGate for VersionedFeatureGate {
    fn enabled(&self, feature: &str) -> bool {
        let st = self.state.read();
        if let Some(v) = st.overrides.get(feature) {
            return *v;
        }
        st.known
            .get(feature)
            .and_then(|specs| specs.at(st.emulation.as_ref()))
            .map(|spec| spec.default)
            .unwrap_or(false)
    }

    fn known_features(&self) -> Vec<String> {
        let st = self.state.read();
        let mut out = vec![
            format!("{}=true|false ({} - default=false)", ALL_ALPHA, PreRelease::Alpha),
            format!("{}=true|false ({} - default=false)", ALL_BETA, PreRelease::Beta),
        ];
        for (name, specs) in &st.known {
            let Some(spec) = specs.at(st.emulation.as_ref()) else { continue };
            if matches!(spec.pre_release, PreRelease::Ga | PreRelease::Deprecated) {
                continue;
            }
            out.push(format!("{}=true|false ({} - default={})", name, spec.pre_release, spec.default));
        }
        out.sort();
        out
    }
}

impl MutableVersionedFeatureGate for VersionedFeatureGate {
    fn emulation_version(&self) -> Option<Version> {
        self.state.read().emulation.clone()
    }

    fn set_emulation_version(&self, version: &Version) -> Result<(), FeatureGateError> {
        let mut st = self.state.write();
        if st.emulation.as_ref() == Some(version) {
            return Ok(());
        }
        if let Some(err) = FeatureGateError::aggregate(st.override_errors(Some(version))) {
            return Err(err);
        }
        debug!(component = %self.component, emulation = %version, "feature gate emulation version");
        st.emulation = Some(version.clone());
        Ok(())
    }

    fn set(&self, flag: &str) -> Result<(), FeatureGateError> {
        let mut values = BTreeMap::new();
        for entry in flag.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (k, v) = entry.split_once('=').ok_or_else(|| FeatureGateError::MissingValue(entry.to_string()))?;
            let (k, v) = (k.trim(), v.trim());
            let b = parse_bool(v)
                .ok_or_else(|| FeatureGateError::InvalidValue { feature: k.to_string(), value: v.to_string() })?;
            values.insert(k.to_string(), b);
        }
        self.set_from_map(&values)
    }

    fn set_from_map(&self, values: &BTreeMap<String, bool>) -> Result<(), FeatureGateError> {
        let mut st = self.state.write();
        let emulation = st.emulation.clone();
        let mut next = st.overrides.clone();
        let mut errs = Vec::new();
        for (feature, value) in values {
            let stage = match feature.as_str() {
                ALL_ALPHA => Some(PreRelease::Alpha),
                ALL_BETA => Some(PreRelease::Beta),
                _ => None,
            };
            if let Some(stage) = stage {
                for (name, specs) in &st.known {
                    let Some(spec) = specs.at(emulation.as_ref()) else { continue };
                    if spec.pre_release == stage && !spec.lock_to_default && !values.contains_key(name) {
                        next.insert(name.clone(), *value);
                    }
                }
                continue;
            }
            match st.check(feature, *value, emulation.as_ref()) {
                Ok(()) => {
                    next.insert(feature.clone(), *value);
                }
                Err(e) => errs.push(e),
            }
        }
        if let Some(err) = FeatureGateError::aggregate(errs) {
            return Err(err);
        }
        debug!(component = %self.component, values = ?values, "feature gate values set");
        st.overrides = next;
        Ok(())
    }

    fn validate(&self) -> Vec<FeatureGateError> {
        let st = self.state.read();
        st.override_errors(st.emulation.as_ref())
    }

    fn close(&self) {
        self.state.write().closed = true;
    }
}
