//! Topology file: components, their features and APIs, and the mappings
//! between them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use skew_core::{EffectiveVersion, GroupVersion, GroupVersionResource, Version};
use skew_featuregate::{FeatureSpecs, VersionedFeatureGate};
use skew_lifecycle::{ApiLifecycle, LifecycleRegistry, ResourceConfig};
use skew_registry::kube::default_build_effective_version;
use skew_registry::{ComponentGlobalsConfig, ComponentGlobalsRegistry, SharedFeatureGate, VersionMapping};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Topology {
    #[serde(default)]
    pub default_component: Option<String>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDecl>,
    #[serde(default)]
    pub emulation_mappings: Vec<MappingDecl>,
    #[serde(default)]
    pub min_compatibility_mappings: Vec<MappingDecl>,
    #[serde(default)]
    pub config: ComponentGlobalsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentDecl {
    /// Missing means the running build's version.
    #[serde(default)]
    pub binary_version: Option<String>,
    #[serde(default)]
    pub emulation_version_floor: Option<Version>,
    #[serde(default)]
    pub min_compatibility_version_floor: Option<Version>,
    #[serde(default)]
    pub features: Vec<FeatureDecl>,
    #[serde(default)]
    pub apis: Vec<GroupDecl>,
    #[serde(default)]
    pub emulation_forward_compatible: bool,
    /// `group/version` or `group/version/resource` to enabled; the core
    /// group is spelled `api`.
    #[serde(default)]
    pub runtime_config: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureDecl {
    pub name: String,
    pub spec: FeatureSpecs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MappingDecl {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub minor_offset: Option<i64>,
    /// `from` major.minor to `to` version; anything else maps to nothing.
    #[serde(default)]
    pub table: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupDecl {
    #[serde(default)]
    pub group: String,
    /// Highest first; kube-aware order when empty.
    #[serde(default)]
    pub priority: Vec<String>,
    pub versions: Vec<VersionDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VersionDecl {
    pub version: String,
    #[serde(default)]
    pub introduced: Option<Version>,
    #[serde(default)]
    pub removed: Option<Version>,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(default)]
    pub introduced: Option<Version>,
    #[serde(default)]
    pub removed: Option<Version>,
}

impl Topology {
    /// YAML or JSON; JSON is a subset of YAML.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parse topology")
    }

    pub fn build(&self) -> Result<Built> {
        let registry = match &self.default_component {
            Some(c) => ComponentGlobalsRegistry::with_default_component(c.clone()),
            None => ComponentGlobalsRegistry::new(),
        };
        let mut gates = BTreeMap::new();
        for (name, decl) in &self.components {
            let ev = decl.effective_version().with_context(|| format!("component {}", name))?;
            let gate = if decl.features.is_empty() {
                None
            } else {
                let gate = Arc::new(VersionedFeatureGate::new(name.clone()));
                for f in &decl.features {
                    gate.add(&f.name, f.spec.clone()).with_context(|| format!("component {} feature {}", name, f.name))?;
                }
                gates.insert(name.clone(), gate.clone());
                Some(gate as SharedFeatureGate)
            };
            registry.register(name, Arc::new(ev), gate)?;
            debug!(component = %name, "registered component");
        }
        for m in &self.emulation_mappings {
            registry.set_emulation_version_mapping(&m.from, &m.to, m.mapping()?)?;
        }
        for m in &self.min_compatibility_mappings {
            registry.set_min_compatibility_version_mapping(&m.from, &m.to, m.mapping()?)?;
        }
        Ok(Built { registry, gates })
    }
}

impl ComponentDecl {
    fn effective_version(&self) -> Result<EffectiveVersion> {
        let mut ev = match &self.binary_version {
            Some(b) => EffectiveVersion::from_binary_str(b)?,
            None => default_build_effective_version(),
        };
        if let Some(floor) = &self.emulation_version_floor {
            ev = ev.with_emulation_version_floor(floor.clone());
        }
        if let Some(floor) = &self.min_compatibility_version_floor {
            ev = ev.with_min_compatibility_version_floor(floor.clone())?;
        }
        Ok(ev)
    }

    /// Lifecycle facts of every declared API.
    pub fn lifecycle_registry(&self) -> LifecycleRegistry {
        let mut reg = LifecycleRegistry::new();
        for g in &self.apis {
            for v in &g.versions {
                let gv = GroupVersion::new(g.group.clone(), v.version.clone());
                reg.set_group_version_lifecycle(gv.clone(), ApiLifecycle::new(v.introduced.clone(), v.removed.clone()));
                for r in v.resources.iter().filter(|r| !r.name.contains('/')) {
                    reg.set_resource_lifecycle(
                        gv.with_resource(r.name.clone()),
                        ApiLifecycle::new(r.introduced.clone(), r.removed.clone()),
                    );
                }
            }
            if !g.priority.is_empty() {
                reg.set_version_priority(g.priority.iter().map(|v| GroupVersion::new(g.group.clone(), v.clone())).collect());
            }
        }
        reg
    }

    /// Every declared group version enabled, then `runtime_config` and
    /// `extra` applied in that order.
    pub fn resource_config(&self, extra: &BTreeMap<String, bool>) -> Result<ResourceConfig> {
        let mut config = ResourceConfig::ignore_lifecycle();
        let all: Vec<GroupVersion> = self
            .apis
            .iter()
            .flat_map(|g| g.versions.iter().map(move |v| GroupVersion::new(g.group.clone(), v.version.clone())))
            .collect();
        config.enable_versions(&all);
        for (key, enabled) in self.runtime_config.iter().chain(extra.iter()) {
            match parse_runtime_key(key)? {
                RuntimeKey::Version(gv) if *enabled => config.enable_versions([&gv]),
                RuntimeKey::Version(gv) => config.disable_versions([&gv]),
                RuntimeKey::Resource(gvr) if *enabled => config.enable_resources([&gvr]),
                RuntimeKey::Resource(gvr) => config.disable_resources([&gvr]),
            }
        }
        Ok(config)
    }

    /// Enabled resources of `group`, keyed by version then name, each with
    /// its own lifecycle falling back to its version's.
    pub fn storage_map(&self, group: &GroupDecl, config: &ResourceConfig) -> BTreeMap<String, BTreeMap<String, ApiLifecycle>> {
        let mut out: BTreeMap<String, BTreeMap<String, ApiLifecycle>> = BTreeMap::new();
        for v in &group.versions {
            let gv = GroupVersion::new(group.group.clone(), v.version.clone());
            for r in &v.resources {
                let base = r.name.split('/').next().unwrap_or(&r.name);
                if !config.resource_enabled(&gv.with_resource(base)) {
                    continue;
                }
                let lc = ApiLifecycle::new(
                    r.introduced.clone().or_else(|| v.introduced.clone()),
                    r.removed.clone().or_else(|| v.removed.clone()),
                );
                out.entry(v.version.clone()).or_default().insert(r.name.clone(), lc);
            }
        }
        out
    }
}

enum RuntimeKey {
    Version(GroupVersion),
    Resource(GroupVersionResource),
}

fn parse_runtime_key(key: &str) -> Result<RuntimeKey> {
    let core = |g: &str| if g == "api" { String::new() } else { g.to_string() };
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [g, v] if !g.is_empty() && !v.is_empty() => Ok(RuntimeKey::Version(GroupVersion::new(core(g), *v))),
        [g, v, r] if !g.is_empty() && !v.is_empty() && !r.is_empty() => {
            Ok(RuntimeKey::Resource(GroupVersionResource::new(core(g), *v, *r)))
        }
        _ => bail!("invalid runtime config key {:?}, expected group/version[/resource]", key),
    }
}

impl MappingDecl {
    fn mapping(&self) -> Result<VersionMapping> {
        match (self.minor_offset, &self.table) {
            (Some(_), Some(_)) => bail!("mapping {} -> {}: minorOffset and table are exclusive", self.from, self.to),
            (Some(offset), None) => Ok(Arc::new(move |v: &Version| Some(v.offset_minor(offset)))),
            (None, Some(table)) => {
                let table: Vec<(Version, Version)> = table
                    .iter()
                    .map(|(from, to)| Ok((Version::parse_generic(from)?.to_major_minor(), Version::parse_generic(to)?)))
                    .collect::<Result<_, skew_core::VersionError>>()
                    .map_err(|e| anyhow!("mapping {} -> {}: {}", self.from, self.to, e))?;
                Ok(Arc::new(move |v: &Version| {
                    let key = v.to_major_minor();
                    table.iter().find(|(from, _)| *from == key).map(|(_, to)| to.clone())
                }))
            }
            (None, None) => Ok(Arc::new(|v: &Version| Some(v.clone()))),
        }
    }
}

/// Registry built from a topology, plus the concrete gates for reporting.
pub struct Built {
    pub registry: ComponentGlobalsRegistry,
    pub gates: BTreeMap<String, Arc<VersionedFeatureGate>>,
}

/// Names of unversioned features per component.
pub fn unversioned_features(topology: &Topology) -> BTreeMap<String, Vec<String>> {
    topology
        .components
        .iter()
        .map(|(c, decl)| {
            let names = decl.features.iter().filter(|f| !f.spec.is_versioned()).map(|f| f.name.clone()).collect();
            (c.clone(), names)
        })
        .collect()
}

/// Groups declared anywhere in a component's APIs, in declaration order.
pub fn group_names(decl: &ComponentDecl) -> Vec<String> {
    let mut seen = BTreeSet::new();
    decl.apis.iter().filter(|g| seen.insert(g.group.clone())).map(|g| g.group.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skew_featuregate::FeatureGate;

    const TOPOLOGY: &str = r#"
components:
  kube:
    binaryVersion: "1.32.0"
    features:
      - name: Watchlist
        spec:
          - version: "1.30"
            default: false
            preRelease: ALPHA
          - version: "1.32"
            default: true
            preRelease: BETA
    apis:
      - group: apps
        versions:
          - version: v1
            introduced: "1.9"
            resources:
              - name: deployments
              - name: deployments/scale
          - version: v1beta2
            introduced: "1.8"
            removed: "1.31"
            resources:
              - name: deployments
  wardle:
    binaryVersion: "1.2.0"
emulationMappings:
  - from: kube
    to: wardle
    minorOffset: -30
config:
  emulatedVersions:
    kube: "1.31"
"#;

    #[test]
    fn builds_registry_from_yaml() {
        let topo = Topology::parse(TOPOLOGY).unwrap();
        let built = topo.build().unwrap();
        built.registry.apply_config(&topo.config).unwrap();
        built.registry.set().unwrap();
        let wardle = built.registry.effective_version_for("wardle").unwrap();
        assert_eq!(wardle.emulation_version(), Some(Version::major_minor(1, 1)));
        assert!(!built.gates["kube"].enabled("Watchlist"));
        assert!(built.registry.validate().is_empty());
    }

    #[test]
    fn storage_map_inherits_version_lifecycle() {
        let topo = Topology::parse(TOPOLOGY).unwrap();
        let kube = &topo.components["kube"];
        let config = kube.resource_config(&BTreeMap::new()).unwrap();
        let map = kube.storage_map(&kube.apis[0], &config);
        assert_eq!(map["v1beta2"]["deployments"].removed, Some(Version::major_minor(1, 31)));
        assert_eq!(map["v1"].len(), 2);

        let off = BTreeMap::from([("apps/v1beta2".to_string(), false)]);
        let config = kube.resource_config(&off).unwrap();
        assert!(!kube.storage_map(&kube.apis[0], &config).contains_key("v1beta2"));
    }

    #[test]
    fn table_mapping() {
        let m = MappingDecl {
            from: "a".into(),
            to: "b".into(),
            minor_offset: None,
            table: Some(BTreeMap::from([("1.31".to_string(), "1.1".to_string())])),
        };
        let f = m.mapping().unwrap();
        assert_eq!(f(&Version::new(1, 31, 4)), Some(Version::major_minor(1, 1)));
        assert_eq!(f(&Version::major_minor(1, 30)), None);
    }

    #[test]
    fn runtime_keys() {
        assert!(matches!(parse_runtime_key("api/v1").unwrap(), RuntimeKey::Version(gv) if gv.group.is_empty()));
        assert!(matches!(parse_runtime_key("apps/v1/deployments").unwrap(), RuntimeKey::Resource(_)));
        assert!(parse_runtime_key("v1").is_err());
    }
}
