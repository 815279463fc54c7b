//! Skew component globals registry.
//!
//! Each component registers one [`EffectiveVersion`] and optionally a feature
//! gate. Version mapping edges derive one component's version from another's;
//! [`ComponentGlobalsRegistry::set`] applies operator configuration and
//! propagates it through both mapping graphs (emulation and
//! min-compatibility).
//!
//! Callers register all components, then declare mappings, then call `set`,
//! and only then start serving. The registry does not enforce this order.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use skew_core::{EffectiveVersion, Version, VersionValidationError};
use skew_featuregate::{FeatureGateError, MutableVersionedFeatureGate};
use tracing::{debug, info, warn};

pub mod config;
pub mod kube;

pub use config::{ComponentGlobalsConfig, ConfigError};
pub use kube::DEFAULT_KUBE_COMPONENT;

/// Derives the target component's version from the source's. `None` means
/// the mapping has no answer for that input, which is reported as an error.
pub type VersionMapping = Arc<dyn Fn(&Version) -> Option<Version> + Send + Sync>;

pub type SharedFeatureGate = Arc<dyn MutableVersionedFeatureGate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKind {
    Emulation,
    MinCompatibility,
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionKind::Emulation => f.write_str("EmulationVersion"),
            VersionKind::MinCompatibility => f.write_str("MinCompatibilityVersion"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("component globals of {0} already registered")]
    AlreadyRegistered(String),
    #[error("component not registered: {0}")]
    NotRegistered(String),
    #[error("component featureGate not registered: {0}")]
    FeatureGateNotRegistered(String),
    #[error("{kind} mapping of {to} already exists from another component")]
    MappingExists { kind: VersionKind, to: String },
    #[error("{kind} from {from} to {to} already exists")]
    DuplicateMapping { kind: VersionKind, from: String, to: String },
    #[error("{kind} of {component} is set by mapping, cannot set it by flag")]
    SetByMapping { kind: VersionKind, component: String },
    #[error("setting {kind} of {component} more than once, probably version mapping loop")]
    MappingLoop { kind: VersionKind, component: String },
    #[error("got nil version from mapping of {from}={version} to component:{to}")]
    NilMapping { from: String, version: Version, to: String },
    #[error("patch version not allowed for {component}, got: {version}")]
    PatchNotAllowed { component: String, version: Version },
    #[error("set {0} feature gates with default empty prefix or {0}: prefix consistently, do not mix use")]
    MixedDefaultPrefix(String),
    #[error("{component}: {source}")]
    FeatureGate {
        component: String,
        #[source]
        source: FeatureGateError,
    },
    #[error("{component}: {source}")]
    InvalidVersion {
        component: String,
        #[source]
        source: VersionValidationError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One registered component.
#[derive(Clone)]
pub struct ComponentGlobals {
    pub effective_version: Arc<EffectiveVersion>,
    pub feature_gate: Option<SharedFeatureGate>,
}

#[derive(Default)]
struct MappingGraph {
    edges: BTreeMap<String, BTreeMap<String, VersionMapping>>,
    dependent: BTreeSet<String>,
}

impl MappingGraph {
    /// Components with outgoing edges and no incoming edge.
    fn roots(&self) -> impl Iterator<Item = &String> {
        self.edges.keys().filter(move |c| !self.dependent.contains(*c))
    }

    fn remove(&mut self, from: &str, to: &str) {
        if let Some(targets) = self.edges.get_mut(from) {
            targets.remove(to);
            if targets.is_empty() {
                self.edges.remove(from);
            }
        }
        self.dependent.remove(to);
    }
}

#[derive(Default)]
struct Inner {
    components: BTreeMap<String, ComponentGlobals>,
    emulation_config: Option<BTreeMap<String, Version>>,
    min_compat_config: Option<BTreeMap<String, Version>>,
    feature_gates_config: Option<BTreeMap<String, Vec<String>>>,
    emulation_mapping: MappingGraph,
    min_compat_mapping: MappingGraph,
}

fn current(ev: &EffectiveVersion, kind: VersionKind) -> Option<Version> {
    match kind {
        VersionKind::Emulation => ev.emulation_version(),
        VersionKind::MinCompatibility => ev.min_compatibility_version(),
    }
}

impl Inner {
    fn graph(&self, kind: VersionKind) -> &MappingGraph {
        match kind {
            VersionKind::Emulation => &self.emulation_mapping,
            VersionKind::MinCompatibility => &self.min_compat_mapping,
        }
    }

    fn graph_mut(&mut self, kind: VersionKind) -> &mut MappingGraph {
        match kind {
            VersionKind::Emulation => &mut self.emulation_mapping,
            VersionKind::MinCompatibility => &mut self.min_compat_mapping,
        }
    }

    fn register(&mut self, component: &str, globals: ComponentGlobals) -> Result<(), RegistryError> {
        if self.components.contains_key(component) {
            return Err(RegistryError::AlreadyRegistered(component.to_string()));
        }
        if let (Some(gate), Some(emulation)) = (&globals.feature_gate, globals.effective_version.emulation_version()) {
            gate.set_emulation_version(&emulation)
                .map_err(|source| RegistryError::FeatureGate { component: component.to_string(), source })?;
        }
        debug!(component, effective = %globals.effective_version, "component registered");
        self.components.insert(component.to_string(), globals);
        Ok(())
    }

    /// Breadth-first walk from the seeds along `kind` edges. Every component
    /// is assigned at most once.
    fn resolve(&self, kind: VersionKind, seeds: Vec<(String, Version)>) -> Result<BTreeMap<String, Version>, RegistryError> {
        let graph = self.graph(kind);
        let mut queue = VecDeque::with_capacity(seeds.len());
        for (component, version) in seeds {
            if !self.components.contains_key(&component) {
                return Err(RegistryError::NotRegistered(component));
            }
            if version.patch() != 0 {
                return Err(RegistryError::PatchNotAllowed { component, version });
            }
            debug!(%kind, component = %component, %version, "setting version");
            queue.push_back((component, version.to_major_minor()));
        }
        let mut result = BTreeMap::new();
        while let Some((component, version)) = queue.pop_front() {
            if result.contains_key(&component) {
                return Err(RegistryError::MappingLoop { kind, component });
            }
            for (to, f) in graph.edges.get(&component).into_iter().flatten() {
                let to_version = f(&version).ok_or_else(|| RegistryError::NilMapping {
                    from: component.clone(),
                    version: version.clone(),
                    to: to.clone(),
                })?;
                debug!(%kind, component = %to, version = %to_version, from = %component, from_version = %version, "setting version from mapping");
                queue.push_back((to.clone(), to_version));
            }
            result.insert(component, version);
        }
        Ok(result)
    }

    fn apply(&self, kind: VersionKind, resolved: &BTreeMap<String, Version>) {
        for (component, version) in resolved {
            if let Some(globals) = self.components.get(component) {
                match kind {
                    VersionKind::Emulation => globals.effective_version.set_emulation_version(version),
                    VersionKind::MinCompatibility => globals.effective_version.set_min_compatibility_version(version),
                }
            }
        }
    }

    fn set_mapping(&mut self, kind: VersionKind, from: &str, to: &str, f: VersionMapping) -> Result<(), RegistryError> {
        let from_ev = match self.components.get(from) {
            Some(g) => g.effective_version.clone(),
            None => return Err(RegistryError::NotRegistered(from.to_string())),
        };
        if !self.components.contains_key(to) {
            return Err(RegistryError::NotRegistered(to.to_string()));
        }
        let graph = self.graph_mut(kind);
        if graph.edges.get(from).is_some_and(|t| t.contains_key(to)) {
            return Err(RegistryError::DuplicateMapping { kind, from: from.to_string(), to: to.to_string() });
        }
        if graph.dependent.contains(to) {
            return Err(RegistryError::MappingExists { kind, to: to.to_string() });
        }
        graph.dependent.insert(to.to_string());
        graph.edges.entry(from.to_string()).or_default().insert(to.to_string(), f);

        let Some(seed) = current(&from_ev, kind) else { return Ok(()) };
        debug!(%kind, from, to, "deriving default version from mapping");
        let outcome = self.resolve(kind, vec![(from.to_string(), seed.to_major_minor())]).and_then(|resolved| {
            self.apply(kind, &resolved);
            match kind {
                VersionKind::Emulation => self.propagate_min_compatibility(Vec::new()),
                VersionKind::MinCompatibility => Ok(()),
            }
        });
        if outcome.is_err() {
            self.graph_mut(kind).remove(from, to);
        }
        outcome
    }

    /// Re-derive min-compatibility versions from `seeds` plus every mapping
    /// root not already seeded. Must follow any emulation update, which
    /// resets min-compatibility defaults.
    fn propagate_min_compatibility(&self, mut seeds: Vec<(String, Version)>) -> Result<(), RegistryError> {
        for root in self.min_compat_mapping.roots() {
            if seeds.iter().any(|(c, _)| c == root) {
                continue;
            }
            let ev = self.components.get(root).map(|g| g.effective_version.clone());
            if let Some(v) = ev.and_then(|ev| ev.min_compatibility_version()) {
                seeds.push((root.clone(), v));
            }
        }
        let min_compat = self.resolve(VersionKind::MinCompatibility, seeds)?;
        self.apply(VersionKind::MinCompatibility, &min_compat);
        Ok(())
    }

    fn reject_derived(&self, kind: VersionKind, config: Option<&BTreeMap<String, Version>>) -> Result<(), RegistryError> {
        let graph = self.graph(kind);
        for component in config.into_iter().flat_map(|c| c.keys()) {
            if graph.dependent.contains(component) {
                return Err(RegistryError::SetByMapping { kind, component: component.clone() });
            }
        }
        Ok(())
    }

    fn set(&self, default_component: &str) -> Result<(), RegistryError> {
        self.reject_derived(VersionKind::Emulation, self.emulation_config.as_ref())?;
        self.reject_derived(VersionKind::MinCompatibility, self.min_compat_config.as_ref())?;

        let seeds = self.emulation_config.iter().flatten().map(|(c, v)| (c.clone(), v.clone())).collect();
        let emulation = self.resolve(VersionKind::Emulation, seeds)?;
        self.apply(VersionKind::Emulation, &emulation);

        let configured = self.min_compat_config.clone().unwrap_or_default();
        self.propagate_min_compatibility(configured.into_iter().collect())?;

        for (component, globals) in &self.components {
            let (Some(gate), Some(emulation)) = (&globals.feature_gate, globals.effective_version.emulation_version()) else {
                continue;
            };
            debug!(component = %component, %emulation, "setting feature gate emulation version");
            gate.set_emulation_version(&emulation)
                .map_err(|source| RegistryError::FeatureGate { component: component.clone(), source })?;
        }

        let Some(fg_config) = &self.feature_gates_config else { return Ok(()) };
        if fg_config.contains_key("") && fg_config.contains_key(default_component) {
            return Err(RegistryError::MixedDefaultPrefix(default_component.to_string()));
        }
        for (component, values) in fg_config {
            let component = if component.is_empty() { default_component } else { component.as_str() };
            let globals = self
                .components
                .get(component)
                .ok_or_else(|| RegistryError::NotRegistered(component.to_string()))?;
            let gate = globals
                .feature_gate
                .as_ref()
                .ok_or_else(|| RegistryError::FeatureGateNotRegistered(component.to_string()))?;
            let flag = values.join(",");
            debug!(component, feature_gates = %flag, "setting feature gates");
            gate.set(&flag)
                .map_err(|source| RegistryError::FeatureGate { component: component.to_string(), source })?;
        }
        Ok(())
    }

    fn version_options(&self, kind: VersionKind) -> Vec<String> {
        let graph = self.graph(kind);
        let mut out: Vec<String> = self
            .components
            .iter()
            .filter(|(c, _)| !graph.dependent.contains(*c))
            .map(|(c, g)| {
                let range = match kind {
                    VersionKind::Emulation => g.effective_version.allowed_emulation_version_range(),
                    VersionKind::MinCompatibility => g.effective_version.allowed_min_compatibility_version_range(),
                };
                format!("{}={}", c, range)
            })
            .collect();
        out.sort();
        out
    }
}

/// Registry of per-component effective versions and feature gates.
pub struct ComponentGlobalsRegistry {
    default_component: String,
    inner: RwLock<Inner>,
}

impl Default for ComponentGlobalsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentGlobalsRegistry {
    /// Registry whose unqualified feature-gate entries go to `kube`.
    pub fn new() -> Self {
        Self::with_default_component(DEFAULT_KUBE_COMPONENT)
    }

    pub fn with_default_component(component: impl Into<String>) -> Self {
        Self { default_component: component.into(), inner: RwLock::new(Inner::default()) }
    }

    pub fn default_component(&self) -> &str {
        &self.default_component
    }

    /// Drop every component, mapping and configuration.
    pub fn reset(&self) {
        *self.inner.write() = Inner::default();
    }

    pub fn components(&self) -> Vec<String> {
        self.inner.read().components.keys().cloned().collect()
    }

    pub fn effective_version_for(&self, component: &str) -> Option<Arc<EffectiveVersion>> {
        self.inner.read().components.get(component).map(|g| g.effective_version.clone())
    }

    pub fn feature_gate_for(&self, component: &str) -> Option<SharedFeatureGate> {
        self.inner.read().components.get(component).and_then(|g| g.feature_gate.clone())
    }

    /// Register a component; its gate (if any) is synced to the component's
    /// emulation version right away.
    pub fn register(
        &self,
        component: &str,
        effective_version: Arc<EffectiveVersion>,
        feature_gate: Option<SharedFeatureGate>,
    ) -> Result<(), RegistryError> {
        self.inner.write().register(component, ComponentGlobals { effective_version, feature_gate })
    }

    /// Existing globals for `component`, or register the ones passed in.
    pub fn component_globals_or_register(
        &self,
        component: &str,
        effective_version: Arc<EffectiveVersion>,
        feature_gate: Option<SharedFeatureGate>,
    ) -> Result<ComponentGlobals, RegistryError> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.components.get(component) {
            return Ok(existing.clone());
        }
        let globals = ComponentGlobals { effective_version, feature_gate };
        inner.register(component, globals.clone())?;
        Ok(globals)
    }

    /// Derive `to`'s emulation version from `from`'s. `to` may have only one
    /// such edge; the current emulation version of `from` is propagated
    /// immediately. An edge that would close a loop is rejected and dropped.
    pub fn set_emulation_version_mapping(&self, from: &str, to: &str, f: VersionMapping) -> Result<(), RegistryError> {
        self.inner.write().set_mapping(VersionKind::Emulation, from, to, f)
    }

    /// Same as [`Self::set_emulation_version_mapping`] for the
    /// min-compatibility graph.
    pub fn set_min_compatibility_version_mapping(&self, from: &str, to: &str, f: VersionMapping) -> Result<(), RegistryError> {
        self.inner.write().set_mapping(VersionKind::MinCompatibility, from, to, f)
    }

    pub fn set_emulation_version_config(&self, config: BTreeMap<String, Version>) {
        let mut inner = self.inner.write();
        if inner.emulation_config.is_some() {
            warn!("emulation version configuration supplied more than once, using the latest");
        }
        inner.emulation_config = Some(config);
    }

    pub fn set_min_compatibility_version_config(&self, config: BTreeMap<String, Version>) {
        let mut inner = self.inner.write();
        if inner.min_compat_config.is_some() {
            warn!("min compatibility version configuration supplied more than once, using the latest");
        }
        inner.min_compat_config = Some(config);
    }

    /// Feature values per component; the empty key means the default component.
    pub fn set_feature_gates_config(&self, config: BTreeMap<String, Vec<String>>) {
        let mut inner = self.inner.write();
        if inner.feature_gates_config.is_some() {
            warn!("feature gate configuration supplied more than once, using the latest");
        }
        inner.feature_gates_config = Some(config);
    }

    /// Record a whole configuration document and close every registered
    /// feature gate to further feature registration.
    pub fn apply_config(&self, config: &ComponentGlobalsConfig) -> Result<(), RegistryError> {
        let emulation = config.emulation_versions()?;
        let min_compat = config.min_compatibility_version_map()?;
        for globals in self.inner.read().components.values() {
            if let Some(gate) = &globals.feature_gate {
                gate.close();
            }
        }
        self.set_emulation_version_config(emulation);
        self.set_min_compatibility_version_config(min_compat);
        self.set_feature_gates_config(config.feature_gates.clone());
        Ok(())
    }

    /// Resolve the recorded configuration across the mapping graphs and apply
    /// it to every affected component and feature gate.
    pub fn set(&self) -> Result<(), RegistryError> {
        let start = Instant::now();
        let res = self.inner.write().set(&self.default_component);
        counter!("registry_set_total", 1);
        histogram!("registry_set_ms", start.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(()) => info!(components = self.inner.read().components.len(), "component versions resolved"),
            Err(e) => {
                counter!("registry_set_errors_total", 1);
                warn!(error = %e, "component version resolution failed");
            }
        }
        res
    }

    /// Every validation error of every component and gate.
    pub fn validate(&self) -> Vec<RegistryError> {
        let inner = self.inner.read();
        let mut errs = Vec::new();
        for (component, globals) in &inner.components {
            errs.extend(
                globals
                    .effective_version
                    .validate()
                    .into_iter()
                    .map(|source| RegistryError::InvalidVersion { component: component.clone(), source }),
            );
            if let Some(gate) = &globals.feature_gate {
                errs.extend(
                    gate.validate()
                        .into_iter()
                        .map(|source| RegistryError::FeatureGate { component: component.clone(), source }),
                );
            }
        }
        if !errs.is_empty() {
            counter!("registry_validation_errors_total", errs.len() as u64);
        }
        errs
    }

    /// `component:feature` entries of every gate, sorted.
    pub fn known_features(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut known: Vec<String> = inner
            .components
            .iter()
            .filter_map(|(c, g)| g.feature_gate.as_ref().map(|gate| (c, gate)))
            .flat_map(|(c, gate)| gate.known_features().into_iter().map(move |f| format!("{}:{}", c, f)))
            .collect();
        known.sort();
        known
    }

    /// `component=<range>` for components whose emulation version is not derived.
    pub fn emulation_version_options(&self) -> Vec<String> {
        self.inner.read().version_options(VersionKind::Emulation)
    }

    pub fn min_compatibility_version_options(&self) -> Vec<String> {
        self.inner.read().version_options(VersionKind::MinCompatibility)
    }

    /// Whether `component`'s version of `kind` is derived from another component.
    pub fn is_derived(&self, component: &str, kind: VersionKind) -> bool {
        self.inner.read().graph(kind).dependent.contains(component)
    }
}

static DEFAULT_REGISTRY: Lazy<ComponentGlobalsRegistry> = Lazy::new(ComponentGlobalsRegistry::new);

/// Process-wide registry for callers without a composition root of their own.
pub fn default_registry() -> &'static ComponentGlobalsRegistry {
    &DEFAULT_REGISTRY
}
