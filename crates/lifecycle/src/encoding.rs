//! Choice of the version a resource is persisted in.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use skew_core::{EffectiveVersion, GroupResource, GroupVersion, Version};
use tracing::{debug, warn};

use crate::source::LifecycleSource;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("resource not codable by both emulation version and min compatibility version: {resource} (emulation {emulation}, min compatibility {min_compatibility})")]
    NotCodable { resource: GroupResource, emulation: Version, min_compatibility: Version },
    #[error("no versions registered for {0}")]
    NoVersions(GroupResource),
}

/// First version in `prioritized` that a peer at `min_compatibility` can
/// read and that still exists at `emulation`. Group-version and resource
/// lifecycles must both allow it; unknown resources are skipped.
pub fn storage_encoding_for(
    resource: &GroupResource,
    prioritized: &[GroupVersion],
    emulation: &Version,
    min_compatibility: &Version,
    source: &dyn LifecycleSource,
) -> Result<GroupVersion, EncodingError> {
    for gv in prioritized.iter().filter(|gv| gv.group == resource.group) {
        let gvr = gv.with_resource(resource.resource.clone());
        if !source.recognizes(&gvr) {
            continue;
        }
        let gv_lc = source.group_version_lifecycle(gv);
        let res_lc = source.resource_lifecycle(&gvr);
        let codable = |at: &Version| gv_lc.available_at(Some(at)) && res_lc.available_at(Some(at));
        if codable(emulation) && codable(min_compatibility) {
            debug!(resource = %resource, version = %gv.version, "selected storage version");
            return Ok(gv.clone());
        }
    }
    counter!("storage_encoding_failures_total", 1);
    warn!(resource = %resource, emulation = %emulation, min_compatibility = %min_compatibility, "no codable storage version");
    Err(EncodingError::NotCodable {
        resource: resource.clone(),
        emulation: emulation.clone(),
        min_compatibility: min_compatibility.clone(),
    })
}

/// Storage version lookup for one component.
#[derive(Clone)]
pub struct ResourceEncodingConfig {
    source: Arc<dyn LifecycleSource>,
    overrides: BTreeMap<GroupResource, GroupVersion>,
    emulation_version: Option<Version>,
    min_compatibility_version: Option<Version>,
}

impl fmt::Debug for ResourceEncodingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEncodingConfig")
            .field("overrides", &self.overrides)
            .field("emulation_version", &self.emulation_version)
            .field("min_compatibility_version", &self.min_compatibility_version)
            .finish()
    }
}

impl ResourceEncodingConfig {
    pub fn new(source: Arc<dyn LifecycleSource>) -> Self {
        Self { source, overrides: BTreeMap::new(), emulation_version: None, min_compatibility_version: None }
    }

    /// Take both bounds from `ev`, normalized to `major.minor`.
    pub fn with_effective_version(source: Arc<dyn LifecycleSource>, ev: &EffectiveVersion) -> Self {
        let mut config = Self::new(source);
        config.set_versions(ev.emulation_version(), ev.min_compatibility_version());
        config
    }

    pub fn set_versions(&mut self, emulation: Option<Version>, min_compatibility: Option<Version>) {
        self.emulation_version = emulation.map(|v| v.to_major_minor());
        self.min_compatibility_version = min_compatibility.map(|v| v.to_major_minor());
    }

    /// Pin `resource` to `gv`, bypassing lifecycle.
    pub fn set_resource_encoding(&mut self, resource: GroupResource, gv: GroupVersion) {
        self.overrides.insert(resource, gv);
    }

    pub fn storage_encoding_for(&self, resource: &GroupResource) -> Result<GroupVersion, EncodingError> {
        if let Some(gv) = self.overrides.get(resource) {
            return Ok(gv.clone());
        }
        let prioritized = self.source.prioritized_versions(&resource.group);
        let Some(emulation) = self.emulation_version.as_ref().filter(|v| !v.is_zero()) else {
            return prioritized.into_iter().next().ok_or_else(|| EncodingError::NoVersions(resource.clone()));
        };
        if prioritized.is_empty() {
            return Err(EncodingError::NoVersions(resource.clone()));
        }
        let min_compatibility = self.min_compatibility_version.as_ref().unwrap_or(emulation);
        storage_encoding_for(resource, &prioritized, emulation, min_compatibility, self.source.as_ref())
    }
}
