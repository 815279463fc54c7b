//! Explicit enable/disable table for group versions and resources.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use skew_core::{GroupVersion, GroupVersionResource, Version};

use crate::source::{ApiLifecycle, LifecycleSource};

/// Operator overrides. Unless built with [`ResourceConfig::ignore_lifecycle`],
/// an enabled entry still has to exist at the emulation version.
#[derive(Clone, Default)]
pub struct ResourceConfig {
    group_versions: BTreeMap<GroupVersion, bool>,
    resources: BTreeMap<GroupVersionResource, bool>,
    source: Option<Arc<dyn LifecycleSource>>,
    emulation_version: Option<Version>,
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("group_versions", &self.group_versions)
            .field("resources", &self.resources)
            .field("emulation_version", &self.emulation_version)
            .field("lifecycle", &self.source.is_some())
            .finish()
    }
}

impl ResourceConfig {
    pub fn ignore_lifecycle() -> Self {
        Self::default()
    }

    pub fn with_lifecycle(source: Arc<dyn LifecycleSource>, emulation_version: Option<Version>) -> Self {
        Self { source: Some(source), emulation_version, ..Self::default() }
    }

    pub fn emulation_version(&self) -> Option<&Version> {
        self.emulation_version.as_ref()
    }

    /// Disable every group version and forget resource settings.
    pub fn disable_all(&mut self) {
        for enabled in self.group_versions.values_mut() {
            *enabled = false;
        }
        self.resources.clear();
    }

    /// Enable every group version and forget resource settings.
    pub fn enable_all(&mut self) {
        for enabled in self.group_versions.values_mut() {
            *enabled = true;
        }
        self.resources.clear();
    }

    /// Disabling a version also drops resource settings under it.
    pub fn disable_versions<'a>(&mut self, versions: impl IntoIterator<Item = &'a GroupVersion>) {
        for gv in versions {
            self.group_versions.insert(gv.clone(), false);
            self.remove_resources_for_version(gv);
        }
    }

    /// Enabling a version also drops resource settings under it.
    pub fn enable_versions<'a>(&mut self, versions: impl IntoIterator<Item = &'a GroupVersion>) {
        for gv in versions {
            self.group_versions.insert(gv.clone(), true);
            self.remove_resources_for_version(gv);
        }
    }

    fn remove_resources_for_version(&mut self, gv: &GroupVersion) {
        self.resources.retain(|gvr, _| gvr.group != gv.group || gvr.version != gv.version);
    }

    pub fn disable_resources<'a>(&mut self, resources: impl IntoIterator<Item = &'a GroupVersionResource>) {
        for gvr in resources {
            self.resources.insert(gvr.clone(), false);
        }
    }

    pub fn enable_resources<'a>(&mut self, resources: impl IntoIterator<Item = &'a GroupVersionResource>) {
        for gvr in resources {
            self.resources.insert(gvr.clone(), true);
        }
    }

    pub fn version_enabled(&self, gv: &GroupVersion) -> bool {
        let enabled = self.group_versions.get(gv).copied().unwrap_or(false);
        enabled && self.lifecycle_allows(|s| s.group_version_lifecycle(gv))
    }

    /// An explicit resource setting beats the group-version setting.
    pub fn resource_enabled(&self, gvr: &GroupVersionResource) -> bool {
        match self.resources.get(gvr) {
            None => self.version_enabled(&gvr.group_version()),
            Some(false) => false,
            Some(true) => {
                self.lifecycle_allows(|s| s.group_version_lifecycle(&gvr.group_version()))
                    && self.lifecycle_allows(|s| s.resource_lifecycle(gvr))
            }
        }
    }

    pub fn any_resource_for_group_enabled(&self, group: &str) -> bool {
        self.group_versions.keys().any(|gv| gv.group == group && self.version_enabled(gv))
            || self.resources.keys().any(|gvr| gvr.group == group && self.resource_enabled(gvr))
    }

    pub fn resource_explicitly_enabled(&self, gvr: &GroupVersionResource) -> bool {
        self.resources.get(gvr) == Some(&true)
    }

    pub fn resource_explicitly_disabled(&self, gvr: &GroupVersionResource) -> bool {
        self.resources.get(gvr) == Some(&false)
    }

    /// Whether `lifecycle` is available at this config's emulation version.
    pub fn api_available(&self, lifecycle: &ApiLifecycle) -> bool {
        lifecycle.available_at(self.emulation_version.as_ref())
    }

    fn lifecycle_allows(&self, lookup: impl FnOnce(&dyn LifecycleSource) -> ApiLifecycle) -> bool {
        match &self.source {
            Some(source) => self.api_available(&lookup(source.as_ref())),
            None => true,
        }
    }
}
