//! Where lifecycle facts come from: the introduced/removed versions of group
//! versions and resources, and the per-group version priority.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use skew_core::{sort_kube_aware, GroupResource, GroupVersion, GroupVersionResource, Version};

/// Versions at which an API appeared and disappeared. A missing or zero
/// version means "always" / "never".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiLifecycle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduced: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Version>,
}

impl ApiLifecycle {
    pub fn new(introduced: Option<Version>, removed: Option<Version>) -> Self {
        Self { introduced, removed }
    }

    pub fn introduced(v: Version) -> Self {
        Self { introduced: Some(v), removed: None }
    }

    pub fn introduced_version(&self) -> Option<&Version> {
        self.introduced.as_ref().filter(|v| !v.is_zero())
    }

    pub fn removed_version(&self) -> Option<&Version> {
        self.removed.as_ref().filter(|v| !v.is_zero())
    }

    /// Whether the API exists at `version`. Both bounds are inclusive; an
    /// unknown or zero `version` makes everything available.
    pub fn available_at(&self, version: Option<&Version>) -> bool {
        let Some(version) = version.filter(|v| !v.is_zero()) else {
            return true;
        };
        if self.introduced_version().is_some_and(|i| version < i) {
            return false;
        }
        if self.removed_version().is_some_and(|r| version > r) {
            return false;
        }
        true
    }
}

/// Read-only view of lifecycle facts consulted by the evaluator, the
/// resource config and storage encoding.
pub trait LifecycleSource: Send + Sync {
    fn group_version_lifecycle(&self, gv: &GroupVersion) -> ApiLifecycle;

    fn resource_lifecycle(&self, gvr: &GroupVersionResource) -> ApiLifecycle;

    /// Registered versions of `group`, highest priority first.
    fn prioritized_versions(&self, group: &str) -> Vec<GroupVersion>;

    /// Whether `gvr` is a known resource at all.
    fn recognizes(&self, gvr: &GroupVersionResource) -> bool;
}

/// In-memory [`LifecycleSource`].
#[derive(Debug, Clone, Default)]
pub struct LifecycleRegistry {
    group_versions: BTreeMap<GroupVersion, ApiLifecycle>,
    resources: BTreeMap<GroupVersionResource, ApiLifecycle>,
    known: BTreeSet<GroupVersionResource>,
    priority: BTreeMap<String, Vec<GroupVersion>>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_group_version_lifecycle(&mut self, gv: GroupVersion, lifecycle: ApiLifecycle) {
        self.group_versions.insert(gv, lifecycle);
    }

    /// Record a resource lifecycle; the resource becomes known.
    pub fn set_resource_lifecycle(&mut self, gvr: GroupVersionResource, lifecycle: ApiLifecycle) {
        self.known.insert(gvr.clone());
        self.resources.insert(gvr, lifecycle);
    }

    pub fn add_known_resource(&mut self, gvr: GroupVersionResource) {
        self.known.insert(gvr);
    }

    /// Explicit priority for one group, highest first. Replaces any earlier
    /// list for the group.
    pub fn set_version_priority(&mut self, versions: Vec<GroupVersion>) {
        if let Some(first) = versions.first() {
            let group = first.group.clone();
            let versions = versions.into_iter().filter(|gv| gv.group == group).collect();
            self.priority.insert(group, versions);
        }
    }

    pub fn known_resources(&self) -> impl Iterator<Item = &GroupVersionResource> {
        self.known.iter()
    }

    /// Known group resources, each with every version that carries it.
    pub fn group_resources(&self) -> BTreeMap<GroupResource, Vec<String>> {
        let mut out: BTreeMap<GroupResource, Vec<String>> = BTreeMap::new();
        for gvr in &self.known {
            out.entry(gvr.group_resource()).or_default().push(gvr.version.clone());
        }
        out
    }
}

impl LifecycleSource for LifecycleRegistry {
    fn group_version_lifecycle(&self, gv: &GroupVersion) -> ApiLifecycle {
        self.group_versions.get(gv).cloned().unwrap_or_default()
    }

    fn resource_lifecycle(&self, gvr: &GroupVersionResource) -> ApiLifecycle {
        self.resources.get(gvr).cloned().unwrap_or_default()
    }

    /// Explicit priority when set, otherwise every group version seen in
    /// lifecycles or known resources, in kube-aware order.
    fn prioritized_versions(&self, group: &str) -> Vec<GroupVersion> {
        if let Some(explicit) = self.priority.get(group) {
            return explicit.clone();
        }
        let mut seen: BTreeSet<GroupVersion> =
            self.group_versions.keys().filter(|gv| gv.group == group).cloned().collect();
        seen.extend(self.known.iter().filter(|gvr| gvr.group == group).map(GroupVersionResource::group_version));
        let mut versions: Vec<GroupVersion> = seen.into_iter().collect();
        sort_kube_aware(&mut versions);
        versions
    }

    fn recognizes(&self, gvr: &GroupVersionResource) -> bool {
        self.known.contains(gvr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(minor: u32) -> Version {
        Version::major_minor(1, minor)
    }

    #[test]
    fn availability_bounds_are_inclusive() {
        let lc = ApiLifecycle::new(Some(v(27)), Some(v(29)));
        let cases = [
            (None, true),
            (Some(Version::major_minor(0, 0)), true),
            (Some(v(26)), false),
            (Some(v(27)), true),
            (Some(v(28)), true),
            (Some(v(29)), true),
            (Some(v(30)), false),
        ];
        for (at, want) in cases {
            assert_eq!(lc.available_at(at.as_ref()), want, "at {:?}", at);
        }
    }

    #[test]
    fn zero_versions_count_as_absent() {
        let lc = ApiLifecycle::new(Some(Version::major_minor(0, 0)), Some(Version::major_minor(0, 0)));
        assert!(lc.introduced_version().is_none());
        assert!(lc.available_at(Some(&v(40))));
    }

    #[test]
    fn default_priority_is_kube_aware() {
        let mut reg = LifecycleRegistry::new();
        reg.add_known_resource(GroupVersionResource::new("apps", "v1beta1", "deployments"));
        reg.add_known_resource(GroupVersionResource::new("apps", "v1", "deployments"));
        reg.set_group_version_lifecycle(GroupVersion::new("apps", "v2alpha1"), ApiLifecycle::default());
        reg.add_known_resource(GroupVersionResource::new("batch", "v1", "jobs"));
        let got: Vec<String> = reg.prioritized_versions("apps").into_iter().map(|gv| gv.version).collect();
        assert_eq!(got, vec!["v1", "v1beta1", "v2alpha1"]);

        reg.set_version_priority(vec![GroupVersion::new("apps", "v1beta1"), GroupVersion::new("apps", "v1")]);
        let got: Vec<String> = reg.prioritized_versions("apps").into_iter().map(|gv| gv.version).collect();
        assert_eq!(got, vec!["v1beta1", "v1"]);
    }

    #[test]
    fn lifecycle_yaml_shape() {
        let lc: ApiLifecycle = serde_json::from_str(r#"{"introduced":"1.28","removed":"1.31"}"#).unwrap();
        assert_eq!(lc, ApiLifecycle::new(Some(v(28)), Some(v(31))));
        assert_eq!(serde_json::to_string(&ApiLifecycle::introduced(v(28))).unwrap(), r#"{"introduced":"1.28"}"#);
    }
}
