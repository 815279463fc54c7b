//! Removal of expired and not-yet-introduced resources from a group's
//! versioned storage map.

use std::collections::{BTreeMap, BTreeSet};

use metrics::counter;
use skew_core::{compare_kube_aware_versions, parse_bool, GroupVersion, GroupVersionResource, Version};
use tracing::{debug, info};

use crate::resource_config::ResourceConfig;
use crate::source::{ApiLifecycle, LifecycleSource};

pub const STRICT_REMOVED_HANDLING_IN_ALPHA_ENV: &str = "SKEW_STRICT_REMOVED_API_HANDLING_IN_ALPHA";
pub const SERVE_REMOVED_APIS_FOR_ONE_RELEASE_ENV: &str = "SKEW_SERVE_REMOVED_APIS_FOR_ONE_RELEASE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluatorError {
    #[error("invalid value {value:?} for {var}: expected a boolean")]
    InvalidBool { var: &'static str, value: String },
}

/// Anything served from storage that knows its own lifecycle.
pub trait LifecycleAware {
    fn lifecycle(&self) -> ApiLifecycle;
}

impl LifecycleAware for ApiLifecycle {
    fn lifecycle(&self) -> ApiLifecycle {
        self.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluatorOptions {
    /// Binary version; caps forward-compatible serving when known.
    pub binary_version: Option<Version>,
    /// Serve resources introduced after the current version.
    pub emulation_forward_compatible: bool,
    pub strict_removed_handling_in_alpha: bool,
    pub serve_removed_apis_for_one_release: bool,
}

impl EvaluatorOptions {
    /// Read the two removal knobs from the environment.
    pub fn from_env() -> Result<Self, EvaluatorError> {
        Ok(Self {
            strict_removed_handling_in_alpha: env_bool(STRICT_REMOVED_HANDLING_IN_ALPHA_ENV)?,
            serve_removed_apis_for_one_release: env_bool(SERVE_REMOVED_APIS_FOR_ONE_RELEASE_ENV)?,
            ..Self::default()
        })
    }
}

fn env_bool(var: &'static str) -> Result<bool, EvaluatorError> {
    match std::env::var(var) {
        Ok(value) if value.is_empty() => Ok(false),
        Ok(value) => parse_bool(&value).ok_or(EvaluatorError::InvalidBool { var, value }),
        Err(_) => Ok(false),
    }
}

/// Decides which resources a component serves at its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceExpirationEvaluator {
    current_version: Version,
    is_alpha: bool,
    options: EvaluatorOptions,
}

impl ResourceExpirationEvaluator {
    /// Evaluator for `current`, with removal knobs taken from the environment.
    pub fn new(current: &Version) -> Result<Self, EvaluatorError> {
        Ok(Self::from_options(current, EvaluatorOptions::from_env()?))
    }

    pub fn from_options(current: &Version, options: EvaluatorOptions) -> Self {
        let is_alpha = current.pre_release().is_some_and(|p| p.contains("alpha"));
        Self { current_version: current.to_major_minor(), is_alpha, options }
    }

    pub fn current_version(&self) -> &Version {
        &self.current_version
    }

    pub fn is_alpha(&self) -> bool {
        self.is_alpha
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Whether a resource removed at `removed` is still served.
    pub fn should_serve_for_version(&self, removed: &Version) -> bool {
        if self.current_version > *removed {
            return false;
        }
        if self.current_version < *removed {
            return true;
        }
        if self.is_alpha {
            return !self.options.strict_removed_handling_in_alpha;
        }
        self.options.serve_removed_apis_for_one_release
    }

    /// Whether an API with `lifecycle` is served on its own, ignoring other
    /// versions of the same resource.
    pub fn should_serve(&self, lifecycle: &ApiLifecycle) -> bool {
        if let Some(removed) = lifecycle.removed_version() {
            if !self.should_serve_for_version(removed) {
                return false;
            }
        }
        match lifecycle.introduced_version() {
            Some(introduced) if *introduced > self.current_version => self.forward_compatible_with(introduced),
            _ => true,
        }
    }

    fn is_introduced(&self, lifecycle: &ApiLifecycle) -> bool {
        lifecycle.introduced_version().map_or(true, |i| *i <= self.current_version)
    }

    fn forward_compatible_with(&self, introduced: &Version) -> bool {
        self.options.emulation_forward_compatible
            && self.options.binary_version.as_ref().map_or(true, |b| *introduced <= b.to_major_minor())
    }

    /// Drop what this version must not serve from `storage`, keyed by
    /// version then resource name (sub-resources as `name/sub`). Returns
    /// the removed entries.
    pub fn remove_unavailable_kinds<S: LifecycleAware>(
        &self,
        group: &str,
        source: &dyn LifecycleSource,
        storage: &mut BTreeMap<String, BTreeMap<String, S>>,
        overrides: Option<&ResourceConfig>,
    ) -> Vec<GroupVersionResource> {
        let mut removed = self.remove_deleted_kinds(group, storage);
        removed.extend(self.remove_unintroduced_kinds(group, source, storage, overrides));
        if !removed.is_empty() {
            counter!("lifecycle_resources_removed_total", removed.len() as u64);
        }
        removed
    }

    fn remove_deleted_kinds<S: LifecycleAware>(
        &self,
        group: &str,
        storage: &mut BTreeMap<String, BTreeMap<String, S>>,
    ) -> Vec<GroupVersionResource> {
        let mut out = Vec::new();
        for (version, resources) in storage.iter_mut() {
            let expired: BTreeSet<String> = resources
                .iter()
                .filter_map(|(name, s)| {
                    let lc = s.lifecycle();
                    let removed = lc.removed_version()?;
                    (!self.should_serve_for_version(removed)).then(|| {
                        info!(group, version = %version, resource = %name, removed = %removed, "removing resource: past its removal release");
                        name.clone()
                    })
                })
                .collect();
            out.extend(drain_matching(group, version, resources, &expired));
        }
        prune_empty_versions(group, storage);
        out
    }

    fn remove_unintroduced_kinds<S: LifecycleAware>(
        &self,
        group: &str,
        source: &dyn LifecycleSource,
        storage: &mut BTreeMap<String, BTreeMap<String, S>>,
        overrides: Option<&ResourceConfig>,
    ) -> Vec<GroupVersionResource> {
        let mut prioritized: Vec<GroupVersion> = source.prioritized_versions(group);
        prioritized.sort_by(|a, b| compare_kube_aware_versions(&a.version, &b.version));

        let mut out = Vec::new();
        let mut enabled: BTreeSet<String> = BTreeSet::new();
        for gv in &prioritized {
            let Some(resources) = storage.get_mut(&gv.version) else {
                continue;
            };
            let mut to_remove: BTreeSet<String> = BTreeSet::new();
            for (name, s) in resources.iter() {
                let base = base_resource(name);
                match overrides.and_then(|o| explicit_setting(o, gv, name)) {
                    Some(true) => {
                        enabled.insert(base.to_string());
                        continue;
                    }
                    Some(false) => {
                        to_remove.insert(name.clone());
                        continue;
                    }
                    None => {}
                }
                let lc = s.lifecycle();
                if self.is_introduced(&lc) {
                    enabled.insert(base.to_string());
                    continue;
                }
                let forward = lc.introduced_version().is_some_and(|i| self.forward_compatible_with(i));
                if forward && enabled.contains(base) {
                    debug!(group, version = %gv.version, resource = %name, "keeping unintroduced resource for forward compatibility");
                    continue;
                }
                info!(group, version = %gv.version, resource = %name, current = %self.current_version, "removing resource: not introduced yet");
                to_remove.insert(name.clone());
            }
            out.extend(drain_matching(group, &gv.version, resources, &to_remove));
        }
        prune_empty_versions(group, storage);
        out
    }
}

fn base_resource(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Override for `name`, falling back to its base resource's.
fn explicit_setting(config: &ResourceConfig, gv: &GroupVersion, name: &str) -> Option<bool> {
    let setting = |resource: &str| {
        let gvr = gv.with_resource(resource);
        if config.resource_explicitly_enabled(&gvr) {
            Some(true)
        } else if config.resource_explicitly_disabled(&gvr) {
            Some(false)
        } else {
            None
        }
    };
    setting(name).or_else(|| setting(base_resource(name)))
}

fn drain_matching<S>(
    group: &str,
    version: &str,
    resources: &mut BTreeMap<String, S>,
    to_remove: &BTreeSet<String>,
) -> Vec<GroupVersionResource> {
    if to_remove.is_empty() {
        return Vec::new();
    }
    let names: Vec<String> =
        resources.keys().filter(|name| should_remove_resource_and_subresources(to_remove, name)).cloned().collect();
    names
        .into_iter()
        .map(|name| {
            resources.remove(&name);
            GroupVersionResource::new(group, version, name)
        })
        .collect()
}

fn prune_empty_versions<S>(group: &str, storage: &mut BTreeMap<String, BTreeMap<String, S>>) {
    storage.retain(|version, resources| {
        if resources.is_empty() {
            info!(group, version = %version, "removing version: no resources left");
        }
        !resources.is_empty()
    });
}

/// True when `name` is one of `to_remove` or a sub-resource of one.
pub fn should_remove_resource_and_subresources(to_remove: &BTreeSet<String>, name: &str) -> bool {
    to_remove.iter().any(|r| name == r || name.strip_prefix(r.as_str()).is_some_and(|rest| rest.starts_with('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u32, minor: u32) -> Version {
        Version::major_minor(major, minor)
    }

    fn eval(current: Version) -> ResourceExpirationEvaluator {
        ResourceExpirationEvaluator::from_options(&current, EvaluatorOptions::default())
    }

    #[test]
    fn evaluator_normalizes_current_version() {
        let cases = [
            ("v1.20.0-beta.0.62+a5d22854a2ac21", false),
            ("v1.20.0-alpha.0.62+a5d22854a2ac21", true),
            ("v1.20.1", false),
            ("1.20.1", false),
        ];
        for (raw, alpha) in cases {
            let e = eval(Version::parse_generic(raw).unwrap());
            assert!(e.current_version().strictly_equal(&v(1, 20)), "{}", raw);
            assert_eq!(e.current_version().to_string(), "1.20", "{}", raw);
            assert_eq!(e.is_alpha(), alpha, "{}", raw);
        }
    }

    #[test]
    fn should_serve_table() {
        let alpha = Version::parse_generic("1.20.0-alpha.1").unwrap();
        let one_more = EvaluatorOptions { serve_removed_apis_for_one_release: true, ..Default::default() };
        let strict = EvaluatorOptions { strict_removed_handling_in_alpha: true, ..Default::default() };
        let cases: Vec<(&str, ResourceExpirationEvaluator, ApiLifecycle, bool)> = vec![
            ("removed-in-curr", eval(v(1, 20)), ApiLifecycle::new(None, Some(v(1, 20))), false),
            (
                "removed-in-curr-but-deferred",
                ResourceExpirationEvaluator::from_options(&v(1, 20), one_more.clone()),
                ApiLifecycle::new(None, Some(v(1, 20))),
                true,
            ),
            ("removed-in-curr-but-alpha", eval(alpha.clone()), ApiLifecycle::new(None, Some(v(1, 20))), true),
            (
                "removed-in-curr-but-alpha-but-strict",
                ResourceExpirationEvaluator::from_options(&alpha, strict),
                ApiLifecycle::new(None, Some(v(1, 20))),
                false,
            ),
            (
                "removed-in-prev-deferral-does-not-help",
                ResourceExpirationEvaluator::from_options(&v(1, 21), one_more.clone()),
                ApiLifecycle::new(None, Some(v(1, 20))),
                false,
            ),
            (
                "removed-in-prev-major",
                ResourceExpirationEvaluator::from_options(&v(2, 20), one_more),
                ApiLifecycle::new(None, Some(v(1, 20))),
                false,
            ),
            ("removed-in-future", eval(v(1, 20)), ApiLifecycle::new(None, Some(v(1, 21))), true),
            ("never-removed", eval(v(1, 20)), ApiLifecycle::default(), true),
            ("introduced-in-curr", eval(v(1, 20)), ApiLifecycle::introduced(v(1, 20)), true),
            ("introduced-in-prev", eval(v(1, 20)), ApiLifecycle::introduced(v(1, 19)), true),
            ("introduced-in-future", eval(v(1, 20)), ApiLifecycle::introduced(v(1, 21)), false),
            ("missing-introduced", eval(v(1, 20)), ApiLifecycle::introduced(v(0, 0)), true),
        ];
        for (name, e, lc, want) in cases {
            assert_eq!(e.should_serve(&lc), want, "{}", name);
        }
    }

    #[test]
    fn forward_compatible_serving_is_capped_by_binary() {
        let lc = ApiLifecycle::introduced(v(1, 23));
        let opts = |binary: Option<Version>, forward: bool| EvaluatorOptions {
            binary_version: binary,
            emulation_forward_compatible: forward,
            ..Default::default()
        };
        let e = ResourceExpirationEvaluator::from_options(&v(1, 21), opts(Some(Version::new(1, 23, 4)), true));
        assert!(e.should_serve(&lc));
        let e = ResourceExpirationEvaluator::from_options(&v(1, 21), opts(Some(Version::new(1, 23, 4)), false));
        assert!(!e.should_serve(&lc));
        let e = ResourceExpirationEvaluator::from_options(&v(1, 21), opts(Some(v(1, 22)), true));
        assert!(!e.should_serve(&lc));
        let e = ResourceExpirationEvaluator::from_options(&v(1, 21), opts(None, true));
        assert!(e.should_serve(&lc));
    }

    #[test]
    fn should_remove_resource_matches_subresources() {
        let set = BTreeSet::from(["foo".to_string()]);
        assert!(should_remove_resource_and_subresources(&set, "foo/scale"));
        assert!(should_remove_resource_and_subresources(&set, "foo"));
        assert!(!should_remove_resource_and_subresources(&set, "bar"));
        assert!(!should_remove_resource_and_subresources(&set, "foobar"));
    }
}
