//! Group / version / resource identifiers and API version ordering.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into() }
    }

    /// Parse `v1` (core group) or `group/v1`.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version] if !version.is_empty() => Some(Self::new("", *version)),
            [group, version] if !group.is_empty() && !version.is_empty() => Some(Self::new(*group, *version)),
            _ => None,
        }
    }

    pub fn with_resource(&self, resource: impl Into<String>) -> GroupVersionResource {
        GroupVersionResource { group: self.group.clone(), version: self.version.clone(), resource: resource.into() }
    }
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), resource: resource.into() }
    }

    pub fn with_version(&self, version: impl Into<String>) -> GroupVersionResource {
        GroupVersionResource { group: self.group.clone(), version: version.into(), resource: self.resource.clone() }
    }
}

impl GroupVersionResource {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(self.group.clone(), self.version.clone())
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.resource.clone())
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Resource={}", self.group_version(), self.resource)
    }
}

static KUBE_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v([1-9][0-9]*)(?:(alpha|beta)([1-9][0-9]*))?$").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stability {
    Alpha,
    Beta,
    Ga,
}

fn kube_version_key(v: &str) -> Option<(Stability, u64, u64)> {
    let caps = KUBE_VERSION.captures(v)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let (stability, minor) = match caps.get(2).map(|m| m.as_str()) {
        None => (Stability::Ga, 0),
        Some("beta") => (Stability::Beta, caps.get(3)?.as_str().parse().ok()?),
        Some(_) => (Stability::Alpha, caps.get(3)?.as_str().parse().ok()?),
    };
    Some((stability, major, minor))
}

/// Ordering of API version strings, greatest first when sorted descending:
/// GA before beta before alpha, higher major first, then higher minor.
/// Strings that do not look like `v1`, `v2beta3` sort below all of them,
/// lexically among themselves.
pub fn compare_kube_aware_versions(a: &str, b: &str) -> Ordering {
    match (kube_version_key(a), kube_version_key(b)) {
        (Some(ka), Some(kb)) => ka.cmp(&kb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => b.cmp(a),
    }
}

/// Sort group versions highest priority first.
pub fn sort_kube_aware(versions: &mut [GroupVersion]) {
    versions.sort_by(|a, b| compare_kube_aware_versions(&b.version, &a.version));
}
