//! Skew core types: release versions, per-component effective versions and
//! API group/version/resource identifiers.

#![forbid(unsafe_code)]

pub mod effective;
pub mod flag;
pub mod gvr;
pub mod version;

pub use effective::{EffectiveVersion, VersionSnapshot, VersionValidationError};
pub use flag::parse_bool;
pub use gvr::{compare_kube_aware_versions, sort_kube_aware, GroupResource, GroupVersion, GroupVersionResource};
pub use version::{Version, VersionError};

pub mod prelude {
    pub use super::{EffectiveVersion, GroupResource, GroupVersion, GroupVersionResource, Version};
}
