//! Defaults for the designated default component.

use skew_core::{EffectiveVersion, Version};

pub const DEFAULT_KUBE_COMPONENT: &str = "kube";

/// Binary version assumed when the build carries none.
pub const DEFAULT_KUBE_BINARY_VERSION: &str = "1.34";

/// Floors never go below this.
pub const MINIMUM_KUBE_EMULATION_VERSION: Version = Version::major_minor(1, 31);

/// How many minors below the binary the default component may emulate.
pub const KUBE_SKEW_MINORS: u32 = 3;

fn build_binary_version() -> Option<Version> {
    option_env!("SKEW_BUILD_VERSION")
        .and_then(|s| Version::parse_generic(s).ok())
        .filter(|v| !(v.major() == 0 && v.minor() == 0))
}

/// Effective version of the running build, falling back to
/// [`default_kube_effective_version`] when the build version is unknown.
pub fn default_build_effective_version() -> EffectiveVersion {
    match build_binary_version() {
        Some(binary) => with_kube_effective_version_floors(EffectiveVersion::new(binary)),
        None => default_kube_effective_version(),
    }
}

pub fn default_kube_effective_version() -> EffectiveVersion {
    let binary = Version::parse_generic(DEFAULT_KUBE_BINARY_VERSION).unwrap_or(MINIMUM_KUBE_EMULATION_VERSION);
    with_kube_effective_version_floors(EffectiveVersion::new(binary))
}

/// Set both floors to `binary - 3 minors`, never below 1.31.
pub fn with_kube_effective_version_floors(ev: EffectiveVersion) -> EffectiveVersion {
    let floor = ev
        .binary_version()
        .map(|b| b.with_patch(0).subtract_minor(KUBE_SKEW_MINORS))
        .filter(|f| *f >= MINIMUM_KUBE_EMULATION_VERSION)
        .unwrap_or(MINIMUM_KUBE_EMULATION_VERSION);
    ev.with_version_floor(floor)
}
