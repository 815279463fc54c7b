//! Skew feature gates: named boolean switches whose defaults depend on the
//! emulation version of the component that owns them.
//!
//! The registry only talks to gates through [`MutableVersionedFeatureGate`];
//! [`VersionedFeatureGate`] is the implementation used by `skewctl` and the
//! tests.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use skew_core::Version;

mod gate;
pub mod lint;

pub use gate::VersionedFeatureGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PreRelease {
    Alpha,
    Beta,
    Ga,
    Deprecated,
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PreRelease::Alpha => "ALPHA",
            PreRelease::Beta => "BETA",
            PreRelease::Ga => "GA",
            PreRelease::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    pub default: bool,
    #[serde(default)]
    pub lock_to_default: bool,
    pub pre_release: PreRelease,
}

/// Spec in effect from `version` onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedSpec {
    pub version: Version,
    pub default: bool,
    #[serde(default)]
    pub lock_to_default: bool,
    pub pre_release: PreRelease,
}

impl VersionedSpec {
    pub fn spec(&self) -> FeatureSpec {
        FeatureSpec { default: self.default, lock_to_default: self.lock_to_default, pre_release: self.pre_release }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureSpecs {
    Unversioned(FeatureSpec),
    Versioned(Vec<VersionedSpec>),
}

impl FeatureSpecs {
    /// Spec in effect at `emulation`; `None` while the feature is not yet
    /// introduced. An unknown emulation version selects the latest spec.
    pub fn at(&self, emulation: Option<&Version>) -> Option<FeatureSpec> {
        match self {
            FeatureSpecs::Unversioned(spec) => Some(*spec),
            FeatureSpecs::Versioned(specs) => match emulation {
                None => specs.iter().max_by(|a, b| a.version.cmp(&b.version)).map(VersionedSpec::spec),
                Some(v) => specs
                    .iter()
                    .filter(|s| s.version <= *v)
                    .max_by(|a, b| a.version.cmp(&b.version))
                    .map(VersionedSpec::spec),
            },
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, FeatureSpecs::Versioned(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeatureGateError {
    #[error("cannot add feature gate {0} after the gate has been closed")]
    Closed(String),
    #[error("feature gate {0} with different spec already exists")]
    Conflict(String),
    #[error("feature gate {0} has no versioned specs")]
    EmptySpecs(String),
    #[error("unrecognized feature gate: {0}")]
    Unrecognized(String),
    #[error("missing bool value for {0}")]
    MissingValue(String),
    #[error("invalid value of {feature}={value}, err: expected true or false")]
    InvalidValue { feature: String, value: String },
    #[error("cannot set feature gate {feature} to {value}, feature is locked to {locked}")]
    Locked { feature: String, value: bool, locked: bool },
    #[error("cannot set feature gate {feature} to {value}, feature is PreAlpha at emulated version {version}")]
    NotIntroduced { feature: String, value: bool, version: Version },
    #[error("{}", join_errors(.0))]
    Multiple(Vec<FeatureGateError>),
}

fn join_errors(errs: &[FeatureGateError]) -> String {
    errs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl FeatureGateError {
    /// One error as-is, several wrapped in [`FeatureGateError::Multiple`].
    pub fn aggregate(mut errs: Vec<FeatureGateError>) -> Option<FeatureGateError> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(FeatureGateError::Multiple(errs)),
        }
    }
}

/// Read side of a feature gate.
pub trait FeatureGate: Send + Sync {
    fn enabled(&self, feature: &str) -> bool;
    /// `Name=true|false (STAGE - default=b)` for every settable feature.
    fn known_features(&self) -> Vec<String>;
}

/// Feature gate the registry can drive: emulation-version sync, operator
/// values, validation.
pub trait MutableVersionedFeatureGate: FeatureGate {
    fn emulation_version(&self) -> Option<Version>;
    fn set_emulation_version(&self, version: &Version) -> Result<(), FeatureGateError>;
    /// Apply `A=true,B=false`.
    fn set(&self, flag: &str) -> Result<(), FeatureGateError>;
    fn set_from_map(&self, values: &BTreeMap<String, bool>) -> Result<(), FeatureGateError>;
    fn validate(&self) -> Vec<FeatureGateError>;
    /// Forbid further feature registration.
    fn close(&self);
}
