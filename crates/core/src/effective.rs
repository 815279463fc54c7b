//! Per-component effective version: binary, emulation and min-compatibility
//! versions plus their floors.
//!
//! The three versions live in one immutable [`VersionSnapshot`] behind an
//! `ArcSwap`. Writers replace the whole snapshot, so a reader never sees a
//! torn mix of old and new values. Floors are fixed once the value has been
//! built and shared.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::version::{Version, VersionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionValidationError {
    #[error("emulation version {version} is not between [{floor}, {binary}]")]
    EmulationOutOfRange { version: Version, floor: Version, binary: Version },
    #[error("minCompatibilityVersion version {version} is not between [{floor}, {emulation}]")]
    MinCompatibilityOutOfRange { version: Version, floor: Version, emulation: Version },
}

/// Consistent view of the three versions of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionSnapshot {
    pub binary: Option<Version>,
    pub emulation: Option<Version>,
    pub min_compatibility: Option<Version>,
}

pub struct EffectiveVersion {
    current: ArcSwap<VersionSnapshot>,
    emulation_version_floor: Version,
    min_compatibility_version_floor: Version,
}

fn normalize(v: Option<&Version>) -> Option<Version> {
    v.map(Version::to_major_minor)
}

impl EffectiveVersion {
    /// Emulation defaults to the binary `major.minor`, min-compatibility to one
    /// minor below it. Floors are unbounded (`0.0`).
    pub fn new(binary: Version) -> Self {
        let ev = Self::unset();
        let compat = binary.subtract_minor(1);
        ev.set(Some(&binary), Some(&binary), Some(&compat));
        ev
    }

    /// No versions set at all; every accessor returns `None`.
    pub fn unset() -> Self {
        Self {
            current: ArcSwap::from_pointee(VersionSnapshot::default()),
            emulation_version_floor: Version::major_minor(0, 0),
            min_compatibility_version_floor: Version::major_minor(0, 0),
        }
    }

    /// Empty input yields an unset effective version.
    pub fn from_binary_str(binary: &str) -> Result<Self, VersionError> {
        if binary.trim().is_empty() {
            return Ok(Self::unset());
        }
        Ok(Self::new(Version::parse_generic(binary)?))
    }

    pub fn with_emulation_version_floor(mut self, floor: Version) -> Self {
        self.emulation_version_floor = floor;
        self
    }

    /// Fails when the floor is above the emulation floor; call after
    /// [`Self::with_emulation_version_floor`].
    pub fn with_min_compatibility_version_floor(mut self, floor: Version) -> Result<Self, VersionError> {
        if floor > self.emulation_version_floor {
            return Err(VersionError::FloorOrder {
                min_compat_floor: floor,
                emulation_floor: self.emulation_version_floor.clone(),
            });
        }
        self.min_compatibility_version_floor = floor;
        Ok(self)
    }

    /// Use one floor for both emulation and min-compatibility versions.
    pub fn with_version_floor(mut self, floor: Version) -> Self {
        self.emulation_version_floor = floor.clone();
        self.min_compatibility_version_floor = floor;
        self
    }

    pub fn emulation_version_floor(&self) -> &Version { &self.emulation_version_floor }
    pub fn min_compatibility_version_floor(&self) -> &Version { &self.min_compatibility_version_floor }

    pub fn snapshot(&self) -> Arc<VersionSnapshot> {
        self.current.load_full()
    }

    pub fn binary_version(&self) -> Option<Version> {
        self.current.load().binary.clone()
    }

    /// The stored emulation version, tagged with the binary version's
    /// pre-release so alpha builds keep serving expired APIs.
    pub fn emulation_version(&self) -> Option<Version> {
        let snap = self.current.load();
        let pre = snap.binary.as_ref().and_then(Version::pre_release);
        snap.emulation.as_ref().map(|v| v.with_pre_release(pre))
    }

    pub fn min_compatibility_version(&self) -> Option<Version> {
        self.current.load().min_compatibility.clone()
    }

    /// Store all three versions without validating them.
    pub fn set(&self, binary: Option<&Version>, emulation: Option<&Version>, min_compatibility: Option<&Version>) {
        self.current.store(Arc::new(VersionSnapshot {
            binary: binary.cloned(),
            emulation: normalize(emulation),
            min_compatibility: normalize(min_compatibility),
        }));
    }

    /// Also resets min-compatibility to `max(v - 1 minor, floor)`.
    pub fn set_emulation_version(&self, emulation: &Version) {
        let emulation = emulation.to_major_minor();
        let mut min_compat = emulation.subtract_minor(1);
        if min_compat < self.min_compatibility_version_floor {
            min_compat = self.min_compatibility_version_floor.to_major_minor();
        }
        self.current.rcu(|cur| VersionSnapshot {
            binary: cur.binary.clone(),
            emulation: Some(emulation.clone()),
            min_compatibility: Some(min_compat.clone()),
        });
    }

    /// Must run after [`Self::set_emulation_version`] in a configuration pass,
    /// which would otherwise overwrite it with the default.
    pub fn set_min_compatibility_version(&self, min_compatibility: &Version) {
        let min_compat = min_compatibility.to_major_minor();
        self.current.rcu(|cur| VersionSnapshot {
            binary: cur.binary.clone(),
            emulation: cur.emulation.clone(),
            min_compatibility: Some(min_compat.clone()),
        });
    }

    /// Checks `floor <= emulation <= binary(patch=0)` and
    /// `floor <= min_compat <= emulation`. Unset versions read as `0.0`.
    pub fn validate(&self) -> Vec<VersionValidationError> {
        let snap = self.current.load();
        let zero = Version::major_minor(0, 0);
        let binary = snap.binary.as_ref().map(|b| b.with_patch(0)).unwrap_or_else(|| zero.clone());
        let emulation = snap.emulation.clone().unwrap_or_else(|| zero.clone());
        let min_compat = snap.min_compatibility.clone().unwrap_or(zero);

        let mut errs = Vec::new();
        if emulation > binary || emulation < self.emulation_version_floor {
            errs.push(VersionValidationError::EmulationOutOfRange {
                version: emulation.clone(),
                floor: self.emulation_version_floor.clone(),
                binary,
            });
        }
        if min_compat > emulation || min_compat < self.min_compatibility_version_floor {
            errs.push(VersionValidationError::MinCompatibilityOutOfRange {
                version: min_compat,
                floor: self.min_compatibility_version_floor.clone(),
                emulation,
            });
        }
        errs
    }

    pub fn allowed_emulation_version_range(&self) -> String {
        let current = self.emulation_version();
        self.allowed_range(&self.emulation_version_floor, current)
    }

    pub fn allowed_min_compatibility_version_range(&self) -> String {
        let current = self.min_compatibility_version();
        self.allowed_range(&self.min_compatibility_version_floor, current)
    }

    fn allowed_range(&self, floor: &Version, current: Option<Version>) -> String {
        let Some(binary) = self.binary_version() else {
            return String::new();
        };
        let current = current.map(|v| v.to_string()).unwrap_or_default();
        format!("{}..{} (default={})", floor, binary.to_major_minor(), current)
    }

    /// Field-wise equality of binary, emulation and min-compatibility versions.
    pub fn equal_to(&self, other: &EffectiveVersion) -> bool {
        self.binary_version() == other.binary_version()
            && self.emulation_version() == other.emulation_version()
            && self.min_compatibility_version() == other.min_compatibility_version()
    }
}

impl fmt::Display for EffectiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<Version>| v.map(|v| v.to_string()).unwrap_or_else(|| "<nil>".to_string());
        write!(
            f,
            "{{BinaryVersion: {}, EmulationVersion: {}, MinCompatibilityVersion: {}}}",
            show(self.binary_version()),
            show(self.emulation_version()),
            show(self.min_compatibility_version()),
        )
    }
}

impl fmt::Debug for EffectiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveVersion")
            .field("current", &*self.current.load())
            .field("emulation_version_floor", &self.emulation_version_floor)
            .field("min_compatibility_version_floor", &self.min_compatibility_version_floor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse_generic(s).unwrap()
    }

    #[test]
    fn defaults_follow_binary_version() {
        let ev = EffectiveVersion::new(v("v1.30.2"));
        assert_eq!(ev.emulation_version(), Some(Version::major_minor(1, 30)));
        assert_eq!(ev.min_compatibility_version(), Some(Version::major_minor(1, 29)));
        assert_eq!(ev.binary_version(), Some(v("1.30.2")));
        assert!(ev.validate().is_empty());
    }

    #[test]
    fn validate_envelope_table() {
        let cases = vec![
            ("patch version diff ok", "v1.30.2", "v1.30.1", "v1.29.5", false),
            ("emulation one minor lower ok", "v1.31.2", "v1.30.0", "v1.30.0", false),
            ("emulation one minor higher not ok", "v1.30.2", "v1.31.0", "v1.29.0", true),
            ("emulation two minor higher not ok", "v1.30.2", "v1.32.0", "v1.29.0", true),
            ("compat same as emulation ok", "v1.30.2", "v1.30.0", "v1.30.0", false),
            ("compat one minor higher than emulation not ok", "v1.30.2", "v1.30.0", "v1.31.0", true),
        ];
        for (name, binary, emulation, compat, expect_err) in cases {
            let ev = EffectiveVersion::unset();
            ev.set(Some(&v(binary)), Some(&v(emulation)), Some(&v(compat)));
            let errs = ev.validate();
            assert_eq!(!errs.is_empty(), expect_err, "{}: {:?}", name, errs);
        }
    }

    #[test]
    fn validate_respects_floors() {
        let ev = EffectiveVersion::new(v("1.32.0"))
            .with_emulation_version_floor(Version::major_minor(1, 30))
            .with_min_compatibility_version_floor(Version::major_minor(1, 30))
            .unwrap();
        ev.set_emulation_version(&Version::major_minor(1, 29));
        let errs = ev.validate();
        assert_eq!(errs.len(), 2, "{:?}", errs);
        assert!(errs[0].to_string().contains("emulation version 1.29 is not between [1.30, 1.32.0]"));

        ev.set_emulation_version(&Version::major_minor(1, 30));
        // default min-compat would be 1.29, clamped up to the floor
        assert_eq!(ev.min_compatibility_version(), Some(Version::major_minor(1, 30)));
        assert!(ev.validate().is_empty());
    }

    #[test]
    fn validate_sweeps_around_binary() {
        let binary = v("1.30.4");
        for de in -2i64..=2 {
            for dc in -2i64..=2 {
                let emu = Version::major_minor(1, 30).offset_minor(de);
                let compat = Version::major_minor(1, 30).offset_minor(dc);
                let ev = EffectiveVersion::unset();
                ev.set(Some(&binary), Some(&emu), Some(&compat));
                let ok = emu <= Version::major_minor(1, 30) && compat <= emu;
                assert_eq!(ev.validate().is_empty(), ok, "emu={} compat={}", emu, compat);
            }
        }
    }

    #[test]
    fn unset_validates_with_zero_versions() {
        let ev = EffectiveVersion::unset();
        assert!(ev.validate().is_empty());
        assert_eq!(ev.allowed_emulation_version_range(), "");
        assert_eq!(ev.to_string(), "{BinaryVersion: <nil>, EmulationVersion: <nil>, MinCompatibilityVersion: <nil>}");
        assert!(EffectiveVersion::from_binary_str("").unwrap().binary_version().is_none());
    }

    #[test]
    fn min_compat_floor_above_emulation_floor_is_rejected() {
        let err = EffectiveVersion::new(v("1.31.0"))
            .with_emulation_version_floor(Version::major_minor(1, 29))
            .with_min_compatibility_version_floor(Version::major_minor(1, 30))
            .unwrap_err();
        assert!(matches!(err, VersionError::FloorOrder { .. }));
    }

    #[test]
    fn set_emulation_version_round_trips_major_minor() {
        let ev = EffectiveVersion::new(v("1.33.1"));
        for s in ["1.31.7", "v1.32", "1.30.0-rc.1"] {
            ev.set_emulation_version(&v(s));
            assert_eq!(ev.emulation_version(), Some(v(s).to_major_minor()));
            assert_eq!(ev.emulation_version().unwrap().to_string(), v(s).to_major_minor().to_string());
        }
        ev.set_min_compatibility_version(&v("1.28.3"));
        assert_eq!(ev.min_compatibility_version(), Some(Version::major_minor(1, 28)));
    }

    #[test]
    fn emulation_version_carries_binary_pre_release() {
        let ev = EffectiveVersion::new(v("v1.31.0-alpha.1.5+abc"));
        assert_eq!(ev.emulation_version().unwrap().to_string(), "1.31-alpha.1.5");
        assert_eq!(ev.snapshot().emulation.as_ref().unwrap().pre_release(), None);
    }

    #[test]
    fn ranges_render_floor_binary_and_current() {
        let ev = EffectiveVersion::new(v("1.32.3"))
            .with_emulation_version_floor(Version::major_minor(1, 31))
            .with_min_compatibility_version_floor(Version::major_minor(1, 30))
            .unwrap();
        assert_eq!(ev.allowed_emulation_version_range(), "1.31..1.32 (default=1.32)");
        assert_eq!(ev.allowed_min_compatibility_version_range(), "1.30..1.32 (default=1.31)");
    }

    #[test]
    fn equal_to_compares_all_three() {
        let a = EffectiveVersion::new(v("1.31.0"));
        let b = EffectiveVersion::new(v("1.31.0"));
        assert!(a.equal_to(&b));
        b.set_min_compatibility_version(&Version::major_minor(1, 31));
        assert!(!a.equal_to(&b));
    }
}
