//! Release version value type.
//!
//! Versions compare by `major.minor.patch` only. Pre-release and build
//! metadata are carried for display and for alpha detection but never take
//! part in ordering or equality.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("illegal version string {0:?}")]
    Illegal(String),
    #[error("illegal version string {input:?}: {reason}")]
    IllegalComponent { input: String, reason: &'static str },
    #[error("version {0} is not in the format of major.minor")]
    NotMajorMinor(String),
    #[error("minCompatibilityVersionFloor {min_compat_floor} must be less than or equal to emulationVersionFloor {emulation_floor}")]
    FloorOrder { min_compat_floor: Version, emulation_floor: Version },
}

#[derive(Debug, Clone, Default)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: Option<u32>,
    pre_release: Option<String>,
    build_metadata: Option<String>,
}

impl Version {
    /// `major.minor` with no patch or pre-release.
    pub const fn major_minor(major: u32, minor: u32) -> Self {
        Self { major, minor, patch: None, pre_release: None, build_metadata: None }
    }

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch: Some(patch), pre_release: None, build_metadata: None }
    }

    /// Parse `[v]major.minor[.patch][-pre][+build]`.
    pub fn parse_generic(s: &str) -> Result<Self, VersionError> {
        parse(s, false)
    }

    /// Parse a full semantic version; the patch component is required.
    pub fn parse_semantic(s: &str) -> Result<Self, VersionError> {
        parse(s, true)
    }

    /// Parse a version that may only carry `major.minor`.
    pub fn parse_major_minor(s: &str) -> Result<Self, VersionError> {
        let v = parse(s, false)?;
        if v.patch.is_some() || v.pre_release.is_some() || v.build_metadata.is_some() {
            return Err(VersionError::NotMajorMinor(s.trim().to_string()));
        }
        Ok(v)
    }

    pub fn major(&self) -> u32 { self.major }
    pub fn minor(&self) -> u32 { self.minor }
    pub fn patch(&self) -> u32 { self.patch.unwrap_or(0) }
    pub fn pre_release(&self) -> Option<&str> { self.pre_release.as_deref() }
    pub fn build_metadata(&self) -> Option<&str> { self.build_metadata.as_deref() }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch() == 0
    }

    /// Drop patch, pre-release and build metadata.
    pub fn to_major_minor(&self) -> Self {
        Self::major_minor(self.major, self.minor)
    }

    pub fn with_patch(&self, patch: u32) -> Self {
        Self { patch: Some(patch), ..self.clone() }
    }

    pub fn with_pre_release(&self, pre_release: Option<&str>) -> Self {
        Self { pre_release: pre_release.filter(|p| !p.is_empty()).map(str::to_string), ..self.clone() }
    }

    pub fn with_build_metadata(&self, build: Option<&str>) -> Self {
        Self { build_metadata: build.filter(|b| !b.is_empty()).map(str::to_string), ..self.clone() }
    }

    /// Shift the minor component by `offset`, saturating at zero.
    pub fn offset_minor(&self, offset: i64) -> Self {
        let minor = (i64::from(self.minor) + offset).clamp(0, i64::from(u32::MAX)) as u32;
        Self { minor, ..self.clone() }
    }

    /// Normalized `major.(minor - n)`; saturates at minor 0.
    pub fn subtract_minor(&self, n: u32) -> Self {
        Self::major_minor(self.major, self.minor.saturating_sub(n))
    }

    pub fn less_than(&self, other: &Version) -> bool {
        self < other
    }

    pub fn greater_than(&self, other: &Version) -> bool {
        self > other
    }

    /// Equality over `major.minor.patch` and the pre-release tag.
    pub fn strictly_equal(&self, other: &Version) -> bool {
        self == other && self.pre_release == other.pre_release
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch())
    }
}

fn parse(input: &str, semantic: bool) -> Result<Version, VersionError> {
    let s = input.trim();
    let s = s.strip_prefix('v').unwrap_or(s);
    if s.is_empty() {
        return Err(VersionError::Illegal(input.to_string()));
    }
    let (rest, build) = match s.split_once('+') {
        Some((r, b)) => (r, Some(b)),
        None => (s, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((c, p)) => (c, Some(p)),
        None => (rest, None),
    };
    let parts: Vec<&str> = core.split('.').collect();
    let wanted = if semantic { 3..=3 } else { 2..=3 };
    if !wanted.contains(&parts.len()) {
        return Err(VersionError::Illegal(input.to_string()));
    }
    let mut nums = [0u32; 3];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::Illegal(input.to_string()));
        }
        if part.len() > 1 && part.starts_with('0') {
            return Err(VersionError::IllegalComponent { input: input.to_string(), reason: "leading zero" });
        }
        nums[i] = part
            .parse()
            .map_err(|_| VersionError::IllegalComponent { input: input.to_string(), reason: "component out of range" })?;
    }
    if let Some(p) = pre {
        if p.is_empty() || !p.split('.').all(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')) {
            return Err(VersionError::IllegalComponent { input: input.to_string(), reason: "invalid pre-release" });
        }
    }
    if let Some(b) = build {
        if b.is_empty() {
            return Err(VersionError::IllegalComponent { input: input.to_string(), reason: "empty build metadata" });
        }
    }
    Ok(Version {
        major: nums[0],
        minor: nums[1],
        patch: (parts.len() == 3).then_some(nums[2]),
        pre_release: pre.map(str::to_string),
        build_metadata: build.map(str::to_string),
    })
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(p) = self.patch {
            write!(f, ".{}", p)?;
        }
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}", pre)?;
        }
        if let Some(b) = &self.build_metadata {
            write!(f, "+{}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_generic(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse_generic(&s).map_err(serde::de::Error::custom)
    }
}
