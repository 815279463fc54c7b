//! Operator configuration surface: flag-style strings and the equivalent
//! serde document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use skew_core::{Version, VersionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed pair, expect string=string: {0:?}")]
    MalformedPair(String),
    #[error("malformed feature gate entry, expect [component:]key=value: {0:?}")]
    MalformedFeature(String),
    #[error("invalid version for component {component}: {source}")]
    Version {
        component: String,
        #[source]
        source: VersionError,
    },
}

/// Parse `a=x,b=y` into a map. Later keys win.
pub fn parse_configuration_map(s: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut out = BTreeMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                out.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => return Err(ConfigError::MalformedPair(pair.to_string())),
        }
    }
    Ok(out)
}

/// Parse each value as a `major.minor` version.
pub fn parse_version_map(raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, Version>, ConfigError> {
    raw.iter()
        .map(|(component, v)| {
            Version::parse_major_minor(v)
                .map(|ver| (component.clone(), ver))
                .map_err(|source| ConfigError::Version { component: component.clone(), source })
        })
        .collect()
}

/// `kube=1.31,wardle=1.2`; patch components are rejected.
pub fn parse_emulated_version_flag(s: &str) -> Result<BTreeMap<String, Version>, ConfigError> {
    parse_version_map(&parse_configuration_map(s)?)
}

/// `wardle:A=true,B=false`; entries without a `component:` prefix land under
/// the empty key. Order within a component is preserved.
pub fn parse_feature_gates_flag(s: &str) -> Result<BTreeMap<String, Vec<String>>, ConfigError> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    merge_feature_gates_flag(&mut out, s)?;
    Ok(out)
}

fn merge_feature_gates_flag(out: &mut BTreeMap<String, Vec<String>>, s: &str) -> Result<(), ConfigError> {
    for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (component, kv) = match entry.split_once(':') {
            Some((c, kv)) if !kv.contains(':') => (c.trim(), kv.trim()),
            Some(_) => return Err(ConfigError::MalformedFeature(entry.to_string())),
            None => ("", entry),
        };
        match kv.split_once('=') {
            Some((k, _)) if !k.trim().is_empty() => out.entry(component.to_string()).or_default().push(kv.to_string()),
            _ => return Err(ConfigError::MalformedFeature(entry.to_string())),
        }
    }
    Ok(())
}

/// Configuration document equivalent to the three flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentGlobalsConfig {
    pub emulated_versions: BTreeMap<String, String>,
    pub min_compatibility_versions: BTreeMap<String, String>,
    pub feature_gates: BTreeMap<String, Vec<String>>,
}

impl ComponentGlobalsConfig {
    /// Build from flag values. `feature_gates` may be repeated.
    pub fn from_flags(
        emulated_version: Option<&str>,
        min_compatibility_version: Option<&str>,
        feature_gates: &[String],
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(s) = emulated_version {
            cfg.emulated_versions = parse_configuration_map(s)?;
        }
        if let Some(s) = min_compatibility_version {
            cfg.min_compatibility_versions = parse_configuration_map(s)?;
        }
        for fg in feature_gates {
            merge_feature_gates_flag(&mut cfg.feature_gates, fg)?;
        }
        Ok(cfg)
    }

    /// Overlay `other`: version entries replace, feature values append.
    pub fn merge(&mut self, other: ComponentGlobalsConfig) {
        self.emulated_versions.extend(other.emulated_versions);
        self.min_compatibility_versions.extend(other.min_compatibility_versions);
        for (component, values) in other.feature_gates {
            self.feature_gates.entry(component).or_default().extend(values);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emulated_versions.is_empty() && self.min_compatibility_versions.is_empty() && self.feature_gates.is_empty()
    }

    pub fn emulation_versions(&self) -> Result<BTreeMap<String, Version>, ConfigError> {
        parse_version_map(&self.emulated_versions)
    }

    pub fn min_compatibility_version_map(&self) -> Result<BTreeMap<String, Version>, ConfigError> {
        parse_version_map(&self.min_compatibility_versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulated_version_flag_cases() {
        let cases: Vec<(&str, Result<Version, &str>)> = vec![
            ("kube=1.30", Ok(Version::major_minor(1, 30))),
            ("kube=v1.30", Ok(Version::major_minor(1, 30))),
            ("kube=1.30.1", Err("version 1.30.1 is not in the format of major.minor")),
            ("kube=1.foo", Err("illegal version string")),
        ];
        for (flag, want) in cases {
            let got = parse_emulated_version_flag(flag);
            match want {
                Ok(v) => assert_eq!(got.unwrap()["kube"], v, "flag {}", flag),
                Err(msg) => {
                    let err = got.unwrap_err().to_string();
                    assert!(err.contains(msg), "flag {}: {}", flag, err);
                }
            }
        }
    }

    #[test]
    fn configuration_map_rejects_bare_values() {
        assert_eq!(parse_configuration_map("1.31").unwrap_err(), ConfigError::MalformedPair("1.31".into()));
        let m = parse_configuration_map(" kube=1.31 , wardle=1.2,").unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m["wardle"], "1.2");
    }

    #[test]
    fn feature_gates_flag_groups_by_component() {
        let m = parse_feature_gates_flag("wardle:A=true,B=false,kube:C=true,wardle:D=false").unwrap();
        assert_eq!(m["wardle"], vec!["A=true".to_string(), "D=false".to_string()]);
        assert_eq!(m[""], vec!["B=false".to_string()]);
        assert_eq!(m["kube"], vec!["C=true".to_string()]);
        assert!(parse_feature_gates_flag("wardle:A").is_err());
        assert!(parse_feature_gates_flag("a:b:C=true").is_err());
    }

    #[test]
    fn from_flags_and_merge() {
        let mut cfg = ComponentGlobalsConfig::from_flags(
            Some("kube=1.31"),
            None,
            &["A=true".to_string(), "wardle:B=false".to_string()],
        )
        .unwrap();
        assert_eq!(cfg.feature_gates[""], vec!["A=true".to_string()]);

        let file: ComponentGlobalsConfig =
            serde_json::from_str(r#"{"emulatedVersions":{"kube":"1.30","wardle":"1.2"},"featureGates":{"wardle":["C=true"]}}"#).unwrap();
        cfg.merge(file);
        assert_eq!(cfg.emulated_versions["kube"], "1.30");
        assert_eq!(cfg.feature_gates["wardle"], vec!["B=false".to_string(), "C=true".to_string()]);
        assert_eq!(cfg.emulation_versions().unwrap()["wardle"], Version::major_minor(1, 2));
        assert!(!cfg.is_empty());
    }
}
