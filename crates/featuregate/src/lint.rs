//! Checks over feature tables as they are declared, before any gate is built.
//!
//! Keys may carry a package qualifier (`generic.AdmissionWebhooks`); features
//! are compared case-insensitively on the name while qualified keys stay
//! grouped by qualifier.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LintError {
    #[error("features are not in alphabetic order, first out of place: {found} (expected {expected})")]
    NotAlphabetic { found: String, expected: String },
    #[error("new features added as unversioned specs: {0:?}; add new features as versioned specs only")]
    NewUnversioned(Vec<String>),
    #[error("duplicate feature keys: {0:?}")]
    Duplicates(Vec<String>),
}

fn sort_key(key: &str) -> String {
    let mut parts = key.split('.');
    match (parts.next(), parts.next()) {
        (Some(pkg), Some(name)) => format!("{}.{}", pkg, name.to_uppercase()),
        _ => key.to_uppercase(),
    }
}

/// Verify that `keys` starting with `prefix` appear in sorted order.
pub fn verify_alphabetic_order<S: AsRef<str>>(keys: &[S], prefix: &str) -> Result<(), LintError> {
    let got: Vec<(String, &str)> = keys
        .iter()
        .map(AsRef::as_ref)
        .filter(|k| k.starts_with(prefix))
        .map(|k| (sort_key(k), k))
        .collect();
    if got.len() < 2 {
        return Ok(());
    }
    let mut sorted = got.clone();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    match got.iter().zip(sorted.iter()).find(|(g, s)| g.0 != s.0) {
        None => Ok(()),
        Some((g, s)) => Err(LintError::NotAlphabetic { found: g.1.to_string(), expected: s.1.to_string() }),
    }
}

/// Unversioned keys in `new` that `old` did not have.
pub fn verify_no_new_unversioned<S: AsRef<str>>(old: &[S], new: &[S]) -> Result<(), LintError> {
    let known: BTreeSet<&str> = old.iter().map(AsRef::as_ref).collect();
    let added: Vec<String> = new.iter().map(AsRef::as_ref).filter(|k| !known.contains(k)).map(str::to_string).collect();
    if added.is_empty() {
        Ok(())
    } else {
        Err(LintError::NewUnversioned(added))
    }
}

/// Keys that appear more than once, sorted.
pub fn duplicate_keys<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for k in keys {
        *seen.entry(k.as_ref()).or_default() += 1;
    }
    seen.into_iter().filter(|(_, n)| *n > 1).map(|(k, _)| k.to_string()).collect()
}
