//! Version-qualified aliases.
//!
//! An alias joins a package name and a version into one identifier that is
//! safe both as a directory name under the install root and as a key in the
//! loaded-unit cache: `custom` at `1.0.0` becomes `custom_1_0_0`.
//!
//! Distinct `(name, version)` pairs are expected to produce distinct aliases,
//! but nothing here enforces it (`a.b` and `a_b` collide). The installer and
//! the module registry both reject a second package claiming an alias that
//! is already taken.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Version used when none is requested or none can be parsed.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// Artifact file suffixes stripped before parsing a name and version.
const KNOWN_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar", ".zip", ".dist", ".unit"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alias(String);

impl Alias {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split an alias back into a name and a dotted version.
    ///
    /// The version starts at the first all-digit segment after the name:
    /// `custom_1_0_0` gives `("custom", Some("1.0.0"))`. An alias without such
    /// a segment is returned whole with no version.
    pub fn split(&self) -> (String, Option<String>) {
        let segments: Vec<&str> = self.0.split('_').collect();
        let start = segments
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .map(|(i, _)| i);

        match start {
            Some(i) => (segments[..i].join("_"), Some(segments[i..].join("."))),
            None => (self.0.clone(), None),
        }
    }

    /// Cache key for a file loaded from inside this alias' install.
    ///
    /// Each component of `sub_path` is sanitized and appended after a dot,
    /// the last one without its extension: `pkg_1_0` with `pkg/extra.unit`
    /// gives `pkg_1_0.pkg.extra`. A path that could leave the install root
    /// is rejected.
    pub fn child_key(&self, sub_path: &Path) -> Result<String> {
        let mut parts = Vec::new();
        for component in sub_path.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => parts.push(Path::new(part)),
                _ => {
                    return Err(Error::InvalidSpec(format!(
                        "sub path {:?} must stay inside the install of {}",
                        sub_path, self
                    )));
                }
            }
        }
        let Some((last, parents)) = parts.split_last() else {
            return Ok(self.0.clone());
        };

        let mut key = self.0.clone();
        for part in parents {
            key.push('.');
            key.push_str(&sanitize_fragment(&part.to_string_lossy()));
        }
        let stem = last.file_stem().unwrap_or(last.as_os_str());
        key.push('.');
        key.push_str(&sanitize_fragment(&stem.to_string_lossy()));
        Ok(key)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Alias {
    type Err = Error;

    /// Accept an already-sanitized alias as typed by a user.
    fn from_str(s: &str) -> Result<Self> {
        let valid = !s.trim_matches('_').is_empty()
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::InvalidSpec(format!("'{}' is not an alias", s)));
        }
        Ok(Alias(s.to_string()))
    }
}

impl AsRef<str> for Alias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn sanitize_fragment(fragment: &str) -> String {
    fragment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the alias for `name` at `version`.
///
/// Characters outside `[A-Za-z0-9_]` become `_`. A missing or blank version
/// becomes [`DEFAULT_VERSION`]. Fails when nothing identifying is left of the
/// name.
pub fn sanitize(name: &str, version: Option<&str>) -> Result<Alias> {
    let name = sanitize_fragment(name.trim());
    if name.trim_matches('_').is_empty() {
        return Err(Error::InvalidSpec(format!(
            "package name '{}' has no identifier characters",
            name
        )));
    }

    let version = version
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_VERSION);

    Ok(Alias(format!("{}_{}", name, sanitize_fragment(version))))
}

/// Parse a package name and optional version from an artifact file name.
///
/// `custom-1.0.0.zip` gives `("custom", Some("1.0.0"))`,
/// `custom-1.0.0-linux.dist` gives `("custom", Some("1.0.0"))` and
/// `custom.unit` gives `("custom", None)`.
pub fn name_version_from_path(path: &Path) -> (String, Option<String>) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let lower = file_name.to_lowercase();
    let stem = KNOWN_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &file_name[..file_name.len() - suffix.len()])
        .unwrap_or(&file_name);

    let parts: Vec<&str> = stem.split('-').collect();
    let version_at = parts
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, p)| p.starts_with(|c: char| c.is_ascii_digit()))
        .map(|(i, _)| i);

    match version_at {
        Some(i) => (parts[..i].join("-"), Some(parts[i].to_string())),
        None => (stem.to_string(), None),
    }
}
