//! Package requests and installed artifacts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::alias::{self, Alias, DEFAULT_VERSION};
use crate::error::Result;

/// What the caller asked for: a package name, a version, and optionally a
/// path inside the installed artifact to load instead of its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    pub sub_path: Option<PathBuf>,
}

impl PackageSpec {
    /// Create a spec; a missing or blank version becomes [`DEFAULT_VERSION`].
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        let version = version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VERSION);
        Self {
            name: name.into(),
            version: version.to_string(),
            sub_path: None,
        }
    }

    /// Set the path to load relative to the installed root.
    pub fn sub_path(mut self, sub_path: impl Into<PathBuf>) -> Self {
        self.sub_path = Some(sub_path.into());
        self
    }

    /// Derive name and version from an artifact file name; an explicit
    /// version wins over the parsed one.
    pub fn from_path(path: &Path, version: Option<&str>) -> Self {
        let (name, parsed) = alias::name_version_from_path(path);
        let version = version
            .filter(|v| !v.trim().is_empty())
            .or(parsed.as_deref());
        Self::new(name, version)
    }

    pub fn alias(&self) -> Result<Alias> {
        alias::sanitize(&self.name, Some(&self.version))
    }

    /// Key the loaded unit is cached under: the alias itself, or the alias
    /// extended by the sub path when one is set.
    pub fn import_key(&self) -> Result<String> {
        let alias = self.alias()?;
        match &self.sub_path {
            Some(sub_path) => alias.child_key(sub_path),
            None => Ok(alias.to_string()),
        }
    }

    /// True if `name` and `version` are the package this spec asks for.
    pub fn is_package(&self, name: &str, version: &str) -> bool {
        self.name == name && self.version == version
    }
}

/// An artifact installed under `install_dir/<alias>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub alias: Alias,
    /// The per-alias directory.
    pub root_path: PathBuf,
    /// The file the native loader is pointed at.
    pub entry_path: PathBuf,
}

/// Install marker written once an install completed.
///
/// Its presence is what makes a later install of the same alias a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub alias: Alias,
    pub name: String,
    pub version: String,
    pub kind: String,
    pub source: PathBuf,
    /// Entry path relative to the alias directory.
    pub entry: PathBuf,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
}

impl Receipt {
    pub fn artifact(&self, root_path: &Path) -> InstalledArtifact {
        InstalledArtifact {
            alias: self.alias.clone(),
            root_path: root_path.to_path_buf(),
            entry_path: root_path.join(&self.entry),
        }
    }
}
