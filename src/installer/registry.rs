use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::InstallStrategy;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

/// Discriminator an install strategy is registered under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    /// A file suffix such as `.zip` or `.tar.gz` (stored lowercase).
    Suffix(String),
    /// A source directory.
    Directory,
    /// A caller-chosen tag, used with [`super::Installer::install_as`].
    Tag(String),
}

impl ArtifactKind {
    pub fn suffix(suffix: &str) -> Self {
        let suffix = suffix.to_lowercase();
        if suffix.starts_with('.') {
            ArtifactKind::Suffix(suffix)
        } else {
            ArtifactKind::Suffix(format!(".{}", suffix))
        }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        ArtifactKind::Tag(tag.into())
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Suffix(s) => f.write_str(s),
            ArtifactKind::Directory => f.write_str("directory"),
            ArtifactKind::Tag(t) => write!(f, "tag:{}", t),
        }
    }
}

/// Table of install strategies keyed by artifact kind.
#[derive(Clone, Default)]
pub struct InstallerRegistry {
    strategies: BTreeMap<ArtifactKind, Arc<dyn InstallStrategy>>,
}

impl InstallerRegistry {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with the built-in strategies registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        super::strategies::register_defaults(&mut registry);
        registry
    }

    /// Register `strategy` for `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: ArtifactKind,
        strategy: impl InstallStrategy + 'static,
    ) -> Option<Arc<dyn InstallStrategy>> {
        self.strategies.insert(kind, Arc::new(strategy))
    }

    pub fn unregister(&mut self, kind: &ArtifactKind) -> Option<Arc<dyn InstallStrategy>> {
        self.strategies.remove(kind)
    }

    pub fn resolve(&self, kind: &ArtifactKind) -> Result<Arc<dyn InstallStrategy>> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownArtifactKind {
                kind: kind.to_string(),
                path: Default::default(),
            })
    }

    /// Work out the kind of `path`: directories are [`ArtifactKind::Directory`],
    /// files take the longest registered suffix that matches, ignoring case.
    pub fn kind_for_path(&self, runtime: &dyn Runtime, path: &Path) -> Result<ArtifactKind> {
        if runtime.is_dir(path) {
            return Ok(ArtifactKind::Directory);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.strategies
            .keys()
            .filter_map(|kind| match kind {
                ArtifactKind::Suffix(suffix) if name.ends_with(suffix.as_str()) => Some(kind),
                _ => None,
            })
            .max_by_key(|kind| kind.to_string().len())
            .cloned()
            .ok_or_else(|| Error::UnknownArtifactKind {
                kind: path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| "(none)".to_string()),
                path: path.to_path_buf(),
            })
    }

    pub fn resolve_for_path(
        &self,
        runtime: &dyn Runtime,
        path: &Path,
    ) -> Result<Arc<dyn InstallStrategy>> {
        let kind = self.kind_for_path(runtime, path)?;
        self.resolve(&kind).map_err(|_| Error::UnknownArtifactKind {
            kind: kind.to_string(),
            path: path.to_path_buf(),
        })
    }
}

impl fmt::Debug for InstallerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.strategies.keys()).finish()
    }
}
