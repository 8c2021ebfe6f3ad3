//! Loaded units and the native loader seam.
//!
//! A unit is described by a JSON document (`*.unit` file, or `unit.json`
//! inside a unit package directory):
//!
//! ```json
//! { "name": "custom", "version": "1.0.0",
//!   "requires": ["helper"], "exports": { "run_custom": "hello custom1" } }
//! ```
//!
//! Loading a unit pulls its `requires` into the shared [`UnitCache`] under
//! their bare names, the same way a host runtime fills its global module
//! table. The registry watches those side effects.

mod cache;
mod manifest;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

pub use cache::UnitCache;
pub use manifest::{MANIFEST_FILE, ManifestLoader, UNIT_SUFFIX};

/// The JSON description of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

/// A unit resident in memory.
#[derive(Debug)]
pub struct Unit {
    manifest: UnitManifest,
    origin: PathBuf,
    dependencies: Vec<Arc<Unit>>,
}

impl Unit {
    pub fn new(manifest: UnitManifest, origin: PathBuf, dependencies: Vec<Arc<Unit>>) -> Self {
        Self {
            manifest,
            origin,
            dependencies,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> Option<&str> {
        self.manifest.version.as_deref()
    }

    /// File the unit was loaded from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn manifest(&self) -> &UnitManifest {
        &self.manifest
    }

    pub fn dependencies(&self) -> &[Arc<Unit>] {
        &self.dependencies
    }

    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.manifest.exports.keys().map(String::as_str)
    }

    /// Invoke an export.
    pub fn call(&self, export: &str) -> Result<&str> {
        self.manifest
            .exports
            .get(export)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingExport {
                unit: self.manifest.name.clone(),
                export: export.to_string(),
            })
    }
}

/// Turns an installed entry file into a resident unit.
///
/// Implementations insert every unit they load (the entry itself included)
/// into `cache` under its bare name, and resolve the entry's requirements
/// against `cache` first and `search_root` second.
#[cfg_attr(test, mockall::automock)]
pub trait NativeLoader: Send + Sync {
    fn load(
        &self,
        entry: &Path,
        search_root: &Path,
        cache: &UnitCache,
    ) -> anyhow::Result<Arc<Unit>>;
}
