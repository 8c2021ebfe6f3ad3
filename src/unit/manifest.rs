use anyhow::{Context, Result, bail};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{NativeLoader, Unit, UnitCache, UnitManifest};
use crate::runtime::Runtime;

/// Suffix of a single-file unit.
pub const UNIT_SUFFIX: &str = ".unit";

/// Manifest file that marks a directory as a unit package.
pub const MANIFEST_FILE: &str = "unit.json";

/// Native loader for JSON unit documents.
pub struct ManifestLoader<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> ManifestLoader<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    fn read_manifest(&self, entry: &Path) -> Result<(UnitManifest, PathBuf)> {
        let file = if self.runtime.is_dir(entry) {
            entry.join(MANIFEST_FILE)
        } else {
            entry.to_path_buf()
        };
        let content = self.runtime.read_to_string(&file)?;
        let manifest: UnitManifest = serde_json::from_str(&content)
            .with_context(|| format!("Malformed unit document {:?}", file))?;
        if manifest.name.trim().is_empty() {
            bail!("Unit document {:?} has an empty name", file);
        }
        Ok((manifest, file))
    }

    /// Find a required unit under `search_root`.
    fn locate(&self, search_root: &Path, name: &str) -> Option<PathBuf> {
        let single = search_root.join(format!("{}{}", name, UNIT_SUFFIX));
        if self.runtime.exists(&single) {
            return Some(single);
        }
        let package = search_root.join(name).join(MANIFEST_FILE);
        if self.runtime.exists(&package) {
            return Some(package);
        }
        None
    }

    fn load_entry(
        &self,
        entry: &Path,
        search_root: &Path,
        cache: &UnitCache,
        chain: &mut Vec<String>,
    ) -> Result<Arc<Unit>> {
        let (manifest, origin) = self.read_manifest(entry)?;
        if chain.contains(&manifest.name) {
            bail!(
                "Circular requirement: {} -> {}",
                chain.join(" -> "),
                manifest.name
            );
        }
        chain.push(manifest.name.clone());

        let mut dependencies = Vec::with_capacity(manifest.requires.len());
        for required in &manifest.requires {
            if let Some(resident) = cache.get(required) {
                debug!("{} requires {} (already resident)", manifest.name, required);
                dependencies.push(resident);
                continue;
            }
            let path = self.locate(search_root, required).with_context(|| {
                format!(
                    "Unit {} requires {}, which is not under {:?}",
                    manifest.name, required, search_root
                )
            })?;
            debug!("{} requires {} from {:?}", manifest.name, required, path);
            dependencies.push(self.load_entry(&path, search_root, cache, chain)?);
        }
        chain.pop();

        let unit = Arc::new(Unit::new(manifest, origin, dependencies));
        cache.insert(unit.name().to_string(), Arc::clone(&unit));
        Ok(unit)
    }
}

impl<R: Runtime> NativeLoader for ManifestLoader<R> {
    #[tracing::instrument(skip(self, cache))]
    fn load(&self, entry: &Path, search_root: &Path, cache: &UnitCache) -> Result<Arc<Unit>> {
        let mut chain = Vec::new();
        self.load_entry(entry, search_root, cache, &mut chain)
    }
}
