//! Record of loaded units, keyed by import key.
//!
//! The registry is the only writer of version-qualified keys into the
//! [`UnitCache`]. A package's entry is cached under its alias and a file
//! loaded through a sub path under the alias extended by that path, so both
//! can be resident at once. The registry also remembers which bare names a
//! load pulled in as a side effect so they can be purged afterwards;
//! otherwise the next import of another version would find `custom` already
//! resident and reuse it.

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alias::Alias;
use crate::error::{Error, Result};
use crate::package::PackageSpec;
use crate::unit::{NativeLoader, Unit, UnitCache};

/// Lifecycle of one import key inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Unloaded,
    Loading,
    Loaded,
    Evicted,
}

#[derive(Debug, Clone)]
pub struct RegistryRecord {
    /// Cache key of the unit: the alias, or the alias plus the sub path.
    pub key: String,
    pub alias: Alias,
    pub name: String,
    pub version: String,
    pub unit: Arc<Unit>,
    pub entry_path: PathBuf,
    /// Cache keys the native load added or replaced, the key excluded.
    pub incidental_aliases: BTreeSet<String>,
}

pub struct ModuleRegistry {
    cache: UnitCache,
    loader: Arc<dyn NativeLoader>,
    records: BTreeMap<String, RegistryRecord>,
    states: BTreeMap<String, UnitState>,
}

impl ModuleRegistry {
    pub fn new(cache: UnitCache, loader: Arc<dyn NativeLoader>) -> Self {
        Self {
            cache,
            loader,
            records: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    pub fn cache(&self) -> &UnitCache {
        &self.cache
    }

    /// Load `entry_path` for `spec` and bind the result to its import key.
    ///
    /// Fails with [`Error::AliasCollision`] when the alias already belongs
    /// to another package, or when the key is bound to another file. A key
    /// that is already loaded from `entry_path` returns the resident unit.
    /// A failed load leaves the cache as it was.
    #[tracing::instrument(skip(self))]
    pub fn load(
        &mut self,
        spec: &PackageSpec,
        entry_path: &Path,
        search_root: &Path,
    ) -> Result<Arc<Unit>> {
        let alias = spec.alias()?;
        let key = spec.import_key()?;
        self.check_claim(spec, &alias)?;
        if let Some(record) = self.records.get(&key) {
            if record.entry_path == entry_path {
                return Ok(Arc::clone(&record.unit));
            }
            return Err(Error::AliasCollision {
                alias: key,
                existing: record.entry_path.clone(),
            });
        }

        self.states.insert(key.clone(), UnitState::Loading);
        let before = self.cache.snapshot();

        let unit = match self.loader.load(entry_path, search_root, &self.cache) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Loading {} from {:?} failed, restoring cache", key, entry_path);
                self.cache.restore(before);
                self.states.insert(key.clone(), UnitState::Unloaded);
                return Err(Error::load(&key, entry_path, e));
            }
        };

        let incidental_aliases: BTreeSet<String> = self
            .cache
            .snapshot()
            .into_iter()
            .filter(|(cached, after)| {
                *cached != key
                    && before
                        .get(cached)
                        .is_none_or(|previous| !Arc::ptr_eq(previous, after))
            })
            .map(|(cached, _)| cached)
            .collect();
        debug!("{} loaded with incidental entries {:?}", key, incidental_aliases);

        self.cache.insert(&key, Arc::clone(&unit));
        self.records.insert(
            key.clone(),
            RegistryRecord {
                key: key.clone(),
                alias,
                name: spec.name.clone(),
                version: spec.version.clone(),
                unit: Arc::clone(&unit),
                entry_path: entry_path.to_path_buf(),
                incidental_aliases,
            },
        );
        self.states.insert(key, UnitState::Loaded);
        Ok(unit)
    }

    /// The unit already loaded for `spec`, if any.
    ///
    /// Fails like [`load`](Self::load) when the alias belongs to another
    /// package.
    pub fn resident(&self, spec: &PackageSpec) -> Result<Option<Arc<Unit>>> {
        self.check_claim(spec, &spec.alias()?)?;
        Ok(self.get(&spec.import_key()?))
    }

    fn check_claim(&self, spec: &PackageSpec, alias: &Alias) -> Result<()> {
        let holder = self
            .records
            .values()
            .find(|r| &r.alias == alias && !spec.is_package(&r.name, &r.version));
        match holder {
            Some(record) => {
                warn!(
                    "{} is held by {} {}, refusing {} {}",
                    alias, record.name, record.version, spec.name, spec.version
                );
                Err(Error::AliasCollision {
                    alias: alias.to_string(),
                    existing: record.entry_path.clone(),
                })
            }
            None => Ok(()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Unit>> {
        self.records.get(key).map(|r| Arc::clone(&r.unit))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn record(&self, key: &str) -> Option<&RegistryRecord> {
        self.records.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Aliases with at least one loaded key.
    pub fn aliases(&self) -> BTreeSet<&Alias> {
        self.records.values().map(|r| &r.alias).collect()
    }

    /// Find the record a unit was bound by.
    pub fn record_of(&self, unit: &Arc<Unit>) -> Option<&RegistryRecord> {
        self.records.values().find(|r| Arc::ptr_eq(&r.unit, unit))
    }

    pub fn alias_of(&self, unit: &Arc<Unit>) -> Option<&Alias> {
        self.record_of(unit).map(|r| &r.alias)
    }

    pub fn state(&self, key: &str) -> UnitState {
        self.states.get(key).copied().unwrap_or(UnitState::Unloaded)
    }

    /// Drop the side-effect entries of `key`'s load from the cache.
    ///
    /// Keys of other records are kept. Returns the removed keys.
    #[tracing::instrument(skip(self))]
    pub fn reset_incidental(&mut self, key: &str) -> Result<Vec<String>> {
        let record = self
            .records
            .get(key)
            .ok_or_else(|| Error::NotInstalled(key.to_string()))?;

        let mut removed = Vec::new();
        for cached in &record.incidental_aliases {
            if self.records.contains_key(cached) {
                continue;
            }
            if self.cache.remove(cached).is_some() {
                removed.push(cached.clone());
            }
        }
        if !removed.is_empty() {
            debug!("Reset {}: removed {:?}", key, removed);
        }
        if let Some(record) = self.records.get_mut(key) {
            record.incidental_aliases.retain(|k| !removed.contains(k));
        }
        Ok(removed)
    }

    /// Forget every key of `alias` and remove them from the cache.
    #[tracing::instrument(skip(self))]
    pub fn evict(&mut self, alias: &Alias) -> Result<Vec<RegistryRecord>> {
        let keys: Vec<String> = self
            .records
            .values()
            .filter(|r| &r.alias == alias)
            .map(|r| r.key.clone())
            .collect();
        if keys.is_empty() {
            return Err(Error::NotInstalled(alias.to_string()));
        }

        let mut evicted = Vec::new();
        for key in keys {
            if let Some(record) = self.records.remove(&key) {
                self.cache.remove(&key);
                self.states.insert(key, UnitState::Evicted);
                evicted.push(record);
            }
        }
        Ok(evicted)
    }

    /// Evict every record.
    pub fn clear(&mut self) {
        let aliases: Vec<Alias> = self.aliases().into_iter().cloned().collect();
        for alias in aliases {
            let _ = self.evict(&alias);
        }
    }
}
