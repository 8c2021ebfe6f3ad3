use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Unit;

/// Process-wide table of resident units keyed by alias or bare name.
///
/// Cloning yields another handle to the same table. Tests create a fresh
/// cache per case instead of sharing ambient state.
#[derive(Clone, Default)]
pub struct UnitCache {
    inner: Arc<Mutex<BTreeMap<String, Arc<Unit>>>>,
}

impl UnitCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Unit>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Unit>> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Insert a unit, returning the one previously stored under `key`.
    pub fn insert(&self, key: impl Into<String>, unit: Arc<Unit>) -> Option<Arc<Unit>> {
        self.lock().insert(key.into(), unit)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Unit>> {
        self.lock().remove(key)
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current table (units are shared, not cloned).
    pub fn snapshot(&self) -> BTreeMap<String, Arc<Unit>> {
        self.lock().clone()
    }

    /// Replace the table with a previous snapshot.
    pub fn restore(&self, snapshot: BTreeMap<String, Arc<Unit>>) {
        *self.lock() = snapshot;
    }
}

impl std::fmt::Debug for UnitCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}
