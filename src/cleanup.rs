use log::debug;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// RAII guard that removes a partially written path unless the operation
/// that created it reports success.
pub struct CleanupGuard<'a> {
    runtime: &'a dyn Runtime,
    path: PathBuf,
    armed: bool,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(runtime: &'a dyn Runtime, path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the operation as successful, keeping the path.
    pub fn success(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.runtime.exists(&self.path) {
            return;
        }
        debug!("Cleaning up: {:?}", self.path);
        let result = if self.runtime.is_dir(&self.path) {
            self.runtime.remove_dir_all(&self.path)
        } else {
            self.runtime.remove_file(&self.path)
        };
        if let Err(e) = result {
            debug!("Cleanup of {:?} failed: {}", self.path, e);
        }
    }
}
