//! Installs artifacts into `install_dir/<alias>/`.
//!
//! An alias directory is complete once its receipt file exists. Installing
//! an alias that has a receipt touches nothing. Anything else found at the
//! alias path is leftover from an interrupted install and is replaced.

mod registry;
pub mod strategies;

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::alias::Alias;
use crate::cleanup::CleanupGuard;
use crate::error::{Error, Result};
use crate::package::{InstalledArtifact, PackageSpec, Receipt};
use crate::runtime::{Runtime, path::relative_to};
use crate::tool::{InvokeOptions, ToolInvoker};

pub use registry::{ArtifactKind, InstallerRegistry};
pub use strategies::locate_entry;

/// Receipt file written into each completed alias directory.
pub const RECEIPT_FILE: &str = ".verimport-installed";

/// Everything a strategy needs for one install.
pub struct InstallContext<'a> {
    pub source: &'a Path,
    /// The alias directory; exists and is empty when the strategy runs.
    pub dest: &'a Path,
    pub spec: &'a PackageSpec,
    pub alias: &'a Alias,
    pub install_dependencies: bool,
    pub tool: &'a dyn ToolInvoker,
    pub tool_options: &'a InvokeOptions,
    pub runtime: &'a dyn Runtime,
}

/// Puts one kind of artifact into place and returns its entry path.
pub trait InstallStrategy: Send + Sync {
    fn install(&self, ctx: &InstallContext<'_>) -> anyhow::Result<PathBuf>;
}

impl<F> InstallStrategy for F
where
    F: Fn(&InstallContext<'_>) -> anyhow::Result<PathBuf> + Send + Sync,
{
    fn install(&self, ctx: &InstallContext<'_>) -> anyhow::Result<PathBuf> {
        self(ctx)
    }
}

pub struct Installer<R: Runtime> {
    runtime: Arc<R>,
    install_dir: PathBuf,
    registry: InstallerRegistry,
    tool: Arc<dyn ToolInvoker>,
    tool_options: InvokeOptions,
    install_dependencies: bool,
}

impl<R: Runtime + 'static> Installer<R> {
    pub fn new(runtime: Arc<R>, install_dir: impl Into<PathBuf>, tool: Arc<dyn ToolInvoker>) -> Self {
        Self {
            runtime,
            install_dir: install_dir.into(),
            registry: InstallerRegistry::with_defaults(),
            tool,
            tool_options: InvokeOptions::default(),
            install_dependencies: false,
        }
    }

    pub fn install_dependencies(mut self, enabled: bool) -> Self {
        self.install_dependencies = enabled;
        self
    }

    pub fn tool_options(mut self, options: InvokeOptions) -> Self {
        self.tool_options = options;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn registry(&self) -> &InstallerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut InstallerRegistry {
        &mut self.registry
    }

    pub fn alias_dir(&self, alias: &Alias) -> PathBuf {
        self.install_dir.join(alias.as_str())
    }

    /// Install `source` for `spec`, picking the strategy from the source path.
    #[tracing::instrument(skip(self))]
    pub fn install(&self, source: &Path, spec: &PackageSpec) -> Result<InstalledArtifact> {
        self.install_inner(source, spec, None)
    }

    /// Install `source` with the strategy registered for `kind`.
    #[tracing::instrument(skip(self))]
    pub fn install_as(
        &self,
        source: &Path,
        spec: &PackageSpec,
        kind: &ArtifactKind,
    ) -> Result<InstalledArtifact> {
        self.install_inner(source, spec, Some(kind))
    }

    fn install_inner(
        &self,
        source: &Path,
        spec: &PackageSpec,
        kind: Option<&ArtifactKind>,
    ) -> Result<InstalledArtifact> {
        let alias = spec.alias()?;
        let root = self.alias_dir(&alias);

        if let Some(receipt) = self.installed(&alias)? {
            if !spec.is_package(&receipt.name, &receipt.version) {
                warn!(
                    "{} is held by {} {}, refusing {} {}",
                    alias, receipt.name, receipt.version, spec.name, spec.version
                );
                return Err(Error::AliasCollision {
                    alias: alias.to_string(),
                    existing: root,
                });
            }
            debug!("{} already installed at {:?}", alias, root);
            return Ok(receipt.artifact(&root));
        }

        let runtime: &dyn Runtime = self.runtime.as_ref();
        let kind = match kind {
            Some(kind) => kind.clone(),
            None => self.registry.kind_for_path(runtime, source)?,
        };
        let strategy = self
            .registry
            .resolve(&kind)
            .map_err(|_| Error::UnknownArtifactKind {
                kind: kind.to_string(),
                path: source.to_path_buf(),
            })?;

        if runtime.exists(&root) {
            warn!("Removing incomplete install at {:?}", root);
            runtime
                .remove_dir_all(&root)
                .map_err(|e| Error::install(alias.as_str(), e))?;
        }
        runtime
            .create_dir_all(&root)
            .map_err(|e| Error::install(alias.as_str(), e))?;
        let guard = CleanupGuard::new(runtime, &root);

        info!("Installing {} ({}) from {:?}", alias, kind, source);
        let ctx = InstallContext {
            source,
            dest: &root,
            spec,
            alias: &alias,
            install_dependencies: self.install_dependencies,
            tool: self.tool.as_ref(),
            tool_options: &self.tool_options,
            runtime,
        };
        let entry = strategy
            .install(&ctx)
            .map_err(|e| classify(alias.as_str(), e))?;

        let receipt = Receipt {
            alias: alias.clone(),
            name: spec.name.clone(),
            version: spec.version.clone(),
            kind: kind.to_string(),
            source: source.to_path_buf(),
            entry: relative_to(&root, &entry).ok_or_else(|| {
                Error::install(
                    alias.as_str(),
                    anyhow::anyhow!("entry {:?} is outside {:?}", entry, root),
                )
            })?,
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        self.write_receipt(&root, &receipt)
            .map_err(|e| Error::install(alias.as_str(), e))?;

        guard.success();
        info!("Installed {} at {:?}", alias, root);
        Ok(receipt.artifact(&root))
    }

    fn write_receipt(&self, root: &Path, receipt: &Receipt) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(receipt)?;
        let tmp = root.join(format!("{}.tmp", RECEIPT_FILE));
        self.runtime.write(&tmp, &json)?;
        self.runtime.rename(&tmp, &root.join(RECEIPT_FILE))?;
        Ok(())
    }

    /// The receipt of `alias`, if it is completely installed.
    ///
    /// An unreadable receipt counts as not installed.
    pub fn installed(&self, alias: &Alias) -> Result<Option<Receipt>> {
        let path = self.alias_dir(alias).join(RECEIPT_FILE);
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        let content = self
            .runtime
            .read_to_string(&path)
            .map_err(|e| Error::install(alias.as_str(), e))?;
        match serde_json::from_str(&content) {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) => {
                warn!("Ignoring damaged receipt {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Receipts of every completed install, sorted by alias.
    pub fn list_installed(&self) -> Result<Vec<Receipt>> {
        if !self.runtime.exists(&self.install_dir) {
            return Ok(Vec::new());
        }
        let mut receipts = Vec::new();
        for dir in self
            .runtime
            .read_dir(&self.install_dir)
            .map_err(std::io::Error::other)?
        {
            let Some(name) = dir.file_name() else {
                continue;
            };
            let path = dir.join(RECEIPT_FILE);
            if !self.runtime.is_dir(&dir) || !self.runtime.exists(&path) {
                continue;
            }
            match self
                .runtime
                .read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<Receipt>(&c).ok())
            {
                Some(receipt) => receipts.push(receipt),
                None => warn!("Skipping {:?}: damaged receipt", name),
            }
        }
        receipts.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(receipts)
    }

    /// Remove the alias directory.
    #[tracing::instrument(skip(self))]
    pub fn uninstall(&self, alias: &Alias) -> Result<()> {
        let root = self.alias_dir(alias);
        if !self.runtime.exists(&root) {
            return Err(Error::NotInstalled(alias.to_string()));
        }
        self.runtime
            .remove_dir_all(&root)
            .map_err(std::io::Error::other)?;
        info!("Removed {:?}", root);
        Ok(())
    }
}

/// Keep typed tool failures as they are; everything else is an install
/// failure of `alias`.
fn classify(alias: &str, e: anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(typed) if typed.is_tool_failure() => typed,
        Ok(typed) => Error::InstallFailure {
            alias: alias.to_string(),
            source: Box::new(typed),
        },
        Err(e) => Error::install(alias, e),
    }
}
