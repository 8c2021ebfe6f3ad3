//! Version-aware import front end.
//!
//! [`VersionedLoader`] turns "give me `custom` at `1.0.0`" into a resident
//! unit bound to `custom_1_0_0`, installing the artifact first when no
//! completed install exists. Artifacts are looked up in an import
//! directory, or given directly as a path.

use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alias::{self, Alias};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::installer::{Installer, RECEIPT_FILE};
use crate::package::{InstalledArtifact, PackageSpec};
use crate::registry::ModuleRegistry;
use crate::runtime::{Runtime, path::join_under};
use crate::tool::{InvokeOptions, build_invoker};
use crate::unit::{MANIFEST_FILE, ManifestLoader, Unit, UnitCache};
use crate::version::VersionResolver;

/// An importable artifact found in the import directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableModule {
    pub name: String,
    pub version: String,
    pub alias: Alias,
    pub path: PathBuf,
}

/// Where an import gets its content from.
enum Origin {
    /// An artifact still to be installed.
    Source(PathBuf),
    /// A completed install found by its receipt.
    Installed(InstalledArtifact),
}

pub struct VersionedLoader<R: Runtime> {
    runtime: Arc<R>,
    installer: Installer<R>,
    registry: ModuleRegistry,
    import_dir: PathBuf,
    reset_modules: bool,
}

impl<R: Runtime + 'static> VersionedLoader<R> {
    pub fn new(runtime: Arc<R>, installer: Installer<R>, registry: ModuleRegistry) -> Self {
        Self {
            runtime,
            installer,
            registry,
            import_dir: PathBuf::from("."),
            reset_modules: false,
        }
    }

    /// Wire a loader from configuration: the configured tool invoker, the
    /// manifest loader, and `cache` as the shared unit table.
    pub fn from_config(runtime: Arc<R>, config: &Config, cache: UnitCache) -> Result<Self> {
        let tool = build_invoker(&config.tool, Arc::clone(&runtime) as Arc<dyn Runtime>)?;
        let installer = Installer::new(
            Arc::clone(&runtime),
            config.install_dir(runtime.as_ref()),
            tool,
        )
        .install_dependencies(config.install_dependencies)
        .tool_options(InvokeOptions {
            timeout: Some(config.tool.timeout()),
            env: Vec::new(),
        });
        let registry = ModuleRegistry::new(cache, Arc::new(ManifestLoader::new(Arc::clone(&runtime))));

        Ok(Self::new(runtime, installer, registry)
            .import_dir(config.import_dir())
            .reset_modules(config.reset_modules))
    }

    pub fn import_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.import_dir = dir.into();
        self
    }

    /// Purge the bare-name cache entries each import adds.
    pub fn reset_modules(mut self, enabled: bool) -> Self {
        self.reset_modules = enabled;
        self
    }

    pub fn installer(&self) -> &Installer<R> {
        &self.installer
    }

    pub fn installer_mut(&mut self) -> &mut Installer<R> {
        &mut self.installer
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Import a package by artifact path or by name.
    ///
    /// A path that exists is installed from directly, its name and version
    /// parsed from the file name unless `version` is given. A bare name is
    /// looked up in the import directory, then among completed installs,
    /// the newest version winning when `version` is `None`. `sub_path`
    /// loads a file inside the installed root instead of the entry.
    #[tracing::instrument(skip(self))]
    pub fn import(
        &mut self,
        source_or_name: &str,
        version: Option<&str>,
        sub_path: Option<&Path>,
    ) -> Result<Arc<Unit>> {
        let (origin, mut spec) = self.resolve(source_or_name, version)?;
        if let Some(sub_path) = sub_path {
            spec = spec.sub_path(sub_path);
        }
        self.import_resolved(origin, &spec)
    }

    fn resolve(&self, source_or_name: &str, version: Option<&str>) -> Result<(Origin, PackageSpec)> {
        let path = Path::new(source_or_name);
        if self.runtime.exists(path) {
            let spec = PackageSpec::from_path(path, version);
            return Ok((Origin::Source(path.to_path_buf()), spec));
        }

        if let Some(found) = self.find(source_or_name, version)? {
            debug!("Found {} at {:?}", found.alias, found.path);
            let spec = PackageSpec::new(found.name, Some(&found.version));
            return Ok((Origin::Source(found.path), spec));
        }

        let mut receipts: Vec<_> = self
            .installer
            .list_installed()?
            .into_iter()
            .filter(|r| r.name == source_or_name || r.alias.as_str() == source_or_name)
            .filter(|r| version.is_none_or(|v| VersionResolver::versions_match(&r.version, v)))
            .collect();
        VersionResolver::sort_newest_first(&mut receipts, |r| r.version.as_str());
        match receipts.into_iter().next() {
            Some(receipt) => {
                let spec = PackageSpec::new(receipt.name.clone(), Some(&receipt.version));
                let root = self.installer.alias_dir(&receipt.alias);
                Ok((Origin::Installed(receipt.artifact(&root)), spec))
            }
            None => Err(Error::NotFound(match version {
                Some(v) => format!("{} {}", source_or_name, v),
                None => source_or_name.to_string(),
            })),
        }
    }

    fn import_resolved(&mut self, origin: Origin, spec: &PackageSpec) -> Result<Arc<Unit>> {
        let key = spec.import_key()?;
        if let Some(unit) = self.registry.resident(spec)? {
            debug!("{} is already loaded", key);
            return Ok(unit);
        }

        let artifact = match origin {
            Origin::Source(source) => self.installer.install(&source, spec)?,
            Origin::Installed(artifact) => artifact,
        };
        let entry = match &spec.sub_path {
            Some(sub_path) => entry_under(&artifact.root_path, sub_path)?,
            None => artifact.entry_path.clone(),
        };

        let unit = self.registry.load(spec, &entry, &artifact.root_path)?;
        if self.reset_modules {
            self.registry.reset_incidental(&key)?;
        }
        info!("Imported {} from {:?}", key, entry);
        Ok(unit)
    }

    /// Evict `alias` and delete its install directory.
    #[tracing::instrument(skip(self))]
    pub fn delete_installed(&mut self, alias: &Alias) -> Result<()> {
        let evicted = self.registry.evict(alias).is_ok();
        match self.installer.uninstall(alias) {
            Err(Error::NotInstalled(_)) if evicted => Ok(()),
            other => other,
        }
    }

    /// Delete whatever `unit` was imported as.
    pub fn delete_unit(&mut self, unit: &Arc<Unit>) -> Result<()> {
        let alias = self
            .registry
            .alias_of(unit)
            .cloned()
            .ok_or_else(|| Error::NotInstalled(unit.name().to_string()))?;
        self.delete_installed(&alias)
    }

    /// Artifacts in the import directory, sorted by alias.
    pub fn available(&self) -> Result<Vec<AvailableModule>> {
        if !self.runtime.is_dir(&self.import_dir) {
            return Ok(Vec::new());
        }
        let items = self
            .runtime
            .read_dir(&self.import_dir)
            .map_err(std::io::Error::other)?;

        let mut modules = Vec::new();
        for path in items {
            if !self.is_importable(&path) {
                continue;
            }
            let (name, version) = alias::name_version_from_path(&path);
            let version = version.unwrap_or_else(|| alias::DEFAULT_VERSION.to_string());
            let Ok(alias) = alias::sanitize(&name, Some(&version)) else {
                debug!("Skipping {:?}: no usable name", path);
                continue;
            };
            modules.push(AvailableModule {
                name,
                version,
                alias,
                path,
            });
        }
        modules.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(modules)
    }

    fn is_importable(&self, path: &Path) -> bool {
        if self.runtime.is_dir(path) {
            return self.runtime.exists(&path.join(MANIFEST_FILE));
        }
        let kind = self.installer.registry().kind_for_path(self.runtime.as_ref(), path);
        kind.is_ok_and(|k| self.installer.registry().resolve(&k).is_ok())
    }

    /// Look a module up in the import directory by alias, file name, or
    /// name and version. Without a version the newest one wins.
    pub fn find(&self, name: &str, version: Option<&str>) -> Result<Option<AvailableModule>> {
        let available = self.available()?;

        let exact = available.iter().find(|m| {
            m.alias.as_str() == name
                || m.path.file_name().is_some_and(|f| f == name)
                || (m.name == name
                    && version.is_some_and(|v| VersionResolver::versions_match(&m.version, v)))
        });
        if let Some(found) = exact {
            return Ok(Some(found.clone()));
        }
        if version.is_some() {
            return Ok(None);
        }

        let named: Vec<_> = available.into_iter().filter(|m| m.name == name).collect();
        Ok(VersionResolver::newest(&named, |m| m.version.as_str()).cloned())
    }

    /// Forget every record and delete the whole install directory.
    #[tracing::instrument(skip(self))]
    pub fn cleanup(&mut self) -> Result<()> {
        self.registry.clear();
        let dir = self.installer.install_dir();
        if self.runtime.exists(dir) {
            self.runtime
                .remove_dir_all(dir)
                .map_err(std::io::Error::other)?;
            info!("Removed {:?}", dir);
        }
        Ok(())
    }

    /// True if `alias` has a completed install.
    pub fn is_installed(&self, alias: &Alias) -> bool {
        self.runtime
            .exists(&self.installer.alias_dir(alias).join(RECEIPT_FILE))
    }
}

fn entry_under(root: &Path, sub_path: &Path) -> Result<PathBuf> {
    join_under(root, sub_path).ok_or_else(|| {
        Error::InvalidSpec(format!(
            "sub path {:?} leaves the install root {:?}",
            sub_path, root
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_archives;
    use crate::runtime::RealRuntime;
    use crate::tool::MockToolInvoker;
    use std::fs;
    use tempfile::{TempDir, tempdir};
    use test_log::test;

    struct Fixture {
        dir: TempDir,
        cache: UnitCache,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            fs::create_dir(dir.path().join("import")).unwrap();
            Self {
                dir,
                cache: UnitCache::new(),
            }
        }

        fn import_dir(&self) -> PathBuf {
            self.dir.path().join("import")
        }

        fn install_dir(&self) -> PathBuf {
            self.dir.path().join("installed")
        }

        fn loader(&self, reset_modules: bool) -> VersionedLoader<RealRuntime> {
            let runtime = Arc::new(RealRuntime);
            let installer = Installer::new(
                Arc::clone(&runtime),
                self.install_dir(),
                Arc::new(MockToolInvoker::new()),
            );
            let registry = ModuleRegistry::new(
                self.cache.clone(),
                Arc::new(ManifestLoader::new(Arc::clone(&runtime))),
            );
            VersionedLoader::new(runtime, installer, registry)
                .import_dir(self.import_dir())
                .reset_modules(reset_modules)
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            path
        }
    }

    fn unit_json(name: &str, requires: &[&str], export: &str, value: &str) -> String {
        serde_json::json!({
            "name": name,
            "requires": requires,
            "exports": { export: value },
        })
        .to_string()
    }

    #[test]
    fn test_import_path_with_explicit_version() {
        let fx = Fixture::new();
        let source = fx.write(
            "custom.unit",
            &unit_json("custom", &[], "run_custom", "hello custom1"),
        );
        let mut loader = fx.loader(false);

        let unit = loader
            .import(source.to_str().unwrap(), Some("1.0.0"), None)
            .unwrap();

        assert_eq!(unit.call("run_custom").unwrap(), "hello custom1");
        assert!(fx.install_dir().join("custom_1_0_0/custom.unit").exists());
        assert!(fx.cache.contains("custom_1_0_0"));
        assert!(loader.is_installed(&alias::sanitize("custom", Some("1.0.0")).unwrap()));
    }

    #[test]
    fn test_versions_coexist() {
        let fx = Fixture::new();
        let v1 = fx.write("v1/custom.unit", &unit_json("custom", &[], "run_custom", "hello custom1"));
        let v0 = fx.write("v0/custom.unit", &unit_json("custom", &[], "run_custom", "hello custom0"));
        let mut loader = fx.loader(true);

        let new = loader.import(v1.to_str().unwrap(), Some("1.0.0"), None).unwrap();
        let old = loader.import(v0.to_str().unwrap(), None, None).unwrap();

        assert!(!Arc::ptr_eq(&new, &old));
        assert_eq!(new.call("run_custom").unwrap(), "hello custom1");
        assert_eq!(old.call("run_custom").unwrap(), "hello custom0");
        assert!(fx.cache.contains("custom_1_0_0"));
        assert!(fx.cache.contains("custom_0_0_0"));
    }

    #[test]
    fn test_second_import_returns_resident_unit() {
        let fx = Fixture::new();
        let source = fx.write("custom.unit", &unit_json("custom", &[], "run", "x"));
        let mut loader = fx.loader(false);

        let first = loader.import(source.to_str().unwrap(), Some("2.0"), None).unwrap();
        let second = loader.import(source.to_str().unwrap(), Some("2.0"), None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    /// Two versions of `custom` that each ship their own `helper`.
    fn two_versions_with_helper(fx: &Fixture) -> (PathBuf, PathBuf) {
        let mut paths = Vec::new();
        for (version, tag) in [("1.0.0", "a"), ("2.0.0", "b")] {
            let path = fx.dir.path().join(format!("custom-{}.zip", version));
            let custom = unit_json("custom", &["helper"], "run", tag);
            let helper = unit_json("helper", &[], "help", &format!("helper {}", tag));
            test_archives::zip(
                &path,
                &[("custom.unit", custom.as_str()), ("helper.unit", helper.as_str())],
            )
            .unwrap();
            paths.push(path);
        }
        let b = paths.pop().unwrap();
        let a = paths.pop().unwrap();
        (a, b)
    }

    #[test]
    fn test_reset_purges_incidental_entries() {
        let fx = Fixture::new();
        let (a, b) = two_versions_with_helper(&fx);
        let mut loader = fx.loader(true);

        let first = loader.import(a.to_str().unwrap(), None, None).unwrap();
        assert!(!fx.cache.contains("helper"));
        assert!(!fx.cache.contains("custom"));

        let second = loader.import(b.to_str().unwrap(), None, None).unwrap();
        assert_eq!(first.dependencies()[0].call("help").unwrap(), "helper a");
        assert_eq!(second.dependencies()[0].call("help").unwrap(), "helper b");
    }

    #[test]
    fn test_without_reset_dependencies_leak_between_versions() {
        let fx = Fixture::new();
        let (a, b) = two_versions_with_helper(&fx);
        let mut loader = fx.loader(false);

        let first = loader.import(a.to_str().unwrap(), None, None).unwrap();
        assert!(fx.cache.contains("helper"));

        let second = loader.import(b.to_str().unwrap(), None, None).unwrap();
        assert!(Arc::ptr_eq(&first.dependencies()[0], &second.dependencies()[0]));
        assert_eq!(second.dependencies()[0].call("help").unwrap(), "helper a");
    }

    #[test]
    fn test_reset_empties_incidental_set() {
        let fx = Fixture::new();
        let helper = fx.write("helper.unit", &unit_json("helper", &[], "help", "h"));
        let mut loader = fx.loader(true);
        loader.import(helper.to_str().unwrap(), None, None).unwrap();

        let record = loader
            .registry()
            .record("helper_0_0_0")
            .unwrap();
        assert!(record.incidental_aliases.is_empty());
        assert!(fx.cache.contains("helper_0_0_0"));
    }

    #[test]
    fn test_import_by_name_picks_newest_in_import_dir() {
        let fx = Fixture::new();
        fx.write("import/custom-1.0.2.unit", &unit_json("custom", &[], "run", "1.0.2"));
        fx.write("import/custom-1.0.10.unit", &unit_json("custom", &[], "run", "1.0.10"));
        fx.write("import/other.unit", &unit_json("other", &[], "run", "other"));
        let mut loader = fx.loader(false);

        let unit = loader.import("custom", None, None).unwrap();
        assert_eq!(unit.call("run").unwrap(), "1.0.10");

        let unit = loader.import("custom", Some("1.0.2"), None).unwrap();
        assert_eq!(unit.call("run").unwrap(), "1.0.2");
    }

    #[test]
    fn test_import_by_name_falls_back_to_installed() {
        let fx = Fixture::new();
        let source = fx.write("src/custom.unit", &unit_json("custom", &[], "run", "kept"));
        fx.loader(false)
            .import(source.to_str().unwrap(), Some("3.1"), None)
            .unwrap();
        fs::remove_file(&source).unwrap();

        let fresh = Fixture {
            dir: fx.dir,
            cache: UnitCache::new(),
        };
        let mut loader = fresh.loader(false);
        let unit = loader.import("custom", None, None).unwrap();
        assert_eq!(unit.call("run").unwrap(), "kept");
        assert!(fresh.cache.contains("custom_3_1"));
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let fx = Fixture::new();
        let mut loader = fx.loader(false);
        assert!(matches!(
            loader.import("nothing", None, None),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            loader.import("nothing", Some("1.0"), None),
            Err(Error::NotFound(name)) if name == "nothing 1.0"
        ));
    }

    #[test]
    fn test_sub_path_loads_other_file() {
        let fx = Fixture::new();
        let pkg = fx.write("pkg/unit.json", &unit_json("pkg", &[], "run", "main"));
        fx.write("pkg/extra.unit", &unit_json("extra", &[], "run", "extra"));
        let pkg = pkg.parent().unwrap();
        let mut loader = fx.loader(false);

        let unit = loader
            .import(pkg.to_str().unwrap(), None, Some(Path::new("pkg/extra.unit")))
            .unwrap();
        assert_eq!(unit.call("run").unwrap(), "extra");
    }

    #[test]
    fn test_sub_path_escape_is_rejected() {
        let fx = Fixture::new();
        let source = fx.write("custom.unit", &unit_json("custom", &[], "run", "x"));
        let mut loader = fx.loader(false);

        let err = loader
            .import(source.to_str().unwrap(), None, Some(Path::new("../../etc/passwd")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
    }

    #[test]
    fn test_package_and_sub_path_of_one_version() {
        let fx = Fixture::new();
        let pkg = fx.write("pkg/unit.json", &unit_json("pkg", &[], "run", "main"));
        fx.write("pkg/extra.unit", &unit_json("extra", &[], "run", "extra"));
        let pkg = pkg.parent().unwrap().to_str().unwrap().to_string();
        let extra = Path::new("pkg/extra.unit");
        let mut loader = fx.loader(false);

        let main = loader.import(&pkg, Some("1.0"), None).unwrap();
        let child = loader.import(&pkg, Some("1.0"), Some(extra)).unwrap();

        assert_eq!(main.call("run").unwrap(), "main");
        assert_eq!(child.call("run").unwrap(), "extra");
        assert!(Arc::ptr_eq(&fx.cache.get("pkg_1_0").unwrap(), &main));
        assert!(Arc::ptr_eq(&fx.cache.get("pkg_1_0.pkg.extra").unwrap(), &child));

        let again = loader.import(&pkg, Some("1.0"), Some(extra)).unwrap();
        assert!(Arc::ptr_eq(&again, &child));
        let again = loader.import(&pkg, Some("1.0"), None).unwrap();
        assert!(Arc::ptr_eq(&again, &main));
    }

    #[test]
    fn test_names_sharing_an_alias_collide() {
        let fx = Fixture::new();
        let dotted = fx.write("a/a.b.unit", &unit_json("a.b", &[], "run", "dotted"));
        let underscored = fx.write("b/a_b.unit", &unit_json("a_b", &[], "run", "underscored"));
        let mut loader = fx.loader(false);

        let unit = loader.import(dotted.to_str().unwrap(), Some("1.0"), None).unwrap();
        assert_eq!(unit.call("run").unwrap(), "dotted");

        let err = loader
            .import(underscored.to_str().unwrap(), Some("1.0"), None)
            .unwrap_err();
        assert!(matches!(err, Error::AliasCollision { ref alias, .. } if alias == "a_b_1_0"));
        assert!(Arc::ptr_eq(&fx.cache.get("a_b_1_0").unwrap(), &unit));

        // A new process only has the receipt to go by.
        let fresh = Fixture {
            dir: fx.dir,
            cache: UnitCache::new(),
        };
        let err = fresh
            .loader(false)
            .import(underscored.to_str().unwrap(), Some("1.0"), None)
            .unwrap_err();
        assert!(matches!(err, Error::AliasCollision { ref alias, .. } if alias == "a_b_1_0"));
        assert!(fresh.cache.is_empty());
        assert!(!fresh.install_dir().join("a_b_1_0/a_b.unit").exists());
    }

    #[test]
    fn test_load_failure_keeps_install() {
        let fx = Fixture::new();
        let source = fx.write("broken.unit", r#"{"name":"broken","requires":["gone"]}"#);
        let mut loader = fx.loader(false);

        let err = loader.import(source.to_str().unwrap(), None, None).unwrap_err();
        assert!(matches!(err, Error::LoadError { .. }));
        assert!(fx.cache.is_empty());
        assert!(loader.is_installed(&alias::sanitize("broken", None).unwrap()));
    }

    #[test]
    fn test_delete_then_reimport_reinstalls() {
        let fx = Fixture::new();
        let source = fx.write("custom.unit", &unit_json("custom", &[], "run", "first"));
        let mut loader = fx.loader(false);

        let unit = loader.import(source.to_str().unwrap(), Some("1.0.0"), None).unwrap();
        loader.delete_unit(&unit).unwrap();
        let alias = alias::sanitize("custom", Some("1.0.0")).unwrap();
        assert!(!fx.install_dir().join("custom_1_0_0").exists());
        assert!(!fx.cache.contains("custom_1_0_0"));

        fs::write(&source, unit_json("custom", &[], "run", "second")).unwrap();
        let again = loader.import(source.to_str().unwrap(), Some("1.0.0"), None).unwrap();
        assert_eq!(again.call("run").unwrap(), "second");
        assert!(loader.is_installed(&alias));
    }

    #[test]
    fn test_delete_unknown_alias_is_not_installed() {
        let fx = Fixture::new();
        let mut loader = fx.loader(false);
        let alias = alias::sanitize("ghost", None).unwrap();
        assert!(matches!(
            loader.delete_installed(&alias),
            Err(Error::NotInstalled(_))
        ));
    }

    #[test]
    fn test_available_and_find() {
        let fx = Fixture::new();
        fx.write("import/custom-1.0.0.unit", "{}");
        fx.write("import/pkg/unit.json", "{}");
        fx.write("import/notes.txt", "ignored");
        fs::create_dir(fx.import_dir().join("plain_dir")).unwrap();
        let loader = fx.loader(false);

        let available = loader.available().unwrap();
        let aliases: Vec<_> = available.iter().map(|m| m.alias.as_str()).collect();
        assert_eq!(aliases, vec!["custom_1_0_0", "pkg_0_0_0"]);

        assert_eq!(
            loader.find("custom_1_0_0", None).unwrap().unwrap().name,
            "custom"
        );
        assert_eq!(
            loader.find("custom-1.0.0.unit", None).unwrap().unwrap().version,
            "1.0.0"
        );
        assert!(loader.find("custom", Some("2.0")).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_removes_everything() {
        let fx = Fixture::new();
        let source = fx.write("custom.unit", &unit_json("custom", &[], "run", "x"));
        let mut loader = fx.loader(false);
        loader.import(source.to_str().unwrap(), None, None).unwrap();

        loader.cleanup().unwrap();
        assert!(!fx.install_dir().exists());
        assert_eq!(loader.registry().keys().count(), 0);
        assert!(!fx.cache.contains("custom_0_0_0"));
    }
}
