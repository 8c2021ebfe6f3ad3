//! Packed distributions.
//!
//! A `.dist` file is a zip archive holding a `DIST-MANIFEST.json` and a
//! `payload/` tree. Installing one copies the payload into a target
//! directory and leaves a `<name>-<version>.dist-info` record next to it.
//! With dependencies enabled, each required name is looked up next to the
//! source distribution and installed into the same target.

mod tool;

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::alias::name_version_from_path;
use crate::archive::open_zip;
use crate::runtime::{Runtime, path::relative_to};
use crate::unit::{MANIFEST_FILE, UNIT_SUFFIX};
use crate::version::VersionResolver;

pub use tool::tool_main;

pub const DIST_SUFFIX: &str = ".dist";
pub const DIST_MANIFEST: &str = "DIST-MANIFEST.json";
const PAYLOAD_DIR: &str = "payload";
const DIST_INFO_SUFFIX: &str = ".dist-info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// Record left in the target for each installed distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistInfo {
    #[serde(flatten)]
    pub manifest: DistManifest,
    pub source: PathBuf,
    pub files: Vec<PathBuf>,
}

fn collect_files(runtime: &dyn Runtime, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for item in runtime.read_dir(dir)? {
        if runtime.is_dir(&item) {
            collect_files(runtime, &item, out)?;
        } else {
            out.push(item);
        }
    }
    Ok(())
}

/// Build a `.dist` file at `out` from the contents of `dir`.
#[tracing::instrument(skip(runtime))]
pub fn pack(runtime: &dyn Runtime, dir: &Path, manifest: &DistManifest, out: &Path) -> Result<()> {
    use ::zip::write::FileOptions;
    use ::zip::{CompressionMethod, ZipWriter};

    let mut files = Vec::new();
    collect_files(runtime, dir, &mut files)?;
    if files.is_empty() {
        bail!("Nothing to pack in {:?}", dir);
    }

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options: FileOptions<()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(DIST_MANIFEST, options)?;
    zip.write_all(&serde_json::to_vec_pretty(manifest)?)?;

    for file in files {
        let relative = relative_to(dir, &file)
            .with_context(|| format!("{:?} is not under {:?}", file, dir))?;
        let name = Path::new(PAYLOAD_DIR)
            .join(relative)
            .to_string_lossy()
            .replace('\\', "/");
        zip.start_file(name, options)?;
        let mut reader = runtime.open(&file)?;
        std::io::copy(&mut reader, &mut zip)?;
    }

    let bytes = zip.finish()?.into_inner();
    runtime.write(out, &bytes)?;
    info!("Packed {} {} into {:?}", manifest.name, manifest.version, out);
    Ok(())
}

/// Read the manifest of a `.dist` file.
pub fn read_manifest(runtime: &dyn Runtime, path: &Path) -> Result<DistManifest> {
    let mut archive = open_zip(runtime, path)?;
    let entry = archive
        .by_name(DIST_MANIFEST)
        .with_context(|| format!("{:?} has no {}", path, DIST_MANIFEST))?;
    serde_json::from_reader(entry).with_context(|| format!("Malformed {} in {:?}", DIST_MANIFEST, path))
}

fn dist_info_name(manifest: &DistManifest) -> String {
    format!("{}-{}{}", manifest.name, manifest.version, DIST_INFO_SUFFIX)
}

/// True if `target` already provides `name`.
fn provides(runtime: &dyn Runtime, target: &Path, name: &str) -> Result<bool> {
    if runtime.exists(&target.join(format!("{}{}", name, UNIT_SUFFIX)))
        || runtime.exists(&target.join(name).join(MANIFEST_FILE))
    {
        return Ok(true);
    }
    if !runtime.exists(target) {
        return Ok(false);
    }
    let pattern = glob::Pattern::new(&format!(
        "{}-*{}",
        glob::Pattern::escape(name),
        DIST_INFO_SUFFIX
    ))?;
    Ok(runtime.read_dir(target)?.iter().any(|p| {
        p.file_name()
            .is_some_and(|n| pattern.matches(&n.to_string_lossy()))
    }))
}

/// Find a distribution or plain unit for `name` in `dir`; distributions
/// win, newest version first.
pub fn find_dependency(runtime: &dyn Runtime, dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    let pattern = glob::Pattern::new(&format!(
        "{}-*{}",
        glob::Pattern::escape(name),
        DIST_SUFFIX
    ))?;
    let mut candidates: Vec<(String, PathBuf)> = runtime
        .read_dir(dir)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| pattern.matches(&n.to_string_lossy()))
        })
        .filter_map(|p| {
            let (found, version) = name_version_from_path(&p);
            (found == name).then(|| (version.unwrap_or_default(), p))
        })
        .collect();
    VersionResolver::sort_newest_first(&mut candidates, |(v, _)| v.as_str());
    if let Some((_, path)) = candidates.into_iter().next() {
        return Ok(Some(path));
    }

    let unit = dir.join(format!("{}{}", name, UNIT_SUFFIX));
    Ok(runtime.exists(&unit).then_some(unit))
}

/// Install `source` into `target`. Returns the manifests installed, the
/// source's own first.
#[tracing::instrument(skip(runtime))]
pub fn install(
    runtime: &dyn Runtime,
    source: &Path,
    target: &Path,
    with_deps: bool,
) -> Result<Vec<DistManifest>> {
    let mut installed = Vec::new();
    let mut seen = BTreeSet::new();
    install_one(runtime, source, target, with_deps, &mut seen, &mut installed)?;
    Ok(installed)
}

fn install_one(
    runtime: &dyn Runtime,
    source: &Path,
    target: &Path,
    with_deps: bool,
    seen: &mut BTreeSet<String>,
    installed: &mut Vec<DistManifest>,
) -> Result<()> {
    let manifest = read_manifest(runtime, source)?;
    if !seen.insert(manifest.name.clone()) {
        return Ok(());
    }
    runtime.create_dir_all(target)?;

    let mut archive = open_zip(runtime, source)?;
    let mut files = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(path) = entry.enclosed_name() else {
            debug!("Skipping entry with invalid path: {}", entry.name());
            continue;
        };
        let Ok(relative) = path.strip_prefix(PAYLOAD_DIR) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let relative = relative.to_path_buf();
        let dest = target.join(&relative);
        if entry.is_dir() {
            runtime.create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut out = runtime.create_file(&dest)?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to write {:?}", dest))?;
        files.push(relative);
    }

    let info = DistInfo {
        manifest: manifest.clone(),
        source: source.to_path_buf(),
        files,
    };
    runtime.write(
        &target.join(dist_info_name(&manifest)),
        &serde_json::to_vec_pretty(&info)?,
    )?;
    info!("Installed {} {} into {:?}", manifest.name, manifest.version, target);
    installed.push(manifest.clone());

    if !with_deps {
        return Ok(());
    }
    let search_dir = source.parent().unwrap_or(Path::new("."));
    for dep in &manifest.requires {
        if seen.contains(dep) || provides(runtime, target, dep)? {
            debug!("{} already provided in {:?}", dep, target);
            continue;
        }
        let found = find_dependency(runtime, search_dir, dep)?.with_context(|| {
            format!(
                "{} requires {}, which is not in {:?}",
                manifest.name, dep, search_dir
            )
        })?;
        if found.to_string_lossy().ends_with(DIST_SUFFIX) {
            install_one(runtime, &found, target, with_deps, seen, installed)?;
        } else {
            let file_name = found
                .file_name()
                .with_context(|| format!("Invalid dependency path {:?}", found))?;
            runtime.copy(&found, &target.join(file_name))?;
            info!("Installed {} from {:?}", dep, found);
            seen.insert(dep.clone());
        }
    }
    Ok(())
}
