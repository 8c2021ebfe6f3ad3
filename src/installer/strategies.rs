//! Built-in install strategies.

use anyhow::{Context, Result, bail};
use log::debug;
use std::path::{Path, PathBuf};

use super::{ArtifactKind, InstallContext, InstallerRegistry};
use crate::archive::{ArchiveExtractor, ArchiveExtractorImpl};
use crate::dist::DIST_SUFFIX;
use crate::runtime::copy_dir_all;
use crate::unit::{MANIFEST_FILE, UNIT_SUFFIX};

pub(super) fn register_defaults(registry: &mut InstallerRegistry) {
    registry.register(ArtifactKind::suffix(UNIT_SUFFIX), source_file);
    registry.register(ArtifactKind::Directory, unit_directory);
    for suffix in [".zip", ".tar", ".tar.gz", ".tgz"] {
        registry.register(ArtifactKind::suffix(suffix), archive);
    }
    registry.register(ArtifactKind::suffix(DIST_SUFFIX), packed_distribution);
}

/// Copy a single unit file into the alias directory.
pub fn source_file(ctx: &InstallContext<'_>) -> Result<PathBuf> {
    let file_name = ctx
        .source
        .file_name()
        .with_context(|| format!("Invalid source path {:?}", ctx.source))?;
    let entry = ctx.dest.join(file_name);
    ctx.runtime.copy(ctx.source, &entry)?;
    Ok(entry)
}

/// Copy a unit package directory into the alias directory.
pub fn unit_directory(ctx: &InstallContext<'_>) -> Result<PathBuf> {
    if !ctx.runtime.exists(&ctx.source.join(MANIFEST_FILE)) {
        bail!("{:?} has no {}", ctx.source, MANIFEST_FILE);
    }
    let dir_name = ctx
        .source
        .file_name()
        .with_context(|| format!("Invalid source path {:?}", ctx.source))?;
    let target = ctx.dest.join(dir_name);
    copy_dir_all(ctx.runtime, ctx.source, &target)?;
    Ok(target.join(MANIFEST_FILE))
}

/// Extract a zip or tar archive into the alias directory.
pub fn archive(ctx: &InstallContext<'_>) -> Result<PathBuf> {
    ArchiveExtractorImpl::new().extract(ctx.runtime, ctx.source, ctx.dest)?;
    locate_entry(ctx, ctx.dest)
}

/// Hand a packed distribution to the external tool.
pub fn packed_distribution(ctx: &InstallContext<'_>) -> Result<PathBuf> {
    let mut args = vec![
        "install".to_string(),
        "--target".to_string(),
        ctx.dest.to_string_lossy().into_owned(),
    ];
    if !ctx.install_dependencies {
        args.push("--no-deps".to_string());
    }
    args.push(ctx.source.to_string_lossy().into_owned());

    debug!("Invoking tool: {}", args.join(" "));
    let output = ctx.tool.invoke(&args, ctx.tool_options)?;
    if !output.success() {
        bail!(
            "tool exited with status {}: {}",
            output.status,
            output.output.trim()
        );
    }
    locate_entry(ctx, ctx.dest)
}

/// Find the file the native loader should start from in `root`.
///
/// Tried in order: `<name>.unit`, `<name>/unit.json`, `unit.json`, then the
/// only `*.unit` file or the only unit package directory in `root`.
pub fn locate_entry(ctx: &InstallContext<'_>, root: &Path) -> Result<PathBuf> {
    let runtime = ctx.runtime;
    let name = &ctx.spec.name;
    let candidates = [
        root.join(format!("{}{}", name, UNIT_SUFFIX)),
        root.join(name).join(MANIFEST_FILE),
        root.join(MANIFEST_FILE),
    ];
    if let Some(found) = candidates.into_iter().find(|p| runtime.exists(p)) {
        return Ok(found);
    }

    let mut found = Vec::new();
    for item in runtime.read_dir(root)? {
        let is_unit_file = item
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with(UNIT_SUFFIX));
        if is_unit_file && !runtime.is_dir(&item) {
            found.push(item);
        } else if runtime.is_dir(&item) && runtime.exists(&item.join(MANIFEST_FILE)) {
            found.push(item.join(MANIFEST_FILE));
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => bail!("No unit for {} found in {:?}", name, root),
        _ => bail!(
            "Several units in {:?} and none is named {}: {:?}",
            root,
            name,
            found
        ),
    }
}
