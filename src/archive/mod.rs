mod tar;
mod zip;

use crate::cleanup::CleanupGuard;
use crate::runtime::Runtime;
use crate::unit::MANIFEST_FILE;
use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use std::path::{Component, Path, PathBuf};

pub use self::tar::TarExtractor;
pub use self::zip::ZipExtractor;
pub(crate) use self::zip::open_zip;

/// Trait for format-specific archive extractors
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor: Send + Sync {
    /// Check if this extractor can handle the given archive format
    fn can_handle(&self, archive_path: &Path) -> bool;

    /// Extract the archive into `extract_to`, which must exist.
    fn extract(&self, runtime: &dyn Runtime, archive_path: &Path, extract_to: &Path)
    -> Result<()>;
}

/// Dispatcher that selects the appropriate extractor based on archive format.
pub struct ArchiveExtractorImpl {
    tar: TarExtractor,
    zip: ZipExtractor,
}

impl Default for ArchiveExtractorImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveExtractorImpl {
    pub fn new() -> Self {
        Self {
            tar: TarExtractor,
            zip: ZipExtractor,
        }
    }
}

impl ArchiveExtractor for ArchiveExtractorImpl {
    fn can_handle(&self, archive_path: &Path) -> bool {
        self.tar.can_handle(archive_path) || self.zip.can_handle(archive_path)
    }

    #[tracing::instrument(skip(self, runtime))]
    fn extract(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        if self.tar.can_handle(archive_path) {
            return self.tar.extract(runtime, archive_path, extract_to);
        }
        if self.zip.can_handle(archive_path) {
            return self.zip.extract(runtime, archive_path, extract_to);
        }
        Err(anyhow!(
            "Unsupported archive format: {}",
            archive_path.display()
        ))
    }
}

/// Reject entry names that are absolute or climb out of the extraction root.
fn enclosed(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

/// Unpack into a sibling temp directory, then move the contents into
/// `extract_to`.
///
/// A lone wrapping directory (`custom-1.0.0/...`) is unwrapped unless it is
/// a unit package itself. The temp directory never survives, even on error.
fn unpack_via_temp<F>(runtime: &dyn Runtime, extract_to: &Path, unpack: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let dir_name = extract_to
        .file_name()
        .with_context(|| format!("Invalid extraction target {:?}", extract_to))?;
    let temp_extract_dir =
        extract_to.with_file_name(format!("{}_temp_extract", dir_name.to_string_lossy()));
    if runtime.exists(&temp_extract_dir) {
        runtime.remove_dir_all(&temp_extract_dir)?;
    }
    runtime.create_dir_all(&temp_extract_dir)?;
    let guard = CleanupGuard::new(runtime, &temp_extract_dir);

    debug!("Unpacking to temp dir: {:?}", temp_extract_dir);
    unpack(&temp_extract_dir)?;

    let entries = runtime
        .read_dir(&temp_extract_dir)
        .context("Failed to read temp extraction directory")?;
    let Some(first) = entries.first() else {
        bail!("Archive appears to be empty.");
    };

    let source_dir = if entries.len() == 1
        && runtime.is_dir(first)
        && !runtime.exists(&first.join(MANIFEST_FILE))
    {
        first.clone()
    } else {
        temp_extract_dir.clone()
    };

    debug!("Moving contents from {:?} to {:?}", source_dir, extract_to);
    for item in runtime.read_dir(&source_dir)? {
        let Some(file_name) = item.file_name() else {
            continue;
        };
        runtime.rename(&item, &extract_to.join(file_name))?;
    }

    drop(guard);
    info!("Extraction complete.");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_extractor_impl_can_handle() {
        let extractor = ArchiveExtractorImpl::new();
        assert!(extractor.can_handle(Path::new("file.tar.gz")));
        assert!(extractor.can_handle(Path::new("file.tgz")));
        assert!(extractor.can_handle(Path::new("file.tar")));
        assert!(extractor.can_handle(Path::new("file.zip")));
        assert!(!extractor.can_handle(Path::new("file.unit")));
    }

    #[test]
    fn test_extractor_impl_dispatches_to_tar() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("custom-1.0.0.tar.gz");
        let extract_path = dir.path().join("custom_1_0_0");
        fs::create_dir(&extract_path)?;
        test_archives::tar_gz(&archive_path, &[("custom-1.0.0/custom.unit", "{}")])?;

        ArchiveExtractorImpl::new().extract(&RealRuntime, &archive_path, &extract_path)?;

        assert_eq!(fs::read_to_string(extract_path.join("custom.unit"))?, "{}");
        assert!(!dir.path().join("custom_1_0_0_temp_extract").exists());
        Ok(())
    }

    #[test]
    fn test_extractor_impl_dispatches_to_zip() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("custom.zip");
        let extract_path = dir.path().join("custom_0_0_0");
        fs::create_dir(&extract_path)?;
        test_archives::zip(&archive_path, &[("custom.unit", "{}")])?;

        ArchiveExtractorImpl::new().extract(&RealRuntime, &archive_path, &extract_path)?;

        assert!(extract_path.join("custom.unit").exists());
        Ok(())
    }

    #[test]
    fn test_unit_package_directory_is_not_unwrapped() -> Result<()> {
        let dir = tempdir()?;
        let archive_path = dir.path().join("pkg.zip");
        let extract_path = dir.path().join("pkg_0_0_0");
        fs::create_dir(&extract_path)?;
        test_archives::zip(&archive_path, &[("pkg/unit.json", r#"{"name":"pkg"}"#)])?;

        ArchiveExtractorImpl::new().extract(&RealRuntime, &archive_path, &extract_path)?;

        assert!(extract_path.join("pkg/unit.json").exists());
        Ok(())
    }

    #[test]
    fn test_extractor_impl_unsupported_format() {
        let result = ArchiveExtractorImpl::new().extract(
            &RealRuntime,
            Path::new("/tmp/file.unknown"),
            Path::new("/tmp/out"),
        );
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unsupported archive format")
        );
    }

    #[test]
    fn test_enclosed_rejects_traversal() {
        assert_eq!(enclosed(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(enclosed(Path::new("../evil")), None);
        assert_eq!(enclosed(Path::new("/etc/passwd")), None);
        assert_eq!(enclosed(Path::new("a/../../b")), None);
        assert_eq!(enclosed(Path::new(".")), None);
    }
}
