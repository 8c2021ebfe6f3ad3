use crate::runtime::Runtime;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::debug;
use std::io::Read;
use std::path::Path;

use super::{ArchiveExtractor, enclosed, unpack_via_temp};

/// Extractor for .tar, .tar.gz and .tgz archives
pub struct TarExtractor;

impl TarExtractor {
    fn is_gzip(archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".tar.gz") || name.ends_with(".tgz")
    }
}

impl ArchiveExtractor for TarExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        Self::is_gzip(archive_path) || name.ends_with(".tar")
    }

    fn extract(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting tar archive to {:?}...", extract_to);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
        let reader: Box<dyn Read> = if Self::is_gzip(archive_path) {
            Box::new(GzDecoder::new(file))
        } else {
            file
        };
        let mut archive = tar::Archive::new(reader);

        unpack_via_temp(runtime, extract_to, |temp| {
            let entries = archive
                .entries()
                .with_context(|| format!("Failed to read tar archive {:?}", archive_path))?;
            for entry in entries {
                let mut entry = entry.context("Failed to read tar entry")?;
                let raw_path = entry.path().context("Invalid tar entry path")?.into_owned();
                let Some(relative) = enclosed(&raw_path) else {
                    debug!("Skipping entry with invalid path: {:?}", raw_path);
                    continue;
                };
                let full_path = temp.join(relative);
                let kind = entry.header().entry_type();

                if kind.is_dir() {
                    runtime.create_dir_all(&full_path)?;
                    continue;
                }
                if !kind.is_file() {
                    debug!("Skipping non-regular entry {:?}", raw_path);
                    continue;
                }
                if let Some(parent) = full_path.parent() {
                    runtime.create_dir_all(parent)?;
                }
                let mut dest_file = runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest_file)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && let Err(e) = runtime.set_permissions(&full_path, mode)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
            }
            Ok(())
        })
    }
}
