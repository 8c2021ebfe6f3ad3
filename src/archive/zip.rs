use crate::runtime::Runtime;
use anyhow::{Context, Result};
use log::debug;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

use super::{ArchiveExtractor, unpack_via_temp};

/// Extractor for .zip archives (also the container of `.dist` files)
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        let name = archive_path.to_string_lossy().to_lowercase();
        name.ends_with(".zip")
    }

    fn extract(
        &self,
        runtime: &dyn Runtime,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting zip archive to {:?}...", extract_to);
        let mut archive = open_zip(runtime, archive_path)?;
        unpack_via_temp(runtime, extract_to, |temp| unpack(runtime, &mut archive, temp))
    }
}

/// Read a zip archive fully into memory; `ZipArchive` needs `Seek`.
pub(crate) fn open_zip(
    runtime: &dyn Runtime,
    archive_path: &Path,
) -> Result<ZipArchive<std::io::Cursor<Vec<u8>>>> {
    let mut reader = runtime
        .open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
    ZipArchive::new(std::io::Cursor::new(buffer))
        .with_context(|| format!("Failed to parse ZIP archive {:?}", archive_path))
}

/// Write every enclosed entry of `archive` below `dest`.
pub(crate) fn unpack<R: Read + std::io::Seek>(
    runtime: &dyn Runtime,
    archive: &mut ZipArchive<R>,
    dest: &Path,
) -> Result<()> {
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read ZIP entry {}", i))?;

        let Some(entry_path) = entry.enclosed_name() else {
            debug!("Skipping entry with invalid path: {}", entry.name());
            continue;
        };
        let full_path = dest.join(entry_path);

        if entry.is_dir() {
            runtime.create_dir_all(&full_path)?;
            continue;
        }
        if let Some(parent) = full_path.parent() {
            runtime.create_dir_all(parent)?;
        }
        let mut dest_file = runtime.create_file(&full_path)?;
        std::io::copy(&mut entry, &mut dest_file)
            .with_context(|| format!("Failed to extract file {:?}", full_path))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode()
            && let Err(e) = runtime.set_permissions(&full_path, mode)
        {
            debug!("Failed to set permissions on {:?}: {}", full_path, e);
        }
    }
    Ok(())
}
