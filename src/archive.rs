// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! ZIP extraction.
//!
//! Every entry name is checked before the first byte is written: one entry
//! that is absolute or climbs out of the destination rejects the whole
//! archive.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::{HmtError, Result};

/// Extract `archive` into `destination`, creating it if needed.
///
/// With `remove_archive_after`, the archive is deleted once extraction
/// succeeds; failing to delete it is only logged. Returns `destination`.
pub fn extract(archive: &Path, destination: &Path, remove_archive_after: bool) -> Result<PathBuf> {
    let file = File::open(archive).map_err(|e| HmtError::fs(archive, e))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| HmtError::Extraction(format!("{} is not a valid ZIP archive: {}", archive.display(), e)))?;

    let entries = plan_entries(&mut zip)?;
    tracing::info!(
        "Extracting {} entries from {} to {}",
        entries.len(),
        archive.display(),
        destination.display()
    );

    fs::create_dir_all(destination).map_err(|e| HmtError::fs(destination, e))?;

    for (index, relative) in entries {
        let mut entry = zip.by_index(index)?;
        let out_path = destination.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| HmtError::fs(&out_path, e))?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| HmtError::fs(parent, e))?;
            }
            let mut out = File::create(&out_path).map_err(|e| HmtError::fs(&out_path, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| {
                HmtError::Extraction(format!("failed to unpack {}: {}", relative.display(), e))
            })?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                if let Err(e) = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode)) {
                    tracing::debug!("Could not set mode {:o} on {}: {}", mode, out_path.display(), e);
                }
            }
        }
    }

    if remove_archive_after {
        match fs::remove_file(archive) {
            Ok(()) => tracing::debug!("Removed archive {}", archive.display()),
            Err(e) => tracing::warn!("Could not remove archive {}: {}", archive.display(), e),
        }
    }

    Ok(destination.to_path_buf())
}

/// Validate every entry and pair its index with its safe relative path.
fn plan_entries<R: io::Read + io::Seek>(zip: &mut ZipArchive<R>) -> Result<Vec<(usize, PathBuf)>> {
    let mut planned = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index)?;
        match entry.enclosed_name() {
            Some(path) => planned.push((index, path.to_path_buf())),
            None => {
                return Err(HmtError::Extraction(format!(
                    "entry '{}' escapes the destination directory",
                    entry.name()
                )))
            }
        }
    }
    Ok(planned)
}

/// Name of the single top-level directory holding every entry, if any.
///
/// GitHub branch archives unpack to one `<repo>-<branch>/` folder.
pub fn single_root_dir(archive: &Path) -> Result<Option<String>> {
    let file = File::open(archive).map_err(|e| HmtError::fs(archive, e))?;
    let mut zip = ZipArchive::new(file)?;
    let mut root: Option<String> = None;
    for index in 0..zip.len() {
        let entry = zip.by_index(index)?;
        let Some(path) = entry.enclosed_name() else {
            return Ok(None);
        };
        let mut components = path.components();
        let Some(first) = components.next() else {
            continue;
        };
        if components.next().is_none() && !entry.is_dir() {
            // a file at the archive root
            return Ok(None);
        }
        let first = first.as_os_str().to_string_lossy().to_string();
        match &root {
            None => root = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return Ok(None),
        }
    }
    Ok(root)
}
