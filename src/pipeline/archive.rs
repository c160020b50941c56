//! Bundling the redacted outputs into one zip.

use crate::error::RedactError;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip `files` into `archive_path`, one entry per file named by its base name.
///
/// Every input must exist; nothing is written otherwise. Repeated base names
/// get a numeric suffix (`a.png`, `a_1.png`, …).
pub fn archive(files: &[PathBuf], archive_path: &Path) -> Result<PathBuf, RedactError> {
    let archive_failed = |reason: String| RedactError::ArchiveWrite {
        path: archive_path.to_path_buf(),
        reason,
    };

    if let Some(missing) = files.iter().find(|f| !f.is_file()) {
        return Err(archive_failed(format!("input '{}' does not exist", missing.display())));
    }
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| archive_failed(e.to_string()))?;
    }

    let file = File::create(archive_path).map_err(|e| archive_failed(e.to_string()))?;
    if let Err(e) = write_entries(file, files, &archive_failed) {
        if let Err(rm) = std::fs::remove_file(archive_path) {
            warn!("Cannot remove partial archive {}: {}", archive_path.display(), rm);
        }
        return Err(e);
    }

    info!("Archived {} files into {}", files.len(), archive_path.display());
    Ok(archive_path.to_path_buf())
}

fn write_entries(
    file: File,
    files: &[PathBuf],
    archive_failed: &dyn Fn(String) -> RedactError,
) -> Result<(), RedactError> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut used = HashSet::new();
    for path in files {
        let name = unique_entry_name(path, &mut used);
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_failed(e.to_string()))?;
        let mut input = File::open(path).map_err(|e| archive_failed(format!("{}: {}", path.display(), e)))?;
        std::io::copy(&mut input, &mut zip).map_err(|e| archive_failed(format!("{}: {}", path.display(), e)))?;
        debug!("Archived {} as {}", path.display(), name);
    }
    zip.finish().map_err(|e| archive_failed(e.to_string()))?;
    Ok(())
}

fn unique_entry_name(path: &Path, used: &mut HashSet<String>) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    if used.insert(base.clone()) {
        return base;
    }
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (base.clone(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
