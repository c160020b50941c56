//! Per-run workspace on disk.
//!
//! Every run gets a fresh UUID and its own directory tree, so concurrent
//! runs never see each other's files:
//!
//! ```text
//! <output_dir>/<run_id>/
//!   uploads/<pdf_subdir>/     staged PDFs (redact_files only)
//!   uploads/<image_subdir>/   staged images (redact_files only)
//!   scratch/                  intermediate PDFs
//!   outputs/                  redacted_<name> files
//!   <archive_name>            the zip
//! ```

use crate::config::RedactionConfig;
use crate::document::DocumentKind;
use crate::error::RedactError;
use crate::output::SkippedFile;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directories belonging to one run.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub run_id: Uuid,
    pub root: PathBuf,
    pub uploads: PathBuf,
    pub scratch: PathBuf,
    pub outputs: PathBuf,
}

impl JobWorkspace {
    /// Create `<output_dir>/<new run id>/` with its `scratch` and `outputs` dirs.
    pub fn create(output_dir: &Path) -> Result<Self, RedactError> {
        let run_id = Uuid::new_v4();
        let root = output_dir.join(run_id.to_string());
        let ws = Self {
            run_id,
            uploads: root.join("uploads"),
            scratch: root.join("scratch"),
            outputs: root.join("outputs"),
            root,
        };
        for dir in [&ws.scratch, &ws.outputs] {
            std::fs::create_dir_all(dir).map_err(|source| RedactError::OutputWriteFailed {
                path: dir.clone(),
                source,
            })?;
        }
        info!("Run {} workspace: {}", run_id, ws.root.display());
        Ok(ws)
    }

    /// Output path for an input file name: `outputs/redacted_<name>`.
    pub fn output_path_for(&self, file_name: &str) -> PathBuf {
        self.outputs.join(format!("redacted_{file_name}"))
    }

    pub fn archive_path(&self, archive_name: &str) -> PathBuf {
        self.root.join(archive_name)
    }

    /// Copy uploaded files into `uploads/<subdir>/` by kind.
    ///
    /// Returns the upload root (suitable for [`crate::batch::Redactor::run`])
    /// and the files that were not staged because their type is unsupported.
    /// Files sharing a base name are kept apart with a numeric suffix.
    pub fn stage_uploads(
        &self,
        files: &[PathBuf],
        config: &RedactionConfig,
    ) -> Result<(PathBuf, Vec<SkippedFile>), RedactError> {
        let pdf_dir = self.uploads.join(&config.pdf_subdir);
        let image_dir = self.uploads.join(&config.image_subdir);
        for dir in [&pdf_dir, &image_dir] {
            std::fs::create_dir_all(dir).map_err(|source| RedactError::OutputWriteFailed {
                path: dir.clone(),
                source,
            })?;
        }

        let mut skipped = Vec::new();
        let mut used: HashSet<PathBuf> = HashSet::new();
        for file in files {
            if !file.is_file() {
                warn!("Upload {} does not exist", file.display());
                skipped.push(SkippedFile {
                    input: file.clone(),
                    reason: "file not found".into(),
                });
                continue;
            }
            let target_dir = match DocumentKind::from_path(file, &config.image_extensions) {
                Some(DocumentKind::Pdf) => &pdf_dir,
                Some(DocumentKind::Image) => &image_dir,
                None => {
                    skipped.push(SkippedFile {
                        input: file.clone(),
                        reason: unsupported_reason(file),
                    });
                    continue;
                }
            };
            let target = unique_target(target_dir, file, &mut used);
            std::fs::copy(file, &target).map_err(|source| RedactError::OutputWriteFailed {
                path: target.clone(),
                source,
            })?;
            debug!("Staged {} → {}", file.display(), target.display());
        }
        Ok((self.uploads.clone(), skipped))
    }
}

/// Diagnostic for a file whose extension is not accepted.
pub fn unsupported_reason(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("unsupported file type '.{}'", ext.to_ascii_lowercase()),
        None => "file has no extension".to_string(),
    }
}

fn unique_target(dir: &Path, file: &Path, used: &mut HashSet<PathBuf>) -> PathBuf {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let first = dir.join(&name);
    if used.insert(first.clone()) {
        return first;
    }
    let stem = file.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|candidate| used.insert(candidate.clone()))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedactionConfig {
        RedactionConfig::builder().pdf_password("pw").build().unwrap()
    }

    #[test]
    fn workspace_is_namespaced_by_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = JobWorkspace::create(dir.path()).unwrap();
        let b = JobWorkspace::create(dir.path()).unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert!(a.outputs.is_dir());
        assert!(a.scratch.is_dir());
        assert!(a.root.ends_with(a.run_id.to_string()));
        assert_eq!(
            a.output_path_for("scan.png"),
            a.root.join("outputs").join("redacted_scan.png")
        );
    }

    #[test]
    fn uploads_are_sorted_into_subdirs() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let pdf = src.path().join("form.pdf");
        let png = src.path().join("ID.PNG");
        let doc = src.path().join("notes.docx");
        for f in [&pdf, &png, &doc] {
            std::fs::write(f, b"x").unwrap();
        }

        let ws = JobWorkspace::create(out.path()).unwrap();
        let (root, skipped) = ws.stage_uploads(&[pdf, png, doc.clone()], &config()).unwrap();

        assert!(root.join("REDACT_PDFs/form.pdf").is_file());
        assert!(root.join("REDACT_PICs/ID.PNG").is_file());
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].input, doc);
        assert!(skipped[0].reason.contains(".docx"));
    }

    #[test]
    fn same_named_uploads_do_not_overwrite() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a")).unwrap();
        std::fs::create_dir_all(src.path().join("b")).unwrap();
        let one = src.path().join("a/scan.jpg");
        let two = src.path().join("b/scan.jpg");
        std::fs::write(&one, b"1").unwrap();
        std::fs::write(&two, b"2").unwrap();

        let ws = JobWorkspace::create(out.path()).unwrap();
        let (root, _) = ws.stage_uploads(&[one, two], &config()).unwrap();
        assert_eq!(std::fs::read(root.join("REDACT_PICs/scan.jpg")).unwrap(), b"1");
        assert_eq!(std::fs::read(root.join("REDACT_PICs/scan_1.jpg")).unwrap(), b"2");
    }
}
