//! Batch orchestration: upload root in, redacted files (and a zip) out.
//!
//! [`Redactor`] owns the detection oracle and the normaliser for the whole
//! run. Each document is processed in isolation; a failing document is
//! recorded in [`BatchReport::failures`] and the batch carries on.

use crate::config::{ParseFailurePolicy, RedactionConfig};
use crate::document::{Detection, Document, DocumentKind, RedactionJob};
use crate::error::{PageError, RedactError};
use crate::job::{unsupported_reason, JobWorkspace};
use crate::oracle::{build_oracle, detect_with_timeout, DetectionOracle};
use crate::output::{BatchReport, DocumentOutcome, FileFailure, SkippedFile};
use crate::pipeline::assemble::{assemble, AssembleOptions};
use crate::pipeline::archive::archive;
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::redact;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Runs the redaction pipeline over batches of documents.
pub struct Redactor {
    config: RedactionConfig,
    oracle: Arc<dyn DetectionOracle>,
    normalizer: Normalizer,
    password: String,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("config", &self.config)
            .field("oracle", &self.oracle.name())
            .finish()
    }
}

impl Redactor {
    /// Build the configured oracle and check that pdfium can be bound.
    ///
    /// Fails with [`RedactError::OracleUnavailable`] or
    /// [`RedactError::PdfiumBindingFailed`] before any file is touched.
    pub async fn from_config(config: RedactionConfig) -> Result<Self, RedactError> {
        let oracle = build_oracle(&config).await?;
        let redactor = Self::with_oracle(config, oracle)?;

        let normalizer = redactor.normalizer.clone();
        tokio::task::spawn_blocking(move || normalizer.renderer().probe())
            .await
            .map_err(|e| RedactError::Internal(format!("pdfium probe panicked: {}", e)))??;

        Ok(redactor)
    }

    /// Use a caller-supplied oracle. No backend or pdfium probing is done.
    pub fn with_oracle(config: RedactionConfig, oracle: Arc<dyn DetectionOracle>) -> Result<Self, RedactError> {
        let password = config.password()?.to_string();
        Ok(Self {
            normalizer: Normalizer::new(&config),
            config,
            oracle,
            password,
        })
    }

    pub fn config(&self) -> &RedactionConfig {
        &self.config
    }

    // ── Public entry points ──────────────────────────────────────────────

    /// Redact everything under `upload_root/<pdf_subdir>` and `upload_root/<image_subdir>`.
    pub async fn run(&self, upload_root: &Path) -> Result<BatchReport, RedactError> {
        let workspace = JobWorkspace::create(&self.config.output_dir)?;
        self.run_in(&workspace, upload_root, Vec::new()).await
    }

    /// [`Self::run`], then zip the successful outputs.
    pub async fn run_and_archive(&self, upload_root: &Path) -> Result<BatchReport, RedactError> {
        let workspace = JobWorkspace::create(&self.config.output_dir)?;
        let mut report = self.run_in(&workspace, upload_root, Vec::new()).await?;
        self.archive_outputs(&workspace, &mut report).await?;
        Ok(report)
    }

    /// Stage `files` into a fresh workspace, redact them and zip the results.
    pub async fn redact_files(&self, files: &[PathBuf]) -> Result<BatchReport, RedactError> {
        let workspace = JobWorkspace::create(&self.config.output_dir)?;
        let (upload_root, skipped) = workspace.stage_uploads(files, &self.config)?;
        let mut report = self.run_in(&workspace, &upload_root, skipped).await?;
        self.archive_outputs(&workspace, &mut report).await?;
        Ok(report)
    }

    // ── Batch ────────────────────────────────────────────────────────────

    async fn run_in(
        &self,
        workspace: &JobWorkspace,
        upload_root: &Path,
        skipped: Vec<SkippedFile>,
    ) -> Result<BatchReport, RedactError> {
        let start = Instant::now();
        let mut report = BatchReport::new(workspace.run_id);
        report.skipped = skipped;

        // ── Step 1: Enumerate ────────────────────────────────────────────
        let (documents, unsupported) = self.enumerate(upload_root)?;
        report.skipped.extend(unsupported);
        for s in &report.skipped {
            warn!("Skipping {}: {}", s.input.display(), s.reason);
        }
        info!(
            "Run {}: {} documents, {} skipped",
            workspace.run_id,
            documents.len(),
            report.skipped.len()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(documents.len());
        }

        // Output names are fixed up-front so concurrent documents never collide.
        let mut used = HashSet::new();
        let planned: Vec<(Document, PathBuf)> = documents
            .into_iter()
            .map(|doc| {
                let out = unique_output_path(workspace, &doc, &mut used);
                (doc, out)
            })
            .collect();

        let options = AssembleOptions {
            password: self.password.clone(),
            dpi: self.config.dpi,
            scratch_dir: workspace.scratch.clone(),
        };

        // ── Step 2: Process documents concurrently ───────────────────────
        let mut results: Vec<(usize, Result<DocumentOutcome, RedactError>)> =
            stream::iter(planned.iter().enumerate().map(|(i, (doc, out))| {
                let options = &options;
                async move { (i, self.redact_document(doc, out, options).await) }
            }))
            .buffer_unordered(self.config.document_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        // ── Step 3: Collect ──────────────────────────────────────────────
        for (i, result) in results {
            let (doc, out) = &planned[i];
            let name = doc.file_name();
            match result {
                Ok(outcome) => {
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_document_complete(&name, outcome.detections);
                    }
                    report.outputs.push(outcome);
                }
                Err(e) => {
                    error!("{}: {}", doc.path.display(), e);
                    if out.exists() {
                        if let Err(rm) = std::fs::remove_file(out) {
                            warn!("Cannot remove partial output {}: {}", out.display(), rm);
                        }
                    }
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_document_error(&name, &e.to_string());
                    }
                    report.failures.push(FileFailure {
                        input: doc.path.clone(),
                        category: e.category().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.total_duration_ms = start.elapsed().as_millis() as u64;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(report.outputs.len(), report.failures.len());
        }
        info!(
            "Run {}: {} redacted, {} failed in {} ms",
            workspace.run_id,
            report.outputs.len(),
            report.failures.len(),
            report.total_duration_ms
        );
        Ok(report)
    }

    /// List supported documents, PDF subdir first, each sorted by name.
    fn enumerate(&self, upload_root: &Path) -> Result<(Vec<Document>, Vec<SkippedFile>), RedactError> {
        if !upload_root.is_dir() {
            return Err(RedactError::FileNotFound {
                path: upload_root.to_path_buf(),
            });
        }

        let mut documents = Vec::new();
        let mut skipped = Vec::new();
        for subdir in [&self.config.pdf_subdir, &self.config.image_subdir] {
            let dir = upload_root.join(subdir);
            if !dir.is_dir() {
                debug!("No {} directory under {}", subdir, upload_root.display());
                continue;
            }
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|e| RedactError::Internal(format!("Cannot list {}: {}", dir.display(), e)))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for path in files {
                match DocumentKind::from_path(&path, &self.config.image_extensions) {
                    Some(kind) => documents.push(Document::new(path, kind)),
                    None => skipped.push(SkippedFile {
                        reason: unsupported_reason(&path),
                        input: path,
                    }),
                }
            }
        }
        Ok((documents, skipped))
    }

    // ── Single document ──────────────────────────────────────────────────

    /// Normalize → detect → redact → assemble one document.
    pub async fn redact_document(
        &self,
        document: &Document,
        output_path: &Path,
        options: &AssembleOptions,
    ) -> Result<DocumentOutcome, RedactError> {
        let start = Instant::now();
        let name = document.file_name();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(&name);
        }
        info!("Redacting {}", document.path.display());

        // ── Step 1: Normalize ────────────────────────────────────────────
        let pages = self.normalizer.normalize(document).await?;
        let total_pages = pages.len();
        let mut job = RedactionJob::new(document.clone());
        job.pages_total = total_pages;

        // ── Step 2: Detect (order-preserving, bounded) ───────────────────
        let timeout = Duration::from_secs(self.config.oracle_timeout_secs);
        let oracle = self.oracle.as_ref();
        let cb = self.config.progress_callback.as_ref();
        let doc_name = name.as_str();
        let results: Vec<Result<Vec<Detection>, PageError>> = stream::iter(pages.iter().map(|page| async move {
            let result = detect_with_timeout(oracle, page, timeout).await;
            if let (Ok(found), Some(cb)) = (&result, cb) {
                cb.on_page_complete(doc_name, page.number(), total_pages, found.len());
            }
            result
        }))
        .buffered(self.config.page_concurrency)
        .collect()
        .await;

        // ── Step 3: Apply the failure policy ─────────────────────────────
        for result in results {
            let detections = match result {
                Ok(found) => found,
                Err(PageError::DetectionParse { page, detail })
                    if self.config.parse_failure_policy == ParseFailurePolicy::FailOpen =>
                {
                    warn!(
                        "{} page {}: unparseable detections ({}); page left unredacted and flagged",
                        name, page, detail
                    );
                    job.pages_flagged.push(page);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };
            job.detections.push(detections);
            job.pages_processed += 1;
        }

        // ── Step 4: Redact + assemble (CPU-bound) ────────────────────────
        let detections = job.detections.clone();
        let kind = document.kind;
        let out = output_path.to_path_buf();
        let options = options.clone();
        let assembled = tokio::task::spawn_blocking(move || {
            let mut pages = pages;
            for (page, found) in pages.iter_mut().zip(&detections) {
                redact::apply_in_place(&mut page.image, found);
            }
            assemble(&pages, kind, &out, &options)
        })
        .await
        .map_err(|e| RedactError::Internal(format!("Assemble task panicked: {}", e)))??;

        if assembled.page_count != job.pages_total {
            return Err(RedactError::PageCountMismatch {
                expected: job.pages_total,
                actual: assembled.page_count,
            });
        }
        job.output_path = Some(assembled.path.clone());

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{}: {} pages, {} boxes redacted → {} ({} ms)",
            name,
            job.pages_processed,
            job.detection_count(),
            assembled.path.display(),
            duration_ms
        );
        Ok(DocumentOutcome {
            input: document.path.clone(),
            output: assembled.path,
            kind,
            pages: job.pages_total,
            detections: job.detection_count(),
            pages_flagged_for_review: job.pages_flagged,
            duration_ms,
        })
    }

    /// Zip the successful outputs into the run directory.
    ///
    /// A failed zip is recorded in [`BatchReport::archive_error`]; the
    /// per-file results are kept and the redacted files stay in `outputs/`.
    async fn archive_outputs(&self, workspace: &JobWorkspace, report: &mut BatchReport) -> Result<(), RedactError> {
        let files = report.output_paths();
        let target = workspace.archive_path(&self.config.archive_name);
        let task_target = target.clone();
        let result = tokio::task::spawn_blocking(move || archive(&files, &task_target))
            .await
            .map_err(|e| RedactError::Internal(format!("Archive task panicked: {}", e)))?;
        match result {
            Ok(path) => report.archive = Some(path),
            Err(e) => {
                error!("Run {}: {}", workspace.run_id, e);
                report.archive_error = Some(FileFailure {
                    input: target,
                    category: e.category().to_string(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn unique_output_path(workspace: &JobWorkspace, doc: &Document, used: &mut HashSet<PathBuf>) -> PathBuf {
    let name = doc.file_name();
    let first = workspace.output_path_for(&name);
    if used.insert(first.clone()) {
        return first;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (name.clone(), String::new()),
    };
    (1..)
        .map(|n| workspace.output_path_for(&format!("{stem}_{n}{ext}")))
        .find(|candidate| used.insert(candidate.clone()))
        .unwrap_or(first)
}
