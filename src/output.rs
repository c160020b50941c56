//! Result types returned by a batch run.

use crate::document::DocumentKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A document that was redacted and written successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: DocumentKind,
    pub pages: usize,
    pub detections: usize,
    /// 1-based pages left unredacted because the oracle output was unparseable.
    ///
    /// Only populated under [`crate::config::ParseFailurePolicy::FailOpen`];
    /// these documents need a manual review.
    pub pages_flagged_for_review: Vec<usize>,
    pub duration_ms: u64,
}

/// A document that could not be redacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub input: PathBuf,
    /// Short category, see [`crate::error::RedactError::category`].
    pub category: String,
    pub reason: String,
}

/// A file ignored because its extension is not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub input: PathBuf,
    pub reason: String,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// Successful documents, in enumeration order.
    pub outputs: Vec<DocumentOutcome>,
    pub failures: Vec<FileFailure>,
    pub skipped: Vec<SkippedFile>,
    /// Zip of all successful outputs, when archiving was requested.
    pub archive: Option<PathBuf>,
    /// Why the zip could not be written. The per-file results above still stand.
    #[serde(default)]
    pub archive_error: Option<FileFailure>,
    pub total_duration_ms: u64,
}

impl BatchReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            outputs: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            archive: None,
            archive_error: None,
            total_duration_ms: 0,
        }
    }

    /// Output paths of the successful documents.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|o| o.output.clone()).collect()
    }

    /// True when no document failed and no archive error occurred
    /// (skipped files do not count).
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.archive_error.is_none()
    }

    /// Documents that need a manual look before release.
    pub fn flagged_for_review(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outputs
            .iter()
            .filter(|o| !o.pages_flagged_for_review.is_empty())
    }
}
