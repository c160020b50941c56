//! Error types for the docsanct library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RedactError`] — a document (or the whole run) cannot proceed: the
//!   file is unreadable, the detection backend is missing, the output could
//!   not be written. Per-document errors are collected into
//!   [`crate::output::BatchReport::failures`]; startup and archive errors are
//!   returned as `Err(RedactError)` from [`crate::batch::Redactor`].
//!
//! * [`PageError`] — a single oracle call failed. Whether it sinks the whole
//!   document or only flags the page depends on the error kind and on
//!   [`crate::config::ParseFailurePolicy`].

use std::path::PathBuf;
use thiserror::Error;

/// Document-level and fatal errors returned by the docsanct library.
#[derive(Debug, Error)]
pub enum RedactError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Extension or content is not a supported image or PDF.
    #[error("Unsupported format for '{path}': {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// pdfium failed to rasterise one page.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    // ── Detection errors ──────────────────────────────────────────────────
    /// The detection backend could not be initialised.
    #[error("Detection oracle '{oracle}' is unavailable.\n{hint}")]
    OracleUnavailable { oracle: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH (or --pdfium-lib) to the directory containing libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// Oracle output stayed unparseable after the repair pass (fail-closed policy).
    #[error("Page {page}: detection output could not be parsed: {detail}")]
    DetectionParse { page: usize, detail: String },

    /// Oracle call failed after all retries.
    #[error("Page {page}: detection failed: {detail}")]
    OracleFailed { page: usize, detail: String },

    /// Oracle call exceeded the configured timeout.
    #[error("Page {page}: detection timed out after {secs}s")]
    OracleTimeout { page: usize, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Output page count differs from the input page count.
    #[error("Page count mismatch: {expected} pages in, {actual} pages out")]
    PageCountMismatch { expected: usize, actual: usize },

    /// Metadata could not be stripped.
    #[error("Failed to sanitise '{path}': {detail}")]
    SanitizeFailed { path: PathBuf, detail: String },

    /// PDF encryption failed.
    #[error("Failed to encrypt '{path}': {detail}")]
    EncryptionFailed { path: PathBuf, detail: String },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The zip archive could not be produced.
    #[error("Failed to write archive '{path}': {reason}")]
    ArchiveWrite { path: PathBuf, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// No PDF encryption password was configured.
    #[error("A PDF encryption password is required.\nProvide it with --pdf-password or DOCSANCT_PDF_PASSWORD.")]
    MissingPassword,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RedactError {
    /// Short machine-readable category used in batch reports.
    pub fn category(&self) -> &'static str {
        match self {
            RedactError::FileNotFound { .. } | RedactError::UnsupportedFormat { .. } => {
                "unsupported_format"
            }
            RedactError::RasterisationFailed { .. } | RedactError::PdfiumBindingFailed(_) => {
                "render"
            }
            RedactError::OracleUnavailable { .. }
            | RedactError::DetectionParse { .. }
            | RedactError::OracleFailed { .. }
            | RedactError::OracleTimeout { .. } => "detection",
            RedactError::PageCountMismatch { .. }
            | RedactError::SanitizeFailed { .. }
            | RedactError::EncryptionFailed { .. }
            | RedactError::OutputWriteFailed { .. } => "output",
            RedactError::ArchiveWrite { .. } => "archive",
            RedactError::MissingPassword | RedactError::InvalidConfig(_) => "config",
            RedactError::Internal(_) => "internal",
        }
    }
}

/// A failure of a single oracle call.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Model output was not valid detection JSON, even after repair.
    #[error("Page {page}: unparseable detection output: {detail}")]
    DetectionParse { page: usize, detail: String },

    /// Backend call failed after retries.
    #[error("Page {page}: oracle call failed after {retries} retries: {detail}")]
    OracleFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// Backend call timed out.
    #[error("Page {page}: oracle call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

impl From<PageError> for RedactError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::DetectionParse { page, detail } => RedactError::DetectionParse { page, detail },
            PageError::OracleFailed { page, detail, .. } => RedactError::OracleFailed { page, detail },
            PageError::Timeout { page, secs } => RedactError::OracleTimeout { page, secs },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = RedactError::UnsupportedFormat {
            path: PathBuf::from("notes.docx"),
            reason: "extension '.docx' is not supported".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.docx"), "got: {msg}");
        assert_eq!(e.category(), "unsupported_format");
    }

    #[test]
    fn timeout_converts_to_oracle_timeout() {
        let e: RedactError = PageError::Timeout { page: 3, secs: 30 }.into();
        assert!(matches!(e, RedactError::OracleTimeout { page: 3, secs: 30 }));
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn parse_error_keeps_page_number() {
        let e: RedactError = PageError::DetectionParse {
            page: 2,
            detail: "EOF while parsing".into(),
        }
        .into();
        assert!(e.to_string().contains("Page 2"));
        assert_eq!(e.category(), "detection");
    }

    #[test]
    fn missing_password_mentions_flag() {
        assert!(RedactError::MissingPassword.to_string().contains("--pdf-password"));
    }
}
