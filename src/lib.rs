//! # docsanct
//!
//! Detect and redact personally identifiable information in scanned images
//! and PDFs, then hand back encrypted, metadata-free copies in one zip.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload root
//!  │
//!  ├─ 1. Enumerate  REDACT_PDFs/ + REDACT_PICs/, sorted, unsupported files skipped
//!  ├─ 2. Normalize  image → 1 page, PDF → N pages via pdfium (spawn_blocking)
//!  ├─ 3. Detect     VLM (JSON boxes) or Tesseract + regex, per page, with timeout
//!  ├─ 4. Redact     opaque black fill over every clamped box
//!  ├─ 5. Assemble   image re-encoded clean / image-PDF stripped + encrypted
//!  └─ 6. Archive    successful outputs → one zip under <output_dir>/<run_id>/
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsanct::{Redactor, RedactionConfig, OracleKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedactionConfig::builder()
//!         .pdf_password("correct horse battery staple")
//!         .oracle(OracleKind::Ocr)
//!         .build()?;
//!     let redactor = Redactor::from_config(config).await?;
//!     let report = redactor.run_and_archive("uploads/".as_ref()).await?;
//!     println!("{} redacted, {} failed", report.outputs.len(), report.failures.len());
//!     if let Some(zip) = &report.archive {
//!         println!("archive: {}", zip.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsanct` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Detection Backends
//!
//! | Oracle | Needs | Labels |
//! |--------|-------|--------|
//! | `vlm`  | an `edgequake-llm` provider (OpenAI, Anthropic, Gemini, Ollama, …) | configured vocabulary |
//! | `ocr`  | the `tesseract` binary on `PATH` | `pii_match` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::Redactor;
pub use config::{FileConfig, OracleKind, ParseFailurePolicy, RedactionConfig, RedactionConfigBuilder};
pub use document::{BBox, Detection, Document, DocumentKind, Page};
pub use error::{PageError, RedactError};
pub use oracle::{build_oracle, DetectionOracle};
pub use output::{BatchReport, DocumentOutcome, FileFailure, SkippedFile};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
