//! Progress-callback trait for per-document and per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::RedactionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through a batch. The CLI uses this to
//! drive its progress bar; a server could forward the same events to a
//! websocket or job table.
//!
//! # Example
//!
//! ```rust
//! use docsanct::{BatchProgressCallback, RedactionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _doc: &str, _page: usize, _total: usize, _found: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = RedactionConfig::builder()
//!     .pdf_password("correct horse battery staple")
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes a batch.
///
/// Documents (and pages within a document) are processed concurrently, so
/// events for different documents interleave and may arrive from different
/// threads. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after enumeration, with the number of supported documents.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before a document is normalized.
    fn on_document_start(&self, document: &str) {
        let _ = document;
    }

    /// Called after each page's detections are known.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in this document
    /// * `detections`  — boxes that will be redacted on this page
    fn on_page_complete(&self, document: &str, page_num: usize, total_pages: usize, detections: usize) {
        let _ = (document, page_num, total_pages, detections);
    }

    /// Called when a document's output has been written.
    fn on_document_complete(&self, document: &str, detections: usize) {
        let _ = (document, detections);
    }

    /// Called when a document fails; the batch continues.
    fn on_document_error(&self, document: &str, error: &str) {
        let _ = (document, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RedactionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
