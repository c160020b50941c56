//! Pipeline stages for document redaction.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own with in-memory pages.
//!
//! ## Data Flow
//!
//! ```text
//! normalize ──▶ (oracle) ──▶ redact ──▶ assemble ──▶ archive
//!  (pdfium)                  (fill)    (sanitize)     (zip)
//! ```
//!
//! 1. [`normalize`] — decode an image or rasterise a PDF; runs in
//!    `spawn_blocking`
//! 2. detection happens in [`crate::oracle`]
//! 3. [`redact`]   — black out every clamped box
//! 4. [`assemble`] — write the image, or build an image PDF and hand it to
//!    [`sanitize`] for metadata stripping and encryption
//! 5. [`archive`]  — zip the successful outputs

pub mod archive;
pub mod assemble;
pub mod normalize;
pub mod redact;
pub mod sanitize;
