//! Core data model: documents, pages, bounding boxes and detections.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Label attached to OCR detections, which are not classified further.
pub const GENERIC_LABEL: &str = "pii_match";

/// Fallback label for model output outside the configured vocabulary.
pub const OTHER_LABEL: &str = "other_sensitive_info";

/// Whether a document is a single raster image or a (multi-page) PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Image,
    Pdf,
}

impl DocumentKind {
    /// Classify a path by extension.
    ///
    /// `.pdf` (any case) is a PDF; any extension in `image_exts` (compared
    /// case-insensitively, with or without a leading dot) is an image.
    pub fn from_path(path: &Path, image_exts: &[String]) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "pdf" {
            return Some(DocumentKind::Pdf);
        }
        image_exts
            .iter()
            .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            .then_some(DocumentKind::Image)
    }
}

/// An input file and its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, kind: DocumentKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Base filename, used for output naming and progress messages.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// One raster page of a normalized document.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-based position in the source document.
    pub index: usize,
    pub image: DynamicImage,
}

impl Page {
    pub fn new(index: usize, image: DynamicImage) -> Self {
        Self { index, image }
    }

    /// 1-based page number for messages.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Axis-aligned rectangle `(x1, y1)`–`(x2, y2)` in page pixel coordinates.
///
/// Coordinates are signed so that boxes reaching past the top-left corner
/// can be represented before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

/// A non-empty region fully inside a page, ready to be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from model output, rounding fractional coordinates outward.
    pub fn from_f64(coords: [f64; 4]) -> Self {
        Self {
            x1: coords[0].floor() as i64,
            y1: coords[1].floor() as i64,
            x2: coords[2].ceil() as i64,
            y2: coords[3].ceil() as i64,
        }
    }

    /// `x1 < x2` and `y1 < y2`.
    pub fn is_well_formed(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Clamp to a `width × height` page.
    ///
    /// Returns `None` for inverted or degenerate boxes and for boxes lying
    /// entirely outside the page. Partially-outside boxes are cut to the
    /// in-bounds part.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        if !self.is_well_formed() {
            return None;
        }
        let (w, h) = (i64::from(width), i64::from(height));
        let x1 = self.x1.clamp(0, w);
        let y1 = self.y1.clamp(0, h);
        let x2 = self.x2.clamp(0, w);
        let y2 = self.y2.clamp(0, h);
        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// A detected PII region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BBox, label: impl Into<String>) -> Self {
        Self {
            bbox,
            label: label.into(),
        }
    }
}

/// Map a model-produced label onto the configured vocabulary.
///
/// Matching ignores case and treats spaces, hyphens and underscores alike,
/// so `"Bank Details"` matches `bank_details`. Unknown labels become
/// [`OTHER_LABEL`].
pub fn normalize_label(raw: &str, vocabulary: &[String]) -> String {
    let key = label_key(raw);
    vocabulary
        .iter()
        .find(|v| label_key(v) == key)
        .cloned()
        .unwrap_or_else(|| {
            warn!("Label '{}' is outside the vocabulary; using {}", raw, OTHER_LABEL);
            OTHER_LABEL.to_string()
        })
}

fn label_key(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Per-file unit of work tracked by the orchestrator.
#[derive(Debug)]
pub struct RedactionJob {
    pub document: Document,
    /// Detections per page, in page order.
    pub detections: Vec<Vec<Detection>>,
    pub pages_total: usize,
    pub pages_processed: usize,
    /// 1-based pages whose oracle output was unparseable and were left unredacted.
    pub pages_flagged: Vec<usize>,
    pub output_path: Option<PathBuf>,
}

impl RedactionJob {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            detections: Vec::new(),
            pages_total: 0,
            pages_processed: 0,
            pages_flagged: Vec::new(),
            output_path: None,
        }
    }

    pub fn detection_count(&self) -> usize {
        self.detections.iter().map(Vec::len).sum()
    }
}
