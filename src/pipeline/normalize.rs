//! Document normalisation: any supported input → ordered raster pages.
//!
//! Images decode to a single page in their own colour type. PDFs are
//! rasterised page by page through pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state, and image decoding is
//! CPU-bound. Both run on Tokio's blocking pool so worker threads keep
//! driving oracle calls while a large PDF renders. Calls into pdfium are
//! additionally serialised through [`PdfRenderer`]'s mutex.

use crate::config::RedactionConfig;
use crate::document::{Document, DocumentKind, Page};
use crate::error::RedactError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Binds pdfium once and rasterises PDFs, one document at a time.
pub struct PdfRenderer {
    library_path: Option<PathBuf>,
    /// Bound on first use and kept for the life of the renderer.
    pdfium: Mutex<Option<Pdfium>>,
}

impl std::fmt::Debug for PdfRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfRenderer")
            .field("library_path", &self.library_path)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl PdfRenderer {
    /// `library_path` is a directory holding the platform pdfium library.
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self {
            library_path,
            pdfium: Mutex::new(None),
        }
    }

    /// Whether pdfium has been bound yet.
    pub fn is_bound(&self) -> bool {
        self.pdfium.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    fn lock_bound(&self) -> Result<MutexGuard<'_, Option<Pdfium>>, RedactError> {
        let mut guard = self
            .pdfium
            .lock()
            .map_err(|_| RedactError::Internal("pdfium lock poisoned".into()))?;
        if guard.is_none() {
            *guard = Some(self.bind()?);
            info!("pdfium bound");
        }
        Ok(guard)
    }

    /// Directories searched for the pdfium library, most specific first.
    fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(p) = &self.library_path {
            paths.push(p.clone());
        }
        if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
            if !env_path.is_empty() {
                paths.push(PathBuf::from(env_path));
            }
        }
        paths.push(PathBuf::from("./"));
        paths
    }

    fn bind(&self) -> Result<Pdfium, RedactError> {
        for dir in self.search_paths() {
            // Accept either a directory or the library file itself.
            let lib = if dir.is_file() {
                dir.clone()
            } else {
                Pdfium::pdfium_platform_library_name_at_path(&dir)
            };
            debug!("Trying pdfium at {}", lib.display());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
                return Ok(Pdfium::new(bindings));
            }
        }
        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| RedactError::PdfiumBindingFailed(e.to_string()))
    }

    /// Bind pdfium now instead of on the first PDF.
    pub fn probe(&self) -> Result<(), RedactError> {
        self.lock_bound().map(|_| ())
    }

    /// Rasterise every page of `pdf_path` in order. Blocking.
    ///
    /// Pages render at `dpi`, scaled down so neither edge exceeds `max_pixels`.
    pub fn render_all(&self, pdf_path: &Path, dpi: u32, max_pixels: u32) -> Result<Vec<DynamicImage>, RedactError> {
        let guard = self.lock_bound()?;
        let pdfium = guard
            .as_ref()
            .ok_or_else(|| RedactError::Internal("pdfium not bound".into()))?;

        let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            let reason = if err_str.to_lowercase().contains("password") {
                "PDF is password-protected".to_string()
            } else {
                format!("unreadable PDF: {err_str}")
            };
            RedactError::UnsupportedFormat {
                path: pdf_path.to_path_buf(),
                reason,
            }
        })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(RedactError::UnsupportedFormat {
                path: pdf_path.to_path_buf(),
                reason: "PDF has no pages".into(),
            });
        }
        info!("PDF loaded: {} pages", total_pages);

        let mut images = Vec::with_capacity(total_pages);
        for idx in 0..total_pages {
            let render_failed = |detail: String| RedactError::RasterisationFailed {
                path: pdf_path.to_path_buf(),
                page: idx + 1,
                detail,
            };
            let page = pages
                .get(idx as u16)
                .map_err(|e| render_failed(format!("{:?}", e)))?;

            let (w, h) = target_size(page.width().value, page.height().value, dpi, max_pixels);
            let render_config = PdfRenderConfig::new()
                .set_target_width(w as i32)
                .set_target_height(h as i32);

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| render_failed(format!("{:?}", e)))?;

            let image = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
            debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
            images.push(image);
        }

        Ok(images)
    }
}

/// Pixel size for a page of `width_pt × height_pt` points at `dpi`,
/// scaled down proportionally so the longest edge is at most `max_pixels`.
pub fn target_size(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let scale = dpi as f32 / 72.0;
    let mut w = (width_pt * scale).round().max(1.0);
    let mut h = (height_pt * scale).round().max(1.0);
    let longest = w.max(h);
    if longest > max_pixels as f32 {
        let shrink = max_pixels as f32 / longest;
        w = (w * shrink).round().max(1.0);
        h = (h * shrink).round().max(1.0);
    }
    (w as u32, h as u32)
}

/// Decode an image file, guessing the format from its content.
pub fn load_image(path: &Path) -> Result<DynamicImage, RedactError> {
    let unsupported = |reason: String| RedactError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason,
    };
    image::ImageReader::open(path)
        .map_err(|e| unsupported(format!("cannot open image: {e}")))?
        .with_guessed_format()
        .map_err(|e| unsupported(format!("cannot read image: {e}")))?
        .decode()
        .map_err(|e| unsupported(format!("cannot decode image: {e}")))
}

/// Converts documents into page sequences.
#[derive(Debug, Clone)]
pub struct Normalizer {
    renderer: Arc<PdfRenderer>,
    dpi: u32,
    max_pixels: u32,
}

impl Normalizer {
    pub fn new(config: &RedactionConfig) -> Self {
        Self {
            renderer: Arc::new(PdfRenderer::new(config.pdfium_library_path.clone())),
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
        }
    }

    pub fn renderer(&self) -> &PdfRenderer {
        &self.renderer
    }

    /// Produce the ordered pages of a document.
    pub async fn normalize(&self, document: &Document) -> Result<Vec<Page>, RedactError> {
        if !document.path.exists() {
            return Err(RedactError::FileNotFound {
                path: document.path.clone(),
            });
        }
        let path = document.path.clone();

        let images = match document.kind {
            DocumentKind::Image => tokio::task::spawn_blocking(move || load_image(&path).map(|img| vec![img]))
                .await
                .map_err(|e| RedactError::Internal(format!("Decode task panicked: {}", e)))??,
            DocumentKind::Pdf => {
                let renderer = Arc::clone(&self.renderer);
                let (dpi, max_pixels) = (self.dpi, self.max_pixels);
                tokio::task::spawn_blocking(move || renderer.render_all(&path, dpi, max_pixels))
                    .await
                    .map_err(|e| RedactError::Internal(format!("Render task panicked: {}", e)))??
            }
        };

        Ok(images
            .into_iter()
            .enumerate()
            .map(|(index, image)| Page::new(index, image))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn letter_page_at_200_dpi() {
        assert_eq!(target_size(612.0, 792.0, 200, 4000), (1700, 2200));
    }

    #[test]
    fn renderer_binds_lazily() {
        let renderer = PdfRenderer::new(Some(PathBuf::from("/no/such/pdfium")));
        assert!(!renderer.is_bound());
        assert!(format!("{renderer:?}").contains("bound: false"));
    }

    #[test]
    fn huge_page_is_capped() {
        let (w, h) = target_size(2384.0, 3370.0, 200, 4000);
        assert_eq!(h, 4000);
        assert!(w < 4000);
    }

    #[tokio::test]
    async fn image_becomes_single_page_with_same_colour_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        GrayImage::from_pixel(40, 30, Luma([200])).save(&path).unwrap();

        let normalizer = Normalizer::new(&RedactionConfig::default());
        let pages = normalizer
            .normalize(&Document::new(&path, DocumentKind::Image))
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 0);
        assert_eq!((pages[0].width(), pages[0].height()), (40, 30));
        assert_eq!(pages[0].image.color(), image::ColorType::L8);
    }

    #[tokio::test]
    async fn corrupt_image_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let normalizer = Normalizer::new(&RedactionConfig::default());
        let err = normalizer
            .normalize(&Document::new(&path, DocumentKind::Image))
            .await
            .unwrap_err();
        assert!(matches!(err, RedactError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let normalizer = Normalizer::new(&RedactionConfig::default());
        let err = normalizer
            .normalize(&Document::new("/no/such/file.png", DocumentKind::Image))
            .await
            .unwrap_err();
        assert!(matches!(err, RedactError::FileNotFound { .. }));
    }
}
