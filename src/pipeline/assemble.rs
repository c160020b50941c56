//! Output assembly: redacted pages → one output file.
//!
//! Images are written back in the format implied by the output extension.
//! PDFs are rebuilt as image-only PDFs, one full-page raster per page, so
//! no text layer from the source survives. The intermediate PDF lives in a
//! temp file inside the job's scratch directory and is removed on drop,
//! whether or not sanitising succeeds.

use super::sanitize::{save_clean_image, strip_and_encrypt};
use crate::document::{DocumentKind, Page};
use crate::error::RedactError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::ColorType;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Settings shared by every document in a run.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub password: String,
    /// Raster resolution; sets the PDF page size in points.
    pub dpi: u32,
    /// Where intermediate files are created.
    pub scratch_dir: PathBuf,
}

/// A written output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledOutput {
    pub path: PathBuf,
    pub page_count: usize,
}

/// Write `pages` to `output_path` as an image or an encrypted PDF.
pub fn assemble(
    pages: &[Page],
    kind: DocumentKind,
    output_path: &Path,
    options: &AssembleOptions,
) -> Result<AssembledOutput, RedactError> {
    match kind {
        DocumentKind::Image => {
            let [page] = pages else {
                return Err(RedactError::PageCountMismatch {
                    expected: 1,
                    actual: pages.len(),
                });
            };
            save_clean_image(&page.image, output_path)?;
            Ok(AssembledOutput {
                path: output_path.to_path_buf(),
                page_count: 1,
            })
        }
        DocumentKind::Pdf => assemble_pdf(pages, output_path, options),
    }
}

fn assemble_pdf(pages: &[Page], output_path: &Path, options: &AssembleOptions) -> Result<AssembledOutput, RedactError> {
    let scratch_failed = |source: std::io::Error| RedactError::OutputWriteFailed {
        path: options.scratch_dir.clone(),
        source,
    };

    let mut doc = build_image_pdf(pages, options.dpi)?;
    let mut temp = tempfile::Builder::new()
        .prefix("assemble-")
        .suffix(".pdf")
        .tempfile_in(&options.scratch_dir)
        .map_err(scratch_failed)?;
    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(|e| RedactError::Internal(format!("Cannot serialise PDF: {e}")))?;
    temp.write_all(&buf).map_err(scratch_failed)?;
    temp.flush().map_err(scratch_failed)?;
    debug!("Intermediate PDF {} ({} bytes)", temp.path().display(), buf.len());

    let written = strip_and_encrypt(temp.path(), output_path, &options.password)?;
    if written != pages.len() {
        if let Err(rm) = std::fs::remove_file(output_path) {
            warn!("Cannot remove mismatched output {}: {}", output_path.display(), rm);
        }
        return Err(RedactError::PageCountMismatch {
            expected: pages.len(),
            actual: written,
        });
    }

    info!("Assembled {} ({} pages)", output_path.display(), written);
    Ok(AssembledOutput {
        path: output_path.to_path_buf(),
        page_count: written,
    })
}

/// Build an unencrypted PDF with one full-page image per page.
///
/// Page size is `pixels * 72 / dpi` points, so the output prints at the
/// size of the source. Greyscale pages are stored as `DeviceGray`.
pub fn build_image_pdf(pages: &[Page], dpi: u32) -> Result<Document, RedactError> {
    if pages.is_empty() {
        return Err(RedactError::PageCountMismatch {
            expected: 1,
            actual: 0,
        });
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let (width, height) = (page.width(), page.height());
        let (color_space, raw) = match page.image.color() {
            ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => {
                ("DeviceGray", page.image.to_luma8().into_raw())
            }
            _ => ("DeviceRGB", page.image.to_rgb8().into_raw()),
        };

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&raw)?,
        ));

        let w_pt = width as f32 * 72.0 / dpi as f32;
        let h_pt = height as f32 * 72.0 / dpi as f32;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w_pt.into(), 0.into(), 0.into(), h_pt.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| RedactError::Internal(format!("Cannot encode page content: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w_pt.into(), h_pt.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>, RedactError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let deflate_failed = |e: std::io::Error| RedactError::Internal(format!("Deflate failed: {e}"));
    encoder.write_all(raw).map_err(deflate_failed)?;
    encoder.finish().map_err(deflate_failed)
}
