//! Metadata stripping and PDF encryption.
//!
//! Images: `image` decoders do not carry EXIF, ICC or text chunks into a
//! `DynamicImage`, and its encoders do not write them back, so rebuilding
//! the pixel buffer and re-encoding yields a clean file.
//!
//! PDFs: the document information dictionary is replaced by an empty one,
//! every `/Metadata`, `/PieceInfo` and `/LastModified` entry is removed from
//! dictionaries and stream dictionaries, a fresh `/ID` is assigned and the
//! file is encrypted (RC4, 128-bit) with the configured password.

use crate::error::RedactError;
use image::{ColorType, DynamicImage, ImageFormat};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Keys removed wherever they appear.
const METADATA_KEYS: &[&[u8]] = &[b"Metadata", b"PieceInfo", b"LastModified"];

// ── Images ───────────────────────────────────────────────────────────────

/// Rebuild an image from its raw pixels, keeping colour type and dimensions.
pub fn strip_image(img: &DynamicImage) -> DynamicImage {
    match img.color() {
        ColorType::L8 => DynamicImage::ImageLuma8(img.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(img.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(img.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(img.to_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(img.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(img.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(img.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(img.to_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(img.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(img.to_rgba32f()),
        _ => DynamicImage::ImageRgba8(img.to_rgba8()),
    }
}

/// Write a metadata-free copy of `img` in the format implied by `path`.
///
/// Colour types the target encoder cannot store (alpha or 16-bit in JPEG,
/// 16-bit in BMP) are narrowed to 8-bit RGB or luma.
pub fn save_clean_image(img: &DynamicImage, path: &Path) -> Result<(), RedactError> {
    let format = ImageFormat::from_path(path).map_err(|e| RedactError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason: format!("cannot infer output format: {e}"),
    })?;

    let clean = strip_image(img);
    let clean = match (format, clean.color()) {
        (ImageFormat::Jpeg, ColorType::L8) => clean,
        (ImageFormat::Jpeg, ColorType::L16 | ColorType::La8 | ColorType::La16) => {
            DynamicImage::ImageLuma8(clean.to_luma8())
        }
        (ImageFormat::Jpeg, ColorType::Rgb8) => clean,
        (ImageFormat::Jpeg, _) => DynamicImage::ImageRgb8(clean.to_rgb8()),
        (ImageFormat::Bmp, ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8) => clean,
        (ImageFormat::Bmp, _) => DynamicImage::ImageRgba8(clean.to_rgba8()),
        _ => clean,
    };

    clean
        .save_with_format(path, format)
        .map_err(|e| RedactError::SanitizeFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    debug!("Wrote clean {:?} image {}", format, path.display());
    Ok(())
}

// ── PDFs ─────────────────────────────────────────────────────────────────

/// Remove document-level and per-object metadata in place.
pub fn strip_pdf_metadata(doc: &mut Document) -> usize {
    let mut removed = 0;

    // Metadata streams become unreachable once their references go.
    let mut orphaned: BTreeSet<ObjectId> = BTreeSet::new();
    for object in doc.objects.values_mut() {
        let dict = match object {
            Object::Dictionary(d) => d,
            Object::Stream(s) => &mut s.dict,
            _ => continue,
        };
        for key in METADATA_KEYS {
            if let Some(value) = dict.remove(*key) {
                if let Object::Reference(id) = value {
                    orphaned.insert(id);
                }
                removed += 1;
            }
        }
    }
    for id in orphaned {
        doc.objects.remove(&id);
    }

    if let Ok(Object::Reference(info_id)) = doc.trailer.get(b"Info") {
        let info_id = *info_id;
        doc.objects.remove(&info_id);
        removed += 1;
    }
    let fresh_info = doc.add_object(Dictionary::new());
    doc.trailer.set("Info", fresh_info);

    debug!("Removed {} metadata entries", removed);
    removed
}

/// Give the document a new random file identifier.
fn assign_fresh_id(doc: &mut Document) {
    let id = Uuid::new_v4().as_bytes().to_vec();
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id, StringFormat::Hexadecimal),
        ]),
    );
}

/// Encrypt with RC4-128; owner and user password are the same.
pub fn encrypt_pdf(doc: &mut Document, password: &str, path: &Path) -> Result<(), RedactError> {
    let encryption_failed = |detail: String| RedactError::EncryptionFailed {
        path: path.to_path_buf(),
        detail,
    };
    let version = EncryptionVersion::V2 {
        document: &*doc,
        owner_password: password,
        user_password: password,
        key_length: 128,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version).map_err(|e| encryption_failed(e.to_string()))?;
    doc.encrypt(&state).map_err(|e| encryption_failed(e.to_string()))
}

/// Strip metadata from `pdf_in`, encrypt it, and write the result to `pdf_out`.
///
/// Returns the page count of the written document.
pub fn strip_and_encrypt(pdf_in: &Path, pdf_out: &Path, password: &str) -> Result<usize, RedactError> {
    if password.is_empty() {
        return Err(RedactError::MissingPassword);
    }
    let mut doc = Document::load(pdf_in).map_err(|e| RedactError::SanitizeFailed {
        path: pdf_in.to_path_buf(),
        detail: format!("cannot load PDF: {e}"),
    })?;

    strip_pdf_metadata(&mut doc);
    assign_fresh_id(&mut doc);
    let pages = doc.get_pages().len();

    encrypt_pdf(&mut doc, password, pdf_out)?;

    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(|e| RedactError::EncryptionFailed {
        path: pdf_out.to_path_buf(),
        detail: format!("cannot serialise PDF: {e}"),
    })?;
    std::fs::write(pdf_out, &buf).map_err(|source| RedactError::OutputWriteFailed {
        path: pdf_out.to_path_buf(),
        source,
    })?;
    info!("Sanitised and encrypted {} ({} pages)", pdf_out.display(), pages);
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{codecs::jpeg::JpegEncoder, RgbImage};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    const MARKER: &str = "JANE-DOE-4417";

    /// One-page text PDF with an Info dictionary and an XMP stream.
    fn text_pdf(path: &Path) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(MARKER)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "PieceInfo" => dictionary! { "App" => "secret" },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let xmp_id = doc.add_object(Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            b"<x:xmpmeta>creator: scanner-9000</x:xmpmeta>".to_vec(),
        ));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "Metadata" => xmp_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Author" => Object::string_literal("Records Office"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.save(path).unwrap();
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn metadata_entries_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.pdf");
        text_pdf(&path);

        let mut doc = Document::load(&path).unwrap();
        let removed = strip_pdf_metadata(&mut doc);
        assert!(removed >= 3, "removed {removed}");

        let out = dir.path().join("stripped.pdf");
        doc.save(&out).unwrap();
        let bytes = std::fs::read(&out).unwrap();
        assert!(!contains(&bytes, b"Records Office"));
        assert!(!contains(&bytes, b"scanner-9000"));
        assert!(!contains(&bytes, b"PieceInfo"));
        // Unencrypted, the content survives.
        assert!(contains(&bytes, MARKER.as_bytes()));
    }

    #[test]
    fn encrypted_output_hides_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        text_pdf(&input);
        assert!(contains(&std::fs::read(&input).unwrap(), MARKER.as_bytes()));

        let pages = strip_and_encrypt(&input, &output, "s3cret").unwrap();
        assert_eq!(pages, 1);

        let bytes = std::fs::read(&output).unwrap();
        assert!(contains(&bytes, b"/Encrypt"));
        assert!(!contains(&bytes, MARKER.as_bytes()));
        assert!(!contains(&bytes, b"Records Office"));
    }

    #[test]
    fn encrypted_output_opens_only_with_its_password() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        text_pdf(&input);
        strip_and_encrypt(&input, &output, "s3cret").unwrap();

        let mut wrong = Document::load(&output).unwrap();
        assert!(wrong.decrypt("guess").is_err());
        let mut right = Document::load(&output).unwrap();
        right.decrypt("s3cret").unwrap();
        assert!(right.trailer.get(b"Info").is_err());
    }

    #[test]
    fn empty_password_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        text_pdf(&input);
        let err = strip_and_encrypt(&input, &dir.path().join("out.pdf"), "").unwrap_err();
        assert!(matches!(err, RedactError::MissingPassword));
    }

    #[test]
    fn unreadable_pdf_fails_sanitising() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("junk.pdf");
        std::fs::write(&input, b"%PDF-1.4 nothing else").unwrap();
        let err = strip_and_encrypt(&input, &dir.path().join("out.pdf"), "pw").unwrap_err();
        assert!(matches!(err, RedactError::SanitizeFailed { .. }));
    }

    /// JPEG bytes with an APP1 Exif segment spliced in after SOI.
    fn jpeg_with_exif(img: &RgbImage) -> Vec<u8> {
        let mut plain = Vec::new();
        JpegEncoder::new_with_quality(&mut plain, 95)
            .encode_image(img)
            .unwrap();

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(b"II*\0\x08\0\0\0\0\0\0\0\0\0");
        let len = (payload.len() + 2) as u16;

        let mut out = plain[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&plain[2..]);
        out
    }

    #[test]
    fn exif_is_not_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        let output = dir.path().join("redacted_photo.jpg");

        let src = RgbImage::from_fn(64, 48, |x, y| image::Rgb([(x * 4) as u8, (y * 5) as u8, 90]));
        let tagged = jpeg_with_exif(&src);
        assert!(contains(&tagged, b"Exif"));
        std::fs::write(&input, &tagged).unwrap();

        let decoded = image::open(&input).unwrap();
        let clean = strip_image(&decoded);
        assert_eq!((clean.width(), clean.height()), (64, 48));
        assert_eq!(clean.color(), decoded.color());
        assert_eq!(clean.as_bytes(), decoded.as_bytes());

        save_clean_image(&decoded, &output).unwrap();
        let written = std::fs::read(&output).unwrap();
        assert!(!contains(&written, b"Exif"));
        let reread = image::open(&output).unwrap();
        assert_eq!((reread.width(), reread.height()), (64, 48));
    }

    #[test]
    fn rgba_is_narrowed_for_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.jpeg");
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(8, 8));
        save_clean_image(&img, &out).unwrap();
        assert_eq!(image::open(&out).unwrap().color(), ColorType::Rgb8);
    }
}
