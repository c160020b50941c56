//! OCR-backed detection: Tesseract word boxes filtered by PII regexes.
//!
//! Tesseract is driven through its CLI in TSV mode:
//!
//! ```text
//! tesseract <page.png> stdout -l <lang> --psm <psm> tsv
//! level page_num block_num par_num line_num word_num left top width height conf text
//! ```
//!
//! Every row with non-empty text becomes an [`OcrToken`]. A token whose
//! lowercased text matches any configured pattern is redacted with the
//! generic [`GENERIC_LABEL`]; OCR output carries no semantic class.

use super::DetectionOracle;
use crate::config::RedactionConfig;
use crate::document::{BBox, Detection, Page, GENERIC_LABEL};
use crate::error::{PageError, RedactError};
use async_trait::async_trait;
use image::DynamicImage;
use regex::RegexSet;
use std::io::Write;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

/// A recognised word and its pixel box `[left, top, left+width, top+height]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrToken {
    pub text: String,
    pub bbox: [i64; 4],
}

/// Thin async wrapper around the `tesseract` binary.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    lang: String,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>, lang: impl Into<String>, psm: u8) -> Self {
        Self {
            binary: binary.into(),
            lang: lang.into(),
            psm,
        }
    }

    /// Run `tesseract --version`; returns the first line of its output.
    pub async fn version(&self) -> Result<String, RedactError> {
        let unavailable = |hint: String| RedactError::OracleUnavailable {
            oracle: "ocr".to_string(),
            hint,
        };
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                unavailable(format!(
                    "Cannot execute '{}': {}\nInstall Tesseract or set --tesseract-bin.",
                    self.binary, e
                ))
            })?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "'{} --version' exited with {}",
                self.binary, output.status
            )));
        }
        // Older releases print the banner on stderr.
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or("tesseract")
            .trim()
            .to_string())
    }

    /// Recognise words on an image.
    pub async fn recognize(&self, img: &DynamicImage) -> Result<Vec<OcrToken>, String> {
        let start = Instant::now();
        let owned = img.clone();
        let input = tokio::task::spawn_blocking(move || write_temp_png(&owned))
            .await
            .map_err(|e| format!("PNG task panicked: {e}"))??;

        debug!(
            "Running: {} {} stdout -l {} --psm {} tsv",
            self.binary,
            input.path().display(),
            self.lang,
            self.psm
        );
        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to run {}: {}", self.binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tesseract exited with {}: {}", output.status, stderr.trim()));
        }

        let tokens = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!("OCR: {} tokens in {} ms", tokens.len(), start.elapsed().as_millis());
        Ok(tokens)
    }
}

fn write_temp_png(img: &DynamicImage) -> Result<NamedTempFile, String> {
    let mut file = tempfile::Builder::new()
        .prefix("docsanct-ocr-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| format!("Cannot create temp file: {e}"))?;
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    file.write_all(&buf)
        .map_err(|e| format!("Cannot write temp PNG: {e}"))?;
    Ok(file)
}

/// Parse Tesseract TSV output into word tokens.
///
/// The header row, short rows and rows with blank text are skipped.
pub fn parse_tsv(tsv: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<i64>().ok();
        let (Some(left), Some(top), Some(width), Some(height)) = (num(6), num(7), num(8), num(9)) else {
            continue;
        };
        tokens.push(OcrToken {
            text: text.to_string(),
            bbox: [left, top, left + width, top + height],
        });
    }
    tokens
}

/// Keep the tokens whose lowercased text matches any pattern.
pub fn match_tokens(tokens: &[OcrToken], patterns: &RegexSet) -> Vec<Detection> {
    tokens
        .iter()
        .filter(|t| patterns.is_match(&t.text.to_lowercase()))
        .map(|t| {
            let [x1, y1, x2, y2] = t.bbox;
            Detection::new(BBox::new(x1, y1, x2, y2), GENERIC_LABEL)
        })
        .collect()
}

/// Detection through Tesseract and a PII regex set.
pub struct OcrOracle {
    engine: TesseractEngine,
    patterns: RegexSet,
}

impl OcrOracle {
    /// Compile the configured patterns. Does not touch the binary; see [`Self::probe`].
    pub fn new(config: &RedactionConfig) -> Result<Self, RedactError> {
        let patterns = RegexSet::new(&config.pii_patterns)
            .map_err(|e| RedactError::InvalidConfig(format!("Invalid PII pattern: {e}")))?;
        Ok(Self {
            engine: TesseractEngine::new(
                config.tesseract_binary.clone(),
                config.tesseract_lang.clone(),
                config.tesseract_psm,
            ),
            patterns,
        })
    }

    /// Check that the Tesseract binary runs.
    pub async fn probe(&self) -> Result<(), RedactError> {
        let version = self.engine.version().await?;
        info!("Tesseract available: {}", version);
        Ok(())
    }
}

#[async_trait]
impl DetectionOracle for OcrOracle {
    fn name(&self) -> &str {
        "ocr"
    }

    async fn detect(&self, page: &Page) -> Result<Vec<Detection>, PageError> {
        let tokens = self
            .engine
            .recognize(&page.image)
            .await
            .map_err(|detail| PageError::OracleFailed {
                page: page.number(),
                retries: 0,
                detail,
            })?;
        let detections = match_tokens(&tokens, &self.patterns);
        info!(
            "Page {}: {} of {} OCR tokens flagged",
            page.number(),
            detections.len(),
            tokens.len()
        );
        Ok(detections)
    }
}
