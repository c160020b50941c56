//! Configuration types for batch redaction.
//!
//! All behaviour is controlled through [`RedactionConfig`], built via its
//! [`RedactionConfigBuilder`]. Everything the original deployment hard-coded
//! (directories, the encryption password, the extension allowlist, the label
//! vocabulary, the OCR patterns) is a field here, and can also be supplied
//! from a TOML file through [`FileConfig`].

use crate::document::OTHER_LABEL;
use crate::error::RedactError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default label vocabulary offered to the VLM.
pub const DEFAULT_LABELS: &[&str] = &[
    "names",
    "address",
    "date",
    "signature",
    "registration_number",
    "bank_details",
    "email",
    "phone",
    "credit_card_number",
    "ssn",
    "date_of_birth",
    OTHER_LABEL,
];

/// Default image extensions accepted by the orchestrator.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff"];

/// Default OCR token patterns, matched against lowercased token text.
pub const DEFAULT_PII_PATTERNS: &[&str] = &[
    r"account\s*(no|number)?",
    r"\bbank\b",
    r"ifsc",
    r"signature",
    r"address",
    r"\bname\b",
    r"e-?mail|@",
    r"phone|mobile|^\+?\d[\d\s().-]{7,}\d$",
    r"\bpan\b",
    r"aadhaa?r",
    r"\bssn\b|^\d{3}-\d{2}-\d{4}$",
    r"\bdob\b|birth",
];

/// Upper bound on VLM retries per page.
pub const MAX_RETRIES: u32 = 10;

/// Directory names used inside a run directory; the archive may not shadow them.
const RESERVED_RUN_ENTRIES: &[&str] = &["outputs", "scratch", "uploads"];

/// Which detection backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Vision Language Model returning labelled boxes as JSON. (default)
    #[default]
    Vlm,
    /// Tesseract OCR with a regex filter over recognised tokens.
    Ocr,
}

/// What to do with a page whose model output stays unparseable after repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseFailurePolicy {
    /// Treat the page as having no detections and flag it for review. (default)
    #[default]
    FailOpen,
    /// Fail the whole document.
    FailClosed,
}

/// Configuration for a redaction run.
///
/// # Example
/// ```rust
/// use docsanct::{OracleKind, RedactionConfig};
///
/// let config = RedactionConfig::builder()
///     .pdf_password("s3cret-passphrase")
///     .oracle(OracleKind::Ocr)
///     .page_concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RedactionConfig {
    /// Root under which each run creates `<run_id>/`. Default: `redacted_files`.
    pub output_dir: PathBuf,

    /// File name of the zip written into the run directory. Default: `redacted_documents.zip`.
    pub archive_name: String,

    /// Password applied to every output PDF. Required; there is no default.
    pub pdf_password: Option<String>,

    /// Subdirectory of the upload root holding PDFs. Default: `REDACT_PDFs`.
    pub pdf_subdir: String,

    /// Subdirectory of the upload root holding images. Default: `REDACT_PICs`.
    pub image_subdir: String,

    /// Image extensions (case-insensitive, without dot).
    pub image_extensions: Vec<String>,

    /// Labels the VLM may assign.
    pub labels: Vec<String>,

    /// Regexes flagging OCR tokens as PII.
    pub pii_patterns: Vec<String>,

    /// Detection backend. Default: [`OracleKind::Vlm`].
    pub oracle: OracleKind,

    /// Failure mode for unparseable model output. Default: fail-open.
    pub parse_failure_policy: ParseFailurePolicy,

    /// LLM model identifier. If None, uses `gpt-4.1-nano` when a provider is named.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom detection system prompt. If None, built from `labels`.
    pub system_prompt: Option<String>,

    /// Output-token cap per detection call. Default: 1000.
    ///
    /// A page rarely holds more than a few dozen PII fields; a tight cap
    /// stops a confused model from rambling for thousands of tokens.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Retries on a transient VLM failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-page oracle timeout in seconds. Default: 120.
    pub oracle_timeout_secs: u64,

    /// Concurrent oracle calls within one document. Default: 4.
    pub page_concurrency: usize,

    /// Documents processed concurrently within one batch. Default: 2.
    pub document_concurrency: usize,

    /// PDF rasterisation DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Cap on either edge of a rendered page, in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Directory containing libpdfium. Falls back to `PDFIUM_LIB_PATH`, `./`, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Tesseract executable. Default: `tesseract`.
    pub tesseract_binary: String,

    /// Tesseract language. Default: `eng`.
    pub tesseract_lang: String,

    /// Tesseract page segmentation mode. Default: 3.
    pub tesseract_psm: u8,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("redacted_files"),
            archive_name: "redacted_documents.zip".to_string(),
            pdf_password: None,
            pdf_subdir: "REDACT_PDFs".to_string(),
            image_subdir: "REDACT_PICs".to_string(),
            image_extensions: to_strings(DEFAULT_IMAGE_EXTENSIONS),
            labels: to_strings(DEFAULT_LABELS),
            pii_patterns: to_strings(DEFAULT_PII_PATTERNS),
            oracle: OracleKind::default(),
            parse_failure_policy: ParseFailurePolicy::default(),
            model: None,
            provider_name: None,
            provider: None,
            system_prompt: None,
            max_tokens: 1000,
            temperature: 0.0,
            max_retries: 3,
            retry_backoff_ms: 500,
            oracle_timeout_secs: 120,
            page_concurrency: 4,
            document_concurrency: 2,
            dpi: 200,
            max_rendered_pixels: 4000,
            pdfium_library_path: None,
            tesseract_binary: "tesseract".to_string(),
            tesseract_lang: "eng".to_string(),
            tesseract_psm: 3,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RedactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedactionConfig")
            .field("output_dir", &self.output_dir)
            .field("archive_name", &self.archive_name)
            .field("pdf_password", &self.pdf_password.as_ref().map(|_| "<redacted>"))
            .field("pdf_subdir", &self.pdf_subdir)
            .field("image_subdir", &self.image_subdir)
            .field("image_extensions", &self.image_extensions)
            .field("labels", &self.labels)
            .field("pii_patterns", &self.pii_patterns.len())
            .field("oracle", &self.oracle)
            .field("parse_failure_policy", &self.parse_failure_policy)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("oracle_timeout_secs", &self.oracle_timeout_secs)
            .field("page_concurrency", &self.page_concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("dpi", &self.dpi)
            .finish()
    }
}

impl RedactionConfig {
    /// Create a new builder for `RedactionConfig`.
    pub fn builder() -> RedactionConfigBuilder {
        RedactionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The validated password. Only `None` on configs that bypassed the builder.
    pub fn password(&self) -> Result<&str, RedactError> {
        match self.pdf_password.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(RedactError::MissingPassword),
        }
    }
}

/// Builder for [`RedactionConfig`].
#[derive(Debug)]
pub struct RedactionConfigBuilder {
    config: RedactionConfig,
}

impl RedactionConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.archive_name = name.into();
        self
    }

    pub fn pdf_password(mut self, password: impl Into<String>) -> Self {
        self.config.pdf_password = Some(password.into());
        self
    }

    pub fn pdf_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.pdf_subdir = name.into();
        self
    }

    pub fn image_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.image_subdir = name.into();
        self
    }

    pub fn image_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.image_extensions = exts
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn pii_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.pii_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn oracle(mut self, kind: OracleKind) -> Self {
        self.config.oracle = kind;
        self
    }

    pub fn parse_failure_policy(mut self, policy: ParseFailurePolicy) -> Self {
        self.config.parse_failure_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Retries per page, capped at [`MAX_RETRIES`].
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn oracle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.oracle_timeout_secs = secs;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn tesseract_binary(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_binary = bin.into();
        self
    }

    pub fn tesseract_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_lang = lang.into();
        self
    }

    pub fn tesseract_psm(mut self, psm: u8) -> Self {
        self.config.tesseract_psm = psm;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Overlay every field set in a [`FileConfig`].
    pub fn apply_file(mut self, file: FileConfig) -> Self {
        let c = &mut self.config;
        if let Some(v) = file.output_dir {
            c.output_dir = v;
        }
        if let Some(v) = file.archive_name {
            c.archive_name = v;
        }
        if let Some(v) = file.pdf_password {
            c.pdf_password = Some(v);
        }
        if let Some(v) = file.pdf_subdir {
            c.pdf_subdir = v;
        }
        if let Some(v) = file.image_subdir {
            c.image_subdir = v;
        }
        if let Some(v) = file.labels {
            c.labels = v;
        }
        if let Some(v) = file.pii_patterns {
            c.pii_patterns = v;
        }
        if let Some(v) = file.oracle {
            c.oracle = v;
        }
        if let Some(v) = file.parse_failure_policy {
            c.parse_failure_policy = v;
        }
        if let Some(v) = file.model {
            c.model = Some(v);
        }
        if let Some(v) = file.provider {
            c.provider_name = Some(v);
        }
        if let Some(v) = file.max_tokens {
            c.max_tokens = v;
        }
        if let Some(v) = file.oracle_timeout_secs {
            c.oracle_timeout_secs = v;
        }
        if let Some(v) = file.dpi {
            c.dpi = v;
        }
        if let Some(v) = file.tesseract_lang {
            c.tesseract_lang = v;
        }
        let mut builder = self;
        if let Some(v) = file.image_extensions {
            builder = builder.image_extensions(v);
        }
        if let Some(v) = file.page_concurrency {
            builder = builder.page_concurrency(v);
        }
        if let Some(v) = file.document_concurrency {
            builder = builder.document_concurrency(v);
        }
        builder
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RedactionConfig, RedactError> {
        let c = &self.config;
        c.password()?;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(RedactError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.image_extensions.is_empty() {
            return Err(RedactError::InvalidConfig(
                "At least one image extension is required".into(),
            ));
        }
        if c.image_extensions.iter().any(|e| e == "pdf") {
            return Err(RedactError::InvalidConfig(
                "'pdf' cannot be listed as an image extension".into(),
            ));
        }
        if c.labels.is_empty() {
            return Err(RedactError::InvalidConfig(
                "The label vocabulary must not be empty".into(),
            ));
        }
        if c.oracle == OracleKind::Ocr && c.pii_patterns.is_empty() {
            return Err(RedactError::InvalidConfig(
                "The OCR oracle needs at least one PII pattern".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(RedactError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.oracle_timeout_secs == 0 {
            return Err(RedactError::InvalidConfig(
                "oracle_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(RedactError::InvalidConfig(format!(
                "max_retries must be ≤ {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        validate_archive_name(&c.archive_name)?;
        if c.pdf_subdir == c.image_subdir {
            return Err(RedactError::InvalidConfig(
                "pdf_subdir and image_subdir must differ".into(),
            ));
        }
        Ok(self.config)
    }
}

/// The archive is written next to the run's working directories, so its
/// name must be a plain file name distinct from them.
fn validate_archive_name(name: &str) -> Result<(), RedactError> {
    let invalid = |why: &str| Err(RedactError::InvalidConfig(format!("archive_name '{name}' {why}")));
    if name.is_empty() || name == "." || name == ".." {
        return invalid("is not a file name");
    }
    if name.contains(['/', '\\']) {
        return invalid("must not contain a path separator");
    }
    if RESERVED_RUN_ENTRIES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return invalid("clashes with a run directory");
    }
    Ok(())
}

/// Optional settings loaded from a TOML file.
///
/// ```toml
/// output_dir = "/srv/redaction/out"
/// oracle = "ocr"
/// parse_failure_policy = "fail-closed"
/// image_extensions = ["png", "jpg", "jpeg", "tif", "tiff"]
/// pii_patterns = ["\\bpassport\\b", "\\biban\\b"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub archive_name: Option<String>,
    pub pdf_password: Option<String>,
    pub pdf_subdir: Option<String>,
    pub image_subdir: Option<String>,
    pub image_extensions: Option<Vec<String>>,
    pub labels: Option<Vec<String>>,
    pub pii_patterns: Option<Vec<String>>,
    pub oracle: Option<OracleKind>,
    pub parse_failure_policy: Option<ParseFailurePolicy>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub max_tokens: Option<usize>,
    pub oracle_timeout_secs: Option<u64>,
    pub page_concurrency: Option<usize>,
    pub document_concurrency: Option<usize>,
    pub dpi: Option<u32>,
    pub tesseract_lang: Option<String>,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, RedactError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RedactError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
            .map_err(|e| RedactError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
