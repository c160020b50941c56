//! CLI binary for docsanct.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RedactionConfig` and prints the batch report.

use anyhow::{Context, Result};
use clap::Parser;
use docsanct::{
    BatchProgressCallback, BatchReport, FileConfig, OracleKind, ParseFailurePolicy, ProgressCallback,
    RedactionConfig, Redactor,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over documents, one log line per
/// finished document. Documents finish out of order when
/// `--document-concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-document wall-clock start times.
    start_times: Mutex<HashMap<String, Instant>>,
    /// Pages finished so far, per document.
    pages_done: Mutex<HashMap<String, usize>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning uploads…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            pages_done: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Redacting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, document: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(document))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Redacting {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, document: &str) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(document.to_string(), Instant::now());
        }
        self.bar.set_message(document.to_string());
    }

    fn on_page_complete(&self, document: &str, page_num: usize, total_pages: usize, _detections: usize) {
        let done = self
            .pages_done
            .lock()
            .map(|mut p| {
                let n = p.entry(document.to_string()).or_insert(0);
                *n += 1;
                *n
            })
            .unwrap_or(page_num);
        self.bar.set_message(format!("{document}  page {done}/{total_pages}"));
    }

    fn on_document_complete(&self, document: &str, detections: usize) {
        let secs = self.elapsed_secs(document);
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            green("✓"),
            document,
            dim(&format!("{detections:>4} boxes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, document: &str, error: &str) {
        let secs = self.elapsed_secs(document);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            document,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        let total = succeeded + failed;
        if failed == 0 {
            eprintln!(
                "{} {} documents redacted",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents redacted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Redact an upload root (REDACT_PDFs/ and REDACT_PICs/) and zip the results
  docsanct uploads/ --pdf-password 'correct horse'

  # Redact individual files
  docsanct scan.png contract.pdf --output-dir out/

  # Offline detection with Tesseract and regex patterns
  docsanct --oracle ocr --lang deu uploads/

  # Local vision model via Ollama
  docsanct --provider ollama --model llama3.2-vision uploads/

  # Stop on unparseable model output instead of flagging the page
  docsanct --fail-closed uploads/

  # Machine-readable report
  docsanct --json uploads/ > report.json

CONFIG FILE (--config docsanct.toml):
  output_dir = "/srv/redaction/out"
  oracle = "vlm"
  parse_failure_policy = "fail-closed"
  labels = ["names", "address", "date_of_birth", "registration_number"]

  Flags override values from the file.

ENVIRONMENT VARIABLES:
  DOCSANCT_PDF_PASSWORD   Password applied to every output PDF
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory or file of an existing libpdfium
  RUST_LOG                Log filter (overrides -v / -q)

OUTPUT LAYOUT:
  <output-dir>/<run-id>/outputs/redacted_<name>
  <output-dir>/<run-id>/redacted_documents.zip
"#;

/// Detect and redact PII in PDFs and images.
#[derive(Parser, Debug)]
#[command(
    name = "docsanct",
    version,
    about = "Detect and redact PII in PDFs and images",
    long_about = "Detect personally identifiable information in scanned PDFs and images with a \
Vision Language Model (or Tesseract OCR plus regex patterns), black it out, strip metadata and \
write password-protected PDFs. Successful outputs are bundled into one zip per run.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// An upload root directory, or one or more PDF/image files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// TOML config file; flags override its values.
    #[arg(short, long, env = "DOCSANCT_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for run outputs.
    #[arg(short, long, env = "DOCSANCT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Password applied to every output PDF.
    #[arg(long, env = "DOCSANCT_PDF_PASSWORD", hide_env_values = true)]
    pdf_password: Option<String>,

    /// Detection backend.
    #[arg(long, env = "DOCSANCT_ORACLE", value_enum)]
    oracle: Option<OracleArg>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, llama3.2-vision).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Path to a text file containing a custom detection system prompt.
    #[arg(long, env = "DOCSANCT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// PDF rasterisation DPI (72–400).
    #[arg(long, env = "DOCSANCT_DPI",
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: Option<u32>,

    /// Concurrent oracle calls per document.
    #[arg(long, env = "DOCSANCT_PAGE_CONCURRENCY")]
    page_concurrency: Option<usize>,

    /// Documents processed concurrently.
    #[arg(long, env = "DOCSANCT_DOCUMENT_CONCURRENCY")]
    document_concurrency: Option<usize>,

    /// Max model output tokens per page.
    #[arg(long, env = "DOCSANCT_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Per-page oracle timeout in seconds.
    #[arg(long, env = "DOCSANCT_TIMEOUT")]
    timeout: Option<u64>,

    /// Fail a document when model output cannot be parsed.
    #[arg(long, env = "DOCSANCT_FAIL_CLOSED")]
    fail_closed: bool,

    /// Directory or file of the pdfium shared library.
    #[arg(long, env = "DOCSANCT_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Tesseract executable for `--oracle ocr`.
    #[arg(long, env = "DOCSANCT_TESSERACT_BIN")]
    tesseract_bin: Option<String>,

    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    #[arg(long, env = "DOCSANCT_LANG")]
    lang: Option<String>,

    /// Write redacted files only, without the zip (upload-root mode).
    #[arg(long, env = "DOCSANCT_NO_ARCHIVE")]
    no_archive: bool,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "DOCSANCT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCSANCT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSANCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSANCT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OracleArg {
    Vlm,
    Ocr,
}

impl From<OracleArg> for OracleKind {
    fn from(v: OracleArg) -> Self {
        match v {
            OracleArg::Vlm => OracleKind::Vlm,
            OracleArg::Ocr => OracleKind::Ocr,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress).await?;
    let redactor = Redactor::from_config(config)
        .await
        .context("Cannot start the redaction pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let upload_root = match cli.inputs.as_slice() {
        [single] if single.is_dir() => Some(single.clone()),
        _ => None,
    };
    let report = match upload_root {
        Some(root) if cli.no_archive => redactor.run(&root).await,
        Some(root) => redactor.run_and_archive(&root).await,
        None => redactor.redact_files(&cli.inputs).await,
    }
    .context("Redaction failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&report);
    }

    if !report.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(report: &BatchReport) {
    for skipped in &report.skipped {
        eprintln!("  {} {}  {}", dim("-"), skipped.input.display(), dim(&skipped.reason));
    }
    for failure in &report.failures {
        eprintln!(
            "  {} {}  {} {}",
            red("✗"),
            failure.input.display(),
            red(&failure.category),
            dim(&failure.reason),
        );
    }
    if let Some(ref failure) = report.archive_error {
        eprintln!(
            "  {} {}  {} {}",
            red("✗"),
            failure.input.display(),
            red(&failure.category),
            dim(&failure.reason),
        );
    }
    for flagged in report.flagged_for_review() {
        eprintln!(
            "  {} {}  pages {:?} left unredacted, review before release",
            cyan("⚠"),
            flagged.output.display(),
            flagged.pages_flagged_for_review,
        );
    }

    let boxes: usize = report.outputs.iter().map(|o| o.detections).sum();
    eprintln!(
        "{}  {} redacted  {} failed  {} skipped  {} boxes  {}ms",
        if report.is_complete() { green("✔") } else { cyan("⚠") },
        report.outputs.len(),
        report.failures.len(),
        report.skipped.len(),
        boxes,
        report.total_duration_ms,
    );
    match &report.archive {
        Some(archive) => eprintln!("   →  {}", bold(&archive.display().to_string())),
        None => {
            for output in &report.outputs {
                eprintln!("   →  {}", output.output.display());
            }
        }
    }
}

/// Map the config file and CLI args to `RedactionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<RedactionConfig> {
    let mut builder = RedactionConfig::builder();

    if let Some(ref path) = cli.config {
        let file = FileConfig::load(path).context("Invalid config file")?;
        builder = builder.apply_file(file);
    }

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(ref password) = cli.pdf_password {
        builder = builder.pdf_password(password);
    }
    if let Some(ref oracle) = cli.oracle {
        builder = builder.oracle(oracle.clone().into());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(n) = cli.page_concurrency {
        builder = builder.page_concurrency(n);
    }
    if let Some(n) = cli.document_concurrency {
        builder = builder.document_concurrency(n);
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.oracle_timeout_secs(secs);
    }
    if cli.fail_closed {
        builder = builder.parse_failure_policy(ParseFailurePolicy::FailClosed);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(path);
    }
    if let Some(ref bin) = cli.tesseract_bin {
        builder = builder.tesseract_binary(bin);
    }
    if let Some(ref lang) = cli.lang {
        builder = builder.tesseract_lang(lang);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
