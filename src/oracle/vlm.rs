//! VLM-backed detection: page PNG in, JSON boxes out.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! with 500 ms base and 3 retries waits 500 ms → 1 s → 2 s per page.
//! Only transport errors are retried; an answer that does not parse goes
//! through [`super::parse`] and is never re-requested.

use super::parse::parse_detections;
use super::DetectionOracle;
use crate::config::RedactionConfig;
use crate::document::{Detection, Page};
use crate::error::PageError;
use crate::prompts::{detection_system_prompt, detection_user_prompt};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Detection through an `edgequake-llm` vision provider.
pub struct VlmOracle {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    user_prompt: String,
    labels: Vec<String>,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl VlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &RedactionConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| detection_system_prompt(&config.labels));
        Self {
            provider,
            system_prompt,
            user_prompt: detection_user_prompt(&config.labels),
            labels: config.labels.clone(),
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Call the provider, retrying transport failures. Returns the raw text.
    async fn request(&self, page_num: usize, image: ImageData) -> Result<String, PageError> {
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(&self.user_prompt, vec![image]),
        ];

        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(PageError::OracleFailed {
            page: page_num,
            retries: self.max_retries.min(u8::MAX as u32) as u8,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

#[async_trait]
impl DetectionOracle for VlmOracle {
    fn name(&self) -> &str {
        "vlm"
    }

    async fn detect(&self, page: &Page) -> Result<Vec<Detection>, PageError> {
        let page_num = page.number();
        let image = encode_page(&page.image).map_err(|e| PageError::OracleFailed {
            page: page_num,
            retries: 0,
            detail: format!("PNG encoding failed: {e}"),
        })?;

        let raw = self.request(page_num, image).await?;
        debug!("Page {}: raw model output: {}", page_num, raw);

        let detections = parse_detections(&raw, page_num, &self.labels)?;
        info!("Page {}: {} detections", page_num, detections.len());
        debug!("Page {}: {:?}", page_num, detections);
        Ok(detections)
    }
}

/// Encode a page as a base64 PNG ready for the VLM API.
///
/// PNG keeps small print crisp, and `detail: "high"` lets GPT-4-class models
/// tile the full image instead of a single 512 px overview.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

fn build_options(config: &RedactionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
