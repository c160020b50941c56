//! Detection oracles: given one page image, find the PII on it.
//!
//! Two backends share the [`DetectionOracle`] trait so the rest of the
//! pipeline never knows which one produced a box:
//!
//! ```text
//!            ┌── vlm  ── PNG → edgequake-llm chat → JSON → parse ──┐
//! Page ──────┤                                                      ├──▶ Vec<Detection>
//!            └── ocr  ── PNG → tesseract TSV → RegexSet filter ────┘
//! ```
//!
//! The oracle is built once per run by [`build_oracle`] and shared as
//! `Arc<dyn DetectionOracle>`. Tests inject their own implementation through
//! [`crate::batch::Redactor::with_oracle`].

pub mod ocr;
pub mod parse;
pub mod vlm;

use crate::config::{OracleKind, RedactionConfig};
use crate::document::{Detection, Page};
use crate::error::{PageError, RedactError};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use ocr::OcrOracle;
pub use vlm::VlmOracle;

/// A backend that locates PII regions on a page.
#[async_trait]
pub trait DetectionOracle: Send + Sync {
    /// Short name for logs and error messages.
    fn name(&self) -> &str;

    /// Detect PII on one page. Boxes are in the page's pixel coordinates.
    async fn detect(&self, page: &Page) -> Result<Vec<Detection>, PageError>;
}

/// Construct the configured oracle, verifying its backend is reachable.
pub async fn build_oracle(config: &RedactionConfig) -> Result<Arc<dyn DetectionOracle>, RedactError> {
    let oracle: Arc<dyn DetectionOracle> = match config.oracle {
        OracleKind::Vlm => {
            let provider = resolve_provider(config).await?;
            info!(
                "Detection oracle: vlm ({})",
                config.model.as_deref().unwrap_or("provider default")
            );
            Arc::new(VlmOracle::new(provider, config))
        }
        OracleKind::Ocr => {
            let oracle = OcrOracle::new(config)?;
            oracle.probe().await?;
            info!("Detection oracle: ocr ({})", config.tesseract_binary);
            Arc::new(oracle)
        }
    };
    Ok(oracle)
}

/// Run one detection under a deadline.
///
/// On expiry the in-flight call is dropped and [`PageError::Timeout`] returned.
pub async fn detect_with_timeout(
    oracle: &dyn DetectionOracle,
    page: &Page,
    timeout: Duration,
) -> Result<Vec<Detection>, PageError> {
    match tokio::time::timeout(timeout, oracle.detect(page)).await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout {
            page: page.number(),
            secs: timeout.as_secs(),
        }),
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, RedactError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RedactError::OracleUnavailable {
            oracle: format!("vlm:{provider_name}"),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key** (`OPENAI_API_KEY`), then full auto-detection via
///    [`ProviderFactory::from_env`].
async fn resolve_provider(config: &RedactionConfig) -> Result<Arc<dyn LLMProvider>, RedactError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| RedactError::OracleUnavailable {
            oracle: "vlm".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or use --oracle ocr.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::BBox;
    use image::{DynamicImage, RgbImage};

    struct SlowOracle;

    #[async_trait]
    impl DetectionOracle for SlowOracle {
        fn name(&self) -> &str {
            "slow"
        }

        async fn detect(&self, _page: &Page) -> Result<Vec<Detection>, PageError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![Detection::new(BBox::new(0, 0, 1, 1), "names")])
        }
    }

    fn page() -> Page {
        Page::new(1, DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_times_out() {
        let err = detect_with_timeout(&SlowOracle, &page(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::Timeout { page: 2, secs: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_enough_oracle_returns_detections() {
        let found = detect_with_timeout(&SlowOracle, &page(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
