//! Optional LLM assist: refine each page's markdown with a vision model.
//!
//! The engine calls [`AssistService::refine_page_blocking`] once per page
//! with the rendered page and its extracted text. A failed call is reported
//! as an [`AssistError`] and the engine keeps the extracted text for that
//! page, so assist can only improve a conversion, never break it.
//!
//! ## Provider resolution
//!
//! From most to least specific:
//!
//! 1. **Named provider** (`assist.provider`, optional `assist.model`)
//! 2. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
//! 3. **OpenAI** when `OPENAI_API_KEY` is set
//! 4. **Auto-detection** via [`ProviderFactory::from_env`]
//!
//! If none of these yields a provider the invoker logs the
//! [`AssistUnavailable`] reason and converts without assist.

pub mod postprocess;
pub mod prompts;

use crate::config::AssistSettings;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Why the assist service could not be created.
#[derive(Debug, Error)]
pub enum AssistUnavailable {
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    Provider { provider: String, hint: String },

    #[error("no async runtime to drive provider calls")]
    NoRuntime,
}

/// A single page refinement that did not produce markdown.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("page {page}: could not encode page image: {source}")]
    Encode {
        page: usize,
        #[source]
        source: image::ImageError,
    },

    #[error("page {page}: provider call failed: {detail}")]
    Provider { page: usize, detail: String },

    #[error("page {page}: provider returned no content")]
    Empty { page: usize },
}

/// A resolved vision provider plus the completion options for page calls.
pub struct AssistService {
    provider: Arc<dyn LLMProvider>,
    settings: AssistSettings,
    runtime: Handle,
}

impl fmt::Debug for AssistService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AssistService {
    /// Resolve a provider from settings and environment.
    ///
    /// Must be called from within a tokio runtime; page calls are later
    /// driven on that runtime from the engine's blocking thread.
    pub fn from_settings(settings: &AssistSettings) -> Result<Self, AssistUnavailable> {
        let runtime = Handle::try_current().map_err(|_| AssistUnavailable::NoRuntime)?;
        let provider = resolve_provider(settings)?;
        Ok(Self::with_provider(provider, settings.clone(), runtime))
    }

    /// Wrap an already-built provider.
    pub fn with_provider(
        provider: Arc<dyn LLMProvider>,
        settings: AssistSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            provider,
            settings,
            runtime,
        }
    }

    /// Longest edge, in pixels, of page images sent to the model.
    pub fn page_image_pixels(&self) -> u32 {
        self.settings.page_image_pixels
    }

    /// Refine one page (1-based `page_number`) into cleaned markdown.
    pub async fn refine_page(
        &self,
        page_number: usize,
        page_image: &DynamicImage,
        extracted_text: &str,
    ) -> Result<String, AssistError> {
        let start = Instant::now();
        let image = encode_page(page_image).map_err(|source| AssistError::Encode {
            page: page_number,
            source,
        })?;

        let messages = vec![
            ChatMessage::system(prompts::REFINE_SYSTEM_PROMPT),
            ChatMessage::user_with_images(
                &prompts::refine_user_message(page_number, extracted_text),
                vec![image],
            ),
        ];
        let options = build_options(&self.settings);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| AssistError::Provider {
                page: page_number,
                detail: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_number,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let markdown = postprocess::clean_markdown(&response.content);
        if markdown.is_empty() {
            return Err(AssistError::Empty { page: page_number });
        }
        Ok(markdown)
    }

    /// [`refine_page`](Self::refine_page) for callers on a blocking thread.
    pub fn refine_page_blocking(
        &self,
        page_number: usize,
        page_image: &DynamicImage,
        extracted_text: &str,
    ) -> Result<String, AssistError> {
        self.runtime
            .block_on(self.refine_page(page_number, page_image, extracted_text))
    }
}

fn build_options(settings: &AssistSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, AssistUnavailable> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| AssistUnavailable::Provider {
        provider: name.to_string(),
        hint: e.to_string(),
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn resolve_provider(settings: &AssistSettings) -> Result<Arc<dyn LLMProvider>, AssistUnavailable> {
    let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(name) = settings.provider.as_deref() {
        return create_provider(name, model);
    }

    if let (Some(provider), Some(env_model)) = (
        non_empty_env("EDGEQUAKE_LLM_PROVIDER"),
        non_empty_env("EDGEQUAKE_MODEL"),
    ) {
        return create_provider(&provider, &env_model);
    }

    if non_empty_env("OPENAI_API_KEY").is_some() {
        return create_provider("openai", model);
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        warn!("LLM provider auto-detection failed: {}", e);
        AssistUnavailable::Provider {
            provider: "auto".to_string(),
            hint: format!("set OPENAI_API_KEY or ANTHROPIC_API_KEY, or name a provider ({e})"),
        }
    })?;
    Ok(llm)
}

/// Encode a rendered page as a lossless base64 PNG vision attachment.
///
/// `detail: "high"` keeps fine print legible to tiling vision models.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn options_follow_settings() {
        let opts = build_options(&AssistSettings::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn page_encodes_as_png_attachment() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255])));
        let data = encode_page(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let png = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn service_requires_a_runtime() {
        let err = AssistService::from_settings(&AssistSettings::default()).unwrap_err();
        assert!(matches!(err, AssistUnavailable::NoRuntime));
    }
}
