//! Worker configuration.
//!
//! Every bound the pipeline enforces (image dimensions and bytes, image
//! counts, text length) lives in [`WorkerConfig`], built via its
//! [`WorkerConfigBuilder`]. Jobs never change these; they are process-wide
//! settings chosen when the worker starts.

use crate::error::JobError;
use serde::{Deserialize, Serialize};

/// Configuration shared by every job a worker runs.
///
/// # Example
/// ```rust
/// use docjob_worker::WorkerConfig;
///
/// let config = WorkerConfig::builder()
///     .max_processed_images(10)
///     .max_image_bytes(250_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_bounds.max_bytes, 250_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bounds applied to every image attached to a response.
    pub image_bounds: ImageBounds,

    /// How many image references the shaper condenses per job. Default: 10.
    ///
    /// References beyond this are counted in `total_images` and flagged
    /// with `images_truncated`, but never decoded.
    pub max_processed_images: usize,

    /// Display cap the sanitizer applies to any `images` list. Default: 5.
    pub max_response_images: usize,

    /// Text fields longer than this many characters are truncated. Default: 1 000 000.
    pub max_text_chars: usize,

    /// Remote fetch timeout in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Force the compute device instead of probing (`"cuda"` or `"cpu"`).
    pub device: Option<String>,

    /// LLM assist provider selection, used only by jobs with `use_llm`.
    pub assist: AssistSettings,
}

/// Size bounds for one condensed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBounds {
    /// Maximum width in pixels. Default: 1600.
    pub max_width: u32,
    /// Maximum height in pixels. Default: 1600.
    pub max_height: u32,
    /// JPEG quality of the first encoding attempt (1–100). Default: 85.
    pub quality: u8,
    /// Lowest quality the reduction loop will try. Default: 30.
    pub min_quality: u8,
    /// Quality decrement per attempt. Default: 10.
    pub quality_step: u8,
    /// Byte budget per encoded image. Default: 500 000.
    pub max_bytes: usize,
}

impl Default for ImageBounds {
    fn default() -> Self {
        Self {
            max_width: 1600,
            max_height: 1600,
            quality: 85,
            min_quality: 30,
            quality_step: 10,
            max_bytes: 500_000,
        }
    }
}

/// Provider selection for the optional LLM assist service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistSettings {
    /// Provider name (e.g. "openai", "anthropic", "ollama"). Auto-detected if None.
    pub provider: Option<String>,
    /// Model identifier. Provider default if None.
    pub model: Option<String>,
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Maximum output tokens per page. Default: 4096.
    pub max_tokens: usize,
    /// Longest edge of the page image sent with each request. Default: 1600.
    pub page_image_pixels: u32,
}

impl Default for AssistSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            page_image_pixels: 1600,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            image_bounds: ImageBounds::default(),
            max_processed_images: 10,
            max_response_images: 5,
            max_text_chars: 1_000_000,
            download_timeout_secs: 120,
            device: None,
            assist: AssistSettings::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a new builder for `WorkerConfig`.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn max_image_dimensions(mut self, width: u32, height: u32) -> Self {
        self.config.image_bounds.max_width = width.max(1);
        self.config.image_bounds.max_height = height.max(1);
        self
    }

    pub fn image_quality(mut self, q: u8) -> Self {
        self.config.image_bounds.quality = q.clamp(1, 100);
        self
    }

    pub fn min_image_quality(mut self, q: u8) -> Self {
        self.config.image_bounds.min_quality = q.clamp(1, 100);
        self
    }

    pub fn quality_step(mut self, step: u8) -> Self {
        self.config.image_bounds.quality_step = step.max(1);
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.image_bounds.max_bytes = n;
        self
    }

    pub fn max_processed_images(mut self, n: usize) -> Self {
        self.config.max_processed_images = n;
        self
    }

    pub fn max_response_images(mut self, n: usize) -> Self {
        self.config.max_response_images = n;
        self
    }

    pub fn max_text_chars(mut self, n: usize) -> Self {
        self.config.max_text_chars = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.config.device = Some(device.into());
        self
    }

    pub fn assist_provider(mut self, name: impl Into<String>) -> Self {
        self.config.assist.provider = Some(name.into());
        self
    }

    pub fn assist_model(mut self, model: impl Into<String>) -> Self {
        self.config.assist.model = Some(model.into());
        self
    }

    pub fn assist_temperature(mut self, t: f32) -> Self {
        self.config.assist.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn assist_max_tokens(mut self, n: usize) -> Self {
        self.config.assist.max_tokens = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, JobError> {
        let c = &self.config;
        let b = &c.image_bounds;
        if b.min_quality > b.quality {
            return Err(JobError::InvalidConfig(format!(
                "minimum image quality {} exceeds initial quality {}",
                b.min_quality, b.quality
            )));
        }
        if b.max_bytes == 0 {
            return Err(JobError::InvalidConfig("image byte budget must be ≥ 1".into()));
        }
        if c.max_response_images == 0 || c.max_processed_images == 0 {
            return Err(JobError::InvalidConfig("image caps must be ≥ 1".into()));
        }
        if c.max_text_chars < TRUNCATION_SUFFIX.chars().count() {
            return Err(JobError::InvalidConfig(format!(
                "text cap must leave room for the truncation marker ({} chars)",
                TRUNCATION_SUFFIX.chars().count()
            )));
        }
        if let Some(ref d) = c.device {
            if d != "cuda" && d != "cpu" {
                return Err(JobError::InvalidConfig(format!(
                    "device must be 'cuda' or 'cpu', got '{d}'"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Appended to any text field cut down by the sanitizer.
pub const TRUNCATION_SUFFIX: &str = "... [truncated due to length]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = WorkerConfig::default();
        assert_eq!(c.max_processed_images, 10);
        assert_eq!(c.max_response_images, 5);
        assert_eq!(c.max_text_chars, 1_000_000);
        assert_eq!(c.image_bounds.quality, 85);
        assert_eq!(c.image_bounds.min_quality, 30);
    }

    #[test]
    fn builder_clamps_quality() {
        let c = WorkerConfig::builder().image_quality(250).build().unwrap();
        assert_eq!(c.image_bounds.quality, 100);
    }

    #[test]
    fn floor_above_initial_quality_is_rejected() {
        let err = WorkerConfig::builder()
            .image_quality(40)
            .min_image_quality(60)
            .build()
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_device_is_rejected() {
        assert!(WorkerConfig::builder().device("tpu").build().is_err());
        assert!(WorkerConfig::builder().device("cpu").build().is_ok());
    }
}
