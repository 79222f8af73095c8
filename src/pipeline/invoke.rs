//! Conversion invocation: job options → [`EngineConfig`] → one engine call.
//!
//! The engine runs exactly once per job and is never retried. It is
//! synchronous and CPU-bound, so it runs on tokio's blocking pool; a panic
//! inside it surfaces as a join error and becomes a conversion failure.

use crate::assist::AssistService;
use crate::config::WorkerConfig;
use crate::engine::layout::TABLE_LAYOUT;
use crate::engine::{ConversionEngine, ConversionOutput, ConversionRequest, Device, EngineConfig};
use crate::error::JobError;
use crate::job::{ConverterVariant, JobRequest};
use crate::pipeline::source::ResolvedInput;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Map validated job options onto engine options.
///
/// Page range and languages are set only when the job provided them.
/// Languages are split on commas; blank tokens are dropped.
pub fn build_engine_config(request: &JobRequest) -> EngineConfig {
    let languages = request.languages.as_deref().map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    EngineConfig {
        output_format: request.output_format,
        paginate_output: request.paginate_output,
        use_llm: request.use_llm,
        disable_image_extraction: request.disable_image_extraction,
        force_ocr: request.force_ocr,
        strip_existing_ocr: request.strip_existing_ocr,
        page_range: request.page_range.clone(),
        languages: languages.filter(|l| !l.is_empty()),
        force_layout_block: match request.model {
            ConverterVariant::Table => Some(TABLE_LAYOUT.to_string()),
            ConverterVariant::Default => None,
        },
    }
}

/// Instantiate the assist service, or continue without it.
fn assist_for(request: &JobRequest, config: &WorkerConfig) -> Option<Arc<AssistService>> {
    if !request.use_llm {
        return None;
    }
    match AssistService::from_settings(&config.assist) {
        Ok(service) => {
            info!("LLM assist enabled");
            Some(Arc::new(service))
        }
        Err(e) => {
            warn!("LLM assist unavailable, converting without it: {}", e);
            None
        }
    }
}

/// The compute device for this process.
///
/// A configured device wins; otherwise the result of a one-time probe.
pub fn select_device(config: &WorkerConfig) -> Device {
    match config.device.as_deref() {
        Some("cuda") => Device::Cuda,
        Some("cpu") => Device::Cpu,
        _ => probe_device(),
    }
}

fn probe_device() -> Device {
    static PROBED: OnceLock<Device> = OnceLock::new();
    *PROBED.get_or_init(|| {
        let found = Command::new("nvidia-smi")
            .output()
            .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).contains("NVIDIA-SMI"))
            .unwrap_or(false);
        let device = if found { Device::Cuda } else { Device::Cpu };
        info!("Compute device: {}", device);
        device
    })
}

/// Run the engine once on the resolved input.
pub async fn invoke(
    engine: Arc<dyn ConversionEngine>,
    input: &ResolvedInput,
    request: &JobRequest,
    device: Device,
    config: &WorkerConfig,
) -> Result<ConversionOutput, JobError> {
    let engine_config = build_engine_config(request);
    debug!("Engine options: {:?}", engine_config.to_options());

    let conversion = ConversionRequest {
        path: input.path.clone(),
        variant: request.model,
        config: engine_config,
        device,
        assist: assist_for(request, config),
    };

    let start = Instant::now();
    let name = engine.name();
    let output = tokio::task::spawn_blocking(move || engine.convert(&conversion))
        .await
        .map_err(|e| {
            if e.is_panic() {
                JobError::Conversion {
                    detail: format!("{name} engine panicked: {e}"),
                }
            } else {
                JobError::Internal(format!("conversion task failed: {e}"))
            }
        })?
        .map_err(|source| JobError::Engine { source })?;

    info!(
        "{} conversion finished in {}ms",
        name,
        start.elapsed().as_millis()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, ImageCollection, RenderedBody};
    use crate::payload::Fields;
    use crate::pipeline::source::InputOrigin;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(input: serde_json::Value) -> JobRequest {
        JobRequest::from_input(&input).unwrap()
    }

    fn input() -> ResolvedInput {
        ResolvedInput {
            path: PathBuf::from("/tmp/input.pdf"),
            suffix: ".pdf".into(),
            origin: InputOrigin::Embedded,
        }
    }

    #[test]
    fn defaults_leave_optional_keys_unset() {
        let cfg = build_engine_config(&request(json!({"pdf_base64": "AAAA"})));
        assert_eq!(cfg.page_range, None);
        assert_eq!(cfg.languages, None);
        assert_eq!(cfg.force_layout_block, None);
        assert!(!cfg.disable_image_extraction);
    }

    #[test]
    fn languages_split_and_range_pass_through() {
        let cfg = build_engine_config(&request(json!({
            "pdf_base64": "AAAA",
            "languages": "en, fr,,de ",
            "page_range": "0,3-5",
            "force_ocr": true
        })));
        assert_eq!(cfg.languages, Some(vec!["en".into(), "fr".into(), "de".into()]));
        assert_eq!(cfg.page_range.as_deref(), Some("0,3-5"));
        assert!(cfg.force_ocr);
    }

    #[test]
    fn blank_language_list_is_omitted() {
        let cfg = build_engine_config(&request(json!({"pdf_base64": "AAAA", "languages": " , "})));
        assert_eq!(cfg.languages, None);
    }

    #[test]
    fn table_variant_forces_table_layout() {
        let cfg = build_engine_config(&request(json!({"pdf_base64": "AAAA", "model": "table"})));
        assert_eq!(cfg.force_layout_block.as_deref(), Some("Table"));
    }

    #[test]
    fn configured_device_skips_probe() {
        let cfg = WorkerConfig::builder().device("cuda").build().unwrap();
        assert_eq!(select_device(&cfg), Device::Cuda);
    }

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ConversionEngine for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.assist.is_none());
            if self.fail {
                return Err(EngineError::Failed("layout model crashed".into()));
            }
            Ok(ConversionOutput {
                body: RenderedBody::Markdown("ok".into()),
                metadata: Fields::new(),
                images: ImageCollection::None,
            })
        }
    }

    #[tokio::test]
    async fn engine_runs_exactly_once() {
        let engine = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let req = request(json!({"pdf_base64": "AAAA"}));
        let out = invoke(engine.clone(), &input(), &req, Device::Cpu, &WorkerConfig::default())
            .await
            .unwrap();
        assert_eq!(out.body, RenderedBody::Markdown("ok".into()));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn engine_failure_is_not_retried() {
        let engine = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let req = request(json!({"pdf_base64": "AAAA"}));
        let err = invoke(engine.clone(), &input(), &req, Device::Cpu, &WorkerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Engine { ref source } if source.to_string().contains("layout model crashed")));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    struct Panicking;

    impl ConversionEngine for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn convert(&self, _: &ConversionRequest) -> Result<ConversionOutput, EngineError> {
            panic!("index out of bounds");
        }
    }

    #[tokio::test]
    async fn engine_panic_becomes_conversion_error() {
        let req = request(json!({"pdf_base64": "AAAA"}));
        let err = invoke(Arc::new(Panicking), &input(), &req, Device::Cpu, &WorkerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Conversion { ref detail } if detail.contains("panicked")));
    }
}
