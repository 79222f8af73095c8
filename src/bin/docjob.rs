//! CLI binary for docjob-worker.
//!
//! A thin shim over the library crate: maps flags to `WorkerConfig`, sets
//! up the pdfium engine once, and runs jobs. Responses go to stdout, logs
//! to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docjob_worker::{JobEnvelope, JobOrchestrator, PdfiumEngine, Worker, WorkerConfig};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run one job from a file ({"input": {...}} or a bare input object)
  docjob run test_input.json

  # Serve newline-delimited {"id", "input"} envelopes from stdin
  docjob serve < jobs.jsonl > results.jsonl

JOB INPUT:
  pdf | pdf_base64           exactly one (aliases: file | file_base64)
  filename                   extension hint for embedded payloads
  output_format              markdown (default) | json | html
  model                      default | table
  paginate_output, use_llm, disable_image_extraction,
  force_ocr, strip_existing_ocr          booleans, default false
  page_range                 0-based, e.g. "0,3-5"
  languages                  comma-separated, e.g. "en,fr"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Enables LLM assist for jobs with use_llm
  EDGEQUAKE_LLM_PROVIDER  Assist provider override (with EDGEQUAKE_MODEL)
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  RUST_LOG                Log filter (default: info)
"#;

/// Single-job document conversion worker.
#[derive(Parser, Debug)]
#[command(
    name = "docjob",
    version,
    about = "Convert documents to markdown, HTML or a block tree, one job at a time",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Force the compute device instead of probing (cuda or cpu).
    #[arg(long, global = true, env = "DOCJOB_DEVICE")]
    device: Option<String>,

    /// Path to the pdfium shared library.
    #[arg(long, global = true, env = "DOCJOB_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Maximum condensed image width and height in pixels.
    #[arg(long, global = true, env = "DOCJOB_MAX_IMAGE_DIM", default_value_t = 1600)]
    max_image_dim: u32,

    /// Initial JPEG quality for condensed images (1–100).
    #[arg(long, global = true, env = "DOCJOB_IMAGE_QUALITY", default_value_t = 85)]
    image_quality: u8,

    /// Lowest JPEG quality tried while fitting the byte budget.
    #[arg(long, global = true, env = "DOCJOB_MIN_IMAGE_QUALITY", default_value_t = 30)]
    min_image_quality: u8,

    /// Quality decrement per attempt.
    #[arg(long, global = true, env = "DOCJOB_QUALITY_STEP", default_value_t = 10)]
    quality_step: u8,

    /// Byte budget per condensed image.
    #[arg(long, global = true, env = "DOCJOB_MAX_IMAGE_BYTES", default_value_t = 500_000)]
    max_image_bytes: usize,

    /// Images condensed per job.
    #[arg(long, global = true, env = "DOCJOB_MAX_PROCESSED_IMAGES", default_value_t = 10)]
    max_processed_images: usize,

    /// Images shown per response list.
    #[arg(long, global = true, env = "DOCJOB_MAX_RESPONSE_IMAGES", default_value_t = 5)]
    max_response_images: usize,

    /// Longest text field, in characters.
    #[arg(long, global = true, env = "DOCJOB_MAX_TEXT_CHARS", default_value_t = 1_000_000)]
    max_text_chars: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCJOB_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// LLM assist provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "DOCJOB_ASSIST_PROVIDER")]
    assist_provider: Option<String>,

    /// LLM assist model ID.
    #[arg(long, global = true, env = "DOCJOB_ASSIST_MODEL")]
    assist_model: Option<String>,

    /// LLM assist temperature.
    #[arg(long, global = true, env = "DOCJOB_ASSIST_TEMPERATURE", default_value_t = 0.1)]
    assist_temperature: f32,

    /// LLM assist max output tokens per page.
    #[arg(long, global = true, env = "DOCJOB_ASSIST_MAX_TOKENS", default_value_t = 4096)]
    assist_max_tokens: usize,

    /// Workspace root for per-job temporary directories.
    #[arg(long, global = true, env = "DOCJOB_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCJOB_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one job from a JSON file and print the response.
    Run {
        /// Job file: `{"input": {...}}`, `{"id", "input"}`, or a bare input object.
        job: PathBuf,
    },
    /// Read job envelopes from stdin, one per line; write responses to stdout.
    Serve,
}

impl Cli {
    fn worker_config(&self) -> Result<WorkerConfig> {
        let mut builder = WorkerConfig::builder()
            .max_image_dimensions(self.max_image_dim, self.max_image_dim)
            .image_quality(self.image_quality)
            .min_image_quality(self.min_image_quality)
            .quality_step(self.quality_step)
            .max_image_bytes(self.max_image_bytes)
            .max_processed_images(self.max_processed_images)
            .max_response_images(self.max_response_images)
            .max_text_chars(self.max_text_chars)
            .download_timeout_secs(self.download_timeout)
            .assist_temperature(self.assist_temperature)
            .assist_max_tokens(self.assist_max_tokens);
        if let Some(ref d) = self.device {
            builder = builder.device(d.clone());
        }
        if let Some(ref p) = self.assist_provider {
            builder = builder.assist_provider(p.clone());
        }
        if let Some(ref m) = self.assist_model {
            builder = builder.assist_model(m.clone());
        }
        builder.build().context("Invalid worker configuration")
    }
}

/// Accept `{"id", "input"}`, `{"input"}`, or a bare input object.
fn envelope_from_file(value: Value) -> JobEnvelope {
    match value {
        Value::Object(mut map) if map.contains_key("input") => {
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("local-test")
                .to_string();
            let input = map.remove("input").unwrap_or(Value::Null);
            JobEnvelope { id, input }
        }
        other => JobEnvelope {
            id: "local-test".into(),
            input: other,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.worker_config()?;

    // ── Engine setup (once per process) ──────────────────────────────────
    // First run may download pdfium (~30 MB) into the user cache.
    let engine = tokio::task::block_in_place(|| match &cli.pdfium_lib {
        Some(path) => PdfiumEngine::from_library(path.clone()),
        None => PdfiumEngine::setup(),
    })
    .context("Failed to set up the PDFium engine")?;

    let mut worker = Worker::new(JobOrchestrator::with_http(Arc::new(engine), config));
    if let Some(ref root) = cli.workspace {
        worker = worker.with_workspace_root(root.clone());
    }

    match cli.command {
        Command::Run { ref job } => {
            let raw = tokio::fs::read_to_string(job)
                .await
                .with_context(|| format!("Failed to read job file {}", job.display()))?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("Job file {} is not valid JSON", job.display()))?;
            let envelope = envelope_from_file(value);
            let response = worker.run_job(&envelope).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&response).context("Failed to serialize response")?
            );
        }
        Command::Serve => {
            info!("Serving jobs from stdin");
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let answered = worker
                .run_lines(stdin, tokio::io::stdout())
                .await
                .context("Job stream failed")?;
            info!("Answered {} jobs", answered);
        }
    }

    Ok(())
}
