//! # docjob-worker
//!
//! A single-job document conversion worker. Each job names one document (a
//! URL or an embedded base64 payload); the worker resolves it to a local
//! file, runs a conversion engine on it exactly once, and returns a JSON
//! response that is always encodable and bounded in size.
//!
//! ## Pipeline Overview
//!
//! ```text
//! {id, input}
//!  │
//!  ├─ 1. Validate  schema check, defaults, exactly one source
//!  ├─ 2. Resolve   decode payload / download URL into the job workspace
//!  ├─ 3. Convert   engine runs once on the blocking pool (optional LLM assist)
//!  ├─ 4. Shape     per-format fields, condensed images, device, model
//!  └─ 5. Sanitize  cap images and text, coerce to JSON, processing_time
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docjob_worker::{JobEnvelope, JobOrchestrator, PdfiumEngine, Worker, WorkerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(PdfiumEngine::setup()?);
//!     let worker = Worker::new(JobOrchestrator::with_http(engine, WorkerConfig::default()));
//!     let job = JobEnvelope {
//!         id: "job-1".into(),
//!         input: serde_json::json!({"pdf": "https://arxiv.org/pdf/1706.03762"}),
//!     };
//!     println!("{}", worker.run_job(&job).await);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `docjob` binary (clap + anyhow + tracing-subscriber) |
//! | `bundled` | off     | Embeds the pdfium shared library in the binary |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assist;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod job;
pub mod orchestrator;
pub mod payload;
pub mod pipeline;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AssistSettings, ImageBounds, WorkerConfig, WorkerConfigBuilder};
pub use engine::{
    ConversionEngine, ConversionOutput, ConversionRequest, Device, EngineConfig, EngineError,
    ImageCollection, ImageRef, PdfiumEngine, RenderedBody,
};
pub use error::{CondenseError, ErrorKind, JobError};
pub use host::{JobEnvelope, Worker};
pub use job::{ConverterVariant, JobRequest, OutputFormat};
pub use orchestrator::JobOrchestrator;
pub use payload::{Field, Fields};
pub use pipeline::source::{HttpFetcher, SourceFetcher};
