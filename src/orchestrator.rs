//! Job orchestration: one request in, one JSON response out.
//!
//! ```text
//! Validating ──▶ Resolving ──▶ Converting ──▶ Shaping ──▶ Done
//!      │             │              │             │
//!      └─────────────┴──────────────┴─────────────┴──▶ Failed
//! ```
//!
//! Every job ends in a response value; nothing escapes [`JobOrchestrator::handle`].
//! Fatal [`JobError`]s become `{error, details?}`, and a panic anywhere in
//! the job becomes `{error: "Worker panicked: …", details}`. Successful
//! responses carry `processing_time` in seconds, measured from the start of
//! validation to the end of sanitization.

use crate::config::WorkerConfig;
use crate::engine::ConversionEngine;
use crate::error::JobError;
use crate::job::JobRequest;
use crate::payload::Field;
use crate::pipeline::sanitize::{self, SanitizeLimits};
use crate::pipeline::source::{self, HttpFetcher, SourceFetcher};
use crate::pipeline::{invoke, shape};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Validating = 0,
    Resolving = 1,
    Converting = 2,
    Shaping = 3,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Resolving => "resolving",
            Stage::Converting => "converting",
            Stage::Shaping => "shaping",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Stage::Resolving,
            2 => Stage::Converting,
            3 => Stage::Shaping,
            _ => Stage::Validating,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last stage entered, readable after a panic unwinds the job future.
#[derive(Debug, Default)]
struct StageCell(AtomicU8);

impl StageCell {
    fn enter(&self, stage: Stage) {
        self.0.store(stage as u8, Ordering::Relaxed);
    }

    fn get(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// Runs the pipeline for one job at a time against a shared engine.
#[derive(Clone)]
pub struct JobOrchestrator {
    engine: Arc<dyn ConversionEngine>,
    fetcher: Arc<dyn SourceFetcher>,
    config: WorkerConfig,
}

impl JobOrchestrator {
    pub fn new(
        engine: Arc<dyn ConversionEngine>,
        fetcher: Arc<dyn SourceFetcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            engine,
            fetcher,
            config,
        }
    }

    /// Orchestrator that downloads remote sources over HTTP.
    pub fn with_http(engine: Arc<dyn ConversionEngine>, config: WorkerConfig) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(config.download_timeout_secs));
        Self::new(engine, fetcher, config)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Process one job. Temporary files go into `workspace`, which the
    /// caller removes afterwards.
    pub async fn handle(&self, job_id: &str, input: &Value, workspace: &Path) -> Value {
        let span = info_span!("job", id = %job_id);
        async {
            let stage = StageCell::default();
            let outcome = AssertUnwindSafe(self.run(input, workspace, &stage))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => failure_response(stage.get(), &err),
                Err(payload) => panic_response(stage.get(), payload.as_ref()),
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, input: &Value, workspace: &Path, stage: &StageCell) -> Result<Value, JobError> {
        let started = Instant::now();

        let step = Instant::now();
        let request = JobRequest::from_input(input)?;
        debug!("validation_step took {}ms", step.elapsed().as_millis());
        info!(
            "Job accepted: format={}, model={}",
            request.output_format.as_str(),
            request.model
        );

        stage.enter(Stage::Resolving);
        let step = Instant::now();
        let resolved = source::resolve(&request, workspace, self.fetcher.as_ref()).await?;
        debug!("download_step took {}ms", step.elapsed().as_millis());

        stage.enter(Stage::Converting);
        let step = Instant::now();
        let device = invoke::select_device(&self.config);
        let output = invoke::invoke(
            Arc::clone(&self.engine),
            &resolved,
            &request,
            device,
            &self.config,
        )
        .await?;
        debug!("prediction_step took {}ms", step.elapsed().as_millis());

        stage.enter(Stage::Shaping);
        let shaped = shape::shape(output, &request, device, &self.config);
        let mut response = sanitize::sanitize(Field::Map(shaped), &SanitizeLimits::from(&self.config));

        let elapsed = started.elapsed().as_secs_f64();
        if let Value::Object(map) = &mut response {
            map.insert("processing_time".into(), json!(elapsed));
        }
        info!("Job completed in {:.3}s", elapsed);
        Ok(sanitize::ensure_encodable(response))
    }
}

/// Response for a job that ended in a [`JobError`].
pub fn failure_response(stage: Stage, err: &JobError) -> Value {
    match err {
        JobError::Validation(messages) => {
            info!("Job rejected: {}", messages.join("; "));
            json!({ "error": messages })
        }
        JobError::Request(message) => {
            info!("Job rejected: {}", message);
            json!({ "error": message })
        }
        _ => {
            let details = format!("stage: {stage}\n{}", err.chain());
            error!("Job failed while {}: {}", stage, details);
            json!({ "error": err.to_string(), "details": details })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Response for a job whose future panicked.
pub fn panic_response(stage: Stage, payload: &(dyn Any + Send)) -> Value {
    let message = panic_message(payload);
    error!("Worker panicked while {}: {}", stage, message);
    json!({
        "error": format!("Worker panicked: {message}"),
        "details": format!("stage: {stage}\npanic: {message}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_listed_without_details() {
        let v = failure_response(
            Stage::Validating,
            &JobError::Validation(vec!["a".into(), "b".into()]),
        );
        assert_eq!(v, json!({"error": ["a", "b"]}));
    }

    #[test]
    fn request_errors_have_no_details() {
        let v = failure_response(Stage::Validating, &JobError::Request("nope".into()));
        assert_eq!(v, json!({"error": "nope"}));
    }

    #[test]
    fn other_errors_carry_stage_and_chain() {
        let err = JobError::InputWriteFailed {
            path: "/ws/input.pdf".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        let v = failure_response(Stage::Resolving, &err);
        let details = v["details"].as_str().unwrap();
        assert!(details.starts_with("stage: resolving\n"));
        assert!(details.contains("caused by: disk full"));
        assert!(v["error"].as_str().unwrap().contains("/ws/input.pdf"));
    }

    #[test]
    fn panic_payloads_are_reported() {
        let v = panic_response(Stage::Converting, &"boom");
        assert_eq!(v["error"], "Worker panicked: boom");
        assert!(v["details"].as_str().unwrap().contains("converting"));

        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_response(Stage::Shaping, owned.as_ref())["error"], "Worker panicked: owned boom");
    }

    #[test]
    fn stage_cell_tracks_last_stage() {
        let cell = StageCell::default();
        assert_eq!(cell.get(), Stage::Validating);
        cell.enter(Stage::Converting);
        assert_eq!(cell.get(), Stage::Converting);
    }
}
