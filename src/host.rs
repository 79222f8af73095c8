//! Minimal job host around [`JobOrchestrator`].
//!
//! A host hands the worker `{id, input}` envelopes one at a time. For each
//! job the [`Worker`] creates a fresh workspace directory, calls the
//! orchestrator exactly once, and removes the workspace afterwards whatever
//! the outcome: decoded inputs and downloads never outlive their job.

use crate::orchestrator::JobOrchestrator;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// One unit of work as delivered by the host runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

/// Sequential job runner with per-job workspaces.
pub struct Worker {
    orchestrator: JobOrchestrator,
    workspace_root: Option<PathBuf>,
}

impl Worker {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self {
            orchestrator,
            workspace_root: None,
        }
    }

    /// Create job workspaces under `root` instead of the system temp dir.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    fn workspace(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docjob-");
        match &self.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Run one job and clean up its workspace.
    pub async fn run_job(&self, envelope: &JobEnvelope) -> Value {
        let workspace = match self.workspace() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Job {}: cannot create workspace: {}", envelope.id, e);
                return json!({
                    "error": "Could not create job workspace",
                    "details": e.to_string(),
                });
            }
        };

        let response = self
            .orchestrator
            .handle(&envelope.id, &envelope.input, workspace.path())
            .await;

        let step = Instant::now();
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            warn!("Job {}: failed to remove {}: {}", envelope.id, path.display(), e);
        }
        debug!("cleanup_step took {}ms", step.elapsed().as_millis());
        response
    }

    /// Process newline-delimited envelopes until `reader` is exhausted.
    ///
    /// Writes one `{id, output}` line per job and returns the number of jobs
    /// answered. Blank lines are skipped; unparseable lines are answered with
    /// an error output and a null id.
    pub async fn run_lines<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut answered = 0;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let reply = match serde_json::from_str::<JobEnvelope>(&line) {
                Ok(envelope) => {
                    let output = self.run_job(&envelope).await;
                    json!({ "id": envelope.id, "output": output })
                }
                Err(e) => json!({
                    "id": null,
                    "output": { "error": format!("Malformed job envelope: {e}") },
                }),
            };

            let mut bytes = serde_json::to_vec(&reply)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            answered += 1;
        }
        Ok(answered)
    }
}
