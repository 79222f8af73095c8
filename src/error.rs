//! Error types for the docjob worker.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`JobError`] — **Fatal**: the job cannot produce a result (conflicting
//!   source fields, undecodable payload, download failure, engine failure).
//!   The orchestrator turns it into an `{error, details?}` response.
//!
//! * [`CondenseError`] — **Non-fatal**: a single image could not be
//!   recompressed. It never leaves [`crate::pipeline::shape`]; the image is
//!   either sent unprocessed or dropped and counted.

use crate::engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors a job can end with.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Request errors ────────────────────────────────────────────────────
    /// Source fields missing or conflicting.
    #[error("{0}")]
    Request(String),

    /// Field-level schema violations collected during validation.
    #[error("Invalid job input: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The embedded payload is not decodable base64.
    #[error("Invalid base64 file payload")]
    InvalidPayload {
        #[source]
        source: base64::DecodeError,
    },

    // ── Resolution errors ─────────────────────────────────────────────────
    /// Remote URL could not be fetched.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Remote fetch exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Could not write the resolved input into the job workspace.
    #[error("Failed to write input file '{path}': {source}")]
    InputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The engine raised while converting the document.
    #[error("Conversion failed: {detail}")]
    Conversion { detail: String },

    /// The engine returned an error; kept whole so `chain()` can walk it.
    #[error("Conversion failed: {source}")]
    Engine {
        #[source]
        source: EngineError,
    },

    /// The engine handle could not be set up.
    #[error("Conversion engine unavailable: {0}")]
    EngineUnavailable(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task join failure, panic).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The taxonomy bucket a [`JobError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Request,
    Resolution,
    Conversion,
    Internal,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Request(_) | JobError::Validation(_) | JobError::InvalidPayload { .. } => {
                ErrorKind::Request
            }
            JobError::DownloadFailed { .. }
            | JobError::DownloadTimeout { .. }
            | JobError::InputWriteFailed { .. } => ErrorKind::Resolution,
            JobError::Conversion { .. } | JobError::Engine { .. } | JobError::EngineUnavailable(_) => {
                ErrorKind::Conversion
            }
            JobError::InvalidConfig(_) | JobError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Pure request problems are answered without a diagnostic trace.
    pub fn is_request(&self) -> bool {
        matches!(self, JobError::Request(_) | JobError::Validation(_))
    }

    /// The error followed by its `source()` chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// A non-fatal failure while condensing one image.
#[derive(Debug, Error)]
pub enum CondenseError {
    #[error("cannot read image file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot encode image: {0}")]
    Encode(#[source] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_have_no_trace() {
        let e = JobError::Request("Must provide either pdf or pdf_base64".into());
        assert!(e.is_request());
        assert_eq!(e.kind(), ErrorKind::Request);
        assert_eq!(e.to_string(), "Must provide either pdf or pdf_base64");
    }

    #[test]
    fn invalid_payload_is_request_kind_but_carries_cause() {
        let source = base64::DecodeError::InvalidPadding;
        let e = JobError::InvalidPayload { source };
        assert_eq!(e.kind(), ErrorKind::Request);
        assert!(!e.is_request());
        let chain = e.chain();
        assert!(chain.starts_with("Invalid base64 file payload"), "got: {chain}");
        assert!(chain.contains("caused by:"), "got: {chain}");
    }

    #[test]
    fn download_timeout_display() {
        let e = JobError::DownloadTimeout {
            url: "https://example.com/a.pdf".into(),
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
        assert_eq!(e.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn engine_errors_stay_in_the_chain() {
        let e = JobError::Engine {
            source: EngineError::Open {
                path: "/ws/input.pdf".into(),
                detail: "bad xref".into(),
            },
        };
        assert_eq!(e.kind(), ErrorKind::Conversion);
        assert!(e.to_string().starts_with("Conversion failed: cannot open document"));
        assert!(e.chain().contains("\ncaused by: cannot open document '/ws/input.pdf': bad xref"));
    }

    #[test]
    fn validation_joins_messages() {
        let e = JobError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(e.to_string(), "Invalid job input: a; b");
    }
}
