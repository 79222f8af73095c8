//! Input resolution: turn a job's source reference into one local file.
//!
//! Engines need a file-system path, so both source kinds end up on disk in
//! the job workspace: a remote URL is downloaded by a [`SourceFetcher`], an
//! embedded payload is decoded and written to a fresh temp file. The
//! workspace belongs to the host, which removes it after the job; nothing
//! here deletes files.
//!
//! Decoding happens fully in memory before any file is created, so a bad
//! payload never leaves an artifact behind.

use crate::error::JobError;
use crate::job::{JobRequest, SourceRef};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Suffix used when neither a filename hint nor the content identifies the type.
pub const DEFAULT_SUFFIX: &str = ".pdf";

/// The local file a job will convert.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub path: PathBuf,
    /// File suffix including the dot, e.g. `.pdf`. Empty when unknown.
    pub suffix: String,
    pub origin: InputOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOrigin {
    Remote(String),
    Embedded,
}

/// Downloads a remote source into a directory.
pub trait SourceFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str, dest_dir: &'a Path)
        -> BoxFuture<'a, Result<PathBuf, JobError>>;
}

/// Resolve the job's source into a file inside `workspace`.
pub async fn resolve(
    request: &JobRequest,
    workspace: &Path,
    fetcher: &dyn SourceFetcher,
) -> Result<ResolvedInput, JobError> {
    match &request.source {
        SourceRef::Remote(url) => {
            info!("Downloading input from: {}", url);
            let path = fetcher.fetch(url, workspace).await?;
            let suffix = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            Ok(ResolvedInput {
                path,
                suffix,
                origin: InputOrigin::Remote(url.clone()),
            })
        }
        SourceRef::Embedded(data) => {
            let bytes = decode_payload(data)?;
            let suffix = choose_suffix(request.filename.as_deref(), &bytes);
            let path = write_temp_input(workspace, &suffix, &bytes)?;
            debug!("Decoded {} bytes to {}", bytes.len(), path.display());
            Ok(ResolvedInput {
                path,
                suffix,
                origin: InputOrigin::Embedded,
            })
        }
    }
}

/// Remove a `data:<mime>;base64,` header if present.
pub fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, payload)) = data.split_once(',') {
            return payload;
        }
    }
    data
}

/// Decode an embedded payload permissively.
///
/// Characters outside the standard base64 alphabet (whitespace, line breaks,
/// stray punctuation) are skipped; what remains must be correctly padded.
pub fn decode_payload(data: &str) -> Result<Vec<u8>, JobError> {
    let filtered: Vec<u8> = strip_data_url(data)
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    STANDARD
        .decode(&filtered)
        .map_err(|source| JobError::InvalidPayload { source })
}

/// Pick a file suffix: filename hint, then content sniffing, then `.pdf`.
pub fn choose_suffix(filename_hint: Option<&str>, bytes: &[u8]) -> String {
    if let Some(ext) = filename_hint
        .and_then(|hint| Path::new(hint).extension())
        .map(|e| e.to_string_lossy())
        .filter(|e| !e.is_empty())
    {
        return format!(".{ext}");
    }
    match sniff_extension(bytes) {
        Some(ext) => format!(".{ext}"),
        None => DEFAULT_SUFFIX.to_string(),
    }
}

/// Infer a file extension from magic bytes.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some("pdf");
    }
    if let Ok(format) = image::guess_format(bytes) {
        if let Some(ext) = format.extensions_str().first() {
            return Some(ext);
        }
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Some(zip_container_kind(bytes));
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Some("html");
    }
    None
}

/// Office and EPUB files are ZIP archives; tell them apart by member names.
fn zip_container_kind(bytes: &[u8]) -> &'static str {
    let contains = |needle: &[u8]| bytes.windows(needle.len()).any(|w| w == needle);
    if contains(b"mimetypeapplication/epub+zip") {
        "epub"
    } else if contains(b"word/") {
        "docx"
    } else if contains(b"ppt/") {
        "pptx"
    } else if contains(b"xl/") {
        "xlsx"
    } else {
        "zip"
    }
}

fn write_temp_input(dir: &Path, suffix: &str, bytes: &[u8]) -> Result<PathBuf, JobError> {
    let write_err = |source: std::io::Error| JobError::InputWriteFailed {
        path: dir.to_path_buf(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("input-")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    file.into_temp_path()
        .keep()
        .map_err(|e| write_err(e.error))
}

// ── HTTP fetcher ─────────────────────────────────────────────────────────

/// Fetches remote sources over HTTP(S) with reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, JobError> {
        let failed = |reason: String| JobError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| failed(e.to_string()))?;

        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                JobError::DownloadTimeout {
                    url: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                failed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let file_path = dest_dir.join(filename_from_url(url));
        let write_err = |source: std::io::Error| JobError::InputWriteFailed {
            path: file_path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&file_path).await.map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    JobError::DownloadTimeout {
                        url: url.to_string(),
                        secs: self.timeout_secs,
                    }
                } else {
                    failed(e.to_string())
                }
            })?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len();
        }
        file.flush().await.map_err(write_err)?;

        info!("Downloaded {} bytes to: {}", written, file_path.display());
        Ok(file_path)
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest_dir: &'a Path,
    ) -> BoxFuture<'a, Result<PathBuf, JobError>> {
        Box::pin(self.download(url, dest_dir))
    }
}

/// Last URL path segment if it looks like a filename, else `downloaded.pdf`.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
