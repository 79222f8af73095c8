//! The conversion engine boundary.
//!
//! The engine is the component that actually reads a document. The pipeline
//! hands it a local path plus an [`EngineConfig`] and gets back a
//! [`ConversionOutput`]: markdown, HTML, or a block tree, a metadata mapping,
//! and the images it found.
//!
//! Engines report images however is natural to them: a list of file paths,
//! a keyed map of decoded bitmaps, or a mix. [`ImageCollection::into_sequence`]
//! normalises all of that into one ordered `Vec<ImageSource>` before anything
//! downstream looks at it, so the condenser only ever matches on the two
//! [`ImageRef`] variants.
//!
//! An engine is set up once per process (model weights, native library
//! bindings) and shared read-only across jobs, hence `Send + Sync`.

pub mod layout;
pub mod pdfium;

use crate::assist::AssistService;
use crate::job::{ConverterVariant, OutputFormat};
use crate::payload::{Field, Fields};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use pdfium::PdfiumEngine;

/// A document converter, set up once and invoked once per job.
pub trait ConversionEngine: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Convert one document. Called from a blocking thread.
    fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutput, EngineError>;
}

/// Failures raised by an engine. Always fatal to the job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot open document '{path}': {detail}")]
    Open { path: PathBuf, detail: String },

    #[error("invalid page range '{range}': {reason}")]
    PageRange { range: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Compute path the conversion runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine options derived from a job. Immutable once built.
///
/// Optional keys are omitted from [`EngineConfig::to_options`] when unset:
/// absence means "engine default", never an explicit empty value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub output_format: OutputFormat,
    pub paginate_output: bool,
    pub use_llm: bool,
    pub disable_image_extraction: bool,
    pub force_ocr: bool,
    pub strip_existing_ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_layout_block: Option<String>,
}

impl EngineConfig {
    /// The options mapping handed across the engine boundary.
    pub fn to_options(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Everything an engine needs for one conversion.
pub struct ConversionRequest {
    pub path: PathBuf,
    pub variant: ConverterVariant,
    pub config: EngineConfig,
    pub device: Device,
    pub assist: Option<Arc<AssistService>>,
}

impl ConversionRequest {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The primary rendered content, one shape per output format.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedBody {
    Markdown(String),
    Html(String),
    /// Hierarchical block tree. Blocks may embed image payloads under `images`.
    Tree(Field),
}

/// Engine output for one document.
#[derive(Debug)]
pub struct ConversionOutput {
    pub body: RenderedBody,
    pub metadata: Fields,
    pub images: ImageCollection,
}

/// A reference to one image produced by the engine.
#[derive(Debug, Clone)]
pub enum ImageRef {
    /// Image written to disk by the engine.
    File(PathBuf),
    /// Decoded bitmap held in memory.
    InMemory(DynamicImage),
}

/// One image with the filename it is reported under.
#[derive(Debug, Clone)]
pub struct ImageSource {
    pub name: String,
    pub image: ImageRef,
}

/// Images as an engine reports them.
#[derive(Debug, Clone, Default)]
pub enum ImageCollection {
    #[default]
    None,
    Sequence(Vec<ImageRef>),
    Keyed(Vec<(String, ImageRef)>),
}

impl ImageCollection {
    pub fn len(&self) -> usize {
        match self {
            ImageCollection::None => 0,
            ImageCollection::Sequence(v) => v.len(),
            ImageCollection::Keyed(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into an ordered list of named images.
    ///
    /// Keyed entries keep their key as the name. Sequence entries are named
    /// after their file, or `image_<n>.png` for in-memory bitmaps.
    pub fn into_sequence(self) -> Vec<ImageSource> {
        match self {
            ImageCollection::None => Vec::new(),
            ImageCollection::Keyed(entries) => entries
                .into_iter()
                .map(|(name, image)| ImageSource { name, image })
                .collect(),
            ImageCollection::Sequence(refs) => refs
                .into_iter()
                .enumerate()
                .map(|(i, image)| {
                    let name = match &image {
                        ImageRef::File(path) => path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| format!("image_{i}")),
                        ImageRef::InMemory(_) => format!("image_{i}.png"),
                    };
                    ImageSource { name, image }
                })
                .collect(),
        }
    }
}
