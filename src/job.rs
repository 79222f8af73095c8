//! Job input schema: validation, defaults, and source selection.
//!
//! A job's `input` arrives as an untyped JSON object. [`JobRequest::from_input`]
//! checks every key against a fixed schema, collects *all* field-level
//! problems (so a caller fixes them in one round trip), fills defaults, and
//! finally enforces the one rule the schema cannot express: exactly one
//! source reference.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Requested response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown text + metadata + images. (default)
    #[default]
    Markdown,
    /// The engine's hierarchical block tree, text/metadata only.
    Json,
    /// HTML text + metadata + images.
    Html,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
            OutputFormat::Html => "html",
        }
    }
}

/// Which converter implementation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterVariant {
    /// General-purpose converter with automatic layout detection. (default)
    #[default]
    Default,
    /// Table-focused converter; every block is treated as a table.
    Table,
}

impl ConverterVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConverterVariant::Default => "default",
            ConverterVariant::Table => "table",
        }
    }
}

impl fmt::Display for ConverterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the document comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Remote URL to download.
    Remote(String),
    /// Base64 payload, optionally prefixed with a data URL header.
    Embedded(String),
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
            SourceRef::Embedded(data) => write!(f, "Embedded(<{} chars>)", data.len()),
        }
    }
}

/// A validated job with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub source: SourceRef,
    pub filename: Option<String>,
    pub output_format: OutputFormat,
    pub paginate_output: bool,
    pub use_llm: bool,
    pub disable_image_extraction: bool,
    pub page_range: Option<String>,
    pub force_ocr: bool,
    pub strip_existing_ocr: bool,
    pub languages: Option<String>,
    pub model: ConverterVariant,
}

// ── Schema ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Kind {
    Str,
    Bool,
    Enum(&'static [&'static str]),
}

const SCHEMA: &[(&str, Kind)] = &[
    ("pdf", Kind::Str),
    ("file", Kind::Str),
    ("pdf_base64", Kind::Str),
    ("file_base64", Kind::Str),
    ("filename", Kind::Str),
    ("output_format", Kind::Enum(&["markdown", "json", "html"])),
    ("paginate_output", Kind::Bool),
    ("use_llm", Kind::Bool),
    ("disable_image_extraction", Kind::Bool),
    ("page_range", Kind::Str),
    ("force_ocr", Kind::Bool),
    ("strip_existing_ocr", Kind::Bool),
    ("languages", Kind::Str),
    ("model", Kind::Enum(&["default", "table"])),
];

pub const NO_SOURCE: &str = "Must provide either pdf or pdf_base64";
pub const BOTH_SOURCES: &str = "Must provide either pdf or pdf_base64, not both";

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_field(key: &str, kind: Kind, value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match kind {
        Kind::Str if !value.is_string() => Some(format!(
            "{key} should be string type, not {}.",
            json_type_name(value)
        )),
        Kind::Bool if !value.is_boolean() => Some(format!(
            "{key} should be boolean type, not {}.",
            json_type_name(value)
        )),
        Kind::Enum(options) => match value.as_str() {
            Some(s) if options.contains(&s) => None,
            Some(_) => Some(format!(
                "{key} is not a valid option. Valid options: {options:?}"
            )),
            None => Some(format!(
                "{key} should be string type, not {}.",
                json_type_name(value)
            )),
        },
        _ => None,
    }
}

impl JobRequest {
    /// Validate a raw job `input` object.
    ///
    /// Returns [`JobError::Validation`] with every field-level message, or
    /// [`JobError::Request`] when the source constraint is violated. Never
    /// touches the filesystem.
    pub fn from_input(input: &Value) -> Result<Self, JobError> {
        let obj = input
            .as_object()
            .ok_or_else(|| JobError::Validation(vec!["Job input must be a JSON object.".into()]))?;

        let mut errors = Vec::new();
        for (key, value) in obj {
            match SCHEMA.iter().find(|(name, _)| name == key) {
                None => errors.push(format!(
                    "Unexpected input. {key} is not a valid input option."
                )),
                Some((_, kind)) => errors.extend(check_field(key, *kind, value)),
            }
        }
        if !errors.is_empty() {
            return Err(JobError::Validation(errors));
        }

        let text = |key: &str| -> Option<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);

        let url = text("file").or_else(|| text("pdf"));
        let payload = text("file_base64").or_else(|| text("pdf_base64"));
        let source = match (url, payload) {
            (None, None) => return Err(JobError::Request(NO_SOURCE.into())),
            (Some(_), Some(_)) => return Err(JobError::Request(BOTH_SOURCES.into())),
            (Some(url), None) => SourceRef::Remote(url),
            (None, Some(data)) => SourceRef::Embedded(data),
        };

        let output_format = match text("output_format").as_deref() {
            Some("json") => OutputFormat::Json,
            Some("html") => OutputFormat::Html,
            _ => OutputFormat::Markdown,
        };
        let model = match text("model").as_deref() {
            Some("table") => ConverterVariant::Table,
            _ => ConverterVariant::Default,
        };

        Ok(JobRequest {
            source,
            filename: text("filename"),
            output_format,
            paginate_output: flag("paginate_output"),
            use_llm: flag("use_llm"),
            disable_image_extraction: flag("disable_image_extraction"),
            page_range: text("page_range"),
            force_ocr: flag("force_ocr"),
            strip_existing_ocr: flag("strip_existing_ocr"),
            languages: text("languages"),
            model,
        })
    }
}
