//! Response sanitization: the last pass before a result leaves the worker.
//!
//! Walks a [`Field`] tree and produces a `serde_json::Value` that is
//! guaranteed to encode, with two bounded, visible losses:
//!
//! * an `images` list longer than the display cap is cut to the cap and an
//!   `images_note` sibling records the original count;
//! * text longer than the character cap is cut and ends with
//!   [`TRUNCATION_SUFFIX`]. The cut keeps the result at exactly the cap, so
//!   sanitizing twice changes nothing.
//!
//! Values JSON cannot hold (bytes, non-finite floats, opaque engine values)
//! become their textual representation.

use crate::config::{WorkerConfig, TRUNCATION_SUFFIX};
use crate::payload::Field;
use serde_json::{json, Map, Number, Value};
use tracing::warn;

/// Caps enforced by [`sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeLimits {
    pub max_images: usize,
    pub max_text_chars: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for SanitizeLimits {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_images: config.max_response_images,
            max_text_chars: config.max_text_chars,
        }
    }
}

/// Convert a shaped payload into an encodable, bounded JSON value.
pub fn sanitize(field: Field, limits: &SanitizeLimits) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(b),
        Field::Int(i) => Value::Number(i.into()),
        Field::Float(f) => match Number::from_f64(f) {
            Some(n) => Value::Number(n),
            None => Value::String(f.to_string()),
        },
        Field::Text(s) => Value::String(truncate_text(s, limits.max_text_chars)),
        Field::Bytes(bytes) => Value::String(truncate_text(
            String::from_utf8_lossy(&bytes).into_owned(),
            limits.max_text_chars,
        )),
        Field::Opaque { repr, .. } => Value::String(truncate_text(repr, limits.max_text_chars)),
        Field::List(items) => Value::Array(items.into_iter().map(|f| sanitize(f, limits)).collect()),
        Field::Map(mut fields) => {
            if let Some(Field::List(images)) = fields.get_mut("images") {
                if images.len() > limits.max_images {
                    let total = images.len();
                    images.truncate(limits.max_images);
                    fields.insert(
                        "images_note".into(),
                        Field::Text(format!(
                            "Only showing {} images out of {} due to size limits",
                            limits.max_images, total
                        )),
                    );
                }
            }
            let map: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, sanitize(v, limits)))
                .collect();
            Value::Object(map)
        }
    }
}

/// Cut `s` to at most `max_chars` characters, ending with the truncation marker.
pub fn truncate_text(s: String, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s;
    }
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Final encodability check.
///
/// Returns the value unchanged if it encodes; otherwise a single explanatory
/// error object replaces the whole result.
pub fn ensure_encodable(value: Value) -> Value {
    match serde_json::to_vec(&value) {
        Ok(_) => value,
        Err(e) => {
            warn!("Serialization error detected: {}", e);
            serialization_failure()
        }
    }
}

pub fn serialization_failure() -> Value {
    json!({
        "error": "Results could not be serialized properly",
        "message": "The document was processed but the results were too complex to return. \
                    Try a simpler output format or fewer pages."
    })
}
