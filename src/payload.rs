//! Pre-sanitization value model.
//!
//! Engines and the result shaper build responses out of [`Field`] rather than
//! `serde_json::Value` because engine output is not guaranteed to be JSON:
//! metadata may carry raw bytes, non-finite floats, or values only an engine
//! knows how to print. [`crate::pipeline::sanitize`] is the single place that
//! turns a `Field` tree into an encodable `serde_json::Value`.

use std::collections::BTreeMap;

/// A mapping of response keys to values.
pub type Fields = BTreeMap<String, Field>;

/// A response value that may not yet be JSON-encodable.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Bool(bool),
    Int(i64),
    /// May be NaN or infinite; the sanitizer coerces those to text.
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Field>),
    Map(Fields),
    /// A value with no structured form, kept as its printed representation.
    Opaque { type_name: String, repr: String },
}

impl Field {
    pub fn text(s: impl Into<String>) -> Self {
        Field::Text(s.into())
    }

    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Field)>,
    {
        Field::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Field::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Field]> {
        match self {
            Field::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::Bool(v)
    }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self {
        Field::Int(v)
    }
}

impl From<usize> for Field {
    fn from(v: usize) -> Self {
        i64::try_from(v).map(Field::Int).unwrap_or(Field::Float(v as f64))
    }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self {
        Field::Float(v)
    }
}

impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Text(v)
    }
}

impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Text(v.to_string())
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Field::Null)
    }
}

impl From<serde_json::Value> for Field {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Field::Null,
            Value::Bool(b) => Field::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Field::Int(i),
                None => Field::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Field::Text(s),
            Value::Array(items) => Field::List(items.into_iter().map(Field::from).collect()),
            Value::Object(map) => Field::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}
