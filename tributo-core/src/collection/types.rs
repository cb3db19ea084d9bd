use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A scalar metadata value attached to a document.
///
/// Serialized untagged, so metadata round-trips as plain JSON scalars
/// (`true`, `42`, `0.5`, `"Lei 123"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// A document stored in a vector collection.
///
/// Documents are the unit of storage: the statute excerpt text, its embedding
/// and optional scalar metadata (law name, number, year, in-force flag, ...).
/// The `id` is assigned by the collection at insertion time unless the caller
/// supplies one.
///
/// # Example
///
/// ```
/// use tributo_core::collection::Document;
///
/// let doc = Document::new("Art. 1º Fica isento do IPTU...", vec![0.1, 0.2, 0.3])
///     .with_metadata("norma", "Lei Complementar 7")
///     .with_metadata("ano", 2003)
///     .with_metadata("vigente", true);
/// assert!(doc.id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Document {
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            embedding,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A document as persisted: the document plus its insertion sequence number.
///
/// The sequence number is the stable tie-breaker for equal scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub document: Document,
}

/// A search result containing a document and its similarity score.
///
/// Returned ordered by ascending `distance` (descending `score`).
///
/// # Score Range
///
/// With cosine similarity the score ranges from -1.0 to 1.0:
/// - `1.0` - Identical direction (perfect match)
/// - `0.0` - Orthogonal vectors (no similarity)
/// - `-1.0` - Opposite vectors
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
    pub distance: f32,
}
