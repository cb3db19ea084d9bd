//! Collection schema: vector dimension, metric and typed metadata columns.

use super::distance::DistanceMetric;
use super::error::{CollectionError, Result};
use super::types::{Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Column names owned by the collection itself.
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "text", "vector"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Utf8,
    Int64,
    Float64,
    Boolean,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int64 | ColumnType::Float64)
    }

    fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Utf8, Value::String(_))
                | (ColumnType::Int64, Value::Integer(_))
                | (ColumnType::Float64, Value::Float(_) | Value::Integer(_))
                | (ColumnType::Boolean, Value::Boolean(_))
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Utf8 => "utf8",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Schema of a collection: fixed vector dimension, metric and metadata columns.
///
/// Every collection implicitly has an `id` column, a `text` column and a
/// `vector` column of `dimension` floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dimension: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl CollectionSchema {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: DistanceMetric::Cosine,
            columns: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDef::new(name, column_type));
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks the schema is well formed: positive dimension, no reserved or
    /// duplicate column names.
    pub fn validate(&self, collection: &str) -> Result<()> {
        if self.dimension == 0 {
            return Err(mismatch(collection, "vector dimension must be positive"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if RESERVED_COLUMNS.contains(&column.name.as_str()) {
                return Err(mismatch(
                    collection,
                    format!("column name '{}' is reserved", column.name),
                ));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(mismatch(
                    collection,
                    format!("column '{}' declared twice", column.name),
                ));
            }
        }
        Ok(())
    }

    /// Checks that `requested` can be served by this (stored) schema.
    ///
    /// Dimension and metric must be equal and every requested column must
    /// exist here with the same type. Extra stored columns are fine.
    pub fn check_compatible(&self, collection: &str, requested: &CollectionSchema) -> Result<()> {
        if self.dimension != requested.dimension {
            return Err(mismatch(
                collection,
                format!(
                    "stored vector dimension is {}, requested {}",
                    self.dimension, requested.dimension
                ),
            ));
        }
        if self.metric != requested.metric {
            return Err(mismatch(
                collection,
                format!("stored metric is {}, requested {}", self.metric, requested.metric),
            ));
        }
        for wanted in &requested.columns {
            match self.column(&wanted.name) {
                Some(stored) if stored.column_type == wanted.column_type => {}
                Some(stored) => {
                    return Err(mismatch(
                        collection,
                        format!(
                            "column '{}' is stored as {}, requested {}",
                            wanted.name, stored.column_type, wanted.column_type
                        ),
                    ))
                }
                None => {
                    return Err(mismatch(
                        collection,
                        format!("column '{}' does not exist", wanted.name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Validates a document against the schema, widening integers stored in
    /// float columns. The embedding is never padded or truncated.
    pub fn conform(&self, collection: &str, document: &mut Document) -> Result<()> {
        if document.embedding.len() != self.dimension {
            return Err(CollectionError::DimensionMismatch {
                expected: self.dimension,
                actual: document.embedding.len(),
            });
        }
        check_finite(&document.embedding)?;
        for (key, value) in document.metadata.iter_mut() {
            let column = self.column(key).ok_or_else(|| {
                mismatch(collection, format!("metadata field '{}' is not a declared column", key))
            })?;
            if !column.column_type.accepts(value) {
                return Err(mismatch(
                    collection,
                    format!("metadata field '{}' expects {}, got {:?}", key, column.column_type, value),
                ));
            }
            if matches!(value, Value::Float(f) if !f.is_finite()) {
                return Err(CollectionError::InvalidArgument(format!(
                    "metadata field '{}' is not a finite number",
                    key
                )));
            }
            let widened = match (column.column_type, &*value) {
                (ColumnType::Float64, Value::Integer(i)) => Some(*i as f64),
                _ => None,
            };
            if let Some(f) = widened {
                *value = Value::Float(f);
            }
        }
        Ok(())
    }
}

/// Rejects NaN and infinite components, which cannot be stored or ranked.
pub(crate) fn check_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(i) => Err(CollectionError::InvalidArgument(format!(
            "vector component {} is not finite ({})",
            i, vector[i]
        ))),
        None => Ok(()),
    }
}

fn mismatch(collection: &str, reason: impl Into<String>) -> CollectionError {
    CollectionError::SchemaMismatch {
        collection: collection.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laws_schema(dim: usize) -> CollectionSchema {
        CollectionSchema::new(dim)
            .with_column("norma", ColumnType::Utf8)
            .with_column("ano", ColumnType::Int64)
            .with_column("vigente", ColumnType::Boolean)
    }

    #[test]
    fn test_validate_rejects_reserved_and_duplicates() {
        let schema = CollectionSchema::new(3).with_column("text", ColumnType::Utf8);
        assert!(matches!(schema.validate("docs"), Err(CollectionError::SchemaMismatch { .. })));

        let schema = CollectionSchema::new(3)
            .with_column("ano", ColumnType::Int64)
            .with_column("ano", ColumnType::Utf8);
        assert!(schema.validate("docs").is_err());

        assert!(CollectionSchema::new(0).validate("docs").is_err());
        assert!(laws_schema(3).validate("docs").is_ok());
    }

    #[test]
    fn test_compatible_dimension_change() {
        let stored = laws_schema(384);
        let err = stored.check_compatible("docs", &laws_schema(768)).unwrap_err();
        assert!(matches!(err, CollectionError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_compatible_subset_of_columns() {
        let stored = laws_schema(3);
        let requested = CollectionSchema::new(3).with_column("ano", ColumnType::Int64);
        assert!(stored.check_compatible("docs", &requested).is_ok());

        let wrong_type = CollectionSchema::new(3).with_column("ano", ColumnType::Utf8);
        assert!(stored.check_compatible("docs", &wrong_type).is_err());

        let unknown = CollectionSchema::new(3).with_column("nivel", ColumnType::Int64);
        assert!(stored.check_compatible("docs", &unknown).is_err());
    }

    #[test]
    fn test_conform_dimension_is_never_coerced() {
        let schema = laws_schema(3);
        let mut short = Document::new("a", vec![1.0, 0.0]);
        assert!(matches!(
            schema.conform("docs", &mut short),
            Err(CollectionError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert_eq!(short.embedding.len(), 2);
    }

    #[test]
    fn test_conform_rejects_non_finite_values() {
        let schema = laws_schema(2).with_column("peso", ColumnType::Float64);
        for embedding in [vec![f32::NAN, 0.0], vec![1.0, f32::INFINITY], vec![f32::NEG_INFINITY, 0.0]] {
            let mut doc = Document::new("a", embedding);
            assert!(matches!(
                schema.conform("docs", &mut doc),
                Err(CollectionError::InvalidArgument(_))
            ));
        }

        let mut doc = Document::new("a", vec![1.0, 0.0]).with_metadata("peso", f64::NAN);
        assert!(matches!(
            schema.conform("docs", &mut doc),
            Err(CollectionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_conform_metadata_types() {
        let schema = laws_schema(2).with_column("peso", ColumnType::Float64);

        let mut ok = Document::new("a", vec![1.0, 0.0])
            .with_metadata("ano", 2020)
            .with_metadata("peso", 2);
        schema.conform("docs", &mut ok).unwrap();
        assert_eq!(ok.metadata["peso"], Value::Float(2.0));

        let mut bad = Document::new("a", vec![1.0, 0.0]).with_metadata("ano", "2020");
        assert!(schema.conform("docs", &mut bad).is_err());

        let mut unknown = Document::new("a", vec![1.0, 0.0]).with_metadata("autor", "x");
        assert!(schema.conform("docs", &mut unknown).is_err());
    }
}
