//! Corpus ingestion: JSON corpus loading, text chunking and batched insertion.
//!
//! This is the adapter between loosely shaped corpus files and the canonical
//! [`Document`]: text field aliases are resolved here, metadata is coerced to
//! the collection's column types, and undeclared fields are dropped.

use super::embedder::Embedder;
use crate::collection::{
    Collection, CollectionSchema, ColumnType, Document, IndexDescriptor, Value,
};
use crate::config::{IndexConfig, IngestConfig};
use serde_json::Map;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Keys accepted as the document text, in priority order.
const TEXT_KEYS: [&str; 3] = ["text", "texto", "content"];

/// Errors that can occur while ingesting a corpus.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid corpus JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid corpus: {0}")]
    Format(String),
}

/// One corpus entry before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub text: String,
    pub metadata: HashMap<String, Value>,
}

/// Summary of an ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub entries: usize,
    pub skipped_entries: usize,
    pub chunks: usize,
    pub inserted: usize,
    pub rejected: usize,
    pub index: Option<IndexDescriptor>,
}

/// Splits text into overlapping chunks of at most `chunk_size` characters.
///
/// Chunks advance by `chunk_size - overlap` characters; cuts always fall on
/// character boundaries.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }
    let chunk_size = chunk_size.max(1);

    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    if char_count <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(char_count);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_count {
            break;
        }
        start += step;
    }

    chunks
}

/// Parses a JSON corpus: an array of objects, each with a text field
/// (`text`, `texto` or `content`) and flat scalar metadata.
///
/// Entries without text are skipped and counted in the second return value.
pub fn parse_corpus(raw: &str) -> Result<(Vec<CorpusEntry>, usize), IngestError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut object) => match object.remove("documents") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(IngestError::Format(
                    "expected an array of entries or an object with a 'documents' array".to_string(),
                ))
            }
        },
        _ => return Err(IngestError::Format("expected an array of entries".to_string())),
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (position, item) in items.into_iter().enumerate() {
        let serde_json::Value::Object(object) = item else {
            warn!("Skipping corpus entry #{}: not an object", position);
            skipped += 1;
            continue;
        };
        match entry_from_object(object) {
            Some(entry) => entries.push(entry),
            None => {
                warn!("Skipping corpus entry #{}: no text", position);
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}

fn entry_from_object(mut object: Map<String, serde_json::Value>) -> Option<CorpusEntry> {
    let mut text = None;
    for key in TEXT_KEYS {
        if let Some(serde_json::Value::String(s)) = object.remove(key) {
            if text.is_none() && !s.trim().is_empty() {
                text = Some(s);
            }
        }
    }
    let text = text?;

    if !object.contains_key("source_file") {
        if let Some(arquivo) = object.remove("arquivo") {
            object.insert("source_file".to_string(), arquivo);
        }
    }

    let metadata = object
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                serde_json::Value::Bool(b) => Value::Boolean(b),
                serde_json::Value::String(s) => Value::String(s),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::Integer(i),
                    None => Value::Float(n.as_f64()?),
                },
                _ => return None,
            };
            Some((key, value))
        })
        .collect();

    Some(CorpusEntry { text, metadata })
}

/// Converts a metadata value to the column type when the conversion is lossless.
fn coerce(value: Value, column_type: ColumnType) -> Option<Value> {
    match (column_type, value) {
        (ColumnType::Utf8, Value::String(s)) => Some(Value::String(s)),
        (ColumnType::Utf8, Value::Integer(i)) => Some(Value::String(i.to_string())),
        (ColumnType::Int64, Value::Integer(i)) => Some(Value::Integer(i)),
        (ColumnType::Int64, Value::String(s)) => s.trim().parse().ok().map(Value::Integer),
        (ColumnType::Float64, Value::Float(f)) => Some(Value::Float(f)),
        (ColumnType::Float64, Value::Integer(i)) => Some(Value::Float(i as f64)),
        (ColumnType::Float64, Value::String(s)) => s.trim().parse().ok().map(Value::Float),
        (ColumnType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(b)),
        (ColumnType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "sim" | "s" | "1" => Some(Value::Boolean(true)),
            "false" | "não" | "nao" | "n" | "0" => Some(Value::Boolean(false)),
            _ => None,
        },
        (ColumnType::Boolean, Value::Integer(i)) if i == 0 || i == 1 => Some(Value::Boolean(i == 1)),
        _ => None,
    }
}

/// Loads corpus entries into a collection.
pub struct Ingestor {
    collection: Arc<Collection>,
    embedder: Embedder,
    config: IngestConfig,
    index: IndexConfig,
}

impl Ingestor {
    pub fn new(collection: Arc<Collection>, embedder: Embedder, config: IngestConfig, index: IndexConfig) -> Self {
        Self {
            collection,
            embedder,
            config,
            index,
        }
    }

    /// Reads and ingests a JSON corpus file.
    pub async fn ingest_file(&self, path: &Path) -> super::Result<IngestReport> {
        let raw = tokio::fs::read_to_string(path).await.map_err(IngestError::from)?;
        let (entries, skipped) = parse_corpus(&raw)?;
        info!("Loaded {} corpus entries from {}", entries.len(), path.display());

        let mut report = self.ingest(entries).await?;
        report.skipped_entries += skipped;
        Ok(report)
    }

    /// Chunks, embeds and inserts entries in batches.
    ///
    /// When the collection was empty before and `index.auto_build` is set,
    /// the index is built once the data is in.
    pub async fn ingest(&self, entries: Vec<CorpusEntry>) -> super::Result<IngestReport> {
        let was_empty = self.collection.is_empty().await;
        let schema = self.collection.schema().clone();
        let mut report = IngestReport {
            entries: entries.len(),
            ..IngestReport::default()
        };
        let mut dropped_keys = BTreeSet::new();

        let mut batch = Vec::with_capacity(self.config.batch_size);
        for entry in entries {
            let metadata = conform_metadata(&schema, entry.metadata, &mut dropped_keys);
            for chunk in chunk_text(&entry.text, self.config.chunk_size, self.config.chunk_overlap) {
                batch.push((chunk, metadata.clone()));
                if batch.len() >= self.config.batch_size.max(1) {
                    self.process_batch(&mut batch, &mut report).await?;
                }
            }
        }
        if !batch.is_empty() {
            self.process_batch(&mut batch, &mut report).await?;
        }

        if !dropped_keys.is_empty() {
            warn!(
                "Dropped metadata fields not declared in '{}': {}",
                self.collection.name(),
                dropped_keys.into_iter().collect::<Vec<_>>().join(", ")
            );
        }

        if self.index.auto_build && was_empty && !self.collection.is_empty().await {
            let descriptor = self
                .collection
                .build_index(schema.metric, self.index.options())
                .await?;
            report.index = Some(descriptor);
        }

        info!(
            "Ingested {} chunks from {} entries into '{}' ({} rejected)",
            report.inserted,
            report.entries,
            self.collection.name(),
            report.rejected
        );
        Ok(report)
    }

    async fn process_batch(
        &self,
        batch: &mut Vec<(String, HashMap<String, Value>)>,
        report: &mut IngestReport,
    ) -> super::Result<()> {
        let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
        debug!("Embedding batch of {} chunks", texts.len());
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let documents: Vec<Document> = batch
            .drain(..)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| Document {
                id: String::new(),
                text,
                embedding,
                metadata,
            })
            .collect();

        report.chunks += documents.len();
        let summary = self.collection.insert(documents).await?;
        report.inserted += summary.inserted;
        report.rejected += summary.rejected.len();
        Ok(())
    }
}

fn conform_metadata(
    schema: &CollectionSchema,
    metadata: HashMap<String, Value>,
    dropped: &mut BTreeSet<String>,
) -> HashMap<String, Value> {
    metadata
        .into_iter()
        .filter_map(|(key, value)| {
            let Some(column) = schema.column(&key) else {
                dropped.insert(key);
                return None;
            };
            match coerce(value, column.column_type) {
                Some(value) => Some((key, value)),
                None => {
                    dropped.insert(key);
                    None
                }
            }
        })
        .collect()
}
