//! Retrieval Augmented Generation (RAG) pipeline over municipal tax law.
//!
//! # Overview
//!
//! 1. **Ingestion** ([`Ingestor`]): corpus entries are chunked, embedded and
//!    appended to the `laws` collection; the index is built on first load.
//! 2. **Retrieval** ([`Retriever`]): the question is embedded, topical
//!    keywords found in it narrow the candidate pool, and the best excerpts
//!    come back in rank order with text and metadata intact.
//! 3. **Augmentation** ([`build_prompt`]): excerpts are numbered and cited
//!    into a grounded prompt for the answering model.
//!
//! Embedding failures propagate as [`RagError::Embedder`]; an empty result
//! is `Ok(vec![])`, so callers can tell "nothing relevant" from "retrieval
//! failed".

mod embedder;
mod ingest;
mod prompt;

pub use embedder::{Embedder, EmbedderError};
pub use ingest::{chunk_text, parse_corpus, CorpusEntry, IngestError, IngestReport, Ingestor};
pub use prompt::{build_prompt, format_excerpts, source_label};

use crate::collection::{
    Collection, CollectionError, CollectionSchema, ColumnType, Database, Predicate, SearchQuery,
    SearchResult,
};
use crate::config::{Config, RetrievalConfig};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Column holding the "currently in force" flag.
pub const IN_FORCE_COLUMN: &str = "vigente";

/// Schema of the statute collection.
///
/// - `norma`: law or decree name
/// - `numero`, `ano`: number and year of the norm
/// - `vigente`: whether the norm is currently in force
/// - `nivel`: hierarchy level (law, decree, ordinance, ...)
/// - `source_file`: file the excerpt was extracted from
pub fn laws_schema(dimension: usize) -> CollectionSchema {
    CollectionSchema::new(dimension)
        .with_column("norma", ColumnType::Utf8)
        .with_column("numero", ColumnType::Utf8)
        .with_column("ano", ColumnType::Int64)
        .with_column(IN_FORCE_COLUMN, ColumnType::Boolean)
        .with_column("nivel", ColumnType::Int64)
        .with_column("source_file", ColumnType::Utf8)
}

/// Opens the configured statute collection, creating it if needed.
///
/// An existing collection is opened by dimension only, so collections written
/// by other tools with fewer metadata columns still load.
pub async fn open_collection(db: &Database, config: &Config) -> Result<Arc<Collection>> {
    let name = &config.storage.collection_name;
    let dimension = config.embedding.dimension;
    let existing = db.collection_names().await?;

    let schema = if existing.iter().any(|n| n == name) {
        CollectionSchema::new(dimension)
    } else {
        laws_schema(dimension)
    };
    Ok(db.open_or_create(name, schema).await?)
}

/// Retrieves statute excerpts for a question.
///
/// Keyword boosting: configured topical keywords present in the question
/// become an OR of `text ILIKE '%kw%'` atoms applied as a prefilter. When
/// that leaves nothing, the search is repeated without the keyword group.
/// The in-force restriction, when enabled, is kept in both passes.
#[derive(Clone)]
pub struct Retriever {
    collection: Arc<Collection>,
    embedder: Embedder,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(collection: Arc<Collection>, embedder: Embedder, config: RetrievalConfig) -> Self {
        Self {
            collection,
            embedder,
            config,
        }
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Returns at most `top_k` excerpts in rank order.
    pub async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.retrieve_filtered(question, top_k, None).await
    }

    /// Like [`retrieve`](Self::retrieve), with an extra caller-supplied
    /// predicate ANDed into the prefilter.
    pub async fn retrieve_filtered(
        &self,
        question: &str,
        top_k: usize,
        filter: Option<Predicate>,
    ) -> Result<Vec<SearchResult>> {
        debug!("Generating query embedding for: {}", question);
        let vector = self.embedder.embed(question).await?;

        let structural = self.structural_filter(filter);

        if let Some(boost) = self.keyword_boost(question) {
            let prefilter = match &structural {
                Some(structural) => structural.clone().and(boost),
                None => boost,
            };
            let hits = self.search(vector.clone(), top_k, Some(prefilter)).await?;
            if !hits.is_empty() {
                info!("Found {} keyword-boosted results", hits.len());
                return Ok(hits);
            }
            debug!("No keyword-boosted results, retrying without keywords");
        }

        let hits = self.search(vector, top_k, structural).await?;
        info!("Found {} results", hits.len());
        Ok(hits)
    }

    /// The overfetch factor sizes the candidate pool an IVF index must
    /// supply, so filtered searches still fill `top_k`.
    async fn search(&self, vector: Vec<f32>, top_k: usize, prefilter: Option<Predicate>) -> Result<Vec<SearchResult>> {
        let mut query = SearchQuery::new(vector)
            .limit(top_k)
            .overfetch(self.config.overfetch)
            .nprobes(self.config.nprobes);
        if let Some(prefilter) = prefilter {
            query = query.prefilter(prefilter);
        }
        Ok(self.collection.search(query).await?)
    }

    /// OR of the configured keywords that occur as whole words in the question.
    pub fn keyword_boost(&self, question: &str) -> Option<Predicate> {
        let question = format!(" {} ", words(question).join(" "));
        let atoms: Vec<Predicate> = self
            .config
            .boost_keywords
            .iter()
            .filter(|k| {
                let k = words(k).join(" ");
                !k.is_empty() && question.contains(&format!(" {} ", k))
            })
            .map(|k| Predicate::ilike("text", format!("%{}%", escape_like(&k.trim().to_lowercase()))))
            .collect();
        (!atoms.is_empty()).then(|| Predicate::any(atoms))
    }

    fn structural_filter(&self, extra: Option<Predicate>) -> Option<Predicate> {
        let mut terms: Vec<Predicate> = extra.into_iter().collect();
        if self.config.only_in_force {
            if self.collection.schema().column(IN_FORCE_COLUMN).is_some() {
                terms.push(Predicate::eq(IN_FORCE_COLUMN, true));
            } else {
                warn!(
                    "only_in_force is set but '{}' has no '{}' column",
                    self.collection.name(),
                    IN_FORCE_COLUMN
                );
            }
        }
        match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(Predicate::all(terms)),
        }
    }
}

/// Lowercased words, split on anything that is not a letter or digit.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn escape_like(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
