//! Vector collections: typed, append-only document stores with similarity
//! search, scalar filtering and an optional IVF index.
//!
//! A [`Database`] owns one storage backend and hands out shared
//! [`Collection`] handles:
//!
//! ```no_run
//! use tributo_core::collection::{
//!     CollectionSchema, ColumnType, Database, Document, IndexOptions, SearchQuery,
//! };
//!
//! # async fn demo() -> tributo_core::collection::Result<()> {
//! let db = Database::in_memory();
//! let schema = CollectionSchema::new(3).with_column("vigente", ColumnType::Boolean);
//! let laws = db.open_or_create("laws", schema).await?;
//!
//! laws.insert(vec![
//!     Document::new("Isenção de IPTU", vec![1.0, 0.0, 0.0]).with_metadata("vigente", true),
//! ])
//! .await?;
//! laws.build_index(laws.schema().metric, IndexOptions::default()).await?;
//!
//! let hits = laws
//!     .search(SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(3).prefilter("vigente = TRUE"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod distance;
pub mod error;
pub mod filter;
pub mod index;
#[cfg(feature = "lancedb")]
pub mod lancedb_store;
pub mod memory_store;
pub mod schema;
pub mod search;
pub mod segment_store;
pub mod store;
pub mod types;

pub use distance::DistanceMetric;
pub use error::{CollectionError, Result};
pub use filter::{CompareOp, Predicate};
pub use index::{IndexDescriptor, IndexKind, IndexOptions, VectorIndex};
pub use schema::{CollectionSchema, ColumnDef, ColumnType};
pub use search::{FilterExpr, SearchQuery};
pub use store::{open_store, CollectionStore, Manifest};
pub use types::{Document, Record, SearchResult, Value};

use crate::config::StorageMode;
use memory_store::MemoryStore;
use search::PreparedQuery;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Empty,
    Populated,
    /// An index exists; `stale` when rows were inserted after it was built.
    Indexed { stale: bool },
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionState::Empty => write!(f, "empty"),
            CollectionState::Populated => write!(f, "populated"),
            CollectionState::Indexed { stale: false } => write!(f, "indexed"),
            CollectionState::Indexed { stale: true } => write!(f, "indexed (stale)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub state: CollectionState,
    pub rows: usize,
    pub indexed_rows: usize,
    pub partitions: usize,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub index: Option<IndexDescriptor>,
}

/// A document the collection refused, by its position in the input batch.
#[derive(Debug)]
pub struct RejectedDocument {
    pub position: usize,
    pub error: CollectionError,
}

#[derive(Debug, Default)]
pub struct InsertSummary {
    pub inserted: usize,
    pub rejected: Vec<RejectedDocument>,
}

/// Entry point: one storage backend plus the collections opened through it.
///
/// Construct once at startup and share; opening the same name twice returns
/// the same [`Collection`], so two handles never diverge.
pub struct Database {
    store: Arc<dyn CollectionStore>,
    open: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Database {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            store,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the backend selected by `mode`.
    pub async fn connect(mode: &StorageMode) -> Result<Self> {
        let store = open_store(mode).await?;
        Ok(Self::new(store))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Opens an existing collection or creates an empty one.
    ///
    /// An existing collection must be compatible with `schema` (same
    /// dimension and metric, requested columns present with the same type);
    /// the returned handle carries the stored schema.
    pub async fn open_or_create(&self, name: &str, schema: CollectionSchema) -> Result<Arc<Collection>> {
        check_name(name)?;
        schema.validate(name)?;

        let mut open = self.open.lock().await;
        if let Some(existing) = open.get(name) {
            existing.schema.check_compatible(name, &schema)?;
            return Ok(existing.clone());
        }

        let collection = match self.store.load_manifest(name).await? {
            Some(manifest) => {
                manifest.schema.check_compatible(name, &schema)?;
                let records = self.store.load_records(&manifest).await?;
                Collection::restore(manifest, records, self.store.clone()).await?
            }
            None => {
                let manifest = Manifest::new(name, schema);
                self.store.save_manifest(&manifest).await?;
                info!(
                    "Created collection '{}' ({} dims, {})",
                    name, manifest.schema.dimension, manifest.schema.metric
                );
                Collection::empty(manifest, self.store.clone())
            }
        };

        let collection = Arc::new(collection);
        open.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.store.collection_names().await?)
    }
}

fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CollectionError::InvalidArgument(format!(
            "invalid collection name '{}': use letters, digits, '_' or '-'",
            name
        )))
    }
}

#[derive(Default)]
struct Rows {
    records: Vec<Arc<Record>>,
    ids: HashSet<String>,
}

impl Rows {
    fn next_seq(&self) -> u64 {
        self.records.last().map_or(0, |r| r.seq + 1)
    }
}

/// A handle to one collection. Cheap to share behind an `Arc`.
pub struct Collection {
    name: String,
    schema: CollectionSchema,
    store: Arc<dyn CollectionStore>,
    manifest: RwLock<Manifest>,
    rows: RwLock<Rows>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    build_lock: Mutex<()>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Collection {
    fn empty(manifest: Manifest, store: Arc<dyn CollectionStore>) -> Self {
        Self {
            name: manifest.name.clone(),
            schema: manifest.schema.clone(),
            store,
            manifest: RwLock::new(manifest),
            rows: RwLock::new(Rows::default()),
            index: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    async fn restore(manifest: Manifest, records: Vec<Record>, store: Arc<dyn CollectionStore>) -> Result<Self> {
        let mut rows = Rows::default();
        for record in records {
            rows.ids.insert(record.document.id.clone());
            rows.records.push(Arc::new(record));
        }

        let index = match manifest.index {
            Some(descriptor) => {
                let mut indexed = descriptor.indexed_rows;
                if indexed > rows.records.len() {
                    warn!(
                        "Collection '{}' index covered {} rows but only {} were recovered",
                        manifest.name,
                        indexed,
                        rows.records.len()
                    );
                    indexed = rows.records.len();
                }
                if indexed == 0 {
                    None
                } else {
                    let snapshot = rows.records[..indexed].to_vec();
                    let index = build_blocking(snapshot, descriptor.metric, descriptor.options).await?;
                    Some(Arc::new(index))
                }
            }
            None => None,
        };

        info!(
            "Opened collection '{}' ({} rows{})",
            manifest.name,
            rows.records.len(),
            if index.is_some() { ", index rebuilt" } else { "" }
        );

        let mut collection = Self::empty(manifest, store);
        *collection.rows.get_mut() = rows;
        *collection.index.get_mut() = index;
        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored schema.
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Appends documents. Each document is validated on its own: rejected
    /// ones are reported with their batch position and the rest are stored.
    ///
    /// Accepted documents are written to the backend in one append before
    /// they become visible to searches. An existing index is not rebuilt;
    /// it turns stale until the next [`build_index`](Self::build_index).
    pub async fn insert(&self, documents: Vec<Document>) -> Result<InsertSummary> {
        if documents.is_empty() {
            return Ok(InsertSummary::default());
        }

        let mut rows = self.rows.write().await;
        let mut next_seq = rows.next_seq();
        let mut batch_ids = HashSet::new();
        let mut accepted = Vec::with_capacity(documents.len());
        let mut rejected = Vec::new();

        for (position, mut document) in documents.into_iter().enumerate() {
            if let Err(error) = self.schema.conform(&self.name, &mut document) {
                warn!("Rejected document #{} for '{}': {}", position, self.name, error);
                rejected.push(RejectedDocument { position, error });
                continue;
            }
            if document.id.is_empty() {
                document.id = format!("{}-{}", self.name, next_seq);
            }
            if rows.ids.contains(&document.id) || !batch_ids.insert(document.id.clone()) {
                warn!("Rejected document #{} for '{}': duplicate id '{}'", position, self.name, document.id);
                rejected.push(RejectedDocument {
                    position,
                    error: CollectionError::DuplicateId(document.id),
                });
                continue;
            }
            accepted.push(Record {
                seq: next_seq,
                document,
            });
            next_seq += 1;
        }

        if !accepted.is_empty() {
            let manifest = self.manifest.read().await;
            self.store.append_records(&manifest, &accepted).await?;
        }

        let inserted = accepted.len();
        for record in accepted {
            rows.ids.insert(record.document.id.clone());
            rows.records.push(Arc::new(record));
        }
        debug!(
            "Inserted {} documents into '{}' ({} rejected, {} total)",
            inserted,
            self.name,
            rejected.len(),
            rows.records.len()
        );

        Ok(InsertSummary { inserted, rejected })
    }

    /// Builds (or replaces) the index over every stored row.
    ///
    /// One build runs at a time per collection. Searches keep using the old
    /// index until the new one is swapped in.
    pub async fn build_index(&self, metric: DistanceMetric, options: IndexOptions) -> Result<IndexDescriptor> {
        let _guard = self.build_lock.lock().await;

        let snapshot = self.rows.read().await.records.clone();
        if snapshot.is_empty() {
            return Err(CollectionError::EmptyCollection(self.name.clone()));
        }

        let started = Instant::now();
        let rows = snapshot.len();
        let index = build_blocking(snapshot, metric, options).await?;
        let descriptor = *index.descriptor();

        let mut manifest = self.manifest.write().await;
        let mut updated = manifest.clone();
        updated.index = Some(descriptor);
        self.store.save_manifest(&updated).await?;
        *manifest = updated;
        drop(manifest);

        let partitions = index.num_partitions();
        *self.index.write().await = Some(Arc::new(index));

        info!(
            "Built {:?} index on '{}' over {} rows ({} partitions, {:?})",
            options.kind,
            self.name,
            rows,
            partitions,
            started.elapsed()
        );
        Ok(descriptor)
    }

    /// Runs a similarity search.
    ///
    /// Without a usable index (none built, or built for another metric) every
    /// row is scored. With an IVF index only the probed partitions are scored,
    /// plus rows inserted after the build unless the query asks for
    /// `fast_search`. At least `nprobes` partitions are probed, and further
    /// ones while fewer than `top_k * overfetch` candidates pass the
    /// prefilter. Results are ordered by ascending distance, ties by
    /// insertion order, and never exceed `top_k`.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>> {
        let query = PreparedQuery::prepare(query, &self.schema)?;

        let rows = self.rows.read().await;
        if rows.records.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.index.read().await.clone();

        let results = match index.as_deref() {
            Some(VectorIndex::IvfFlat(ivf)) if ivf.descriptor().metric == query.metric => {
                let indexed = ivf.descriptor().indexed_rows.min(rows.records.len());
                let tail = if query.fast_search {
                    &rows.records[..0]
                } else {
                    &rows.records[indexed..]
                };
                // Widen past `nprobes` when the nearest partitions cannot fill the result.
                let from_tail = tail.iter().filter(|r| query.admits(&r.document)).count();
                let wanted = query.candidate_target().saturating_sub(from_tail);
                let probed = ivf.probe(&query.vector, query.nprobes, wanted, |position| {
                    rows.records
                        .get(position)
                        .is_some_and(|r| query.admits(&r.document))
                });
                debug!(
                    "IVF search on '{}': {} probed rows, {} unindexed",
                    self.name,
                    probed.len(),
                    tail.len()
                );
                query.rank(
                    probed
                        .iter()
                        .filter_map(|&position| rows.records.get(position))
                        .chain(tail.iter()),
                )
            }
            _ => query.rank(rows.records.iter()),
        };

        Ok(results)
    }

    pub async fn state(&self) -> CollectionState {
        let rows = self.len().await;
        match self.index.read().await.as_ref() {
            Some(index) => CollectionState::Indexed {
                stale: index.descriptor().indexed_rows < rows,
            },
            None if rows == 0 => CollectionState::Empty,
            None => CollectionState::Populated,
        }
    }

    pub async fn stats(&self) -> CollectionStats {
        let rows = self.len().await;
        let state = self.state().await;
        let index = self.index.read().await.clone();
        CollectionStats {
            name: self.name.clone(),
            state,
            rows,
            indexed_rows: index.as_ref().map_or(0, |i| i.descriptor().indexed_rows),
            partitions: index.as_ref().map_or(0, |i| i.num_partitions()),
            dimension: self.schema.dimension,
            metric: self.schema.metric,
            index: index.map(|i| *i.descriptor()),
        }
    }
}

/// Index construction is CPU bound; keep it off the async workers.
async fn build_blocking(
    records: Vec<Arc<Record>>,
    metric: DistanceMetric,
    options: IndexOptions,
) -> Result<VectorIndex> {
    tokio::task::spawn_blocking(move || {
        let vectors: Vec<&[f32]> = records.iter().map(|r| r.document.embedding.as_slice()).collect();
        VectorIndex::build(metric, options, &vectors)
    })
    .await
    .map_err(|e| CollectionError::Storage(anyhow::anyhow!("index build task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn laws_schema() -> CollectionSchema {
        CollectionSchema::new(3).with_column("vigente", ColumnType::Boolean)
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("A sobre isenção de IPTU", vec![1.0, 0.0, 0.0]).with_metadata("vigente", true),
            Document::new("B sobre ISS", vec![0.0, 1.0, 0.0]).with_metadata("vigente", false),
            Document::new("C sobre isenção de IPTU para idosos", vec![0.9, 0.1, 0.0])
                .with_metadata("vigente", true),
        ]
    }

    fn texts(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.document.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_cosine_ranking_scenario() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        docs.insert(corpus()).await.unwrap();

        let results = docs
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0]).metric(DistanceMetric::Cosine).limit(2))
            .await
            .unwrap();

        assert_eq!(texts(&results), vec!["A sobre isenção de IPTU", "C sobre isenção de IPTU para idosos"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - 0.9939).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_filtered_scenario() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        docs.insert(corpus()).await.unwrap();

        for filter in ["vigente = true", "vigente = TRUE AND NOT vigente = FALSE"] {
            let results = docs
                .search(SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(2).prefilter(filter))
                .await
                .unwrap();
            assert_eq!(texts(&results), vec!["A sobre isenção de IPTU", "C sobre isenção de IPTU para idosos"]);
        }

        // B is the best match for this query, the filter still removes it.
        let results = docs
            .search(SearchQuery::new(vec![0.0, 1.0, 0.0]).limit(2).postfilter("vigente = true").overfetch(3))
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.document.text != "B sobre ISS"));
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_schema_conflict_scenario() {
        let db = Database::in_memory();
        db.open_or_create("docs", CollectionSchema::new(384)).await.unwrap();
        let err = db.open_or_create("docs", CollectionSchema::new(768)).await.unwrap_err();
        assert!(matches!(err, CollectionError::SchemaMismatch { .. }));

        let err = db
            .open_or_create("docs", CollectionSchema::new(384).with_metric(DistanceMetric::L2))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let db = Database::in_memory();
        let first = db.open_or_create("laws", laws_schema()).await.unwrap();
        first.insert(corpus()).await.unwrap();

        // Declaring fewer columns is fine, the handle keeps the stored schema.
        let second = db.open_or_create("laws", CollectionSchema::new(3)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.schema(), &laws_schema());
        assert_eq!(second.len().await, 3);
    }

    #[tokio::test]
    async fn test_insert_partial_success() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();

        let summary = docs
            .insert(vec![
                Document::new("ok", vec![1.0, 0.0, 0.0]),
                Document::new("short", vec![1.0, 0.0]),
                Document::new("bad type", vec![1.0, 0.0, 0.0]).with_metadata("vigente", "sim"),
                Document::new("ok too", vec![0.0, 1.0, 0.0]).with_id("custom"),
                Document::new("dup", vec![0.0, 1.0, 0.0]).with_id("custom"),
            ])
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        let positions: Vec<usize> = summary.rejected.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 4]);
        assert!(matches!(
            summary.rejected[0].error,
            CollectionError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert!(matches!(summary.rejected[1].error, CollectionError::SchemaMismatch { .. }));
        assert!(matches!(summary.rejected[2].error, CollectionError::DuplicateId(_)));

        let results = docs.search(SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(5)).await.unwrap();
        assert_eq!(results[0].document.id, "laws-0");
        assert_eq!(results[1].document.id, "custom");

        assert_eq!(docs.insert(Vec::new()).await.unwrap().inserted, 0);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        assert_eq!(docs.state().await, CollectionState::Empty);

        let results = docs.search(SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(3)).await.unwrap();
        assert!(results.is_empty());

        let err = docs
            .build_index(DistanceMetric::Cosine, IndexOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::EmptyCollection(_)));

        // Validation still runs on an empty collection.
        let err = docs
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0]).prefilter("ano > 2000"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidPredicate(_)));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        docs.insert(corpus()).await.unwrap();
        assert_eq!(docs.state().await, CollectionState::Populated);

        docs.build_index(DistanceMetric::Cosine, IndexOptions::ivf_flat(Some(2)))
            .await
            .unwrap();
        assert_eq!(docs.state().await, CollectionState::Indexed { stale: false });

        docs.insert(vec![Document::new("D", vec![0.0, 0.0, 1.0])]).await.unwrap();
        assert_eq!(docs.state().await, CollectionState::Indexed { stale: true });

        let stats = docs.stats().await;
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.indexed_rows, 3);
        assert_eq!(stats.partitions, 2);

        docs.build_index(DistanceMetric::Cosine, IndexOptions::exact()).await.unwrap();
        assert_eq!(docs.state().await, CollectionState::Indexed { stale: false });
    }

    #[tokio::test]
    async fn test_unindexed_tail_is_searched_unless_fast() {
        let db = Database::in_memory();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        docs.insert(corpus()).await.unwrap();
        docs.build_index(DistanceMetric::Cosine, IndexOptions::ivf_flat(Some(2)))
            .await
            .unwrap();
        docs.insert(vec![Document::new("D", vec![0.0, 0.0, 1.0])]).await.unwrap();

        let results = docs.search(SearchQuery::new(vec![0.0, 0.0, 1.0]).limit(1)).await.unwrap();
        assert_eq!(texts(&results), vec!["D"]);

        let results = docs
            .search(SearchQuery::new(vec![0.0, 0.0, 1.0]).limit(4).fast_search())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.document.text != "D"));
    }

    #[tokio::test]
    async fn test_index_matches_exact_search_with_all_probes() {
        let db = Database::in_memory();
        let docs = db.open_or_create("grid", CollectionSchema::new(2)).await.unwrap();
        let batch: Vec<Document> = (0..40)
            .map(|i| {
                let angle = i as f32 * 0.15;
                Document::new(format!("p{}", i), vec![angle.cos(), angle.sin()])
            })
            .collect();
        docs.insert(batch).await.unwrap();

        let query = || SearchQuery::new(vec![0.3, 0.9]).limit(5);
        let exact = docs.search(query()).await.unwrap();

        docs.build_index(DistanceMetric::Cosine, IndexOptions::ivf_flat(Some(6)))
            .await
            .unwrap();
        let probed = docs.search(query().nprobes(6)).await.unwrap();
        assert_eq!(texts(&exact), texts(&probed));
    }

    fn ring(rows: usize) -> Vec<Document> {
        (0..rows)
            .map(|i| {
                let angle = i as f32 * 0.0628;
                Document::new(format!("r{}", i), vec![angle.cos(), angle.sin(), (i % 7) as f32 * 0.1])
                    .with_metadata("vigente", i % 2 == 0)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ivf_search_fills_top_k() {
        let db = Database::in_memory();
        let docs = db.open_or_create("ring", laws_schema()).await.unwrap();
        docs.insert(ring(100)).await.unwrap();
        docs.build_index(DistanceMetric::Cosine, IndexOptions::default()).await.unwrap();
        assert_eq!(docs.stats().await.partitions, 10);

        let query = || SearchQuery::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(docs.search(query().limit(50).nprobes(2)).await.unwrap().len(), 50);
        assert_eq!(docs.search(query().limit(95)).await.unwrap().len(), 95);
        assert_eq!(docs.search(query().limit(100).nprobes(1)).await.unwrap().len(), 100);

        let in_force = docs
            .search(query().limit(40).nprobes(1).prefilter("vigente = TRUE"))
            .await
            .unwrap();
        assert_eq!(in_force.len(), 40);
        assert!(in_force.iter().all(|r| r.document.metadata["vigente"] == Value::Boolean(true)));

        // Only 50 rows are in force, so that is all a larger request can get.
        let all_in_force = docs
            .search(query().limit(80).nprobes(1).prefilter("vigente = TRUE"))
            .await
            .unwrap();
        assert_eq!(all_in_force.len(), 50);
    }

    #[tokio::test]
    async fn test_non_finite_embeddings_are_rejected_and_never_stored() {
        let dir = TempDir::new().unwrap();
        let mode = StorageMode::Embedded {
            path: dir.path().to_path_buf(),
        };
        {
            let db = Database::connect(&mode).await.unwrap();
            let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
            let summary = docs
                .insert(vec![
                    Document::new("ok", vec![1.0, 0.0, 0.0]),
                    Document::new("nan", vec![f32::NAN, 0.0, 0.0]),
                    Document::new("inf", vec![f32::INFINITY, 0.0, 0.0]),
                    Document::new("last", vec![0.0, 1.0, 0.0]),
                ])
                .await
                .unwrap();
            assert_eq!(summary.inserted, 2);
            let positions: Vec<usize> = summary.rejected.iter().map(|r| r.position).collect();
            assert_eq!(positions, vec![1, 2]);
            assert!(summary
                .rejected
                .iter()
                .all(|r| matches!(r.error, CollectionError::InvalidArgument(_))));
        }

        let db = Database::connect(&mode).await.unwrap();
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        assert_eq!(docs.len().await, 2);
        let results = docs.search(SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(5)).await.unwrap();
        assert_eq!(texts(&results), vec!["ok", "last"]);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let mode = StorageMode::Embedded {
            path: dir.path().to_path_buf(),
        };
        let query = || SearchQuery::new(vec![1.0, 0.0, 0.0]).limit(3).prefilter("vigente = TRUE");

        let before = {
            let db = Database::connect(&mode).await.unwrap();
            let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
            docs.insert(corpus()).await.unwrap();
            docs.build_index(DistanceMetric::Cosine, IndexOptions::ivf_flat(Some(2)))
                .await
                .unwrap();
            docs.insert(vec![Document::new("D", vec![0.0, 0.0, 1.0]).with_metadata("vigente", true)])
                .await
                .unwrap();
            docs.search(query()).await.unwrap()
        };

        let db = Database::connect(&mode).await.unwrap();
        assert_eq!(db.collection_names().await.unwrap(), vec!["laws".to_string()]);
        let docs = db.open_or_create("laws", laws_schema()).await.unwrap();
        assert_eq!(docs.len().await, 4);
        assert_eq!(docs.state().await, CollectionState::Indexed { stale: true });

        let after = docs.search(query()).await.unwrap();
        assert_eq!(texts(&before), texts(&after));
        let ids: Vec<&str> = after.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["laws-0", "laws-2", "laws-3"]);

        let err = db.open_or_create("laws", CollectionSchema::new(4)).await.unwrap_err();
        assert!(matches!(err, CollectionError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let db = Database::in_memory();
        let err = db.open_or_create("../etc", CollectionSchema::new(3)).await.unwrap_err();
        assert!(matches!(err, CollectionError::InvalidArgument(_)));
    }
}
