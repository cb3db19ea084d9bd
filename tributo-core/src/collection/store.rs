//! Storage backend abstraction and factory.
//!
//! A backend persists two things per collection: a manifest (schema plus the
//! descriptor of the last index build) and the append-only sequence of
//! records. Search and indexing happen in memory inside
//! [`Collection`](super::Collection); backends only need to make appends
//! durable and replay them in order.

use super::index::IndexDescriptor;
use super::memory_store::MemoryStore;
use super::schema::CollectionSchema;
use super::segment_store::SegmentStore;
use super::types::Record;
use crate::config::StorageMode;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Persistent description of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub schema: CollectionSchema,
    #[serde(default)]
    pub index: Option<IndexDescriptor>,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

fn default_format_version() -> u32 {
    MANIFEST_FORMAT_VERSION
}

impl Manifest {
    pub fn new(name: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            index: None,
            format_version: MANIFEST_FORMAT_VERSION,
        }
    }
}

/// Unified interface for collection persistence.
///
/// Implementations exist for plain segment files (embedded default), process
/// memory, and LanceDB tables behind the `lancedb` feature.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Reads the manifest of a collection, `None` if it does not exist.
    async fn load_manifest(&self, name: &str) -> Result<Option<Manifest>>;

    /// Creates or replaces the manifest of a collection.
    async fn save_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// Replays every stored record in insertion order.
    async fn load_records(&self, manifest: &Manifest) -> Result<Vec<Record>>;

    /// Durably appends records; they must come back from `load_records`
    /// after a restart, in the same order.
    async fn append_records(&self, manifest: &Manifest, records: &[Record]) -> Result<()>;

    /// Names of every persisted collection.
    async fn collection_names(&self) -> Result<Vec<String>>;
}

/// Creates a storage backend for the configured storage mode.
///
/// - `Embedded` keeps each collection in a directory of segment files
/// - `Memory` keeps everything in process memory (nothing survives a restart)
/// - `LanceDb` stores rows in LanceDB tables (requires the `lancedb` feature)
pub async fn open_store(mode: &StorageMode) -> Result<Arc<dyn CollectionStore>> {
    match mode {
        StorageMode::Embedded { path } => {
            let store = SegmentStore::new(path).await?;
            Ok(Arc::new(store))
        }
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "lancedb")]
        StorageMode::LanceDb { path } => {
            let store = super::lancedb_store::LanceDbStore::new(path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "lancedb"))]
        StorageMode::LanceDb { .. } => {
            anyhow::bail!("LanceDB storage requested but tributo-core was built without the `lancedb` feature")
        }
    }
}
