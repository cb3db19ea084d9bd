//! Process-local collection storage.

use super::store::{CollectionStore, Manifest};
use super::types::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Keeps manifests and records in memory. Nothing survives the process, which
/// is what tests and throwaway sessions want.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, (Manifest, Vec<Record>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn load_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let collections = self.collections.lock().await;
        Ok(collections.get(name).map(|(manifest, _)| manifest.clone()))
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let mut collections = self.collections.lock().await;
        collections
            .entry(manifest.name.clone())
            .and_modify(|(stored, _)| *stored = manifest.clone())
            .or_insert_with(|| (manifest.clone(), Vec::new()));
        Ok(())
    }

    async fn load_records(&self, manifest: &Manifest) -> Result<Vec<Record>> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(&manifest.name)
            .map(|(_, records)| records.clone())
            .unwrap_or_default())
    }

    async fn append_records(&self, manifest: &Manifest, records: &[Record]) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let (_, stored) = collections
            .get_mut(&manifest.name)
            .with_context(|| format!("Collection '{}' has no manifest", manifest.name))?;
        stored.extend_from_slice(records);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self.collections.lock().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
