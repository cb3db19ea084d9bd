//! Embedded on-disk collection storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<collection>/manifest.json   schema and index descriptor
//! <root>/<collection>/records.jsonl   one JSON record per line, append-only
//! ```
//!
//! Appends are flushed and fsynced before returning. A crash mid-append can
//! leave a partial last line; replay drops it and truncates the file back to
//! the last complete record so later appends start on a clean line.

use super::store::{CollectionStore, Manifest};
use super::types::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "manifest.json";
const RECORDS_FILE: &str = "records.jsonl";

pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.collection_dir(name).join(MANIFEST_FILE)
    }

    fn records_path(&self, name: &str) -> PathBuf {
        self.collection_dir(name).join(RECORDS_FILE)
    }
}

#[async_trait]
impl CollectionStore for SegmentStore {
    async fn load_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let path = self.manifest_path(name);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let dir = self.collection_dir(&manifest.name);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(manifest)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("Saved manifest for collection '{}'", manifest.name);
        Ok(())
    }

    async fn load_records(&self, manifest: &Manifest) -> Result<Vec<Record>> {
        let path = self.records_path(&manifest.name);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let (records, valid_len) = parse_records(&raw)
            .with_context(|| format!("Corrupt record file {}", path.display()))?;

        if valid_len < raw.len() {
            warn!(
                "Dropping {} bytes of incomplete trailing record in {}",
                raw.len() - valid_len,
                path.display()
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(valid_len as u64).await?;
            file.sync_all().await?;
        }

        debug!("Replayed {} records for '{}'", records.len(), manifest.name);
        Ok(records)
    }

    async fn append_records(&self, manifest: &Manifest, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let dir = self.collection_dir(&manifest.name);
        fs::create_dir_all(&dir).await?;

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let path = dir.join(RECORDS_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&buf).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if fs::try_exists(entry.path().join(MANIFEST_FILE)).await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Parses newline-terminated JSON records.
///
/// Returns the records and the byte length of the complete prefix. Only the
/// last line may be incomplete; a bad line followed by more data is an error.
fn parse_records(raw: &[u8]) -> Result<(Vec<Record>, usize)> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < raw.len() {
        let rest = &raw[offset..];
        let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
            // Unterminated tail: the write never finished.
            return Ok((records, offset));
        };
        let line = &rest[..newline];
        let next = offset + newline + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            continue;
        }

        match serde_json::from_slice::<Record>(line) {
            Ok(record) => records.push(record),
            Err(_) if next >= raw.len() => return Ok((records, offset)),
            Err(e) => {
                return Err(e).with_context(|| format!("Bad record at byte offset {}", offset))
            }
        }
        offset = next;
    }

    Ok((records, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::schema::CollectionSchema;
    use crate::collection::types::Document;
    use tempfile::TempDir;

    fn record(seq: u64, text: &str) -> Record {
        Record {
            seq,
            document: Document::new(text, vec![1.0, 0.0]).with_id(format!("doc-{}", seq)),
        }
    }

    #[tokio::test]
    async fn test_manifest_and_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new("laws", CollectionSchema::new(2));

        {
            let store = SegmentStore::new(dir.path()).await.unwrap();
            assert!(store.load_manifest("laws").await.unwrap().is_none());
            store.save_manifest(&manifest).await.unwrap();
            store
                .append_records(&manifest, &[record(0, "a"), record(1, "b")])
                .await
                .unwrap();
            store.append_records(&manifest, &[record(2, "c")]).await.unwrap();
        }

        let store = SegmentStore::new(dir.path()).await.unwrap();
        assert_eq!(store.load_manifest("laws").await.unwrap(), Some(manifest.clone()));
        let records = store.load_records(&manifest).await.unwrap();
        let texts: Vec<&str> = records.iter().map(|r| r.document.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(store.collection_names().await.unwrap(), vec!["laws".to_string()]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped_and_repaired() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new("laws", CollectionSchema::new(2));
        let store = SegmentStore::new(dir.path()).await.unwrap();
        store.save_manifest(&manifest).await.unwrap();
        store.append_records(&manifest, &[record(0, "a")]).await.unwrap();

        let path = store.records_path("laws");
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"{\"seq\":1,\"docum").await.unwrap();
        drop(file);

        let records = store.load_records(&manifest).await.unwrap();
        assert_eq!(records.len(), 1);

        store.append_records(&manifest, &[record(1, "b")]).await.unwrap();
        let records = store.load_records(&manifest).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].document.text, "b");
    }

    #[test]
    fn test_corruption_in_the_middle_is_an_error() {
        let mut raw = Vec::new();
        serde_json::to_writer(&mut raw, &record(0, "a")).unwrap();
        raw.extend_from_slice(b"\nnot json\n");
        serde_json::to_writer(&mut raw, &record(1, "b")).unwrap();
        raw.push(b'\n');
        assert!(parse_records(&raw).is_err());
    }
}
