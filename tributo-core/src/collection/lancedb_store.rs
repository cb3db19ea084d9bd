//! LanceDB collection storage.
//!
//! Each collection maps to a LanceDB table with `id`, `seq`, `text` and
//! `vector` columns plus one nullable column per declared metadata field.
//! The manifest lives next to the tables as `<name>.manifest.json`.
//!
//! Tables created by other tools (a `laws` table written from Python, for
//! instance) have no manifest; one is inferred from the Arrow schema the
//! first time the table is opened.

use super::distance::DistanceMetric;
use super::schema::{CollectionSchema, ColumnType};
use super::store::{CollectionStore, Manifest};
use super::types::{Document, Record, Value};
use anyhow::{bail, Context, Result};
use arrow_array::{
    array::{
        ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int32Array,
        Int64Array, LargeStringArray, StringArray,
    },
    Array, RecordBatch, RecordBatchIterator,
};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use lancedb::arrow::arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const SEQ_COLUMN: &str = "seq";

pub struct LanceDbStore {
    conn: Connection,
    root: PathBuf,
}

impl LanceDbStore {
    /// Connects to (or creates) the LanceDB database directory at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let uri = root.to_string_lossy().into_owned();
        let conn = connect(&uri)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;
        Ok(Self { conn, root })
    }

    fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.manifest.json", name))
    }

    async fn has_table(&self, name: &str) -> Result<bool> {
        let names = self.conn.table_names().execute().await?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.conn
            .open_table(name)
            .execute()
            .await
            .with_context(|| format!("Failed to open LanceDB table '{}'", name))
    }

    fn create_schema(schema: &CollectionSchema) -> Arc<Schema> {
        let mut fields = vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(SEQ_COLUMN, DataType::Int64, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    schema.dimension as i32,
                ),
                false,
            ),
        ];
        for column in &schema.columns {
            let data_type = match column.column_type {
                ColumnType::Utf8 => DataType::Utf8,
                ColumnType::Int64 => DataType::Int64,
                ColumnType::Float64 => DataType::Float64,
                ColumnType::Boolean => DataType::Boolean,
            };
            fields.push(Field::new(&column.name, data_type, true));
        }
        Arc::new(Schema::new(fields))
    }

    /// Builds a manifest for a table this crate did not create.
    fn infer_manifest(name: &str, arrow: &Schema) -> Result<Manifest> {
        let vector = arrow
            .field_with_name("vector")
            .with_context(|| format!("Table '{}' has no 'vector' column", name))?;
        let dimension = match vector.data_type() {
            DataType::FixedSizeList(_, size) => *size as usize,
            other => bail!("Column 'vector' of table '{}' has type {}", name, other),
        };
        if arrow.field_with_name("text").is_err() {
            bail!("Table '{}' has no 'text' column", name);
        }

        let mut schema = CollectionSchema::new(dimension).with_metric(DistanceMetric::Cosine);
        for field in arrow.fields() {
            if matches!(field.name().as_str(), "id" | "text" | "vector" | SEQ_COLUMN) {
                continue;
            }
            let column_type = match field.data_type() {
                DataType::Utf8 | DataType::LargeUtf8 => ColumnType::Utf8,
                DataType::Int32 | DataType::Int64 => ColumnType::Int64,
                DataType::Float32 | DataType::Float64 => ColumnType::Float64,
                DataType::Boolean => ColumnType::Boolean,
                _ => continue,
            };
            schema = schema.with_column(field.name().as_str(), column_type);
        }
        Ok(Manifest::new(name, schema))
    }

    fn build_batch(manifest: &Manifest, records: &[Record]) -> Result<RecordBatch> {
        let schema = &manifest.schema;
        let arrow_schema = Self::create_schema(schema);

        let ids = StringArray::from_iter_values(records.iter().map(|r| r.document.id.as_str()));
        let seqs = Int64Array::from_iter_values(records.iter().map(|r| r.seq as i64));
        let texts = StringArray::from_iter_values(records.iter().map(|r| r.document.text.as_str()));

        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.document.embedding.iter().copied())
            .collect();
        let vectors = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            schema.dimension as i32,
            Arc::new(Float32Array::from(flat)),
            None,
        );

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(ids),
            Arc::new(seqs),
            Arc::new(texts),
            Arc::new(vectors),
        ];
        for column in &schema.columns {
            let values = records.iter().map(|r| r.document.metadata.get(&column.name));
            let array: ArrayRef = match column.column_type {
                ColumnType::Utf8 => Arc::new(StringArray::from(
                    values.map(|v| v.and_then(Value::as_str)).collect::<Vec<_>>(),
                )),
                ColumnType::Int64 => Arc::new(Int64Array::from(
                    values
                        .map(|v| match v {
                            Some(Value::Integer(i)) => Some(*i),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
                ColumnType::Float64 => Arc::new(Float64Array::from(
                    values.map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
                )),
                ColumnType::Boolean => Arc::new(BooleanArray::from(
                    values.map(|v| v.and_then(Value::as_bool)).collect::<Vec<_>>(),
                )),
            };
            columns.push(array);
        }

        RecordBatch::try_new(arrow_schema, columns).context("Failed to create record batch")
    }
}

#[async_trait]
impl CollectionStore for LanceDbStore {
    async fn load_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let path = self.manifest_path(name);
        if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            let manifest = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt manifest {}", path.display()))?;
            return Ok(Some(manifest));
        }
        if !self.has_table(name).await? {
            return Ok(None);
        }

        let table = self.open_table(name).await?;
        let arrow = table.schema().await?;
        let manifest = Self::infer_manifest(name, &arrow)?;
        info!(
            "Inferred schema for external table '{}' ({} dims, {} columns)",
            name,
            manifest.schema.dimension,
            manifest.schema.columns.len()
        );
        Ok(Some(manifest))
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        if !self.has_table(&manifest.name).await? {
            let schema = Self::create_schema(&manifest.schema);
            self.conn
                .create_empty_table(&manifest.name, schema)
                .execute()
                .await
                .context("Failed to create LanceDB table")?;
            debug!("Created LanceDB table '{}'", manifest.name);
        }

        let path = self.manifest_path(&manifest.name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(manifest)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_records(&self, manifest: &Manifest) -> Result<Vec<Record>> {
        if !self.has_table(&manifest.name).await? {
            return Ok(Vec::new());
        }
        let table = self.open_table(&manifest.name).await?;
        let total = table.count_rows(None).await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let results = table
            .query()
            .limit(total)
            .execute()
            .await
            .context("Failed to query LanceDB table")?;
        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let mut records = Vec::with_capacity(total);
        for batch in batches {
            read_batch(manifest, &batch, &mut records)?;
        }
        records.sort_by_key(|r| r.seq);
        Ok(records)
    }

    async fn append_records(&self, manifest: &Manifest, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.open_table(&manifest.name).await?;
        let batch = Self::build_batch(manifest, records)?;
        let schema_ref = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema_ref);

        table
            .add(reader)
            .execute()
            .await
            .context("Failed to add records to LanceDB")?;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = self.conn.table_names().execute().await?;
        names.sort();
        Ok(names)
    }
}

fn read_batch(manifest: &Manifest, batch: &RecordBatch, out: &mut Vec<Record>) -> Result<()> {
    let text_col = batch.column_by_name("text").context("Missing 'text' column")?;
    let vector_col = batch.column_by_name("vector").context("Missing 'vector' column")?;
    let vectors = vector_col
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .context("Failed to cast 'vector' to FixedSizeListArray")?;
    let id_col = batch.column_by_name("id");
    let seq_col = batch
        .column_by_name(SEQ_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>().cloned());

    for i in 0..batch.num_rows() {
        // Rows from external tables have no seq; keep the scan order.
        let seq = match &seq_col {
            Some(seqs) => seqs.value(i) as u64,
            None => out.len() as u64,
        };
        let text = string_at(text_col, i).unwrap_or_default();
        let id = id_col
            .and_then(|c| string_at(c, i))
            .unwrap_or_else(|| format!("{}-{}", manifest.name, seq));

        let row = vectors.value(i);
        let embedding = row
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("Failed to cast vector items to Float32Array")?
            .values()
            .to_vec();

        let mut metadata = HashMap::new();
        for column in &manifest.schema.columns {
            let Some(array) = batch.column_by_name(&column.name) else {
                continue;
            };
            if let Some(value) = value_at(array, column.column_type, i) {
                metadata.insert(column.name.clone(), value);
            }
        }

        out.push(Record {
            seq,
            document: Document {
                id,
                text,
                embedding,
                metadata,
            },
        });
    }
    Ok(())
}

fn string_at(array: &ArrayRef, i: usize) -> Option<String> {
    if array.is_null(i) {
        return None;
    }
    if let Some(s) = array.as_any().downcast_ref::<StringArray>() {
        return Some(s.value(i).to_string());
    }
    array
        .as_any()
        .downcast_ref::<LargeStringArray>()
        .map(|s| s.value(i).to_string())
}

fn value_at(array: &ArrayRef, column_type: ColumnType, i: usize) -> Option<Value> {
    if array.is_null(i) {
        return None;
    }
    let any = array.as_any();
    match column_type {
        ColumnType::Utf8 => string_at(array, i).map(Value::String),
        ColumnType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(i))
            .or_else(|| any.downcast_ref::<Int32Array>().map(|a| a.value(i) as i64))
            .map(Value::Integer),
        ColumnType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(i))
            .or_else(|| any.downcast_ref::<Float32Array>().map(|a| a.value(i) as f64))
            .map(Value::Float),
        ColumnType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Boolean(a.value(i))),
    }
}
