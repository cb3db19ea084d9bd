use crate::collection::{IndexKind, IndexOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole assistant: the answering LLM, the embedding
/// model, where collections live, and how retrieval and indexing behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

/// Which service generates the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Groq's OpenAI-compatible API (needs an API key).
    Groq,
    /// A local Ollama server.
    Ollama,
    /// No generation; answers show the retrieved excerpts.
    None,
}

/// Configuration for the answering model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
    /// Environment variable holding the API key. Keys never live in the YAML.
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Groq,
            model: "llama-3.3-70b-versatile".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            temperature: 0.0,
            api_key_env: "GROQ_API_KEY".to_string(),
        }
    }
}

impl LlmConfig {
    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Configuration for the embedding model.
///
/// `dimension` is the model's output size and becomes the collection's fixed
/// vector dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "paraphrase-multilingual".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 384,
        }
    }
}

/// Vector collection storage mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// Segment files on local disk, in-process with zero setup (default)
    Embedded { path: PathBuf },
    /// Process memory only; nothing survives a restart
    Memory,
    /// LanceDB tables (requires the `lancedb` feature)
    LanceDb { path: PathBuf },
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Embedded {
            path: PathBuf::from("./rag"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_mode: StorageMode,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

fn default_collection_name() -> String {
    "laws".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            collection_name: default_collection_name(),
        }
    }
}

/// Retrieval behaviour: how many excerpts, how much over-fetch, and which
/// topical keywords boost the candidate pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Candidates fetched per final result, to absorb filtering and index recall loss.
    pub overfetch: usize,
    pub nprobes: usize,
    /// Excerpt length in characters inside the prompt.
    pub snippet_chars: usize,
    /// Restrict retrieval to norms flagged as in force.
    pub only_in_force: bool,
    pub boost_keywords: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 6,
            overfetch: 4,
            nprobes: 8,
            snippet_chars: 1200,
            only_in_force: false,
            boost_keywords: [
                "iptu",
                "iss",
                "itbi",
                "isenção",
                "alíquota",
                "imunidade",
                "base de cálculo",
                "taxa",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKindConfig {
    Exact,
    IvfFlat,
}

/// Index construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Build the index when the collection first becomes non-empty.
    pub auto_build: bool,
    pub kind: IndexKindConfig,
    /// Partition count; unset picks sqrt(rows).
    pub num_partitions: Option<usize>,
    pub max_iterations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            auto_build: true,
            kind: IndexKindConfig::IvfFlat,
            num_partitions: None,
            max_iterations: 25,
        }
    }
}

impl IndexConfig {
    pub fn options(&self) -> IndexOptions {
        let kind = match self.kind {
            IndexKindConfig::Exact => IndexKind::Exact,
            IndexKindConfig::IvfFlat => IndexKind::IvfFlat {
                num_partitions: self.num_partitions,
            },
        };
        IndexOptions {
            kind,
            max_iterations: self.max_iterations,
        }
    }
}

/// Corpus loading behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Texts longer than this many characters are split into chunks.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 150,
            batch_size: 32,
        }
    }
}

fn default_system_prompt() -> String {
    "Você é o Dr. Gabriel, assistente jurídico especializado em tributos municipais \
     (IPTU, ISS e ITBI). Responda apenas com base nas normas fornecidas."
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            retrieval: RetrievalConfig::default(),
            index: IndexConfig::default(),
            ingest: IngestConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.collection_name, "laws");
        assert_eq!(
            config.storage_mode,
            StorageMode::Embedded {
                path: PathBuf::from("./rag")
            }
        );
    }

    #[test]
    fn test_retrieval_config_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.top_k, 6);
        assert_eq!(config.overfetch, 4);
        assert_eq!(config.snippet_chars, 1200);
        assert!(config.boost_keywords.iter().any(|k| k == "iptu"));
    }

    #[test]
    fn test_llm_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, LlmProviderKind::Groq);
        assert_eq!(config.model, "llama-3.3-70b-versatile");
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
llm:
  provider: ollama
  model: llama3.2
  base_url: http://localhost:11434
  temperature: 0.2
  api_key_env: UNUSED
storage:
  storage_mode:
    mode: memory
retrieval:
  top_k: 3
  only_in_force: true
index:
  kind: exact
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.provider, LlmProviderKind::Ollama);
        assert_eq!(config.storage.storage_mode, StorageMode::Memory);
        assert_eq!(config.storage.collection_name, "laws");
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.overfetch, 4);
        assert!(config.retrieval.only_in_force);
        assert_eq!(config.index.options(), IndexOptions::exact());
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn test_lancedb_mode_parses() {
        let yaml = "mode: lancedb\npath: ./rag\n";
        let mode: StorageMode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            mode,
            StorageMode::LanceDb {
                path: PathBuf::from("./rag")
            }
        );
    }
}
