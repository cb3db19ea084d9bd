//! tributo-core - Retrieval engine for municipal tax law question answering
//!
//! Provides the foundational components:
//! - Vector collections with typed metadata, SQL-like filters and an IVF index
//! - Pluggable persistence (segment files, memory, LanceDB)
//! - LLM provider abstraction (Ollama, Groq)
//! - RAG pipeline: ingestion, keyword-boosted retrieval, grounded prompts
//! - Configuration management
//!
//! ## Primary API
//!
//! Open a [`Database`](collection::Database) once at startup, open the
//! statute collection through it, and answer questions with an
//! [`Assistant`].

// Public modules
pub mod assistant;
pub mod collection;
pub mod config;
pub mod provider;
pub mod rag;

// Public exports
pub use assistant::{Answer, Assistant, LlmBackend};
pub use collection::{
    Collection, CollectionError, CollectionSchema, CollectionState, Database, Document,
    DistanceMetric, IndexOptions, Predicate, SearchQuery, SearchResult,
};
pub use config::{Config, ConfigError, StorageMode};
pub use rag::{Embedder, Ingestor, RagError, Retriever};

// Provider exports
pub use provider::{ChatRequest, ChatResponse, Message, Provider, ProviderError};
