//! LLM provider abstraction layer.
//!
//! This module defines a common interface for different LLM backends
//! (Ollama, Groq) to provide chat completions and embeddings.

mod types;
pub mod groq;
pub mod ollama;

// Re-export common types
pub use types::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, Message, Provider, ProviderError,
    Result,
};

// Re-export provider implementations
pub use groq::GroqProvider;
pub use ollama::OllamaProvider;

#[cfg(test)]
pub(crate) mod mock;
