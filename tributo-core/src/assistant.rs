//! Question answering over retrieved statute excerpts.
//!
//! The assistant retrieves excerpts, asks the configured LLM to answer from
//! them, and falls back to showing the excerpts themselves when no LLM is
//! available or the call fails.
//!
//! ```text
//! Question → Retriever → excerpts?
//!                 ↓           ↓
//!             NoContext    LLM configured?
//!                          ↓            ↓
//!                    Generated      Excerpts
//!                  (or Excerpts on LLM failure)
//! ```

use crate::collection::SearchResult;
use crate::config::{Config, LlmConfig, LlmProviderKind};
use crate::provider::{ChatRequest, GroqProvider, Message, OllamaProvider, Provider};
use crate::rag::{build_prompt, format_excerpts, Result, Retriever};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which LLM, if any, generates answers.
#[derive(Clone)]
pub enum LlmBackend {
    Ready(Arc<dyn Provider>),
    /// No generation; carries the reason shown to the user.
    Unavailable(String),
}

impl LlmBackend {
    /// Builds the backend described by the configuration.
    ///
    /// A missing API key is not an error: the assistant still answers with
    /// excerpts and reports why.
    pub fn from_config(config: &LlmConfig) -> Self {
        match config.provider {
            LlmProviderKind::None => LlmBackend::Unavailable("no LLM provider configured".to_string()),
            LlmProviderKind::Ollama => LlmBackend::Ready(Arc::new(OllamaProvider::new(&config.base_url))),
            LlmProviderKind::Groq => {
                let Some(key) = config.api_key() else {
                    return LlmBackend::Unavailable(format!("{} is not set", config.api_key_env));
                };
                match GroqProvider::new(&config.base_url, key) {
                    Ok(provider) => LlmBackend::Ready(Arc::new(provider)),
                    Err(e) => LlmBackend::Unavailable(format!("failed to create Groq client: {}", e)),
                }
            }
        }
    }
}

/// Outcome of answering a question.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Retrieval found nothing relevant.
    NoContext,
    /// The LLM answered from the retrieved excerpts.
    Generated {
        text: String,
        sources: Vec<SearchResult>,
    },
    /// The excerpts themselves, because no answer could be generated.
    Excerpts { text: String, reason: String },
}

/// Answers questions from the statute collection.
pub struct Assistant {
    retriever: Retriever,
    llm: LlmBackend,
    model: String,
    temperature: f64,
    system_prompt: String,
}

impl Assistant {
    pub fn new(retriever: Retriever, llm: LlmBackend, config: &Config) -> Self {
        Self {
            retriever,
            llm,
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn llm(&self) -> &LlmBackend {
        &self.llm
    }

    /// Answers a question.
    ///
    /// Retrieval errors propagate; they are never reported as
    /// [`Answer::NoContext`].
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let retrieval = self.retriever.config();
        let hits = self.retriever.retrieve(question, retrieval.top_k).await?;
        if hits.is_empty() {
            info!("No relevant excerpts for question");
            return Ok(Answer::NoContext);
        }

        let provider = match &self.llm {
            LlmBackend::Ready(provider) => provider,
            LlmBackend::Unavailable(reason) => {
                return Ok(Answer::Excerpts {
                    text: format_excerpts(&hits, retrieval.snippet_chars),
                    reason: reason.clone(),
                });
            }
        };

        let prompt = build_prompt(question, &hits, retrieval.snippet_chars);
        debug!("Prompt has {} characters from {} excerpts", prompt.chars().count(), hits.len());

        let request = ChatRequest::new(
            self.model.clone(),
            vec![Message::system(self.system_prompt.clone()), Message::user(prompt)],
        )
        .with_temperature(self.temperature);

        match provider.chat(request).await {
            Ok(response) => Ok(Answer::Generated {
                text: response.content,
                sources: hits,
            }),
            Err(e) => {
                warn!("LLM call failed, falling back to excerpts: {}", e);
                Ok(Answer::Excerpts {
                    text: format_excerpts(&hits, retrieval.snippet_chars),
                    reason: format!("LLM call failed: {}", e),
                })
            }
        }
    }
}
