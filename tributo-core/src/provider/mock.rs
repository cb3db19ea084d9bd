//! Deterministic provider for tests.
//!
//! Embeddings are 3-dimensional keyword indicators: `[iptu, iss, itbi]`, each
//! 1.0 when the keyword occurs (case-insensitive) plus 0.1 everywhere so no
//! vector is zero.

use super::types::*;
use async_trait::async_trait;
use std::sync::Mutex;

pub(crate) struct MockProvider {
    reply: Option<String>,
    fail_embeddings: bool,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            reply: Some("Resposta fundamentada.".to_string()),
            fail_embeddings: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn failing_chat(mut self) -> Self {
        self.reply = None;
        self
    }

    pub fn failing_embeddings(mut self) -> Self {
        self.fail_embeddings = true;
        self
    }

    pub fn embedding_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        ["iptu", "iss", "itbi"]
            .iter()
            .map(|k| if lower.contains(k) { 1.1 } else { 0.1 })
            .collect()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let model = request.model.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match &self.reply {
            Some(reply) => Ok(ChatResponse::new(model, Message::assistant(reply.clone()))),
            None => Err(ProviderError::Api("503 Service Unavailable".to_string())),
        }
    }

    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
        if self.fail_embeddings {
            return Err(ProviderError::Other("embedding model not loaded".to_string()));
        }
        Ok(Self::embedding_for(text))
    }
}
