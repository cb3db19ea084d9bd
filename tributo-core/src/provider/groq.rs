//! Groq provider implementation.
//!
//! Groq serves an OpenAI-compatible chat completions API. It has no
//! embeddings endpoint, so `embed` reports `Unsupported`.

use super::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Groq chat completions client.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl GroqProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Provider for GroqProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = CompletionRequest {
            model: request.model,
            messages: request.messages,
            temperature: request.temperature,
        };

        let response = self.http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(ProviderError::Api(format!("{}: {}", status, error_text)));
        }

        let completion = response.json::<CompletionResponse>().await?;
        completion.into_chat_response()
    }

    async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f32>> {
        Err(ProviderError::Unsupported(
            "Groq does not provide embeddings".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Message,
}

impl CompletionResponse {
    fn into_chat_response(self) -> Result<ChatResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Api("completion returned no choices".to_string()))?;
        Ok(ChatResponse::new(self.model, choice.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_response_takes_first_choice() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "llama-3.3-70b-versatile",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Sim, há isenção."}, "finish_reason": "stop"}
            ]
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        let response = parsed.into_chat_response().unwrap();
        assert_eq!(response.content, "Sim, há isenção.");
        assert_eq!(response.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_empty_choices_is_an_error() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parsed.into_chat_response(), Err(ProviderError::Api(_))));
    }

    #[tokio::test]
    async fn test_embeddings_are_unsupported() {
        let provider = GroqProvider::new("https://api.groq.com/openai/v1", "key").unwrap();
        let err = provider.embed("texto", "any").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
