//! Language model provider (OpenAI-compatible chat completions).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmSettings;
use crate::http::HttpClient;

use super::{api_key, ProviderError};

const PROVIDER: &str = "language model";

/// One completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,

    /// Ask the model for a JSON object
    pub json: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            json: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat completions over [`HttpClient`]
pub struct OpenAiCompatibleModel {
    http: Arc<HttpClient>,
    settings: LlmSettings,
}

impl OpenAiCompatibleModel {
    pub fn new(http: Arc<HttpClient>, settings: LlmSettings) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let key = api_key(PROVIDER, &self.settings.api_key_env)?;

        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
            response_format: request.json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(model = %self.settings.model, prompt_chars = request.prompt.len(), "Chat completion request");

        let response: ChatResponse = self
            .http
            .post_json(&self.settings.endpoint, &body, Some(&key))
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "no completion in response".to_string(),
            })
    }
}
