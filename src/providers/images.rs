//! Image generation provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ImageSettings;
use crate::http::HttpClient;

use super::{api_key, ProviderError};

const PROVIDER: &str = "image generator";

/// A generated image, by URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub prompt: String,
    pub model: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Whether generation is switched on at all
    fn enabled(&self) -> bool;

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// OpenAI images endpoint
pub struct OpenAiImageGenerator {
    http: Arc<HttpClient>,
    settings: ImageSettings,
}

impl OpenAiImageGenerator {
    pub fn new(http: Arc<HttpClient>, settings: ImageSettings) -> Self {
        Self { http, settings }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        if !self.settings.enabled {
            return Err(ProviderError::NotConfigured {
                provider: PROVIDER,
                reason: "image generation is disabled".to_string(),
            });
        }
        let key = api_key(PROVIDER, &self.settings.api_key_env)?;

        let body = json!({
            "model": self.settings.model,
            "prompt": prompt,
            "n": 1,
            "size": self.settings.size,
        });

        let response: ImagesResponse = self
            .http
            .post_json(&self.settings.endpoint, &body, Some(&key))
            .await?;

        let url = response
            .data
            .into_iter()
            .find_map(|image| image.url)
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "no image URL in response".to_string(),
            })?;

        Ok(GeneratedImage {
            url,
            prompt: prompt.to_string(),
            model: self.settings.model.clone(),
        })
    }
}
