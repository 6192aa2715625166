//! External providers: language model, image generation, transcription.
//!
//! Handlers only see the traits; the concrete clients are built from
//! configuration by [`crate::handlers::Services::from_config`].

pub mod images;
pub mod llm;
pub mod transcriber;

use thiserror::Error;

use crate::http::HttpError;

pub use images::{GeneratedImage, ImageGenerator, OpenAiImageGenerator};
pub use llm::{CompletionRequest, LanguageModel, OpenAiCompatibleModel};
pub use transcriber::{Transcriber, Transcript, WhisperTranscriber};

/// Provider failures
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider} timed out")]
    Timeout { provider: &'static str },

    #[error("Unexpected response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} failed: {message}")]
    Failed {
        provider: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether retrying later might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_retryable(),
            ProviderError::Timeout { .. } | ProviderError::Io(_) => true,
            ProviderError::NotConfigured { .. }
            | ProviderError::InvalidResponse { .. }
            | ProviderError::Failed { .. } => false,
        }
    }
}

/// Read an API key from the environment variable named in config
pub(crate) fn api_key(provider: &'static str, env_var: &str) -> Result<String, ProviderError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ProviderError::NotConfigured {
            provider,
            reason: format!("{env_var} is not set"),
        }),
    }
}
