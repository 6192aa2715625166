//! Task handlers: one per pipeline phase.
//!
//! A handler reads the checked-out item from its [`HandlerContext`] and
//! answers with a [`TaskResult`]. It never writes to the store itself;
//! metadata patches and follow-up tasks are persisted by the processor.

pub mod analyze;
pub mod context;
pub mod discover;
pub mod discussion;
pub mod dispatcher;
pub mod illustrate;
pub mod process;
pub mod summarize;
pub mod sync;
pub mod transcribe;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::StoreError;
use crate::domain::{TaskEnvelope, TaskResult, TaskType};
use crate::http::HttpError;
use crate::providers::ProviderError;
use crate::strategies::StrategyError;

pub use analyze::AnalyzeHandler;
pub use context::{HandlerContext, Services};
pub use discover::{DiscoverFeedsHandler, OnboardingDiscoverHandler};
pub use discussion::FetchDiscussionHandler;
pub use dispatcher::{DispatchError, Dispatcher};
pub use illustrate::IllustrateHandler;
pub use process::ProcessContentHandler;
pub use summarize::SummarizeHandler;
pub use sync::SyncIntegrationHandler;
pub use transcribe::TranscribeHandler;

/// Handler failures, already sorted into the outcome taxonomy
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient; the task is retried with backoff
    #[error("{0}")]
    Retryable(String),

    /// Permanent; the task and its content item fail
    #[error("{0}")]
    Fatal(String),

    /// Legitimate terminal non-error (private media and the like)
    #[error("{0}")]
    Skip(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn into_result(self) -> TaskResult {
        match self {
            HandlerError::Retryable(e) => TaskResult::retryable(e),
            HandlerError::Fatal(e) => TaskResult::fatal(e),
            HandlerError::Skip(reason) => TaskResult::skipped(reason),
            HandlerError::Other(e) => TaskResult::fatal(format!("{e:#}")),
        }
    }
}

impl From<StrategyError> for HandlerError {
    fn from(err: StrategyError) -> Self {
        match err {
            StrategyError::Fetch(ref http) if !http.is_retryable() => {
                HandlerError::Fatal(err.to_string())
            }
            StrategyError::Fetch(_) => HandlerError::Retryable(err.to_string()),
            StrategyError::Unavailable(_) => HandlerError::Skip(err.to_string()),
            StrategyError::Gone(_) | StrategyError::Unsupported(_) | StrategyError::Parse(_) => {
                HandlerError::Fatal(err.to_string())
            }
        }
    }
}

impl From<HttpError> for HandlerError {
    fn from(err: HttpError) -> Self {
        if err.is_retryable() {
            HandlerError::Retryable(err.to_string())
        } else {
            HandlerError::Fatal(err.to_string())
        }
    }
}

impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        if err.is_retryable() {
            HandlerError::Retryable(err.to_string())
        } else {
            HandlerError::Fatal(err.to_string())
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ContentNotFound(_) | StoreError::TaskNotFound(_) => {
                HandlerError::Fatal(err.to_string())
            }
            // Lost checkouts and busy databases clear up on retry
            _ => HandlerError::Retryable(err.to_string()),
        }
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::Retryable(err.to_string())
    }
}

/// One pipeline phase
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task type this handler serves
    fn task_type(&self) -> TaskType;

    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError>;
}

/// Hex SHA-256, used to detect unchanged inputs between runs
pub(crate) fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Outcome;

    #[test]
    fn test_error_classification() {
        let private: HandlerError = StrategyError::Unavailable("private video".into()).into();
        assert_eq!(private.into_result().outcome, Outcome::Skipped);

        let gone: HandlerError = StrategyError::Gone("404".into()).into();
        assert_eq!(gone.into_result().outcome, Outcome::FatalFailure);

        let timeout: HandlerError = HttpError::Timeout { url: "u".into() }.into();
        assert_eq!(timeout.into_result().outcome, Outcome::RetryableFailure);

        let other: HandlerError = anyhow::anyhow!("boom").into();
        let result = other.into_result();
        assert_eq!(result.outcome, Outcome::FatalFailure);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
