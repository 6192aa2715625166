//! Execution context handed to every handler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{HttpSettings, PipelineSettings, ResolvedConfig};
use crate::core::{CheckoutHandle, TaskQueue};
use crate::domain::{ContentItem, TaskId};
use crate::http::{HttpClient, HttpError};
use crate::providers::{
    ImageGenerator, LanguageModel, OpenAiCompatibleModel, OpenAiImageGenerator, Transcriber,
    WhisperTranscriber,
};
use crate::strategies::StrategyRegistry;

use super::HandlerError;

/// Shortest renewal period, whatever the checkout TTL
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(10);

/// Long-lived provider clients shared across tasks
#[derive(Clone)]
pub struct Services {
    pub http: Arc<HttpClient>,
    pub strategies: Arc<StrategyRegistry>,
    pub llm: Arc<dyn LanguageModel>,
    pub images: Arc<dyn ImageGenerator>,
    pub transcriber: Arc<dyn Transcriber>,
    pub pipeline: PipelineSettings,
    pub max_download_bytes: usize,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("strategies", &self.strategies)
            .field("llm", &self.llm.name())
            .field("images", &self.images.enabled())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Services {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, HttpError> {
        let http = Arc::new(HttpClient::new(&config.http)?);

        // Model calls get their own, longer timeout
        let llm_http = Arc::new(HttpClient::new(&HttpSettings {
            timeout_secs: config.llm.timeout_secs,
            ..config.http.clone()
        })?);

        Ok(Self {
            strategies: Arc::new(StrategyRegistry::with_defaults()),
            llm: Arc::new(OpenAiCompatibleModel::new(llm_http.clone(), config.llm.clone())),
            images: Arc::new(OpenAiImageGenerator::new(llm_http, config.images.clone())),
            transcriber: Arc::new(WhisperTranscriber::new(config.transcription.clone())),
            pipeline: config.pipeline.clone(),
            max_download_bytes: config.transcription.max_download_bytes,
            http,
        })
    }
}

/// Per-task context
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Snapshot of the checked-out item, taken after checkout
    pub content: ContentItem,

    pub checkout: CheckoutHandle,

    /// Duplicate checks and claim heartbeats; enqueueing goes through
    /// follow-ups
    pub queue: TaskQueue,

    pub services: Services,

    /// Store clock at dispatch time
    pub now: DateTime<Utc>,
}

impl HandlerContext {
    pub fn timestamp(&self) -> String {
        self.now.to_rfc3339()
    }

    /// Drive `work` to completion while holding on to the item and the task.
    ///
    /// Every third of the checkout TTL the checkout is renewed and the claim
    /// on `task_id` refreshed. If either has been lost the work is dropped
    /// and a retryable error returned.
    pub async fn keep_alive<F>(
        &self,
        task_id: TaskId,
        work: F,
    ) -> Result<F::Output, HandlerError>
    where
        F: Future,
    {
        let period = (self.checkout.ttl() / 3).max(MIN_RENEW_PERIOD);
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tokio::pin!(work);

        loop {
            tokio::select! {
                output = &mut work => return Ok(output),
                _ = ticks.tick() => {
                    self.checkout.renew()?;
                    if !self.queue.heartbeat(task_id, self.checkout.worker_id())? {
                        warn!(%task_id, "Task claim lost during long-running work");
                        return Err(HandlerError::Retryable(format!(
                            "claim on task {task_id} lost while running"
                        )));
                    }
                    debug!(%task_id, "Checkout and claim renewed");
                }
            }
        }
    }
}
