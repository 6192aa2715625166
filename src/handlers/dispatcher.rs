//! Dispatcher: fixed mapping from task type to handler.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, instrument};

use crate::domain::{TaskEnvelope, TaskResult, TaskType};

use super::{
    AnalyzeHandler, DiscoverFeedsHandler, FetchDiscussionHandler, HandlerContext,
    IllustrateHandler, OnboardingDiscoverHandler, ProcessContentHandler, SummarizeHandler,
    SyncIntegrationHandler, TaskHandler, TranscribeHandler,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

/// Routes envelopes to handlers
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registered", &self.registered_types())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in phase
    pub fn with_default_handlers() -> Result<Self, DispatchError> {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(AnalyzeHandler))?;
        dispatcher.register(Arc::new(ProcessContentHandler))?;
        dispatcher.register(Arc::new(TranscribeHandler))?;
        dispatcher.register(Arc::new(SummarizeHandler))?;
        dispatcher.register(Arc::new(IllustrateHandler))?;
        dispatcher.register(Arc::new(FetchDiscussionHandler))?;
        dispatcher.register(Arc::new(DiscoverFeedsHandler))?;
        dispatcher.register(Arc::new(OnboardingDiscoverHandler))?;
        dispatcher.register(Arc::new(SyncIntegrationHandler))?;
        Ok(dispatcher)
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), DispatchError> {
        let task_type = handler.task_type();
        if self.handlers.contains_key(&task_type) {
            return Err(DispatchError::AlreadyRegistered(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|task_type| self.handlers.contains_key(task_type))
            .collect()
    }

    /// Run the handler for `envelope`.
    ///
    /// Never fails: handler errors, panics and unknown task types all come
    /// back as a `TaskResult`.
    #[instrument(skip_all, fields(task_id = %envelope.task_id, task_type = %envelope.task_type))]
    pub async fn dispatch(&self, envelope: &TaskEnvelope, ctx: &HandlerContext) -> TaskResult {
        let Some(handler) = self.get(envelope.task_type) else {
            error!("No handler registered");
            return TaskResult::fatal(format!(
                "no handler registered for task type '{}'",
                envelope.task_type
            ));
        };

        // A spawned task turns a handler panic into a JoinError
        let owned_envelope = envelope.clone();
        let owned_ctx = ctx.clone();
        let joined = tokio::spawn(async move {
            handler.handle(&owned_envelope, &owned_ctx).await
        })
        .await;

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => e.into_result(),
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    let payload = join_error.into_panic();
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    format!("handler panicked: {detail}")
                } else {
                    "handler task was cancelled".to_string()
                };
                error!(error = %message, "Handler crashed");
                TaskResult::fatal(message)
            }
        }
    }
}
