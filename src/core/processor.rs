//! Sequential processor: one task at a time per worker process.
//!
//! Each iteration claims a task, checks out its content item, dispatches
//! the handler and persists the result. The checkout is released on every
//! path out of an iteration. Parallelism comes from running more worker
//! processes against the same store, never from concurrent tasks here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerSettings;
use crate::domain::{
    ContentId, ContentStatus, FollowUp, FollowUpTarget, Outcome, Task, TaskId, TaskResult,
    TaskType,
};
use crate::handlers::{Dispatcher, HandlerContext, Services};

use super::checkout::{CheckoutHandle, CheckoutManager};
use super::content_store::{ContentStore, ContentUpdate};
use super::db::{Database, StoreError};
use super::retry::RetryPolicy;
use super::task_queue::{FailOutcome, TaskQueue};

/// Processor timing and retry knobs
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub checkout_ttl: Duration,
    pub claim_ttl: Duration,
    /// Delay for a task whose content item is checked out elsewhere
    pub contention_delay: Duration,
    pub retry: RetryPolicy,
    pub max_attempts: u32,
    pub idle_min: Duration,
    pub idle_max: Duration,
    pub maintenance_interval: Duration,
    pub error_backoff: Duration,
}

impl From<&WorkerSettings> for ProcessorSettings {
    fn from(worker: &WorkerSettings) -> Self {
        Self {
            checkout_ttl: worker.checkout_ttl(),
            claim_ttl: worker.claim_ttl(),
            contention_delay: Duration::from_millis(worker.contention_delay_ms),
            retry: worker.retry_policy(),
            max_attempts: worker.max_attempts,
            idle_min: Duration::from_millis(worker.idle_min_ms),
            idle_max: Duration::from_millis(worker.idle_max_ms.max(worker.idle_min_ms)),
            maintenance_interval: Duration::from_secs(worker.reclaim_interval_secs),
            error_backoff: Duration::from_millis(worker.error_backoff_ms),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&WorkerSettings::default())
    }
}

/// What one `run_once` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing claimable
    Idle,

    /// The content item was checked out elsewhere; the task was put back
    Deferred { task_id: TaskId },

    Processed { task_id: TaskId, outcome: Outcome },
}

/// The claim → checkout → dispatch → persist → release loop
pub struct SequentialProcessor {
    worker_id: String,
    db: Database,
    content: ContentStore,
    queue: TaskQueue,
    checkouts: CheckoutManager,
    dispatcher: Arc<Dispatcher>,
    services: Services,
    settings: ProcessorSettings,
}

impl std::fmt::Debug for SequentialProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialProcessor")
            .field("worker_id", &self.worker_id)
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .finish()
    }
}

impl SequentialProcessor {
    pub fn new(
        db: Database,
        worker_id: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        services: Services,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            content: ContentStore::new(db.clone()),
            queue: TaskQueue::new(db.clone()).with_max_attempts(settings.max_attempts),
            checkouts: CheckoutManager::new(db.clone()),
            db,
            dispatcher,
            services,
            settings,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Run until `shutdown` flips to true (or its sender goes away).
    ///
    /// The task in flight always finishes before the loop exits.
    #[instrument(skip_all, fields(worker = %self.worker_id))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(handlers = ?self.dispatcher.registered_types(), "Processor started");

        let mut idle = self.settings.idle_min;
        let mut last_maintenance: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let due = last_maintenance
                .map(|at| at.elapsed() >= self.settings.maintenance_interval)
                .unwrap_or(true);
            if due {
                if let Err(e) = self.maintenance() {
                    warn!(error = %e, "Maintenance sweep failed");
                }
                last_maintenance = Some(Instant::now());
            }

            let pause = match self.run_once().await {
                Ok(Iteration::Idle) => {
                    let pause = idle;
                    idle = (idle * 2).min(self.settings.idle_max);
                    pause
                }
                Ok(_) => {
                    idle = self.settings.idle_min;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Processor iteration failed");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Processor stopped");
        Ok(())
    }

    /// Stale-claim reclamation plus the expired-checkout sweep
    pub fn maintenance(&self) -> Result<(usize, usize), StoreError> {
        let reclaimed = self.queue.reclaim_stale(self.settings.claim_ttl)?;
        let swept = self.checkouts.sweep_expired(self.settings.checkout_ttl)?;
        Ok((reclaimed, swept))
    }

    /// One claim/checkout/dispatch/persist/release pass
    #[instrument(skip_all, fields(worker = %self.worker_id))]
    pub async fn run_once(&self) -> Result<Iteration, StoreError> {
        let Some(task) = self.queue.claim(&self.worker_id)? else {
            return Ok(Iteration::Idle);
        };
        debug!(task_id = %task.id, task_type = %task.task_type, content_id = %task.content_id, "Task claimed");

        let granted = match self
            .checkouts
            .checkout(task.content_id, &self.worker_id, self.settings.checkout_ttl)
        {
            Ok(granted) => granted,
            Err(StoreError::ContentNotFound(id)) => {
                let error = format!("content item {id} does not exist");
                self.queue
                    .fail(task.id, &self.worker_id, false, &self.settings.retry, &error)?;
                return Ok(Iteration::Processed {
                    task_id: task.id,
                    outcome: Outcome::FatalFailure,
                });
            }
            Err(e) => return Err(e),
        };

        if !granted {
            // Contention is expected; no attempt is consumed
            self.queue
                .defer(task.id, &self.worker_id, self.settings.contention_delay)?;
            debug!(task_id = %task.id, "Content busy, task deferred");
            return Ok(Iteration::Deferred { task_id: task.id });
        }

        let processed = self.process_checked_out(&task).await;

        if let Err(e) = self.checkouts.release(task.content_id, &self.worker_id) {
            warn!(content_id = %task.content_id, error = %e, "Checkout release failed");
        }

        let outcome = processed?;
        Ok(Iteration::Processed {
            task_id: task.id,
            outcome,
        })
    }

    async fn process_checked_out(&self, task: &Task) -> Result<Outcome, StoreError> {
        self.checkouts
            .mark_processing(task.content_id, &self.worker_id)?;
        let item = self.content.get(task.content_id)?;

        let ctx = HandlerContext {
            content: item,
            checkout: CheckoutHandle::new(
                self.checkouts.clone(),
                task.content_id,
                self.worker_id.clone(),
                self.settings.checkout_ttl,
            ),
            queue: self.queue.clone(),
            services: self.services.clone(),
            now: self.db.now(),
        };

        let started = Instant::now();
        let result = self.dispatcher.dispatch(&task.envelope(), &ctx).await;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            outcome = ?result.outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task executed"
        );

        self.persist(task, result)
    }

    /// Turn a handler result into store mutations
    fn persist(&self, task: &Task, result: TaskResult) -> Result<Outcome, StoreError> {
        let outcome = result.outcome;
        match outcome {
            Outcome::Success | Outcome::Skipped => self.persist_success(task, result)?,
            Outcome::RetryableFailure => {
                let error = result
                    .error
                    .unwrap_or_else(|| "retryable failure".to_string());
                self.persist_failure(task, true, error)?;
            }
            Outcome::FatalFailure => {
                let error = result.error.unwrap_or_else(|| "fatal failure".to_string());
                self.persist_failure(task, false, error)?;
            }
        }
        Ok(outcome)
    }

    fn persist_success(&self, task: &Task, result: TaskResult) -> Result<(), StoreError> {
        let status = if result.outcome == Outcome::Skipped {
            ContentStatus::Skipped
        } else if result.continues_same_content() {
            ContentStatus::Pending
        } else {
            ContentStatus::Completed
        };

        let mut metadata_patch = result.metadata_patch;
        if let (Outcome::Skipped, Some(reason)) = (result.outcome, &result.error) {
            metadata_patch.insert("skip_reason".into(), reason.clone().into());
        }

        let update = ContentUpdate {
            metadata_patch,
            content_type: result.content_type,
            platform: result.platform,
            ..ContentUpdate::status(status)
        };

        if !self.content.finish(task.content_id, &self.worker_id, update)? {
            warn!(task_id = %task.id, content_id = %task.content_id, "Checkout lost before persist, result discarded");
            self.queue.fail(
                task.id,
                &self.worker_id,
                true,
                &self.settings.retry,
                "checkout lost before the result could be persisted",
            )?;
            return Ok(());
        }

        let enqueued = self.enqueue_follow_ups(task, result.follow_ups)?;
        if !self.queue.complete(task.id, &self.worker_id)? {
            warn!(task_id = %task.id, "Claim lost before completion, task left to its new holder");
        }
        debug!(task_id = %task.id, %status, follow_ups = enqueued, "Task persisted");
        Ok(())
    }

    fn persist_failure(
        &self,
        task: &Task,
        retryable: bool,
        error: String,
    ) -> Result<(), StoreError> {
        let update = match self
            .queue
            .fail(task.id, &self.worker_id, retryable, &self.settings.retry, &error)?
        {
            FailOutcome::RetryScheduled { .. } => ContentUpdate {
                error: Some(error),
                record_failure: true,
                ..ContentUpdate::status(ContentStatus::Pending)
            },
            FailOutcome::Failed => ContentUpdate::failed(error),
            FailOutcome::NotClaimed => {
                // Reclaimed while we ran; whoever holds it now decides
                warn!(task_id = %task.id, "Task no longer claimed, failure not recorded");
                return Ok(());
            }
        };

        if !self.content.finish(task.content_id, &self.worker_id, update)? {
            warn!(content_id = %task.content_id, "Checkout lost, content status not updated");
        }
        Ok(())
    }

    /// Enqueue follow-ups, skipping duplicates of open work
    fn enqueue_follow_ups(
        &self,
        task: &Task,
        follow_ups: Vec<FollowUp>,
    ) -> Result<usize, StoreError> {
        let mut enqueued = 0;
        for follow_up in follow_ups {
            let Some(content_id) = self.follow_up_target(task, &follow_up)? else {
                continue;
            };
            let id = self
                .queue
                .enqueue(follow_up.task_type, content_id, follow_up.payload, None)?;
            debug!(task_id = %id, task_type = %follow_up.task_type, %content_id, "Follow-up enqueued");
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Content item a follow-up should run on, or None to drop it
    fn follow_up_target(
        &self,
        task: &Task,
        follow_up: &FollowUp,
    ) -> Result<Option<ContentId>, StoreError> {
        let (content_id, created) = match &follow_up.target {
            FollowUpTarget::SameContent => (task.content_id, false),
            FollowUpTarget::Url {
                url,
                content_type,
                source,
            } => match self
                .content
                .create_or_get(url, *content_type, source.as_deref())
            {
                Ok((item, created)) => {
                    // Already-ingested items are not analyzed again
                    if !created
                        && follow_up.task_type == TaskType::Analyze
                        && item.status.is_terminal()
                    {
                        debug!(content_id = %item.id, "Follow-up target already processed");
                        return Ok(None);
                    }
                    (item.id, created)
                }
                Err(StoreError::InvalidUrl(e)) => {
                    warn!(error = %e, "Dropping follow-up with an invalid URL");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            },
        };

        if !created {
            let exclude = (content_id == task.content_id).then_some(task.id);
            if self
                .queue
                .has_open_task(content_id, follow_up.task_type, exclude)?
            {
                debug!(%content_id, task_type = %follow_up.task_type, "Open task exists, follow-up skipped");
                return Ok(None);
            }
        }
        Ok(Some(content_id))
    }
}
