//! Durable task queue.
//!
//! Claims are a single `UPDATE ... WHERE id = (SELECT ...) RETURNING`
//! inside an immediate transaction, so two workers (in the same process or
//! not) never observe the same task as claimable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{ContentId, Task, TaskId, TaskStatus, TaskType};

use super::db::{
    add_duration, from_millis, from_millis_opt, sub_duration, to_millis, Database, StoreError,
};
use super::retry::RetryPolicy;

/// Default number of executions before a task fails terminally
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const TASK_COLUMNS: &str = "id, task_type, content_id, payload, status, attempt_count, max_attempts, \
     available_at, claimed_by, claimed_at, last_error, created_at, updated_at";

struct TaskRow {
    id: i64,
    task_type: String,
    content_id: i64,
    payload: String,
    status: String,
    attempt_count: i64,
    max_attempts: i64,
    available_at: i64,
    claimed_by: Option<String>,
    claimed_at: Option<i64>,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn read_task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        task_type: row.get(1)?,
        content_id: row.get(2)?,
        payload: row.get(3)?,
        status: row.get(4)?,
        attempt_count: row.get(5)?,
        max_attempts: row.get(6)?,
        available_at: row.get(7)?,
        claimed_by: row.get(8)?,
        claimed_at: row.get(9)?,
        last_error: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: TaskId(row.id),
            task_type: row.task_type.parse()?,
            content_id: ContentId(row.content_id),
            payload: serde_json::from_str(&row.payload)?,
            status: row.status.parse()?,
            attempt_count: row.attempt_count.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            available_at: from_millis(row.available_at)?,
            claimed_by: row.claimed_by,
            claimed_at: from_millis_opt(row.claimed_at)?,
            last_error: row.last_error,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

/// A task to enqueue, with explicit scheduling
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub content_id: ContentId,
    pub payload: Value,
    pub max_attempts: Option<u32>,
    pub available_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(task_type: TaskType, content_id: ContentId) -> Self {
        Self {
            task_type,
            content_id,
            payload: Value::Object(Default::default()),
            max_attempts: None,
            available_at: None,
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }
}

/// What `fail` did with the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Recycled; claimable again at `available_at`
    RetryScheduled { available_at: DateTime<Utc> },

    /// Terminal failure
    Failed,

    /// The task was not in `claimed` state; nothing changed
    NotClaimed,
}

/// Durable, typed work items
#[derive(Debug, Clone)]
pub struct TaskQueue {
    db: Database,
    default_max_attempts: u32,
}

impl TaskQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn default_max_attempts(&self) -> u32 {
        self.default_max_attempts
    }

    /// Enqueue with the default attempt budget
    pub fn enqueue(
        &self,
        task_type: TaskType,
        content_id: ContentId,
        payload: Value,
        available_at: Option<DateTime<Utc>>,
    ) -> Result<TaskId, StoreError> {
        self.enqueue_task(NewTask {
            task_type,
            content_id,
            payload,
            max_attempts: None,
            available_at,
        })
    }

    pub fn enqueue_task(&self, task: NewTask) -> Result<TaskId, StoreError> {
        let now = self.db.now();
        let available_at = to_millis(task.available_at.unwrap_or(now));
        let max_attempts = task.max_attempts.unwrap_or(self.default_max_attempts).max(1);
        let payload = serde_json::to_string(&task.payload)?;
        let now = to_millis(now);

        let id = self.db.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM content_items WHERE id = ?1",
                    params![task.content_id.0],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::ContentNotFound(task.content_id));
            }

            conn.execute(
                "INSERT INTO tasks
                     (task_type, content_id, payload, status, attempt_count, max_attempts,
                      available_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'queued', 0, ?4, ?5, ?6, ?6)",
                params![
                    task.task_type.as_str(),
                    task.content_id.0,
                    payload,
                    max_attempts,
                    available_at,
                    now
                ],
            )?;
            Ok(TaskId(conn.last_insert_rowid()))
        })?;

        info!(
            task_id = %id,
            task_type = %task.task_type,
            content_id = %task.content_id,
            "Task enqueued"
        );
        Ok(id)
    }

    /// Atomically claim the oldest claimable task.
    ///
    /// Rows whose task type this build does not know are failed in place
    /// and skipped.
    pub fn claim(&self, worker_id: &str) -> Result<Option<Task>, StoreError> {
        let now = to_millis(self.db.now());

        let claimed = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = loop {
                let row = tx
                    .query_row(
                        &format!(
                            "UPDATE tasks
                             SET status = 'claimed', claimed_by = ?1, claimed_at = ?2, updated_at = ?2
                             WHERE id = (
                                 SELECT id FROM tasks
                                 WHERE status IN ('queued', 'retry_scheduled') AND available_at <= ?2
                                 ORDER BY available_at, id
                                 LIMIT 1
                             )
                             AND status IN ('queued', 'retry_scheduled')
                             RETURNING {TASK_COLUMNS}"
                        ),
                        params![worker_id, now],
                        read_task_row,
                    )
                    .optional()?;

                let Some(row) = row else {
                    break None;
                };

                if row.task_type.parse::<TaskType>().is_err() {
                    warn!(task_id = row.id, task_type = %row.task_type, "Failing task of unknown type");
                    tx.execute(
                        "UPDATE tasks
                         SET status = 'failed', last_error = ?2, claimed_by = NULL,
                             claimed_at = NULL, updated_at = ?3
                         WHERE id = ?1",
                        params![row.id, format!("unknown task type: {}", row.task_type), now],
                    )?;
                    continue;
                }
                break Some(row);
            };
            tx.commit()?;
            Ok(claimed)
        })?;

        let task = claimed.map(Task::try_from).transpose()?;
        if let Some(task) = &task {
            debug!(
                task_id = %task.id,
                task_type = %task.task_type,
                content_id = %task.content_id,
                worker = worker_id,
                "Task claimed"
            );
        }
        Ok(task)
    }

    /// Mark a task claimed by `worker_id` succeeded.
    ///
    /// Returns false when the task is already terminal or the claim has
    /// passed to another worker, so completing twice is a no-op.
    pub fn complete(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError> {
        let now = to_millis(self.db.now());
        let changed = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM tasks WHERE id = ?1",
                    params![task_id.0],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::TaskNotFound(task_id));
            }

            let changed = tx.execute(
                "UPDATE tasks
                 SET status = 'succeeded', last_error = NULL, claimed_by = NULL,
                     claimed_at = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?2",
                params![task_id.0, worker_id, now],
            )?;
            tx.commit()?;
            Ok(changed == 1)
        })?;

        if changed {
            debug!(task_id = %task_id, worker = worker_id, "Task succeeded");
        } else {
            debug!(
                task_id = %task_id,
                worker = worker_id,
                "Task not held by worker, complete ignored"
            );
        }
        Ok(changed)
    }

    /// Record a failed execution of a task claimed by `worker_id`
    pub fn fail(
        &self,
        task_id: TaskId,
        worker_id: &str,
        retryable: bool,
        policy: &RetryPolicy,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        let now = self.db.now();

        let outcome = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: Option<(String, Option<String>, i64, i64)> = tx
                .query_row(
                    "SELECT status, claimed_by, attempt_count, max_attempts
                     FROM tasks WHERE id = ?1",
                    params![task_id.0],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let Some((status, claimed_by, attempt_count, max_attempts)) = current else {
                return Err(StoreError::TaskNotFound(task_id));
            };
            if status.parse::<TaskStatus>()? != TaskStatus::Claimed
                || claimed_by.as_deref() != Some(worker_id)
            {
                return Ok(FailOutcome::NotClaimed);
            }

            let attempts = attempt_count.max(0) as u32 + 1;
            let outcome = if retryable && attempts < max_attempts.max(0) as u32 {
                let available_at = add_duration(now, policy.delay_for_attempt(attempts));
                tx.execute(
                    "UPDATE tasks
                     SET status = 'retry_scheduled', attempt_count = ?2, available_at = ?3,
                         last_error = ?4, claimed_by = NULL, claimed_at = NULL, updated_at = ?5
                     WHERE id = ?1",
                    params![task_id.0, attempts, to_millis(available_at), error, to_millis(now)],
                )?;
                FailOutcome::RetryScheduled { available_at }
            } else {
                tx.execute(
                    "UPDATE tasks
                     SET status = 'failed', attempt_count = ?2, last_error = ?3,
                         claimed_by = NULL, claimed_at = NULL, updated_at = ?4
                     WHERE id = ?1",
                    params![task_id.0, attempts, error, to_millis(now)],
                )?;
                FailOutcome::Failed
            };
            tx.commit()?;
            Ok(outcome)
        })?;

        match outcome {
            FailOutcome::RetryScheduled { available_at } => {
                info!(task_id = %task_id, %available_at, error, "Task retry scheduled")
            }
            FailOutcome::Failed => warn!(task_id = %task_id, error, "Task failed"),
            FailOutcome::NotClaimed => {
                debug!(
                    task_id = %task_id,
                    worker = worker_id,
                    "Fail ignored, task not held by worker"
                )
            }
        }
        Ok(outcome)
    }

    /// Put a task claimed by `worker_id` back without consuming an attempt
    pub fn defer(
        &self,
        task_id: TaskId,
        worker_id: &str,
        delay: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.db.now();
        let available_at = to_millis(add_duration(now, delay));
        let now = to_millis(now);

        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks
                 SET status = 'retry_scheduled', available_at = ?2,
                     claimed_by = NULL, claimed_at = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?4",
                params![task_id.0, available_at, now, worker_id],
            )?)
        })?;

        if changed == 1 {
            debug!(task_id = %task_id, delay_ms = delay.as_millis() as u64, "Task deferred");
        }
        Ok(changed == 1)
    }

    /// Refresh the claim time of a task held by `worker_id`.
    ///
    /// Keeps a long-running task out of `reclaim_stale`. False once the
    /// claim is gone.
    pub fn heartbeat(&self, task_id: TaskId, worker_id: &str) -> Result<bool, StoreError> {
        let now = to_millis(self.db.now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks SET claimed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?2",
                params![task_id.0, worker_id, now],
            )?)
        })?;
        Ok(changed == 1)
    }

    /// Return tasks claimed longer than `older_than` to `queued`
    pub fn reclaim_stale(&self, older_than: Duration) -> Result<usize, StoreError> {
        let now = self.db.now();
        let cutoff = to_millis(sub_duration(now, older_than));
        let now = to_millis(now);

        let reclaimed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE tasks
                 SET status = 'queued', claimed_by = NULL, claimed_at = NULL, updated_at = ?2
                 WHERE status = 'claimed' AND claimed_at <= ?1",
                params![cutoff, now],
            )?)
        })?;

        if reclaimed > 0 {
            info!(count = reclaimed, "Reclaimed stale task claims");
        }
        Ok(reclaimed)
    }

    pub fn get(&self, task_id: TaskId) -> Result<Task, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![task_id.0],
                    read_task_row,
                )
                .optional()?)
        })?;

        row.ok_or(StoreError::TaskNotFound(task_id))?.try_into()
    }

    pub fn tasks_for_content(&self, content_id: ContentId) -> Result<Vec<Task>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE content_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![content_id.0], read_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Whether a non-terminal task of `task_type` exists for the item
    pub fn has_open_task(
        &self,
        content_id: ContentId,
        task_type: TaskType,
        exclude: Option<TaskId>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM tasks
                     WHERE content_id = ?1 AND task_type = ?2
                       AND status IN ('queued', 'claimed', 'retry_scheduled')
                       AND (?3 IS NULL OR id != ?3)
                     LIMIT 1",
                    params![content_id.0, task_type.as_str(), exclude.map(|id| id.0)],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    /// Whether the item has any non-terminal task at all
    pub fn has_pending_work(&self, content_id: ContentId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM tasks
                     WHERE content_id = ?1 AND status IN ('queued', 'claimed', 'retry_scheduled')
                     LIMIT 1",
                    params![content_id.0],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    pub fn counts_by_status(&self) -> Result<Vec<(TaskStatus, u64)>, StoreError> {
        let rows: Vec<(String, i64)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count.max(0) as u64)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::core::clock::{Clock, ManualClock};
    use crate::core::content_store::ContentStore;
    use crate::domain::ContentType;

    fn setup() -> (TaskQueue, Arc<ManualClock>, ContentId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
        let (item, _) = ContentStore::new(db.clone())
            .create_or_get("https://example.com/queued", ContentType::Article, None)
            .unwrap();
        (TaskQueue::new(db), clock, item.id)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_claim_order_is_fifo_by_available_at() {
        let (queue, clock, content) = setup();
        let later = queue
            .enqueue(
                TaskType::Summarize,
                content,
                json!({}),
                Some(clock.now() - chrono::Duration::seconds(1)),
            )
            .unwrap();
        let earlier = queue
            .enqueue(
                TaskType::Analyze,
                content,
                json!({}),
                Some(clock.now() - chrono::Duration::seconds(5)),
            )
            .unwrap();

        assert_eq!(queue.claim("w1").unwrap().unwrap().id, earlier);
        let second = queue.claim("w1").unwrap().unwrap();
        assert_eq!(second.id, later);
        assert_eq!(second.status, TaskStatus::Claimed);
        assert_eq!(second.claimed_by.as_deref(), Some("w1"));
        assert!(queue.claim("w1").unwrap().is_none());
    }

    #[test]
    fn test_future_tasks_are_not_claimable() {
        let (queue, clock, content) = setup();
        queue
            .enqueue(
                TaskType::Analyze,
                content,
                json!({}),
                Some(clock.now() + chrono::Duration::seconds(30)),
            )
            .unwrap();

        assert!(queue.claim("w1").unwrap().is_none());
        clock.advance(chrono::Duration::seconds(30));
        assert!(queue.claim("w1").unwrap().is_some());
    }

    #[test]
    fn test_complete_is_idempotent() {
        let (queue, _clock, content) = setup();
        let id = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();
        queue.claim("w1").unwrap().unwrap();

        assert!(queue.complete(id, "w1").unwrap());
        assert!(!queue.complete(id, "w1").unwrap());
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Succeeded);
        assert!(matches!(
            queue.complete(TaskId(999), "w1"),
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_fail_schedules_retries_until_budget_exhausted() {
        let (queue, clock, content) = setup();
        let id = queue
            .enqueue_task(NewTask::new(TaskType::Summarize, content).max_attempts(3))
            .unwrap();

        queue.claim("w1").unwrap().unwrap();
        let first = queue.fail(id, "w1", true, &policy(), "timeout").unwrap();
        assert_eq!(
            first,
            FailOutcome::RetryScheduled {
                available_at: clock.now() + chrono::Duration::seconds(2)
            }
        );

        clock.advance(chrono::Duration::seconds(2));
        queue.claim("w1").unwrap().unwrap();
        assert!(matches!(
            queue.fail(id, "w1", true, &policy(), "timeout").unwrap(),
            FailOutcome::RetryScheduled { .. }
        ));

        clock.advance(chrono::Duration::seconds(4));
        queue.claim("w1").unwrap().unwrap();
        assert_eq!(
            queue.fail(id, "w1", true, &policy(), "timeout").unwrap(),
            FailOutcome::Failed
        );

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt_count, 3);
        assert_eq!(task.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_non_retryable_fail_is_terminal() {
        let (queue, _clock, content) = setup();
        let id = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();

        assert_eq!(
            queue.fail(id, "w1", false, &policy(), "bad").unwrap(),
            FailOutcome::NotClaimed
        );

        queue.claim("w1").unwrap().unwrap();
        assert_eq!(queue.fail(id, "w1", false, &policy(), "bad").unwrap(), FailOutcome::Failed);
    }

    #[test]
    fn test_defer_keeps_attempt_count() {
        let (queue, clock, content) = setup();
        let id = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();
        queue.claim("w1").unwrap().unwrap();

        assert!(queue.defer(id, "w1", Duration::from_secs(5)).unwrap());
        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::RetryScheduled);
        assert_eq!(task.attempt_count, 0);
        assert!(task.claimed_by.is_none());

        assert!(queue.claim("w1").unwrap().is_none());
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(queue.claim("w1").unwrap().unwrap().id, id);
    }

    #[test]
    fn test_only_the_claim_holder_can_settle_a_task() {
        let (queue, _clock, content) = setup();
        let id = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();
        queue.claim("w1").unwrap().unwrap();

        assert_eq!(
            queue.fail(id, "w2", true, &policy(), "timeout").unwrap(),
            FailOutcome::NotClaimed
        );
        assert!(!queue.defer(id, "w2", Duration::from_secs(5)).unwrap());
        assert!(!queue.complete(id, "w2").unwrap());

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Claimed);
        assert_eq!(task.claimed_by.as_deref(), Some("w1"));
        assert_eq!(task.attempt_count, 0);
        assert!(queue.complete(id, "w1").unwrap());
    }

    #[test]
    fn test_reclaim_stale_claims() {
        let (queue, clock, content) = setup();
        let id = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();
        queue.claim("crashed").unwrap().unwrap();

        assert_eq!(queue.reclaim_stale(Duration::from_secs(60)).unwrap(), 0);
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(queue.reclaim_stale(Duration::from_secs(60)).unwrap(), 1);

        let task = queue.claim("w2").unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.claimed_by.as_deref(), Some("w2"));
    }

    #[test]
    fn test_heartbeat_keeps_claim_live() {
        let (queue, clock, content) = setup();
        let id = queue.enqueue(TaskType::Transcribe, content, json!({}), None).unwrap();
        queue.claim("w1").unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(50));
        assert!(queue.heartbeat(id, "w1").unwrap());
        assert!(!queue.heartbeat(id, "w2").unwrap());
        clock.advance(chrono::Duration::seconds(50));
        assert_eq!(queue.reclaim_stale(Duration::from_secs(60)).unwrap(), 0);

        clock.advance(chrono::Duration::seconds(11));
        assert_eq!(queue.reclaim_stale(Duration::from_secs(60)).unwrap(), 1);
        assert!(!queue.heartbeat(id, "w1").unwrap());
    }

    #[test]
    fn test_unknown_task_type_is_failed_and_skipped() {
        let (queue, _clock, content) = setup();
        queue
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO tasks (task_type, content_id, payload, status, max_attempts,
                                        available_at, created_at, updated_at)
                     VALUES ('render_pdf', ?1, '{}', 'queued', 3, 0, 0, 0)",
                    params![content.0],
                )?;
                Ok(())
            })
            .unwrap();
        let known = queue.enqueue(TaskType::Analyze, content, json!({}), None).unwrap();

        assert_eq!(queue.claim("w1").unwrap().unwrap().id, known);
        let counts = queue.counts_by_status().unwrap();
        assert!(counts.contains(&(TaskStatus::Failed, 1)));
    }

    #[test]
    fn test_has_open_task() {
        let (queue, _clock, content) = setup();
        let id = queue.enqueue(TaskType::Summarize, content, json!({}), None).unwrap();

        assert!(queue.has_open_task(content, TaskType::Summarize, None).unwrap());
        assert!(!queue.has_open_task(content, TaskType::Summarize, Some(id)).unwrap());
        assert!(!queue.has_open_task(content, TaskType::Illustrate, None).unwrap());
        assert!(queue.has_pending_work(content).unwrap());
    }

    #[test]
    fn test_enqueue_for_missing_content() {
        let (queue, _clock, _content) = setup();
        assert!(matches!(
            queue.enqueue(TaskType::Analyze, ContentId(42), json!({}), None),
            Err(StoreError::ContentNotFound(_))
        ));
    }
}
