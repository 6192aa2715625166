//! Tasks: typed units of queued work that reference a content item.
//!
//! Handlers receive a read-only [`TaskEnvelope`] and answer with a
//! [`TaskResult`]; the processor is the only component that turns a
//! result into store mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::content::{ContentId, ContentType, Metadata, ParseEnumError};

/// Task identifier (row id in the task queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Pipeline phase a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Classify the URL and plan downstream phases
    Analyze,

    /// Fetch and extract structured content via a strategy
    ProcessContent,

    /// Download media and transcribe it
    Transcribe,

    /// Summarize with a language model
    Summarize,

    /// Generate an accompanying image
    Illustrate,

    /// Pull an external comment thread
    FetchDiscussion,

    /// Discover feeds on a site, or entries inside a feed
    DiscoverFeeds,

    /// Bulk discovery over a list of onboarding sources
    OnboardingDiscover,

    /// Pull saved links from an external account
    SyncIntegration,
}

impl TaskType {
    pub const ALL: [TaskType; 9] = [
        TaskType::Analyze,
        TaskType::ProcessContent,
        TaskType::Transcribe,
        TaskType::Summarize,
        TaskType::Illustrate,
        TaskType::FetchDiscussion,
        TaskType::DiscoverFeeds,
        TaskType::OnboardingDiscover,
        TaskType::SyncIntegration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Analyze => "analyze",
            TaskType::ProcessContent => "process_content",
            TaskType::Transcribe => "transcribe",
            TaskType::Summarize => "summarize",
            TaskType::Illustrate => "illustrate",
            TaskType::FetchDiscussion => "fetch_discussion",
            TaskType::DiscoverFeeds => "discover_feeds",
            TaskType::OnboardingDiscover => "onboarding_discover",
            TaskType::SyncIntegration => "sync_integration",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|task_type| task_type.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("task type", s))
    }
}

/// Queue status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Claimed,
    Succeeded,
    Failed,
    RetryScheduled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Claimed,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::RetryScheduled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::RetryScheduled => "retry_scheduled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("task status", s))
    }
}

/// A durable unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub content_id: ContentId,

    /// Phase-specific arguments, opaque to the queue
    pub payload: Value,

    pub status: TaskStatus,

    /// Failed executions so far
    pub attempt_count: u32,

    /// Executions allowed before the task fails terminally
    pub max_attempts: u32,

    /// Earliest time the task may be claimed
    pub available_at: DateTime<Utc>,

    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Read-only view handed to a handler
    pub fn envelope(&self) -> TaskEnvelope {
        TaskEnvelope {
            task_id: self.id,
            task_type: self.task_type,
            content_id: self.content_id,
            payload: self.payload.clone(),
            attempt_count: self.attempt_count,
        }
    }
}

/// Handler input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub content_id: ContentId,
    pub payload: Value,
    pub attempt_count: u32,
}

impl TaskEnvelope {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// `force: true` asks a handler to redo work it would otherwise skip
    pub fn force(&self) -> bool {
        self.payload
            .get("force")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Outcome tag of a handler run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    RetryableFailure,
    FatalFailure,
    Skipped,
}

/// Which content item a follow-up task targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target")]
pub enum FollowUpTarget {
    /// The content item the current task is checked out on
    SameContent,

    /// Another URL; the item is created if it does not exist yet
    Url {
        url: String,
        content_type: ContentType,
        source: Option<String>,
    },
}

/// A task to enqueue once the current one is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub task_type: TaskType,
    pub target: FollowUpTarget,
    pub payload: Value,
}

impl FollowUp {
    /// Follow-up on the same content item with an empty payload
    pub fn same(task_type: TaskType) -> Self {
        Self {
            task_type,
            target: FollowUpTarget::SameContent,
            payload: Value::Object(Default::default()),
        }
    }

    /// Follow-up on another URL
    pub fn url(
        task_type: TaskType,
        url: impl Into<String>,
        content_type: ContentType,
        source: Option<String>,
    ) -> Self {
        Self {
            task_type,
            target: FollowUpTarget::Url {
                url: url.into(),
                content_type,
                source,
            },
            payload: Value::Object(Default::default()),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Handler output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub outcome: Outcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,

    /// Merged into the content item's metadata on success/skip
    #[serde(default)]
    pub metadata_patch: Metadata,

    /// Classification update for the content item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl TaskResult {
    fn with_outcome(outcome: Outcome, error: Option<String>) -> Self {
        Self {
            outcome,
            error,
            follow_ups: Vec::new(),
            metadata_patch: Metadata::new(),
            content_type: None,
            platform: None,
        }
    }

    pub fn success() -> Self {
        Self::with_outcome(Outcome::Success, None)
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Skipped, Some(reason.into()))
    }

    pub fn retryable(error: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::RetryableFailure, Some(error.into()))
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::FatalFailure, Some(error.into()))
    }

    /// Set one metadata key
    pub fn with_patch(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata_patch.insert(key.into(), value.into());
        self
    }

    /// Merge a whole metadata map into the patch
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata_patch.extend(metadata);
        self
    }

    pub fn then(mut self, follow_up: FollowUp) -> Self {
        self.follow_ups.push(follow_up);
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Whether any follow-up continues work on the same item
    pub fn continues_same_content(&self) -> bool {
        self.follow_ups
            .iter()
            .any(|f| f.target == FollowUpTarget::SameContent)
    }
}
