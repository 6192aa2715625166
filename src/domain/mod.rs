//! Domain types for the content pipeline.
//!
//! This module contains the core data structures:
//! - ContentItem: durable record of an ingested URL
//! - Task: typed unit of queued work
//! - TaskEnvelope / TaskResult: handler input and output

pub mod content;
pub mod task;

// Re-export commonly used types
pub use content::{
    canonicalize_url, merge_metadata, ContentId, ContentItem, ContentStatus, ContentType,
    InvalidUrl, Metadata, ParseEnumError,
};
pub use task::{
    FollowUp, FollowUpTarget, Outcome, Task, TaskEnvelope, TaskId, TaskResult, TaskStatus,
    TaskType,
};
