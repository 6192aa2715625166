//! Core pipeline machinery.
//!
//! This module contains:
//! - Database: SQLite store shared by every worker process
//! - ContentStore: durable content items
//! - TaskQueue: durable, claimable tasks
//! - CheckoutManager: exclusive, time-bounded ownership of content items
//! - SequentialProcessor: the claim/checkout/dispatch/persist loop

pub mod checkout;
pub mod clock;
pub mod content_store;
pub mod db;
pub mod processor;
pub mod retry;
pub mod task_queue;

// Re-export commonly used types
pub use checkout::{CheckoutHandle, CheckoutManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content_store::{ContentStore, ContentUpdate};
pub use db::{Database, StoreError};
pub use processor::{Iteration, ProcessorSettings, SequentialProcessor};
pub use retry::RetryPolicy;
pub use task_queue::{FailOutcome, NewTask, TaskQueue, DEFAULT_MAX_ATTEMPTS};
