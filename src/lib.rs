//! contentflow - crash-recoverable content enrichment pipeline
//!
//! Submitted URLs become content items that move through enrichment
//! phases (analyze, extract, transcribe, summarize, illustrate, ...) as
//! tasks in a durable SQLite queue.
//!
//! # Architecture
//!
//! Coordination between worker processes happens only through the store:
//! - Tasks are claimed with a single conditional update
//! - A content item is worked on by at most one worker at a time
//!   (time-bounded checkouts)
//! - Handlers never write to the store; the processor persists their
//!   results, so a crashed worker only ever leaves reclaimable claims
//!
//! # Modules
//!
//! - `core`: Store, task queue, checkouts and the sequential processor
//! - `domain`: Content items, tasks and handler results
//! - `handlers`: One handler per task type, plus the dispatcher
//! - `strategies`: Per-platform fetch/extract strategies
//! - `providers`: Language model, image and transcription backends
//! - `http`: Retry-aware HTTP client
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a URL
//! contentflow submit https://www.youtube.com/watch?v=dQw4w9WgXcQ
//!
//! # Run a worker (run several for parallelism)
//! contentflow worker
//!
//! # Inspect progress
//! contentflow status
//! contentflow show 1
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod handlers;
pub mod http;
pub mod providers;
pub mod strategies;

// Re-export main types at crate root for convenience
pub use core::{
    CheckoutManager, ContentStore, Database, Iteration, ProcessorSettings, SequentialProcessor,
    StoreError, TaskQueue,
};
pub use domain::{
    ContentId, ContentItem, ContentStatus, ContentType, Outcome, Task, TaskId, TaskResult,
    TaskStatus, TaskType,
};
pub use handlers::{Dispatcher, HandlerContext, HandlerError, Services, TaskHandler};
pub use strategies::{ExtractionStrategy, StrategyRegistry};
