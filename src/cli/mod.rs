//! Command-line interface for contentflow.
//!
//! Provides commands for running a worker, submitting URLs, inspecting
//! the queue and content items, and operator recovery.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{config, ResolvedConfig};
use crate::core::{
    CheckoutManager, ContentStore, Database, ProcessorSettings, SequentialProcessor, TaskQueue,
};
use crate::domain::{ContentId, ContentType, TaskType};
use crate::handlers::{Dispatcher, Services};

/// contentflow - crash-recoverable content enrichment pipeline
#[derive(Parser, Debug)]
#[command(name = "contentflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a worker until Ctrl-C
    Worker {
        /// Identifier to claim tasks under (defaults to host-pid-random).
        /// Must be unique among running workers.
        #[arg(long, env = "CONTENTFLOW_WORKER_ID")]
        worker_id: Option<String>,

        /// Process at most one task, then exit
        #[arg(long)]
        once: bool,
    },

    /// Submit a URL for enrichment
    Submit {
        /// URL to ingest
        url: String,

        /// Content type (classified automatically if not specified)
        #[arg(short, long)]
        content_type: Option<ContentType>,

        /// Producer recorded on the content item
        #[arg(short, long, default_value = "cli")]
        source: String,
    },

    /// Show task and content counts by status
    Status,

    /// Show one content item and its tasks
    Show {
        /// Content ID
        content_id: i64,
    },

    /// Requeue stale claims and sweep expired checkouts
    Reclaim,

    /// Re-run a failed or skipped content item
    Retry {
        /// Content ID
        content_id: i64,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Worker { worker_id, once } => run_worker(worker_id, once).await,
            Commands::Submit {
                url,
                content_type,
                source,
            } => submit(&url, content_type, &source),
            Commands::Status => show_status(),
            Commands::Show { content_id } => show_content(ContentId(content_id)),
            Commands::Reclaim => reclaim(),
            Commands::Retry { content_id } => retry(ContentId(content_id)),
            Commands::Config => show_config(),
        }
    }
}

fn open_store(cfg: &ResolvedConfig) -> Result<Database> {
    Database::open(&cfg.database)
        .with_context(|| format!("Failed to open database: {}", cfg.database.display()))
}

fn task_queue(db: &Database, cfg: &ResolvedConfig) -> TaskQueue {
    TaskQueue::new(db.clone()).with_max_attempts(cfg.worker.max_attempts)
}

/// Run the sequential processor
async fn run_worker(worker_id: Option<String>, once: bool) -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let services = Services::from_config(cfg).context("Failed to build HTTP clients")?;
    let dispatcher = Arc::new(Dispatcher::with_default_handlers()?);
    let worker_id = worker_id.unwrap_or_else(|| cfg.worker_id.clone());

    let processor = SequentialProcessor::new(
        db,
        worker_id,
        dispatcher,
        services,
        ProcessorSettings::from(&cfg.worker),
    );

    if once {
        let iteration = processor.run_once().await?;
        println!("{:?}", iteration);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing the current task");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                // Keep the sender alive so the worker is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    eprintln!("Worker {} started on {}", processor.worker_id(), cfg.database.display());
    processor.run(shutdown_rx).await
}

/// Create (or find) the content item and enqueue analysis
fn submit(url: &str, content_type: Option<ContentType>, source: &str) -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let content = ContentStore::new(db.clone());
    let queue = task_queue(&db, cfg);

    let (item, created) = content.create_or_get(
        url,
        content_type.unwrap_or(ContentType::Unknown),
        Some(source),
    )?;

    if !created && queue.has_pending_work(item.id)? {
        eprintln!("Content {} already has pending work", item.id);
        println!("{}", item.id);
        return Ok(());
    }

    let task_id = queue.enqueue(TaskType::Analyze, item.id, json!({}), None)?;
    eprintln!(
        "{} content {} ({}), analyze task {}",
        if created { "Created" } else { "Resubmitted" },
        item.id,
        item.canonical_url,
        task_id
    );
    println!("{}", item.id);
    Ok(())
}

/// Task and content counts by status
fn show_status() -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let queue = task_queue(&db, cfg);
    let content = ContentStore::new(db);

    println!("{:<20} {:>8}", "TASKS", "COUNT");
    println!("{}", "-".repeat(29));
    for (status, count) in queue.counts_by_status()? {
        println!("{:<20} {:>8}", status.as_str(), count);
    }

    println!();
    println!("{:<20} {:>8}", "CONTENT", "COUNT");
    println!("{}", "-".repeat(29));
    for (status, count) in content.counts_by_status()? {
        println!("{:<20} {:>8}", status.as_str(), count);
    }
    Ok(())
}

/// One content item with its tasks
fn show_content(id: ContentId) -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let queue = task_queue(&db, cfg);
    let item = ContentStore::new(db).get(id)?;

    println!("ID:       {}", item.id);
    println!("URL:      {}", item.canonical_url);
    println!("Type:     {}", item.content_type);
    println!("Status:   {}", item.status);
    if let Some(platform) = &item.platform {
        println!("Platform: {}", platform);
    }
    if let Some(source) = &item.source {
        println!("Source:   {}", source);
    }
    if let Some(owner) = &item.checkout_owner {
        println!("Checkout: {} (expires {:?})", owner, item.checkout_expires_at);
    }
    if let Some(error) = &item.last_error {
        println!("Error:    {}", error);
    }
    println!("Updated:  {}", item.updated_at);

    println!("\nMetadata:");
    println!("{}", serde_json::to_string_pretty(&item.metadata)?);

    let tasks = queue.tasks_for_content(id)?;
    println!("\n{:<8} {:<20} {:<16} {:>8}  {}", "TASK", "TYPE", "STATUS", "ATTEMPTS", "LAST ERROR");
    println!("{}", "-".repeat(80));
    for task in tasks {
        println!(
            "{:<8} {:<20} {:<16} {:>8}  {}",
            task.id.0,
            task.task_type.as_str(),
            task.status.as_str(),
            format!("{}/{}", task.attempt_count, task.max_attempts),
            task.last_error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// One maintenance sweep
fn reclaim() -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let reclaimed = task_queue(&db, cfg).reclaim_stale(cfg.worker.claim_ttl())?;
    let swept = CheckoutManager::new(db).sweep_expired(cfg.worker.checkout_ttl())?;
    println!("Reclaimed {} stale task(s), swept {} expired checkout(s)", reclaimed, swept);
    Ok(())
}

/// Put a terminal item back into the pipeline
fn retry(id: ContentId) -> Result<()> {
    let cfg = config()?;
    let db = open_store(cfg)?;
    let content = ContentStore::new(db.clone());
    let queue = task_queue(&db, cfg);

    let item = content.get(id)?;
    if !content.reset_for_retry(id)? {
        anyhow::bail!(
            "Content {} is {} and cannot be retried (only completed, failed or skipped items without a checkout)",
            id,
            item.status
        );
    }
    let task_id = queue.enqueue(TaskType::Analyze, id, json!({}), None)?;
    println!("Content {} requeued (analyze task {})", id, task_id);
    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let cfg = config()?;
    eprintln!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    print!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "contentflow",
            "submit",
            "https://youtu.be/abc",
            "--content-type",
            "video",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit {
                url,
                content_type,
                source,
            } => {
                assert_eq!(url, "https://youtu.be/abc");
                assert_eq!(content_type, Some(ContentType::Video));
                assert_eq!(source, "cli");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_worker_once() {
        let cli = Cli::try_parse_from(["contentflow", "worker", "--once", "--worker-id", "w7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Worker { once: true, worker_id: Some(ref id) } if id == "w7"
        ));
    }
}
