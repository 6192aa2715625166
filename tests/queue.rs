//! Task Queue Integration Tests
//!
//! Claims from several connections against one database file, crash
//! recovery and retry backoff.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use contentflow::core::{
    Clock, ContentStore, Database, FailOutcome, ManualClock, RetryPolicy, TaskQueue,
};
use contentflow::domain::{ContentId, ContentType, TaskStatus, TaskType};
use serde_json::json;
use tempfile::TempDir;

fn seed(db: &Database, items: usize, tasks_per_item: usize) -> Vec<ContentId> {
    let content = ContentStore::new(db.clone());
    let queue = TaskQueue::new(db.clone());
    (0..items)
        .map(|i| {
            let (item, _) = content
                .create_or_get(&format!("https://example.com/{i}"), ContentType::Article, None)
                .unwrap();
            for _ in 0..tasks_per_item {
                queue
                    .enqueue(TaskType::ProcessContent, item.id, json!({}), None)
                    .unwrap();
            }
            item.id
        })
        .collect()
}

#[test]
fn test_concurrent_claims_never_share_a_task() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.db");
    let db = Database::open(&path).unwrap();
    seed(&db, 20, 3);

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let path = path.clone();
            thread::spawn(move || {
                let queue = TaskQueue::new(Database::open(&path).unwrap());
                let mut claimed = Vec::new();
                while let Some(task) = queue.claim(&format!("worker-{w}")).unwrap() {
                    assert_eq!(task.claimed_by.as_deref(), Some(format!("worker-{w}").as_str()));
                    claimed.push(task.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for worker in workers {
        for id in worker.join().unwrap() {
            total += 1;
            assert!(seen.insert(id), "task {id} claimed twice");
        }
    }
    assert_eq!(total, 60);
}

#[test]
fn test_claim_order_is_oldest_available_first() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
    let ids = seed(&db, 1, 0);
    let queue = TaskQueue::new(db);

    let not_before = clock.now() + chrono::Duration::seconds(5);
    let later = queue
        .enqueue(TaskType::Summarize, ids[0], json!({}), Some(not_before))
        .unwrap();
    let first = queue.enqueue(TaskType::Analyze, ids[0], json!({}), None).unwrap();
    let second = queue.enqueue(TaskType::Illustrate, ids[0], json!({}), None).unwrap();

    assert_eq!(queue.claim("w").unwrap().unwrap().id, first);
    assert_eq!(queue.claim("w").unwrap().unwrap().id, second);
    // Not yet available
    assert!(queue.claim("w").unwrap().is_none());

    clock.advance(chrono::Duration::seconds(5));
    assert_eq!(queue.claim("w").unwrap().unwrap().id, later);
}

#[test]
fn test_complete_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    seed(&db, 1, 1);
    let queue = TaskQueue::new(db);

    let task = queue.claim("w").unwrap().unwrap();
    assert!(queue.complete(task.id, "w").unwrap());
    assert!(!queue.complete(task.id, "w").unwrap());
    assert_eq!(queue.get(task.id).unwrap().status, TaskStatus::Succeeded);
}

#[test]
fn test_crashed_claim_is_reclaimed_and_finished() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
    seed(&db, 1, 1);
    let queue = TaskQueue::new(db);

    // Worker claims, then dies without completing
    let task = queue.claim("doomed").unwrap().unwrap();
    assert!(queue.claim("survivor").unwrap().is_none());

    // Too early: the claim is still considered live
    clock.advance(chrono::Duration::minutes(5));
    assert_eq!(queue.reclaim_stale(Duration::from_secs(600)).unwrap(), 0);

    clock.advance(chrono::Duration::minutes(10));
    assert_eq!(queue.reclaim_stale(Duration::from_secs(600)).unwrap(), 1);

    let again = queue.claim("survivor").unwrap().unwrap();
    assert_eq!(again.id, task.id);
    assert_eq!(again.claimed_by.as_deref(), Some("survivor"));
    assert!(queue.complete(again.id, "survivor").unwrap());
}

#[test]
fn test_late_report_from_reclaimed_worker_is_ignored() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
    seed(&db, 1, 1);
    let queue = TaskQueue::new(db);
    let policy = RetryPolicy::default();

    let task = queue.claim("slow").unwrap().unwrap();
    clock.advance(chrono::Duration::hours(1));
    assert_eq!(queue.reclaim_stale(Duration::from_secs(1800)).unwrap(), 1);
    assert_eq!(queue.claim("fresh").unwrap().unwrap().id, task.id);

    // The slow worker finally reports back
    assert_eq!(
        queue.fail(task.id, "slow", true, &policy, "checkout lost").unwrap(),
        FailOutcome::NotClaimed
    );
    assert_eq!(
        queue.fail(task.id, "slow", false, &policy, "bad input").unwrap(),
        FailOutcome::NotClaimed
    );
    assert!(!queue.defer(task.id, "slow", Duration::from_secs(5)).unwrap());
    assert!(!queue.complete(task.id, "slow").unwrap());

    let live = queue.get(task.id).unwrap();
    assert_eq!(live.status, TaskStatus::Claimed);
    assert_eq!(live.claimed_by.as_deref(), Some("fresh"));
    assert_eq!(live.attempt_count, 0);
    assert!(live.last_error.is_none());

    assert!(queue.complete(task.id, "fresh").unwrap());
    assert_eq!(queue.get(task.id).unwrap().status, TaskStatus::Succeeded);
}

#[test]
fn test_retry_backoff_is_monotonic_and_capped() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let db = Database::open_in_memory_with_clock(clock.clone()).unwrap();
    let ids = seed(&db, 1, 0);
    let queue = TaskQueue::new(db.clone()).with_max_attempts(10);
    queue.enqueue(TaskType::Summarize, ids[0], json!({}), None).unwrap();

    let policy = RetryPolicy {
        base_delay_ms: 1_000,
        max_delay_ms: 20_000,
        backoff_multiplier: 2.0,
    };

    let mut deltas = Vec::new();
    let outcome = loop {
        let task = queue.claim("w").unwrap().unwrap();
        match queue.fail(task.id, "w", true, &policy, "timeout").unwrap() {
            FailOutcome::RetryScheduled { available_at } => {
                deltas.push((available_at - clock.now()).num_milliseconds());
                clock.set(available_at);
            }
            other => break other,
        }
    };

    assert_eq!(outcome, FailOutcome::Failed);
    assert_eq!(deltas.len(), 9);
    assert!(deltas.windows(2).all(|pair| pair[0] <= pair[1]), "{deltas:?}");
    assert_eq!(deltas[0], 2_000);
    assert_eq!(*deltas.last().unwrap(), 20_000);
}

#[test]
fn test_fatal_failure_is_terminal() {
    let db = Database::open_in_memory().unwrap();
    seed(&db, 1, 1);
    let queue = TaskQueue::new(db);

    let task = queue.claim("w").unwrap().unwrap();
    assert_eq!(
        queue
            .fail(task.id, "w", false, &RetryPolicy::default(), "unsupported format")
            .unwrap(),
        FailOutcome::Failed
    );

    let task = queue.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("unsupported format"));
    assert!(queue.claim("w").unwrap().is_none());

    // A late duplicate report changes nothing
    assert_eq!(
        queue
            .fail(task.id, "w", true, &RetryPolicy::default(), "late")
            .unwrap(),
        FailOutcome::NotClaimed
    );
}
