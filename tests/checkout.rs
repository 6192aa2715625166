//! Checkout Integration Tests
//!
//! Exclusive ownership across independent connections to one store.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use contentflow::core::{CheckoutManager, ContentStore, Database};
use contentflow::domain::{ContentStatus, ContentType};
use tempfile::TempDir;

const TTL: Duration = Duration::from_secs(60);

#[test]
fn test_concurrent_checkout_grants_exactly_one() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkout.db");
    let db = Database::open(&path).unwrap();
    let (item, _) = ContentStore::new(db)
        .create_or_get("https://example.com/contested", ContentType::Article, None)
        .unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let checkouts = CheckoutManager::new(Database::open(&path).unwrap());
                barrier.wait();
                checkouts
                    .checkout(item.id, &format!("worker-{w}"), TTL)
                    .unwrap()
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|granted| *granted)
        .count();
    assert_eq!(granted, 1);

    let db = Database::open(&path).unwrap();
    let item = ContentStore::new(db).get(item.id).unwrap();
    assert_eq!(item.status, ContentStatus::CheckedOut);
    assert!(item.checkout_owner.unwrap().starts_with("worker-"));
}

#[test]
fn test_release_hands_the_item_to_the_next_worker() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkout.db");
    let first = Database::open(&path).unwrap();
    let second = Database::open(&path).unwrap();
    let (item, _) = ContentStore::new(first.clone())
        .create_or_get("https://example.com/handoff", ContentType::Article, None)
        .unwrap();

    let a = CheckoutManager::new(first);
    let b = CheckoutManager::new(second.clone());

    assert!(a.checkout(item.id, "a", TTL).unwrap());
    assert!(!b.checkout(item.id, "b", TTL).unwrap());
    // Only the owner can release
    assert!(!b.release(item.id, "b").unwrap());
    assert!(a.release(item.id, "a").unwrap());
    assert!(b.checkout(item.id, "b", TTL).unwrap());

    let item = ContentStore::new(second).get(item.id).unwrap();
    assert_eq!(item.checkout_owner.as_deref(), Some("b"));
}
