//! Checkout manager: exclusive, time-bounded ownership of a content item.
//!
//! Every operation is a single conditional UPDATE. An expired checkout is
//! available to the next caller of [`CheckoutManager::checkout`] without
//! any sweep; [`CheckoutManager::sweep_expired`] only tidies the status of
//! rows left behind by crashed workers.

use std::time::Duration;

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::domain::ContentId;

use super::db::{add_duration, sub_duration, to_millis, Database, StoreError};

/// Grants and revokes content checkouts
#[derive(Debug, Clone)]
pub struct CheckoutManager {
    db: Database,
}

impl CheckoutManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Try to take ownership of `content_id` for `ttl`.
    ///
    /// Granted when nobody holds an unexpired checkout, or when `worker_id`
    /// already holds it (the expiry is then pushed out). The re-entrant
    /// case relies on worker ids being unique per process: two processes
    /// sharing an id would both be granted. Fails with `ContentNotFound`
    /// for unknown ids.
    pub fn checkout(
        &self,
        content_id: ContentId,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.db.now();
        let expires_at = to_millis(add_duration(now, ttl));
        let now = to_millis(now);

        let granted = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = tx.execute(
                "UPDATE content_items
                 SET checkout_owner = ?2,
                     checkout_expires_at = ?3,
                     status = 'checked_out',
                     updated_at = ?4
                 WHERE id = ?1
                   AND (checkout_owner IS NULL
                        OR checkout_owner = ?2
                        OR checkout_expires_at <= ?4)",
                params![content_id.0, worker_id, expires_at, now],
            )?;

            if changed == 0 {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM content_items WHERE id = ?1",
                        params![content_id.0],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(StoreError::ContentNotFound(content_id));
                }
            }

            tx.commit()?;
            Ok(changed == 1)
        })?;

        if granted {
            debug!(%content_id, worker = worker_id, "Checkout granted");
        } else {
            debug!(%content_id, worker = worker_id, "Checkout denied, held by another worker");
        }
        Ok(granted)
    }

    /// Extend a held checkout.
    ///
    /// Fails with `CheckoutLost` if the checkout expired or moved to
    /// another worker.
    pub fn renew(
        &self,
        content_id: ContentId,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.db.now();
        let expires_at = to_millis(add_duration(now, ttl));
        let now = to_millis(now);

        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE content_items
                 SET checkout_expires_at = ?3, updated_at = ?4
                 WHERE id = ?1 AND checkout_owner = ?2 AND checkout_expires_at > ?4",
                params![content_id.0, worker_id, expires_at, now],
            )?)
        })?;

        if changed == 1 {
            debug!(%content_id, worker = worker_id, "Checkout renewed");
            Ok(())
        } else {
            warn!(%content_id, worker = worker_id, "Checkout renewal failed, ownership lost");
            Err(StoreError::CheckoutLost {
                content_id,
                worker_id: worker_id.to_string(),
            })
        }
    }

    /// Move a held checkout from `checked_out` to `processing`
    pub fn mark_processing(
        &self,
        content_id: ContentId,
        worker_id: &str,
    ) -> Result<bool, StoreError> {
        let now = to_millis(self.db.now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE content_items
                 SET status = 'processing', updated_at = ?3
                 WHERE id = ?1 AND checkout_owner = ?2
                   AND status IN ('checked_out', 'processing')",
                params![content_id.0, worker_id, now],
            )?)
        })?;
        Ok(changed == 1)
    }

    /// Give up a checkout. Best effort: a checkout that already moved on
    /// is only logged.
    pub fn release(&self, content_id: ContentId, worker_id: &str) -> Result<bool, StoreError> {
        let now = to_millis(self.db.now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE content_items
                 SET checkout_owner = NULL,
                     checkout_expires_at = NULL,
                     status = CASE WHEN status IN ('checked_out', 'processing')
                                   THEN 'pending' ELSE status END,
                     updated_at = ?3
                 WHERE id = ?1 AND checkout_owner = ?2",
                params![content_id.0, worker_id, now],
            )?)
        })?;

        if changed == 1 {
            debug!(%content_id, worker = worker_id, "Checkout released");
        } else {
            debug!(%content_id, worker = worker_id, "Release skipped, checkout not held");
        }
        Ok(changed == 1)
    }

    /// Reset checkouts that expired more than `grace` ago back to `pending`
    pub fn sweep_expired(&self, grace: Duration) -> Result<usize, StoreError> {
        let now = self.db.now();
        let cutoff = to_millis(sub_duration(now, grace));
        let now = to_millis(now);

        let swept = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE content_items
                 SET checkout_owner = NULL,
                     checkout_expires_at = NULL,
                     status = 'pending',
                     updated_at = ?2
                 WHERE checkout_owner IS NOT NULL AND checkout_expires_at <= ?1",
                params![cutoff, now],
            )?)
        })?;

        if swept > 0 {
            info!(count = swept, "Swept expired checkouts");
        }
        Ok(swept)
    }
}

/// A held checkout, handed to handlers so long phases can extend it
#[derive(Debug, Clone)]
pub struct CheckoutHandle {
    manager: CheckoutManager,
    content_id: ContentId,
    worker_id: String,
    ttl: Duration,
}

impl CheckoutHandle {
    pub fn new(
        manager: CheckoutManager,
        content_id: ContentId,
        worker_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            manager,
            content_id,
            worker_id: worker_id.into(),
            ttl,
        }
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Push the expiry out by another full TTL
    pub fn renew(&self) -> Result<(), StoreError> {
        self.manager
            .renew(self.content_id, &self.worker_id, self.ttl)
    }
}
