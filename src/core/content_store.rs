//! Content store: durable ContentItem rows.
//!
//! Checkout fields are owned by [`super::checkout::CheckoutManager`]; this
//! module only touches them in [`ContentStore::finish`], which clears the
//! checkout as part of persisting a task result.

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::{
    canonicalize_url, merge_metadata, ContentId, ContentItem, ContentStatus, ContentType,
    Metadata,
};

use super::db::{from_millis, from_millis_opt, to_millis, Database, StoreError};

pub(crate) const CONTENT_COLUMNS: &str = "id, canonical_url, source, platform, content_type, status, \
     checkout_owner, checkout_expires_at, metadata, attempt_count, last_error, created_at, updated_at";

/// Raw column values of a content row
struct ContentRow {
    id: i64,
    canonical_url: String,
    source: Option<String>,
    platform: Option<String>,
    content_type: String,
    status: String,
    checkout_owner: Option<String>,
    checkout_expires_at: Option<i64>,
    metadata: String,
    attempt_count: i64,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn read_content_row(row: &Row<'_>) -> rusqlite::Result<ContentRow> {
    Ok(ContentRow {
        id: row.get(0)?,
        canonical_url: row.get(1)?,
        source: row.get(2)?,
        platform: row.get(3)?,
        content_type: row.get(4)?,
        status: row.get(5)?,
        checkout_owner: row.get(6)?,
        checkout_expires_at: row.get(7)?,
        metadata: row.get(8)?,
        attempt_count: row.get(9)?,
        last_error: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<ContentRow> for ContentItem {
    type Error = StoreError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        let metadata: Metadata = match serde_json::from_str::<Value>(&row.metadata)? {
            Value::Object(map) => map,
            _ => Metadata::new(),
        };

        Ok(ContentItem {
            id: ContentId(row.id),
            canonical_url: row.canonical_url,
            source: row.source,
            platform: row.platform,
            content_type: row.content_type.parse()?,
            status: row.status.parse()?,
            checkout_owner: row.checkout_owner,
            checkout_expires_at: from_millis_opt(row.checkout_expires_at)?,
            metadata,
            attempt_count: row.attempt_count.max(0) as u32,
            last_error: row.last_error,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

/// Everything the processor writes back after a task
#[derive(Debug, Clone)]
pub struct ContentUpdate {
    pub status: ContentStatus,
    pub metadata_patch: Metadata,
    pub content_type: Option<ContentType>,
    pub platform: Option<String>,

    /// Recorded as `last_error` (and under `metadata.last_error_context`)
    pub error: Option<String>,

    /// Count this update as a failed attempt
    pub record_failure: bool,
}

impl ContentUpdate {
    pub fn status(status: ContentStatus) -> Self {
        Self {
            status,
            metadata_patch: Metadata::new(),
            content_type: None,
            platform: None,
            error: None,
            record_failure: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            record_failure: true,
            ..Self::status(ContentStatus::Failed)
        }
    }
}

/// Durable ContentItem rows
#[derive(Debug, Clone)]
pub struct ContentStore {
    db: Database,
}

impl ContentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the item for a URL, or return the existing one.
    ///
    /// Returns the item and whether it was newly created.
    pub fn create_or_get(
        &self,
        url: &str,
        content_type: ContentType,
        source: Option<&str>,
    ) -> Result<(ContentItem, bool), StoreError> {
        let canonical = canonicalize_url(url)?;
        let now = to_millis(self.db.now());

        let (row, created) = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO content_items
                     (canonical_url, source, content_type, status, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', '{}', ?4, ?4)",
                params![canonical, source, content_type.as_str(), now],
            )?;
            let row = tx.query_row(
                &format!("SELECT {CONTENT_COLUMNS} FROM content_items WHERE canonical_url = ?1"),
                params![canonical],
                read_content_row,
            )?;
            tx.commit()?;
            Ok((row, inserted == 1))
        })?;

        let item = ContentItem::try_from(row)?;
        if created {
            info!(content_id = %item.id, url = %item.canonical_url, "Content item created");
        }
        Ok((item, created))
    }

    pub fn get(&self, id: ContentId) -> Result<ContentItem, StoreError> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CONTENT_COLUMNS} FROM content_items WHERE id = ?1"),
                    params![id.0],
                    read_content_row,
                )
                .optional()?)
        })?;

        row.ok_or(StoreError::ContentNotFound(id))?.try_into()
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<ContentItem>, StoreError> {
        let canonical = canonicalize_url(url)?;
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CONTENT_COLUMNS} FROM content_items WHERE canonical_url = ?1"),
                    params![canonical],
                    read_content_row,
                )
                .optional()?)
        })?;

        row.map(ContentItem::try_from).transpose()
    }

    /// Most recently updated items, optionally filtered by status
    pub fn list(
        &self,
        status: Option<ContentStatus>,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTENT_COLUMNS} FROM content_items
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY updated_at DESC, id DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(
                    params![status.map(|s| s.as_str()), limit as i64],
                    read_content_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(ContentItem::try_from).collect()
    }

    pub fn counts_by_status(&self) -> Result<Vec<(ContentStatus, u64)>, StoreError> {
        let rows: Vec<(String, i64)> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM content_items GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(status, count)| Ok((status.parse()?, count.max(0) as u64)))
            .collect()
    }

    /// Persist a task result and clear the checkout in one step.
    ///
    /// Only applies while `worker_id` still owns the checkout; returns
    /// `false` (nothing written) if ownership was lost.
    pub fn finish(
        &self,
        id: ContentId,
        worker_id: &str,
        update: ContentUpdate,
    ) -> Result<bool, StoreError> {
        debug_assert!(!update.status.holds_checkout());
        let now = to_millis(self.db.now());

        let applied = self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<(String, Option<String>)> = tx
                .query_row(
                    "SELECT metadata, checkout_owner FROM content_items WHERE id = ?1",
                    params![id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((metadata_json, owner)) = current else {
                return Err(StoreError::ContentNotFound(id));
            };
            if owner.as_deref() != Some(worker_id) {
                return Ok(false);
            }

            let mut metadata: Metadata = match serde_json::from_str::<Value>(&metadata_json)? {
                Value::Object(map) => map,
                _ => Metadata::new(),
            };
            merge_metadata(&mut metadata, update.metadata_patch);
            match &update.error {
                Some(error) => {
                    metadata.insert("last_error_context".into(), Value::String(error.clone()));
                }
                None if update.status == ContentStatus::Completed => {
                    metadata.remove("last_error_context");
                }
                None => {}
            }

            let changed = tx.execute(
                "UPDATE content_items
                 SET status = ?3,
                     metadata = ?4,
                     content_type = COALESCE(?5, content_type),
                     platform = COALESCE(?6, platform),
                     last_error = CASE WHEN ?7 IS NOT NULL THEN ?7
                                       WHEN ?3 = 'completed' THEN NULL
                                       ELSE last_error END,
                     attempt_count = attempt_count + ?8,
                     checkout_owner = NULL,
                     checkout_expires_at = NULL,
                     updated_at = ?9
                 WHERE id = ?1 AND checkout_owner = ?2",
                params![
                    id.0,
                    worker_id,
                    update.status.as_str(),
                    serde_json::to_string(&metadata)?,
                    update.content_type.map(|t| t.as_str()),
                    update.platform,
                    update.error,
                    i64::from(update.record_failure),
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(changed == 1)
        })?;

        if applied {
            debug!(content_id = %id, status = %update.status, "Content item persisted");
        }
        Ok(applied)
    }

    /// Put a terminal, unowned item back to `pending` for another pass
    pub fn reset_for_retry(&self, id: ContentId) -> Result<bool, StoreError> {
        let now = to_millis(self.db.now());
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE content_items
                 SET status = 'pending', last_error = NULL, updated_at = ?2
                 WHERE id = ?1 AND checkout_owner IS NULL
                   AND status IN ('completed', 'failed', 'skipped')",
                params![id.0, now],
            )?)
        })?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ContentStore {
        ContentStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_or_get_is_idempotent_on_canonical_url() {
        let store = store();

        let (first, created) = store
            .create_or_get("https://example.com/post#top", ContentType::Unknown, Some("api"))
            .unwrap();
        assert!(created);
        assert_eq!(first.status, ContentStatus::Pending);
        assert_eq!(first.source.as_deref(), Some("api"));

        let (second, created) = store
            .create_or_get("https://example.com/post?utm_source=feed", ContentType::Article, None)
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.content_type, ContentType::Unknown);
    }

    #[test]
    fn test_finish_requires_ownership() {
        let store = store();
        let (item, _) = store
            .create_or_get("https://example.com/a", ContentType::Article, None)
            .unwrap();

        let mut update = ContentUpdate::status(ContentStatus::Completed);
        update.metadata_patch.insert("title".into(), json!("X"));

        // Nobody holds the checkout, so nothing is written
        assert!(!store.finish(item.id, "w1", update).unwrap());
        let item = store.get(item.id).unwrap();
        assert!(!item.has_metadata("title"));
        assert_eq!(item.status, ContentStatus::Pending);
    }

    #[test]
    fn test_get_missing_item() {
        let store = store();
        assert!(matches!(
            store.get(ContentId(404)),
            Err(StoreError::ContentNotFound(ContentId(404)))
        ));
    }

    #[test]
    fn test_reset_for_retry_only_from_terminal() {
        let store = store();
        let (item, _) = store
            .create_or_get("https://example.com/b", ContentType::Article, None)
            .unwrap();

        // Pending items are left alone
        assert!(!store.reset_for_retry(item.id).unwrap());
    }

    #[test]
    fn test_counts_by_status() {
        let store = store();
        store
            .create_or_get("https://example.com/1", ContentType::Article, None)
            .unwrap();
        store
            .create_or_get("https://example.com/2", ContentType::Video, None)
            .unwrap();

        let counts = store.counts_by_status().unwrap();
        assert_eq!(counts, vec![(ContentStatus::Pending, 2)]);
    }
}
