//! Content items: the durable record of one ingested URL.
//!
//! A content item is created once per canonical URL and accumulates
//! metadata as tasks move it through the enrichment phases.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Open bag of per-item metadata accumulated across phases
pub type Metadata = serde_json::Map<String, Value>;

/// Content identifier (row id in the content store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub i64);

impl ContentId {
    /// Get the raw row id
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Kind of content behind a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Web page/article
    Article,

    /// Podcast episode or standalone audio
    Podcast,

    /// Video (YouTube etc.)
    Video,

    /// Social post or discussion thread
    Social,

    /// RSS/Atom feed
    Feed,

    /// Entry discovered inside a feed
    FeedItem,

    /// Not classified yet
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Article => "article",
            ContentType::Podcast => "podcast",
            ContentType::Video => "video",
            ContentType::Social => "social",
            ContentType::Feed => "feed",
            ContentType::FeedItem => "feed_item",
            ContentType::Unknown => "unknown",
        }
    }

    /// Media types whose text comes from transcription
    pub fn is_media(&self) -> bool {
        matches!(self, ContentType::Podcast | ContentType::Video)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "article" | "web" | "webpage" => Ok(ContentType::Article),
            "podcast" | "audio" => Ok(ContentType::Podcast),
            "video" | "youtube" | "yt" => Ok(ContentType::Video),
            "social" => Ok(ContentType::Social),
            "feed" | "rss" => Ok(ContentType::Feed),
            "feed_item" | "feed-item" => Ok(ContentType::FeedItem),
            "unknown" => Ok(ContentType::Unknown),
            _ => Err(ParseEnumError::new("content type", s)),
        }
    }
}

/// Lifecycle status of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    CheckedOut,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ContentStatus {
    pub const ALL: [ContentStatus; 6] = [
        ContentStatus::Pending,
        ContentStatus::CheckedOut,
        ContentStatus::Processing,
        ContentStatus::Completed,
        ContentStatus::Failed,
        ContentStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::CheckedOut => "checked_out",
            ContentStatus::Processing => "processing",
            ContentStatus::Completed => "completed",
            ContentStatus::Failed => "failed",
            ContentStatus::Skipped => "skipped",
        }
    }

    /// Statuses that require a non-null checkout owner
    pub fn holds_checkout(&self) -> bool {
        matches!(self, ContentStatus::CheckedOut | ContentStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContentStatus::Completed | ContentStatus::Failed | ContentStatus::Skipped
        )
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("content status", s))
    }
}

/// A stored enum value that does not match any known variant
#[derive(Debug, Clone, Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Durable record of one ingested URL and its enrichment progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,

    /// Canonical form of the submitted URL (unique)
    pub canonical_url: String,

    /// Producer that first submitted the item (api, cli, feed url, ...)
    pub source: Option<String>,

    /// Platform tag set during analysis (youtube, hackernews, web, ...)
    pub platform: Option<String>,

    pub content_type: ContentType,

    pub status: ContentStatus,

    /// Worker currently holding the checkout
    pub checkout_owner: Option<String>,

    pub checkout_expires_at: Option<DateTime<Utc>>,

    /// Accumulated phase output (extracted text, summary, errors, ...)
    pub metadata: Metadata,

    /// Number of failed tasks recorded against this item
    pub attempt_count: u32,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Whether a checkout is held and not yet expired at `now`
    pub fn is_checked_out_at(&self, now: DateTime<Utc>) -> bool {
        self.checkout_owner.is_some()
            && self
                .checkout_expires_at
                .map(|expires| expires > now)
                .unwrap_or(false)
    }

    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .map(|value| !value.is_null())
            .unwrap_or(false)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// URL could not be canonicalised
#[derive(Debug, Clone, Error)]
#[error("Invalid URL '{url}': {reason}")]
pub struct InvalidUrl {
    pub url: String,
    pub reason: String,
}

/// Canonicalise a submitted URL so resubmissions map to one content item.
///
/// Trims whitespace, lowercases scheme and host (done by the URL parser),
/// drops the fragment and `utm_*` tracking parameters.
pub fn canonicalize_url(raw: &str) -> Result<String, InvalidUrl> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).map_err(|e| InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(url.to_string())
}

/// Shallow merge of a metadata patch; `null` values remove keys.
pub fn merge_metadata(target: &mut Metadata, patch: Metadata) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}
