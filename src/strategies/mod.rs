//! Extraction strategies and the registry that picks one per URL.
//!
//! Strategies are tried in priority order (highest first, then
//! registration order); the first whose `can_handle` accepts the URL wins.
//! Site-specific strategies therefore register above the generic HTML
//! fallback.

pub mod feed;
pub mod hackernews;
pub mod html;
pub mod podcast;
pub mod text;
pub mod youtube;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{ContentType, Metadata};
use crate::http::{HttpClient, HttpError};

pub use feed::FeedStrategy;
pub use hackernews::HackerNewsStrategy;
pub use html::HtmlArticleStrategy;
pub use podcast::PodcastAudioStrategy;
pub use youtube::YouTubeStrategy;

/// Strategy failures
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] HttpError),

    /// The URL or payload is not something this strategy can work with
    #[error("Unsupported content: {0}")]
    Unsupported(String),

    /// Private or otherwise legitimately unavailable
    #[error("Content unavailable: {0}")]
    Unavailable(String),

    /// Permanently removed at the source
    #[error("Content gone: {0}")]
    Gone(String),

    #[error("Failed to parse content: {0}")]
    Parse(String),
}

impl StrategyError {
    /// Map an HTTP failure: auth answers mean private, 404/410 mean gone
    pub fn from_fetch(err: HttpError) -> Self {
        match err.status().map(|status| status.as_u16()) {
            Some(401 | 403) => StrategyError::Unavailable(err.to_string()),
            Some(404 | 410) => StrategyError::Gone(err.to_string()),
            _ => StrategyError::Fetch(err),
        }
    }
}

/// Payload as fetched, before extraction
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Html(String),
    Json(Value),
    Feed(String),

    /// Media that is downloaded later by the transcription phase
    Media { url: String },
}

#[derive(Debug, Clone)]
pub struct RawContent {
    pub url: Url,
    pub payload: RawPayload,
    pub fetched_at: DateTime<Utc>,
}

impl RawContent {
    pub fn new(url: &Url, payload: RawPayload) -> Self {
        Self {
            url: url.clone(),
            payload,
            fetched_at: Utc::now(),
        }
    }
}

/// One entry of a parsed feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Enclosure (audio/video) URL, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// Structured fields pulled out of a payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub text: Option<String>,
    pub site_name: Option<String>,
    pub published_at: Option<String>,
    pub thumbnail_url: Option<String>,

    /// Audio or video to transcribe
    pub media_url: Option<String>,

    /// External comment thread for this item
    pub discussion_url: Option<String>,

    /// Another URL this item points at (e.g. the story behind a discussion)
    pub related_url: Option<String>,

    /// Feeds advertised by an HTML page
    pub feed_links: Vec<String>,

    /// Entries of a parsed feed
    pub entries: Vec<FeedEntry>,

    /// Strategy-specific fields
    pub extra: Metadata,
}

impl ExtractedContent {
    /// Metadata patch for the content item
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(value) = value {
                metadata.insert(key.to_string(), Value::String(value.clone()));
            }
        };
        put("title", &self.title);
        put("author", &self.author);
        put("description", &self.description);
        put("text", &self.text);
        put("site_name", &self.site_name);
        put("published_at", &self.published_at);
        put("thumbnail_url", &self.thumbnail_url);
        put("media_url", &self.media_url);
        put("discussion_url", &self.discussion_url);
        put("related_url", &self.related_url);

        if !self.feed_links.is_empty() {
            metadata.insert("feed_links".into(), self.feed_links.clone().into());
        }
        if !self.entries.is_empty() {
            metadata.insert("feed_entry_count".into(), self.entries.len().into());
        }
        for (key, value) in &self.extra {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
        metadata
    }

    /// Everything worth reading, in order
    pub fn readable_text(&self) -> String {
        [&self.title, &self.description, &self.text]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Normalised text ready for a language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedText {
    pub text: String,
    pub segments: Vec<String>,
    pub truncated: bool,
}

/// A pluggable technique for fetching and extracting one URL shape
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Platform tag recorded on content items
    fn platform(&self) -> &'static str;

    /// Content types this strategy produces; the first is the default
    fn content_types(&self) -> &'static [ContentType];

    fn can_handle(&self, url: &Url) -> bool;

    async fn fetch(&self, http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError>;

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError>;

    fn prepare_for_model(&self, content: &ExtractedContent, budget: usize) -> PreparedText {
        text::prepare(&content.readable_text(), budget)
    }

    /// Classification of a URL this strategy accepted
    fn classify(&self, _url: &Url) -> ContentType {
        self.content_types()
            .first()
            .copied()
            .unwrap_or(ContentType::Unknown)
    }
}

struct Entry {
    strategy: Arc<dyn ExtractionStrategy>,
    priority: i32,
}

/// Ordered strategy list
#[derive(Default)]
pub struct StrategyRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.strategy.name(), e.priority)))
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in strategies, site-specific first
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(YouTubeStrategy), 100);
        registry.register(Arc::new(HackerNewsStrategy), 90);
        registry.register(Arc::new(PodcastAudioStrategy), 80);
        registry.register(Arc::new(FeedStrategy), 70);
        registry.register(Arc::new(HtmlArticleStrategy), 0);
        registry
    }

    /// Add a strategy; equal priorities keep registration order
    pub fn register(&mut self, strategy: Arc<dyn ExtractionStrategy>, priority: i32) {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, Entry { strategy, priority });
    }

    /// Highest-priority matching strategy.
    ///
    /// `hint` only breaks ties: among matches sharing the top priority, one
    /// that declares the hinted content type wins. It never lifts a
    /// lower-priority strategy over a higher one.
    pub fn resolve(
        &self,
        url: &Url,
        hint: Option<ContentType>,
    ) -> Option<Arc<dyn ExtractionStrategy>> {
        let mut matching = self
            .entries
            .iter()
            .filter(|entry| entry.strategy.can_handle(url));
        let first = matching.next()?;

        let chosen = hint
            .filter(|hint| *hint != ContentType::Unknown)
            .and_then(|hint| {
                std::iter::once(first)
                    .chain(matching.take_while(|entry| entry.priority == first.priority))
                    .find(|entry| entry.strategy.content_types().contains(&hint))
            })
            .unwrap_or(first);

        debug!(url = %url, strategy = chosen.strategy.name(), "Strategy resolved");
        Some(chosen.strategy.clone())
    }

    /// Resolve from a string URL
    pub fn resolve_str(
        &self,
        url: &str,
        hint: Option<ContentType>,
    ) -> Result<Option<Arc<dyn ExtractionStrategy>>, StrategyError> {
        let url = Url::parse(url).map_err(|e| StrategyError::Unsupported(format!("{url}: {e}")))?;
        Ok(self.resolve(&url, hint))
    }

    /// `(name, priority)` in resolution order
    pub fn names(&self) -> Vec<(&'static str, i32)> {
        self.entries
            .iter()
            .map(|entry| (entry.strategy.name(), entry.priority))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
