//! Hacker News items, via the Algolia items API.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::ContentType;
use crate::http::HttpClient;

use super::{text, ExtractedContent, ExtractionStrategy, RawContent, RawPayload, StrategyError};

pub const ALGOLIA_ITEMS: &str = "https://hn.algolia.com/api/v1/items";

#[derive(Debug, Clone, Copy, Default)]
pub struct HackerNewsStrategy;

/// Item id of a news.ycombinator.com/item?id=N URL
pub fn item_id(url: &Url) -> Option<u64> {
    if url.host_str()? != "news.ycombinator.com" || url.path() != "/item" {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| value.parse().ok())
}

#[derive(Debug, Deserialize)]
struct AlgoliaItem {
    id: u64,
    title: Option<String>,
    author: Option<String>,
    url: Option<String>,
    text: Option<String>,
    points: Option<i64>,
    created_at: Option<String>,
    #[serde(default)]
    children: Vec<Value>,
}

#[async_trait]
impl ExtractionStrategy for HackerNewsStrategy {
    fn name(&self) -> &'static str {
        "hackernews"
    }

    fn platform(&self) -> &'static str {
        "hackernews"
    }

    fn content_types(&self) -> &'static [ContentType] {
        &[ContentType::Social]
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && item_id(url).is_some()
    }

    async fn fetch(&self, http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        let id = item_id(url)
            .ok_or_else(|| StrategyError::Unsupported(format!("not a Hacker News item: {url}")))?;
        let json: Value = http
            .get_json(&format!("{ALGOLIA_ITEMS}/{id}"))
            .await
            .map_err(StrategyError::from_fetch)?;
        Ok(RawContent::new(url, RawPayload::Json(json)))
    }

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        let RawPayload::Json(json) = &raw.payload else {
            return Err(StrategyError::Unsupported("expected Algolia item JSON".into()));
        };
        let item: AlgoliaItem = serde_json::from_value(json.clone())
            .map_err(|e| StrategyError::Parse(e.to_string()))?;

        let mut content = ExtractedContent {
            title: item.title,
            author: item.author,
            text: item
                .text
                .as_deref()
                .map(text::strip_html)
                .filter(|t| !t.is_empty()),
            site_name: Some("Hacker News".to_string()),
            published_at: item.created_at,
            discussion_url: Some(format!("https://news.ycombinator.com/item?id={}", item.id)),
            related_url: item.url.filter(|u| !u.is_empty()),
            ..Default::default()
        };
        content.extra.insert("hn_id".into(), item.id.into());
        if let Some(points) = item.points {
            content.extra.insert("points".into(), points.into());
        }
        content
            .extra
            .insert("comment_count".into(), item.children.len().into());
        Ok(content)
    }
}
