//! Generic web page fallback.

use async_trait::async_trait;
use reqwest::Url;

use crate::domain::ContentType;
use crate::http::HttpClient;

use super::{text, ExtractedContent, ExtractionStrategy, RawContent, RawPayload, StrategyError};

/// Pages with less readable text than this are treated as empty shells
const MIN_TEXT_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlArticleStrategy;

#[async_trait]
impl ExtractionStrategy for HtmlArticleStrategy {
    fn name(&self) -> &'static str {
        "html_article"
    }

    fn platform(&self) -> &'static str {
        "web"
    }

    fn content_types(&self) -> &'static [ContentType] {
        &[ContentType::Article, ContentType::Social, ContentType::Unknown]
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
    }

    async fn fetch(&self, http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        let body = http
            .get_text(url.as_str())
            .await
            .map_err(StrategyError::from_fetch)?;
        Ok(RawContent::new(url, RawPayload::Html(body)))
    }

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        let RawPayload::Html(html) = &raw.payload else {
            return Err(StrategyError::Unsupported("expected an HTML page".into()));
        };

        let title = text::meta_content(html, &["og:title", "twitter:title"])
            .or_else(|| text::title(html));
        let body = text::readable_text(html);

        if title.is_none() && body.chars().count() < MIN_TEXT_CHARS {
            return Err(StrategyError::Parse(format!(
                "no readable content at {}",
                raw.url
            )));
        }

        let mut content = ExtractedContent {
            title,
            author: text::meta_content(html, &["author", "article:author", "twitter:creator"]),
            description: text::meta_content(
                html,
                &["og:description", "description", "twitter:description"],
            ),
            text: Some(body).filter(|b| !b.is_empty()),
            site_name: text::meta_content(html, &["og:site_name"])
                .or_else(|| raw.url.host_str().map(str::to_string)),
            published_at: text::meta_content(html, &["article:published_time", "date"]),
            thumbnail_url: text::meta_content(html, &["og:image", "twitter:image"]),
            feed_links: text::discover_feed_links(html, &raw.url),
            ..Default::default()
        };

        if let Some(kind) = text::meta_content(html, &["og:type"]) {
            content.extra.insert("og_type".into(), kind.into());
        }
        Ok(content)
    }

    fn classify(&self, url: &Url) -> ContentType {
        let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
        match host {
            "twitter.com" | "x.com" | "mastodon.social" | "bsky.app" | "reddit.com"
            | "old.reddit.com" | "threads.net" => ContentType::Social,
            _ => ContentType::Article,
        }
    }
}
