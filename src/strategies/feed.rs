//! RSS and Atom feeds.

use async_trait::async_trait;
use reqwest::Url;

use crate::domain::ContentType;
use crate::http::HttpClient;

use super::{
    text, ExtractedContent, ExtractionStrategy, FeedEntry, RawContent, RawPayload, StrategyError,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedStrategy;

/// URL shapes that conventionally serve a feed
pub fn looks_like_feed(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    if [".rss", ".xml", ".atom"].iter().any(|ext| path.ends_with(ext)) {
        return true;
    }
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .last()
                .is_some_and(|last| matches!(last.to_ascii_lowercase().as_str(), "feed" | "rss" | "atom"))
        })
        .unwrap_or(false)
}

/// Parse feed XML into entries with a usable link
pub fn parse_entries(body: &str) -> Result<(feed_rs::model::Feed, Vec<FeedEntry>), StrategyError> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| StrategyError::Parse(format!("Failed to parse RSS/Atom feed: {e}")))?;

    let entries = feed
        .entries
        .iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let media_url = entry
                .media
                .iter()
                .flat_map(|media| media.content.iter())
                .find_map(|content| content.url.as_ref().map(|u| u.to_string()));

            Some(FeedEntry {
                url,
                title: entry.title.as_ref().map(|t| t.content.trim().to_string()),
                published: entry.published.or(entry.updated),
                media_url,
            })
        })
        .collect();

    Ok((feed, entries))
}

#[async_trait]
impl ExtractionStrategy for FeedStrategy {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn platform(&self) -> &'static str {
        "feed"
    }

    fn content_types(&self) -> &'static [ContentType] {
        &[ContentType::Feed]
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && looks_like_feed(url)
    }

    async fn fetch(&self, http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        let body = http
            .get_text(url.as_str())
            .await
            .map_err(StrategyError::from_fetch)?;
        Ok(RawContent::new(url, RawPayload::Feed(body)))
    }

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        let body = match &raw.payload {
            RawPayload::Feed(body) | RawPayload::Html(body) => body,
            _ => return Err(StrategyError::Unsupported("expected feed XML".into())),
        };
        let (feed, entries) = parse_entries(body)?;

        Ok(ExtractedContent {
            title: feed.title.map(|t| t.content.trim().to_string()),
            description: feed
                .description
                .map(|d| text::strip_html(&d.content))
                .filter(|d| !d.is_empty()),
            site_name: feed.links.first().map(|l| l.href.clone()),
            entries,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example Show</title>
  <link>https://example.com</link>
  <description>Weekly &lt;b&gt;talk&lt;/b&gt;</description>
  <item>
    <title>Episode 2</title>
    <link>https://example.com/ep2</link>
    <enclosure url="https://cdn.example.com/ep2.mp3" type="audio/mpeg" length="1"/>
  </item>
  <item>
    <title>Episode 1</title>
    <link>https://example.com/ep1</link>
  </item>
</channel></rss>"#;

    #[test]
    fn test_feed_url_shapes() {
        let feed = |s: &str| looks_like_feed(&Url::parse(s).unwrap());
        assert!(feed("https://example.com/feed.xml"));
        assert!(feed("https://example.com/blog/feed/"));
        assert!(feed("https://example.com/rss"));
        assert!(!feed("https://example.com/feedback"));
    }

    #[test]
    fn test_extract_rss() {
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let raw = RawContent::new(&url, RawPayload::Feed(RSS.to_string()));

        let content = FeedStrategy.extract(&raw).unwrap();
        assert_eq!(content.title.as_deref(), Some("Example Show"));
        assert_eq!(content.entries.len(), 2);
        assert_eq!(content.entries[0].url, "https://example.com/ep2");
        assert_eq!(
            content.entries[0].media_url.as_deref(),
            Some("https://cdn.example.com/ep2.mp3")
        );
        assert_eq!(content.entries[1].title.as_deref(), Some("Episode 1"));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert!(matches!(
            parse_entries("<html>not a feed</html>"),
            Err(StrategyError::Parse(_))
        ));
    }
}
