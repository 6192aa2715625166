//! YouTube videos, via the public oEmbed endpoint.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::domain::ContentType;
use crate::http::HttpClient;

use super::{ExtractedContent, ExtractionStrategy, RawContent, RawPayload, StrategyError};

const OEMBED: &str = "https://www.youtube.com/oembed";

#[derive(Debug, Clone, Copy, Default)]
pub struct YouTubeStrategy;

/// Video id from watch, short, embed and youtu.be URLs
pub fn video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let id = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;
    (!id.is_empty()).then_some(id)
}

fn str_field(json: &Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ExtractionStrategy for YouTubeStrategy {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn platform(&self) -> &'static str {
        "youtube"
    }

    fn content_types(&self) -> &'static [ContentType] {
        &[ContentType::Video]
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && video_id(url).is_some()
    }

    async fn fetch(&self, http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        let mut oembed = Url::parse(OEMBED).map_err(|e| StrategyError::Parse(e.to_string()))?;
        oembed
            .query_pairs_mut()
            .append_pair("url", url.as_str())
            .append_pair("format", "json");

        // oEmbed answers 401/404 for private and removed videos
        let json: Value = http
            .get_json(oembed.as_str())
            .await
            .map_err(StrategyError::from_fetch)?;
        Ok(RawContent::new(url, RawPayload::Json(json)))
    }

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        let RawPayload::Json(json) = &raw.payload else {
            return Err(StrategyError::Unsupported("expected oEmbed JSON".into()));
        };

        let mut content = ExtractedContent {
            title: str_field(json, "title"),
            author: str_field(json, "author_name"),
            site_name: Some("YouTube".to_string()),
            thumbnail_url: str_field(json, "thumbnail_url"),
            ..Default::default()
        };
        if let Some(channel) = str_field(json, "author_url") {
            content.extra.insert("channel_url".into(), channel.into());
        }
        if let Some(id) = video_id(&raw.url) {
            content.extra.insert("video_id".into(), id.into());
        }

        if content.title.is_none() {
            return Err(StrategyError::Parse("oEmbed response has no title".into()));
        }
        Ok(content)
    }
}
