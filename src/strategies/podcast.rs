//! Direct audio file URLs (podcast episodes and the like).
//!
//! Nothing is downloaded here; the transcribe phase fetches the media.

use async_trait::async_trait;
use reqwest::Url;

use crate::domain::ContentType;
use crate::http::HttpClient;

use super::{ExtractedContent, ExtractionStrategy, RawContent, RawPayload, StrategyError};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "ogg", "oga", "opus", "flac"];

#[derive(Debug, Clone, Copy, Default)]
pub struct PodcastAudioStrategy;

fn extension(url: &Url) -> Option<String> {
    let file = url.path_segments()?.last()?;
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Whether the URL points straight at an audio file
pub fn is_audio_url(url: &Url) -> bool {
    extension(url).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

#[async_trait]
impl ExtractionStrategy for PodcastAudioStrategy {
    fn name(&self) -> &'static str {
        "podcast_audio"
    }

    fn platform(&self) -> &'static str {
        "podcast"
    }

    fn content_types(&self) -> &'static [ContentType] {
        &[ContentType::Podcast]
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && is_audio_url(url)
    }

    async fn fetch(&self, _http: &HttpClient, url: &Url) -> Result<RawContent, StrategyError> {
        Ok(RawContent::new(
            url,
            RawPayload::Media {
                url: url.to_string(),
            },
        ))
    }

    fn extract(&self, raw: &RawContent) -> Result<ExtractedContent, StrategyError> {
        let RawPayload::Media { url } = &raw.payload else {
            return Err(StrategyError::Unsupported("expected a media URL".into()));
        };

        let title = raw
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|file| file.rsplit_once('.').map(|(stem, _)| stem))
            .map(|stem| stem.replace(['-', '_'], " "))
            .filter(|stem| !stem.trim().is_empty());

        let mut content = ExtractedContent {
            title,
            media_url: Some(url.clone()),
            site_name: raw.url.host_str().map(str::to_string),
            ..Default::default()
        };
        if let Some(ext) = extension(&raw.url) {
            content.extra.insert("media_format".into(), ext.into());
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_detection() {
        let audio = |s: &str| is_audio_url(&Url::parse(s).unwrap());
        assert!(audio("https://cdn.example.com/shows/ep-12.mp3"));
        assert!(audio("https://cdn.example.com/ep.M4A?token=1"));
        assert!(!audio("https://example.com/episode/12"));
        assert!(!audio("https://example.com/feed.xml"));
    }

    #[test]
    fn test_extract_media() {
        let url = Url::parse("https://cdn.example.com/shows/my_first-episode.mp3").unwrap();
        let raw = RawContent::new(
            &url,
            RawPayload::Media {
                url: url.to_string(),
            },
        );

        let content = PodcastAudioStrategy.extract(&raw).unwrap();
        assert_eq!(content.title.as_deref(), Some("my first episode"));
        assert_eq!(content.media_url.as_deref(), Some(url.as_str()));
        assert_eq!(content.extra["media_format"], "mp3");
    }
}
