//! discover_feeds and onboarding_discover: bulk source discovery.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::{ContentType, FollowUp, TaskEnvelope, TaskResult, TaskType};
use crate::strategies::feed::{looks_like_feed, parse_entries};
use crate::strategies::podcast::is_audio_url;
use crate::strategies::{text, FeedEntry, StrategyError};

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverFeedsHandler;

/// Follow-up for one feed entry: audio enclosures go straight to the
/// podcast path, everything else is analyzed as a feed item
fn entry_follow_up(entry: &FeedEntry, feed_url: &str) -> FollowUp {
    let audio = entry
        .media_url
        .as_deref()
        .filter(|media| Url::parse(media).is_ok_and(|u| is_audio_url(&u)));
    match audio {
        Some(media) => FollowUp::url(
            TaskType::Analyze,
            media,
            ContentType::Podcast,
            Some(feed_url.to_string()),
        ),
        None => FollowUp::url(
            TaskType::Analyze,
            entry.url.clone(),
            ContentType::FeedItem,
            Some(feed_url.to_string()),
        ),
    }
}

#[async_trait]
impl TaskHandler for DiscoverFeedsHandler {
    fn task_type(&self) -> TaskType {
        TaskType::DiscoverFeeds
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        _envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;
        let url = Url::parse(&item.canonical_url)
            .map_err(|e| HandlerError::Fatal(format!("invalid url '{}': {e}", item.canonical_url)))?;

        let body = ctx
            .services
            .http
            .get_text(url.as_str())
            .await
            .map_err(StrategyError::from_fetch)?;

        let is_feed = item.content_type == ContentType::Feed || looks_like_feed(&url);
        if is_feed {
            let (feed, entries) = parse_entries(&body)?;
            let limit = ctx.services.pipeline.max_feed_items;
            info!(entries = entries.len(), limit, "Feed parsed");

            let mut result = TaskResult::success()
                .with_content_type(ContentType::Feed)
                .with_patch("feed_entry_count", entries.len())
                .with_patch("feed_checked_at", ctx.timestamp());
            if let Some(title) = feed.title {
                result = result.with_patch("feed_title", title.content.trim());
            }
            for entry in entries.iter().take(limit) {
                result = result.then(entry_follow_up(entry, item.canonical_url.as_str()));
            }
            return Ok(result);
        }

        let feeds = text::discover_feed_links(&body, &url);
        info!(feeds = feeds.len(), "Feed links discovered");

        let mut result = TaskResult::success()
            .with_patch("discovered_feeds", feeds.clone())
            .with_patch("feeds_checked_at", ctx.timestamp());
        for feed in feeds {
            result = result.then(FollowUp::url(
                TaskType::DiscoverFeeds,
                feed,
                ContentType::Feed,
                Some(item.canonical_url.clone()),
            ));
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OnboardingDiscoverHandler;

#[async_trait]
impl TaskHandler for OnboardingDiscoverHandler {
    fn task_type(&self) -> TaskType {
        TaskType::OnboardingDiscover
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let sources: Vec<&str> = envelope
            .payload
            .get("sources")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if sources.is_empty() {
            return Err(HandlerError::Fatal("payload has no sources".to_string()));
        }

        let mut result = TaskResult::success();
        let mut accepted = 0usize;
        let mut rejected = Vec::new();
        for source in sources {
            match Url::parse(source.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {
                    accepted += 1;
                    result = result.then(FollowUp::url(
                        TaskType::DiscoverFeeds,
                        url.as_str(),
                        ContentType::Unknown,
                        Some("onboarding".to_string()),
                    ));
                }
                _ => {
                    warn!(source, "Skipping invalid onboarding source");
                    rejected.push(source.to_string());
                }
            }
        }

        Ok(result
            .with_patch("onboarding_sources", accepted)
            .with_patch("onboarding_rejected", rejected)
            .with_patch("onboarded_at", ctx.timestamp()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::domain::{FollowUpTarget, Outcome};
    use crate::handlers::test_support::{context, envelope, services, CannedModel};

    #[test]
    fn test_entry_follow_up_prefers_audio() {
        let episode = FeedEntry {
            url: "https://example.com/ep2".into(),
            title: Some("Episode 2".into()),
            published: None,
            media_url: Some("https://cdn.example.com/ep2.mp3".into()),
        };
        let follow_up = entry_follow_up(&episode, "https://example.com/feed.xml");
        assert_eq!(
            follow_up.target,
            FollowUpTarget::Url {
                url: "https://cdn.example.com/ep2.mp3".into(),
                content_type: ContentType::Podcast,
                source: Some("https://example.com/feed.xml".into()),
            }
        );

        let post = FeedEntry {
            media_url: None,
            ..episode
        };
        let follow_up = entry_follow_up(&post, "https://example.com/feed.xml");
        assert!(matches!(
            follow_up.target,
            FollowUpTarget::Url { content_type: ContentType::FeedItem, .. }
        ));
    }

    #[tokio::test]
    async fn test_onboarding_fans_out_valid_sources() {
        let ctx = context(
            "https://example.com/onboarding",
            ContentType::Unknown,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(
            &ctx,
            TaskType::OnboardingDiscover,
            json!({ "sources": ["https://a.example.com", "not a url", "https://b.example.com/blog"] }),
        );
        let result = OnboardingDiscoverHandler.handle(&envelope, &ctx).await.unwrap();

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.follow_ups.len(), 2);
        assert!(result
            .follow_ups
            .iter()
            .all(|f| f.task_type == TaskType::DiscoverFeeds));
        assert_eq!(result.metadata_patch["onboarding_rejected"], json!(["not a url"]));
    }

    #[tokio::test]
    async fn test_onboarding_without_sources_is_fatal() {
        let ctx = context(
            "https://example.com/onboarding",
            ContentType::Unknown,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::OnboardingDiscover, json!({ "sources": [] }));
        let err = OnboardingDiscoverHandler.handle(&envelope, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
