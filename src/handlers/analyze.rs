//! analyze: classify a URL and plan the downstream phases.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use tracing::{debug, instrument};

use crate::domain::{ContentType, FollowUp, TaskEnvelope, TaskResult, TaskType};

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeHandler;

#[async_trait]
impl TaskHandler for AnalyzeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Analyze
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;
        let url = Url::parse(&item.canonical_url)
            .map_err(|e| HandlerError::Fatal(format!("invalid url '{}': {e}", item.canonical_url)))?;

        let hint = Some(item.content_type).filter(|t| *t != ContentType::Unknown);
        let strategy = ctx
            .services
            .strategies
            .resolve(&url, hint)
            .ok_or_else(|| HandlerError::Fatal(format!("no strategy can handle {url}")))?;

        let content_type = hint.unwrap_or_else(|| strategy.classify(&url));
        debug!(
            strategy = strategy.name(),
            %content_type,
            "URL classified"
        );

        let next = match content_type {
            ContentType::Feed => TaskType::DiscoverFeeds,
            _ => TaskType::ProcessContent,
        };
        let mut follow_up = FollowUp::same(next);
        if envelope.force() {
            follow_up = follow_up.with_payload(json!({ "force": true }));
        }

        Ok(TaskResult::success()
            .with_content_type(content_type)
            .with_platform(strategy.platform())
            .with_patch("strategy", strategy.name())
            .with_patch("platform", strategy.platform())
            .with_patch("analyzed_at", ctx.timestamp())
            .then(follow_up))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::domain::{FollowUpTarget, Outcome};
    use crate::handlers::test_support::{context, envelope, services, CannedModel};

    async fn analyze(url: &str, content_type: ContentType, payload: serde_json::Value) -> TaskResult {
        let ctx = context(
            url,
            content_type,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::Analyze, payload);
        AnalyzeHandler.handle(&envelope, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_video_goes_to_processing() {
        let result = analyze(
            "https://www.youtube.com/watch?v=abc",
            ContentType::Unknown,
            json!({}),
        )
        .await;

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.content_type, Some(ContentType::Video));
        assert_eq!(result.platform.as_deref(), Some("youtube"));
        assert_eq!(result.metadata_patch["strategy"], "youtube");
        assert_eq!(result.follow_ups, vec![FollowUp::same(TaskType::ProcessContent)]);
    }

    #[tokio::test]
    async fn test_feed_goes_to_discovery() {
        let result = analyze("https://example.com/feed.xml", ContentType::Unknown, json!({})).await;
        assert_eq!(result.content_type, Some(ContentType::Feed));
        assert_eq!(result.follow_ups[0].task_type, TaskType::DiscoverFeeds);
        assert_eq!(result.follow_ups[0].target, FollowUpTarget::SameContent);
    }

    #[tokio::test]
    async fn test_existing_classification_is_kept_and_force_passed_on() {
        let result = analyze(
            "https://example.com/rss",
            ContentType::Article,
            json!({ "force": true }),
        )
        .await;
        assert_eq!(result.content_type, Some(ContentType::Article));
        // The user's type is kept, but the feed strategy still outranks the fallback
        assert_eq!(result.metadata_patch["strategy"], "feed");
        assert_eq!(result.follow_ups[0].payload, json!({ "force": true }));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_fatal() {
        let ctx = context(
            "ftp://example.com/file",
            ContentType::Unknown,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::Analyze, json!({}));
        let err = AnalyzeHandler.handle(&envelope, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
