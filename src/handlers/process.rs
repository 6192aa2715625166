//! process_content: fetch and extract an item through its strategy.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::domain::{ContentItem, ContentType, FollowUp, TaskEnvelope, TaskResult, TaskType};

use super::{sha256_hex, HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessContentHandler;

/// Next phases once text (or a media URL) is known
fn plan(
    mut result: TaskResult,
    content_type: ContentType,
    media_url: Option<&str>,
    related_url: Option<&str>,
    platform: Option<&str>,
) -> TaskResult {
    let wants_transcript = media_url.is_some() && content_type.is_media();
    result = result.then(FollowUp::same(if wants_transcript {
        TaskType::Transcribe
    } else {
        TaskType::Summarize
    }));

    if let Some(related) = related_url {
        result = result.then(FollowUp::url(
            TaskType::Analyze,
            related,
            ContentType::Unknown,
            platform.map(str::to_string),
        ));
    }
    result
}

fn effective_type(item: &ContentItem, classified: ContentType) -> ContentType {
    if item.content_type == ContentType::Unknown {
        classified
    } else {
        item.content_type
    }
}

#[async_trait]
impl TaskHandler for ProcessContentHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ProcessContent
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;

        // Already extracted by an earlier run; only re-plan
        if item.has_metadata("extracted_at") && !envelope.force() {
            debug!("Content already extracted, skipping fetch");
            return Ok(plan(
                TaskResult::success(),
                item.content_type,
                item.metadata_str("media_url"),
                None,
                item.platform.as_deref(),
            ));
        }

        let url = Url::parse(&item.canonical_url)
            .map_err(|e| HandlerError::Fatal(format!("invalid url '{}': {e}", item.canonical_url)))?;
        let hint = Some(item.content_type).filter(|t| *t != ContentType::Unknown);
        let strategy = ctx
            .services
            .strategies
            .resolve(&url, hint)
            .ok_or_else(|| HandlerError::Fatal(format!("no strategy can handle {url}")))?;

        let raw = strategy.fetch(&ctx.services.http, &url).await?;
        let extracted = strategy.extract(&raw)?;
        let prepared = strategy.prepare_for_model(&extracted, ctx.services.pipeline.max_text_chars);

        let content_type = effective_type(item, strategy.classify(&url));
        info!(
            strategy = strategy.name(),
            chars = prepared.text.len(),
            segments = prepared.segments.len(),
            truncated = prepared.truncated,
            "Content extracted"
        );

        let mut result = TaskResult::success()
            .with_metadata(extracted.to_metadata())
            .with_patch("extracted_at", ctx.timestamp())
            .with_patch("segment_count", prepared.segments.len())
            .with_patch("truncated", prepared.truncated)
            .with_platform(strategy.platform());

        if !prepared.text.is_empty() {
            result = result
                .with_patch("content_hash", sha256_hex(&prepared.text))
                .with_patch("text", prepared.text);
        } else {
            result = result.with_patch("text", json!(null));
        }
        if content_type != item.content_type {
            result = result.with_content_type(content_type);
        }

        Ok(plan(
            result,
            content_type,
            extracted.media_url.as_deref(),
            extracted.related_url.as_deref(),
            Some(strategy.platform()),
        ))
    }
}
