//! summarize: ask the language model for a structured summary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::{ContentItem, FollowUp, TaskEnvelope, TaskResult, TaskType};
use crate::providers::CompletionRequest;
use crate::strategies::text;

use super::discussion::thread_source;
use super::{sha256_hex, HandlerContext, HandlerError, TaskHandler};

const SYSTEM_PROMPT: &str = "You summarize web content for a reading list. \
Answer with a JSON object with the keys headline (string), overview (2-4 sentences), \
key_points (array of short strings) and topics (array of lowercase tags).";

#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizeHandler;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Best text to summarize, most specific first
fn source_text(item: &ContentItem) -> Option<&str> {
    ["transcript", "text", "description", "title"]
        .into_iter()
        .find_map(|key| item.metadata_str(key))
}

/// Decode the model answer; models sometimes wrap JSON in prose or fences
pub fn parse_summary(answer: &str, fallback_headline: Option<&str>) -> Summary {
    let trimmed = answer.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };

    match serde_json::from_str::<Summary>(candidate) {
        Ok(summary) if !summary.overview.trim().is_empty() || !summary.headline.trim().is_empty() => {
            summary
        }
        _ => {
            debug!("Model answer is not a JSON summary, keeping it as plain text");
            Summary {
                headline: fallback_headline.unwrap_or_default().to_string(),
                overview: text::normalize_whitespace(trimmed),
                ..Default::default()
            }
        }
    }
}

/// URL of a comment thread this item can pull
fn discussion_url(item: &ContentItem) -> Option<String> {
    item.metadata_str("discussion_url")
        .map(str::to_string)
        .or_else(|| Some(item.canonical_url.clone()))
        .filter(|url| thread_source(url).is_some())
}

#[async_trait]
impl TaskHandler for SummarizeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Summarize
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;
        let pipeline = &ctx.services.pipeline;

        let source = source_text(item)
            .ok_or_else(|| HandlerError::Fatal("nothing to summarize".to_string()))?;
        let source_hash = sha256_hex(source);

        let unchanged = item.metadata_str("summary_source_hash") == Some(source_hash.as_str());
        let mut result = if unchanged && item.has_metadata("summary") && !envelope.force() {
            debug!("Summary is current, skipping model call");
            TaskResult::success()
        } else {
            let prepared = text::prepare(source, pipeline.max_text_chars);
            let title = item.metadata_str("title");
            let prompt = match title {
                Some(title) => format!("Title: {title}\n\n{}", prepared.text),
                None => prepared.text.clone(),
            };

            let answer = ctx
                .services
                .llm
                .complete(CompletionRequest::new(SYSTEM_PROMPT, prompt).json())
                .await?;
            let summary = parse_summary(&answer, title);
            if summary.overview.is_empty() {
                warn!("Model returned an empty summary");
                return Err(HandlerError::Retryable("model returned an empty summary".into()));
            }
            info!(
                model = ctx.services.llm.name(),
                key_points = summary.key_points.len(),
                "Summary generated"
            );

            let summary = serde_json::to_value(&summary).map_err(anyhow::Error::from)?;
            TaskResult::success()
                .with_patch("summary", summary)
                .with_patch("summary_source_hash", source_hash)
                .with_patch("summary_model", ctx.services.llm.name())
                .with_patch("summarized_at", ctx.timestamp())
        };

        if pipeline.illustrate && ctx.services.images.enabled() {
            result = result.then(FollowUp::same(TaskType::Illustrate));
        }
        if pipeline.fetch_discussion {
            if let Some(url) = discussion_url(item) {
                result = result.then(
                    FollowUp::same(TaskType::FetchDiscussion)
                        .with_payload(serde_json::json!({ "url": url })),
                );
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::domain::{ContentType, Outcome};
    use crate::handlers::test_support::{context, envelope, services, CannedModel};

    const ANSWER: &str = r#"Sure! {"headline":"Rust 2.0","overview":"A new edition.","key_points":["a","b"],"topics":["rust"]}"#;

    #[test]
    fn test_parse_summary_accepts_wrapped_json() {
        let summary = parse_summary(ANSWER, None);
        assert_eq!(summary.headline, "Rust 2.0");
        assert_eq!(summary.key_points, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_summary_falls_back_to_plain_text() {
        let summary = parse_summary("  Just a   paragraph.  ", Some("Title"));
        assert_eq!(summary.headline, "Title");
        assert_eq!(summary.overview, "Just a paragraph.");
        assert!(summary.topics.is_empty());
    }

    #[tokio::test]
    async fn test_summarize_prefers_transcript_and_plans_follow_ups() {
        let model = Arc::new(CannedModel::new(ANSWER));
        let ctx = context(
            "https://news.ycombinator.com/item?id=1",
            ContentType::Social,
            json!({ "title": "Launch", "text": "page text", "transcript": "spoken words" }),
            services(model.clone()),
        );
        let envelope = envelope(&ctx, TaskType::Summarize, json!({}));
        let result = SummarizeHandler.handle(&envelope, &ctx).await.unwrap();

        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.metadata_patch["summary"]["headline"], "Rust 2.0");
        assert_eq!(result.metadata_patch["summary_source_hash"], sha256_hex("spoken words"));
        assert!(model.prompts.lock().unwrap()[0].contains("spoken words"));

        let types: Vec<TaskType> = result.follow_ups.iter().map(|f| f.task_type).collect();
        assert_eq!(types, vec![TaskType::Illustrate, TaskType::FetchDiscussion]);
    }

    #[tokio::test]
    async fn test_unchanged_source_skips_the_model() {
        let model = Arc::new(CannedModel::new(ANSWER));
        let ctx = context(
            "https://example.com/post",
            ContentType::Article,
            json!({
                "text": "body",
                "summary": { "headline": "h", "overview": "o" },
                "summary_source_hash": sha256_hex("body"),
            }),
            services(model.clone()),
        );
        let envelope = envelope(&ctx, TaskType::Summarize, json!({}));
        let result = SummarizeHandler.handle(&envelope, &ctx).await.unwrap();

        assert_eq!(model.calls(), 0);
        assert!(result.metadata_patch.is_empty());
        assert_eq!(result.follow_ups, vec![FollowUp::same(TaskType::Illustrate)]);
    }

    #[tokio::test]
    async fn test_empty_item_is_fatal() {
        let ctx = context(
            "https://example.com/post",
            ContentType::Article,
            json!({}),
            services(Arc::new(CannedModel::new(ANSWER))),
        );
        let envelope = envelope(&ctx, TaskType::Summarize, json!({}));
        let err = SummarizeHandler.handle(&envelope, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
