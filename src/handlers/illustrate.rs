//! illustrate: generate an image for a summarized item.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use crate::domain::{TaskEnvelope, TaskResult, TaskType};

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct IllustrateHandler;

#[async_trait]
impl TaskHandler for IllustrateHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Illustrate
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;
        if item.has_metadata("image") && !envelope.force() {
            return Ok(TaskResult::success());
        }
        if !ctx.services.images.enabled() {
            return Ok(TaskResult::success().with_patch("image_status", "disabled"));
        }

        let summary = item
            .metadata
            .get("summary")
            .ok_or_else(|| HandlerError::Fatal("no summary to illustrate".to_string()))?;
        let field = |key: &str| {
            summary
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let subject = match (field("headline"), field("overview")) {
            (Some(headline), Some(overview)) => format!("{headline}. {overview}"),
            (Some(one), None) | (None, Some(one)) => one.to_string(),
            (None, None) => {
                return Err(HandlerError::Fatal("summary has no headline or overview".into()))
            }
        };
        let prompt = format!("Editorial illustration, no text or lettering, for: {subject}");

        let image = ctx.services.images.generate(&prompt).await?;
        info!(model = %image.model, "Image generated");

        Ok(TaskResult::success()
            .with_patch(
                "image",
                json!({ "url": image.url, "prompt": image.prompt, "model": image.model }),
            )
            .with_patch("image_status", json!(null))
            .with_patch("illustrated_at", ctx.timestamp()))
    }
}
