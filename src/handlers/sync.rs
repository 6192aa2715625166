//! sync_integration: pull saved links from an external account.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{info, instrument};

use crate::domain::{ContentType, FollowUp, TaskEnvelope, TaskResult, TaskType};

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncIntegrationHandler;

/// Links from `[..]` or `{"items": [..]}`; items are strings or objects
/// with a `url`
pub fn saved_links(body: &Value) -> Vec<String> {
    let items = body
        .as_array()
        .or_else(|| body.get("items").and_then(Value::as_array));
    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.as_str()),
            Value::Object(fields) => fields.get("url").and_then(Value::as_str),
            _ => None,
        })
        .map(str::trim)
        .filter(|url| Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https")))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl TaskHandler for SyncIntegrationHandler {
    fn task_type(&self) -> TaskType {
        TaskType::SyncIntegration
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let endpoint = envelope
            .payload_str("endpoint")
            .ok_or_else(|| HandlerError::Fatal("payload has no endpoint".to_string()))?;
        let source = envelope
            .payload_str("integration")
            .unwrap_or("integration")
            .to_string();

        let token = match envelope.payload_str("token_env") {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                HandlerError::Fatal(format!("token environment variable {var} is not set"))
            })?),
            None => None,
        };

        let http = &ctx.services.http;
        let body: Value = match token {
            Some(token) => http.get_json_authorized(endpoint, &token).await?,
            None => http.get_json(endpoint).await?,
        };

        let links = saved_links(&body);
        info!(endpoint, links = links.len(), "Integration synced");

        let mut result = TaskResult::success()
            .with_patch("synced_links", links.len())
            .with_patch("synced_at", ctx.timestamp());
        for link in links {
            result = result.then(FollowUp::url(
                TaskType::Analyze,
                link,
                ContentType::Unknown,
                Some(source.clone()),
            ));
        }
        Ok(result)
    }
}
