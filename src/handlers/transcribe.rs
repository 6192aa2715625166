//! transcribe: download media and run it through the transcriber.

use async_trait::async_trait;
use reqwest::Url;
use tracing::{info, instrument};

use crate::domain::{FollowUp, TaskEnvelope, TaskResult, TaskType};

use super::{HandlerContext, HandlerError, TaskHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct TranscribeHandler;

/// File name for the downloaded media, keeping the extension whisper sniffs
fn download_name(media_url: &Url) -> String {
    let extension = media_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "media".to_string());
    format!("input.{extension}")
}

#[async_trait]
impl TaskHandler for TranscribeHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Transcribe
    }

    #[instrument(skip_all, fields(content_id = %ctx.content.id))]
    async fn handle(
        &self,
        envelope: &TaskEnvelope,
        ctx: &HandlerContext,
    ) -> Result<TaskResult, HandlerError> {
        let item = &ctx.content;

        if item.has_metadata("transcript") && !envelope.force() {
            return Ok(TaskResult::success().then(FollowUp::same(TaskType::Summarize)));
        }

        let media_url = envelope
            .payload_str("media_url")
            .or_else(|| item.metadata_str("media_url"))
            .ok_or_else(|| HandlerError::Fatal("no media_url to transcribe".to_string()))?;
        let parsed = Url::parse(media_url)
            .map_err(|e| HandlerError::Fatal(format!("invalid media url '{media_url}': {e}")))?;

        // Download and transcription together can outlast both TTLs
        let transcript = ctx
            .keep_alive(envelope.task_id, async {
                let bytes = ctx
                    .services
                    .http
                    .get_bytes(parsed.as_str(), ctx.services.max_download_bytes)
                    .await?;

                let workdir = tempfile::tempdir()?;
                let audio_path = workdir.path().join(download_name(&parsed));
                tokio::fs::write(&audio_path, &bytes).await?;
                info!(bytes = bytes.len(), "Media downloaded");

                let transcript = ctx.services.transcriber.transcribe(&audio_path).await?;
                Ok::<_, HandlerError>(transcript)
            })
            .await??;
        info!(
            chars = transcript.text.len(),
            language = %transcript.language,
            "Transcription complete"
        );

        if transcript.text.trim().is_empty() {
            return Err(HandlerError::Fatal("transcriber returned no text".to_string()));
        }

        Ok(TaskResult::success()
            .with_patch("transcript", transcript.text)
            .with_patch("transcript_language", transcript.language)
            .with_patch("duration_seconds", transcript.duration_seconds)
            .with_patch("transcribed_at", ctx.timestamp())
            .then(FollowUp::same(TaskType::Summarize)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::domain::{ContentType, Outcome};
    use crate::handlers::test_support::{context, envelope, services, CannedModel};

    #[test]
    fn test_download_name_keeps_extension() {
        let name = |u: &str| download_name(&Url::parse(u).unwrap());
        assert_eq!(name("https://cdn.example.com/ep1.MP3"), "input.mp3");
        assert_eq!(name("https://cdn.example.com/stream"), "input.media");
        assert_eq!(name("https://cdn.example.com/a.b/c.verylongext"), "input.media");
    }

    #[tokio::test]
    async fn test_existing_transcript_is_not_redone() {
        let ctx = context(
            "https://cdn.example.com/ep1.mp3",
            ContentType::Podcast,
            json!({ "transcript": "hello world" }),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::Transcribe, json!({}));
        let result = TranscribeHandler.handle(&envelope, &ctx).await.unwrap();

        assert_eq!(result.outcome, Outcome::Success);
        assert!(result.metadata_patch.is_empty());
        assert_eq!(result.follow_ups, vec![FollowUp::same(TaskType::Summarize)]);
    }

    #[tokio::test]
    async fn test_missing_media_url_is_fatal() {
        let ctx = context(
            "https://example.com/episode",
            ContentType::Podcast,
            json!({}),
            services(Arc::new(CannedModel::new(""))),
        );
        let envelope = envelope(&ctx, TaskType::Transcribe, json!({}));
        let err = TranscribeHandler.handle(&envelope, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Fatal(_)));
    }
}
