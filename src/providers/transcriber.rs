//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary and reads its JSON output.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscriptionSettings;

use super::ProviderError;

const PROVIDER: &str = "whisper";

/// Result of transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub duration_seconds: f64,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, ProviderError>;
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

impl From<WhisperOutput> for Transcript {
    fn from(output: WhisperOutput) -> Self {
        let duration = output.segments.last().map(|s| s.end).unwrap_or(0.0);
        Transcript {
            text: output.text.trim().to_string(),
            language: if output.language.is_empty() {
                "unknown".to_string()
            } else {
                output.language
            },
            duration_seconds: duration,
        }
    }
}

/// Local whisper CLI
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    settings: TranscriptionSettings,
}

impl WhisperTranscriber {
    pub fn new(settings: TranscriptionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcript, ProviderError> {
        // Whisper writes <stem>.json into the output directory
        let temp_dir = tempfile::tempdir()?;

        debug!(audio = %audio_path.display(), model = %self.settings.model, "Running whisper");

        let run = Command::new(&self.settings.whisper_binary)
            .arg(audio_path)
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.settings.timeout_secs), run)
            .await
            .map_err(|_| ProviderError::Timeout { provider: PROVIDER })?
            .map_err(|e| ProviderError::Failed {
                provider: PROVIDER,
                message: format!("failed to run {}: {e}", self.settings.whisper_binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed {
                provider: PROVIDER,
                message: stderr.trim().to_string(),
            });
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));
        let json_content = tokio::fs::read_to_string(&json_path).await?;

        let whisper: WhisperOutput =
            serde_json::from_str(&json_content).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let transcript = Transcript::from(whisper);
        info!(
            chars = transcript.text.len(),
            duration = transcript.duration_seconds,
            "Transcription finished"
        );
        Ok(transcript)
    }
}
