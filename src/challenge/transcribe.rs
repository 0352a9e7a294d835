//! Audio transcription backends for challenge solving.

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Turns a challenge audio clip into the spoken text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Posts the audio clip to an external speech-to-text HTTP endpoint.
///
/// The endpoint is expected to accept the raw clip as the request body
/// and answer with either `{"text": "..."}` or the bare transcript.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .body(audio.to_vec())
            .send()
            .await
            .context("Failed to reach transcription endpoint")?
            .error_for_status()
            .context("Transcription endpoint rejected the clip")?;

        let body = response
            .text()
            .await
            .context("Failed to read transcription response")?;

        // Tolerate both JSON and plain-text responses.
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
                return Ok(text.trim().to_string());
            }
        }

        let text = body.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("Transcription endpoint returned an empty transcript");
        }
        Ok(text)
    }
}
