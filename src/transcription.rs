//! Client for an OpenAI-compatible `/audio/transcriptions` endpoint.

use crate::config::OpenAiConfig;
use reqwest::{StatusCode, multipart};
use serde::Deserialize;
use std::{path::Path, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("could not read audio file: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcription request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transcription service returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct TranscriptionClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl TranscriptionClient {
    /// # Errors
    /// Fails if the HTTP client can't be constructed.
    pub fn new(config: &OpenAiConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/audio/transcriptions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.transcription_model.clone(),
        })
    }

    /// Uploads the audio at `path` and returns the recognized text.
    ///
    /// `file_name` is what the service sees; it uses the extension to
    /// detect the container format.
    ///
    /// # Errors
    /// I/O failures reading `path`, transport failures, and non-2xx replies.
    #[tracing::instrument(skip(self, path))]
    pub async fn transcribe(&self, path: &Path, file_name: &str) -> Result<String, TranscriptionError> {
        let audio = tokio::fs::read(path).await?;
        tracing::debug!(audio_bytes = audio.len(), model = %self.model, "sending transcription request");

        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(audio).file_name(file_name.to_string()))
            .text("model", self.model.clone());

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".into());
            return Err(TranscriptionError::Api { status, body });
        }

        let transcription: TranscriptionResponse = response.json().await?;
        tracing::debug!(chars = transcription.text.len(), "transcription complete");
        Ok(transcription.text)
    }
}
