//! The `/transcribe` and `/names` endpoints.
//!
//! Both authenticate first; nothing is read from the body, written to disk
//! or sent to a remote service for an unauthenticated caller.

use crate::{AppState, audio, error::ApiError, gate::Identity};
use anyhow::Context as _;
use axum::{
    Json,
    body::Bytes,
    extract::{
        Multipart, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub transcription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct NamesRequest {
    pub text: String,
    /// Names to leave out of the answer, typically the caller's own.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamesResponse {
    pub names: Vec<String>,
}

struct Upload {
    file_name: String,
    bytes: Bytes,
}

/// Audio staged on disk. Both files are deleted when this is dropped.
struct StagedAudio {
    upload: NamedTempFile,
    cleaned: Option<NamedTempFile>,
}

impl StagedAudio {
    fn path(&self) -> &Path {
        self.cleaned.as_ref().unwrap_or(&self.upload).path()
    }
}

/// Handler for `POST /transcribe`.
///
/// Expects a multipart body with a `file` part. Returns the transcript and,
/// when enabled, the names of the people introduced in it.
#[tracing::instrument(skip_all)]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let identity = state.gate.authenticate(&headers).await?;
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let upload = read_upload(&mut multipart).await?;
    tracing::info!(
        provider = %identity.provider,
        file_name = %upload.file_name,
        bytes = upload.bytes.len(),
        "received upload"
    );

    let dir = state
        .settings
        .upload_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let denoise = state.settings.denoise;
    let file_name = upload.file_name.clone();
    let staged = tokio::task::spawn_blocking(move || stage(upload, &dir, denoise))
        .await
        .context("staging task panicked")??;

    let transcription = state
        .transcriber
        .transcribe(staged.path(), &file_name)
        .await?;
    drop(staged);

    let names = if state.settings.openai.extract_names {
        Some(find_names(&state, &identity, &transcription, Vec::new()).await?)
    } else {
        None
    };

    Ok(Json(TranscribeResponse {
        transcription,
        names,
    }))
}

/// Handler for `POST /names`.
#[tracing::instrument(skip_all)]
pub async fn extract_names(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NamesRequest>, JsonRejection>,
) -> Result<Json<NamesResponse>, ApiError> {
    let identity = state.gate.authenticate(&headers).await?;
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let names = find_names(&state, &identity, &request.text, request.exclude).await?;
    Ok(Json(NamesResponse { names }))
}

async fn find_names(
    state: &AppState,
    identity: &Identity,
    text: &str,
    mut exclude: Vec<String>,
) -> Result<Vec<String>, ApiError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    if let Some(name) = identity.claims.name() {
        exclude.push(name.to_string());
    }
    Ok(state.name_extractor.extract(text, &exclude).await?)
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|name| name.trim().to_string())
            .unwrap_or_default();
        if file_name.is_empty() {
            return Err(ApiError::BadRequest("No file selected for uploading.".to_string()));
        }

        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty.".to_string()));
        }
        return Ok(Upload { file_name, bytes });
    }

    Err(ApiError::BadRequest("No file part in the request.".to_string()))
}

/// Writes the upload to a temp file and optionally noise-gates it.
///
/// Only the extension of the client's file name is reused on disk.
fn stage(upload: Upload, dir: &Path, denoise: bool) -> Result<StagedAudio, ApiError> {
    let suffix = safe_extension(&upload.file_name)
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    file.write_all(&upload.bytes)
        .and_then(|()| file.flush())
        .context("writing upload")?;

    let cleaned = if denoise {
        audio::clean_wav(file.path(), dir).unwrap_or_else(|e| {
            tracing::warn!("noise reduction failed, sending original audio: {}", e);
            None
        })
    } else {
        None
    };

    Ok(StagedAudio {
        upload: file,
        cleaned,
    })
}

fn safe_extension(file_name: &str) -> Option<String> {
    PathBuf::from(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}
