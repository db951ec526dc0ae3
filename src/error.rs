//! Error types.
//!
//! [`VerifyError`] is the token verification taxonomy. [`ApiError`] is what
//! handlers return; it owns the mapping from failure kind to HTTP status.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{names::NameExtractionError, transcription::TranscriptionError};

/// Why a bearer token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token is malformed")]
    MalformedToken,
    #[error("no signing key matches the token's key id")]
    KeyNotFound,
    #[error("signing keys could not be fetched: {0}")]
    UpstreamUnavailable(String),
    #[error("token signature does not match the signing key")]
    SignatureMismatch,
    #[error("token has expired")]
    Expired,
    #[error("token audience does not match")]
    AudienceMismatch,
    #[error("token issuer does not match")]
    IssuerMismatch,
}

impl VerifyError {
    /// Short stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::MalformedToken => "malformed-token",
            VerifyError::KeyNotFound => "key-not-found",
            VerifyError::UpstreamUnavailable(_) => "upstream-unavailable",
            VerifyError::SignatureMismatch => "signature-mismatch",
            VerifyError::Expired => "expired",
            VerifyError::AudienceMismatch => "audience-mismatch",
            VerifyError::IssuerMismatch => "issuer-mismatch",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or invalid Authorization header")]
    MissingCredentials,
    #[error("Invalid identity token")]
    Unauthenticated(#[source] VerifyError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid upload: {}", .0.body_text())]
    Upload(#[from] MultipartError),
    #[error("Transcription failed")]
    Transcription(#[from] TranscriptionError),
    #[error("Name extraction failed")]
    NameExtraction(#[from] NameExtractionError),
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingCredentials | ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upload(e) => e.status(),
            ApiError::Transcription(_) | ApiError::NameExtraction(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        ApiError::Unauthenticated(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Transcription(e) => tracing::error!(error = %e, "transcription failed"),
            ApiError::NameExtraction(e) => tracing::error!(error = %e, "name extraction failed"),
            ApiError::Internal(e) => tracing::error!(error = ?e, "request failed"),
            _ => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_every_verification_failure_is_unauthorized() {
        let failures = [
            VerifyError::MalformedToken,
            VerifyError::KeyNotFound,
            VerifyError::UpstreamUnavailable("timeout".to_string()),
            VerifyError::SignatureMismatch,
            VerifyError::Expired,
            VerifyError::AudienceMismatch,
            VerifyError::IssuerMismatch,
        ];
        for failure in failures {
            assert_eq!(ApiError::from(failure).status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_error_body_is_json() {
        let response = ApiError::BadRequest("No file part in the request.".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "No file part in the request.");
    }
}
