use anyhow::Context as _;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;

mod audio;
mod audit;
mod claims;
mod config;
mod error;
mod gate;
mod handlers;
mod jwks;
mod key;
mod middleware;
mod names;
mod telemetry;
mod transcription;
mod verifier;

#[cfg(test)]
mod test_support;

pub struct AppState {
    pub settings: config::Settings,
    pub gate: gate::Gate,
    pub transcriber: transcription::TranscriptionClient,
    pub name_extractor: names::NameExtractionClient,
}

impl AppState {
    /// # Errors
    /// Fails if an outbound HTTP client can't be constructed.
    pub fn new(settings: config::Settings) -> anyhow::Result<Self> {
        let gate = gate::Gate::from_settings(&settings).context("building identity gate")?;
        let transcriber = transcription::TranscriptionClient::new(&settings.openai)
            .context("building transcription client")?;
        let name_extractor = names::NameExtractionClient::new(&settings.openai)
            .context("building name extraction client")?;

        Ok(Self {
            settings,
            gate,
            transcriber,
            name_extractor,
        })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.upload_limit_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/transcribe", post(handlers::transcribe))
        .route("/names", post(handlers::extract_names))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::RequestSpanLayer)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = config::load_config().context("loading configuration")?;
    let _telemetry = telemetry::init(&settings.telemetry)?;

    let state = Arc::new(AppState::new(settings)?);
    for provider in state.gate.providers() {
        tracing::info!(
            provider = %provider.kind,
            audience = %provider.audience,
            jwks_url = provider.verifier.resolver().jwks_url(),
            "accepting identity tokens"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwksConfig, Settings, TelemetryConfig};
    use crate::transcription::tests::openai_config;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let settings = Settings {
            port: 0,
            upload_limit_bytes: 1024,
            upload_dir: None,
            denoise: false,
            apple: None,
            firebase: None,
            jwks: JwksConfig::default(),
            openai: openai_config("http://127.0.0.1:9"),
            telemetry: TelemetryConfig::default(),
        };
        let router = app(Arc::new(AppState::new(settings).unwrap()));

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(middleware::REQUEST_ID_HEADER));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }
}
