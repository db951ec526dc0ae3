use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use opentelemetry::propagation::Extractor;
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::future::Future;
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{Instrument, debug, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    pub static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub endpoint: String,
    pub host: String,
    pub method: String,
}

/// Runs `f` with the current request's context, or an empty one outside a request.
pub fn with_request_info<F, R>(f: F) -> R
where
    F: Fn(&RequestContext) -> R,
{
    REQUEST_CONTEXT.try_with(|r| f(r)).unwrap_or_else(|_| {
        static DEFAULT_CTX: RequestContext = RequestContext {
            request_id: String::new(),
            endpoint: String::new(),
            host: String::new(),
            method: String::new(),
        };
        f(&DEFAULT_CTX)
    })
}

struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .and_then(|header| header.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|h| h.as_str()).collect()
    }
}

fn generate_request_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// Opens a span per request, continuing the caller's trace when a
/// `traceparent` is present, and audit-logs the final status.
#[derive(Debug, Clone)]
pub struct RequestSpanService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestSpanService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    // Boxed because `.instrument()` changes the future's type.
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let parent_context = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor {
                headers: req.headers(),
            })
        });

        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let host = req
            .headers()
            .get("x-forwarded-host")
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.headers().get("host").and_then(|h| h.to_str().ok()))
            .unwrap_or("")
            .to_string();

        let span = info_span!("request", request_id = %request_id);
        if let Err(err) = span.set_parent(parent_context) {
            warn!(error = debug(err), "unable to set otel parent, span will be new instead");
        } else {
            debug!(traceparent = ?req.headers().get("traceparent"), "trace parent set");
        }

        let ctx = RequestContext {
            request_id,
            endpoint: req.uri().path().to_string(),
            host,
            method: req.method().to_string(),
        };

        let started = Instant::now();
        let fut = self.inner.call(req);
        Box::pin(REQUEST_CONTEXT.scope(ctx, async move {
            let mut response = fut.instrument(span).await;

            if let Ok(res) = response.as_mut() {
                let request_id = with_request_info(|ctx| ctx.request_id.clone());
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    res.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                let status = res.status();
                crate::audit!(
                    kind: "access",
                    status = status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request finished"
                );
            }

            response
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestSpanLayer;

impl<S> Layer<S> for RequestSpanLayer {
    type Service = RequestSpanService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestSpanService { inner }
    }
}
