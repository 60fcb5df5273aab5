//! Request tracing middleware.
//!
//! Opens one span per request carrying the secure channel id when present,
//! and records the response status class.

use crate::pipeline::headers::{HEADER_CHANNEL_ID, HEADER_ENABLED};
use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};

/// Tracing layer that creates spans for each request
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let secure = req
            .headers()
            .get(HEADER_ENABLED)
            .is_some_and(|v| v.as_bytes() == b"1");
        let channel_id = req
            .headers()
            .get(HEADER_CHANNEL_ID)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let span = info_span!(
            "secure_request",
            http.method = %method,
            http.target = %path,
            secure = secure,
            channel_id = channel_id.as_deref().unwrap_or("-"),
            http.status_code = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;

                if let Ok(response) = &result {
                    Span::current().record("http.status_code", response.status().as_u16());
                }
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Request finished");

                result
            }
            .instrument(span),
        )
    }
}
