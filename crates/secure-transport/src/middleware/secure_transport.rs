//! Secure transport middleware.
//!
//! Adapts axum requests into the [`TransportPipeline`], rebuilds decrypted
//! requests for the inner service and encrypts successful JSON responses on
//! secured requests.

use crate::domain::{InvalidReason, RequestContext, SecureError};
use crate::pipeline::headers::secure_requested;
use crate::pipeline::{InboundRequest, Outcome, TransportPipeline};
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header, request::Parts, uri::PathAndQuery, HeaderValue, Method, Request, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Secure transport layer
#[derive(Clone)]
pub struct SecureTransportLayer {
    pipeline: Arc<TransportPipeline>,
}

impl SecureTransportLayer {
    pub fn new(pipeline: Arc<TransportPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for SecureTransportLayer {
    type Service = SecureTransportService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecureTransportService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

/// Secure transport service
#[derive(Clone)]
pub struct SecureTransportService<S> {
    inner: S,
    pipeline: Arc<TransportPipeline>,
}

impl<S> Service<Request<Body>> for SecureTransportService<S>
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
        let pipeline = Arc::clone(&self.pipeline);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let config = pipeline.config();
            if !config.enabled || req.method() == Method::OPTIONS {
                return inner.call(req).await;
            }

            let (parts, body) = req.into_parts();

            // Plain requests only need the policy decision; their body stays
            // untouched and unbuffered.
            let (body, body_json) = if secure_requested(&parts.headers) {
                let limit = config.max_body_bytes;
                let bytes = match to_bytes(body, limit).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, limit = limit, "Failed to read secure request body");
                        return Ok(SecureError::invalid(InvalidReason::BodyTooLarge(limit))
                            .into_response());
                    }
                };
                let body_json = parse_json_body(&bytes);
                (Body::from(bytes), body_json)
            } else {
                (body, None)
            };

            match pipeline.process(inbound(&parts, body_json)).await {
                Ok(Outcome::Bypass(_)) => inner.call(Request::from_parts(parts, body)).await,
                Ok(Outcome::Secured { request, context }) => {
                    let mut req = match rebuild_request(parts, request) {
                        Ok(req) => req,
                        Err(e) => return Ok(e.into_response()),
                    };
                    req.extensions_mut().insert(Arc::clone(&context));

                    let response = inner.call(req).await?;
                    Ok(encrypt_response(response, &context).await)
                }
                Err(e) => {
                    debug!(code = e.code(), status = %e.status(), "Secure request rejected");
                    Ok(e.into_response())
                }
            }
        })
    }
}

fn inbound(parts: &Parts, body: Option<Value>) -> InboundRequest {
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| forwarded_for(parts));
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    InboundRequest {
        method: parts.method.clone(),
        path,
        headers: parts.headers.clone(),
        body,
        query: parse_query(parts.uri.query()),
        client_ip,
        user_agent,
    }
}

fn forwarded_for(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn parse_json_body(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(bytes).ok()
}

/// Query string as a JSON object; repeated keys collect into arrays.
pub fn parse_query(query: Option<&str>) -> Value {
    let mut map = Map::new();
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

/// Encode a JSON object as a query string. Arrays repeat the key; nested
/// objects are sent as JSON text.
pub fn encode_query(query: &Value) -> Result<String, SecureError> {
    let Value::Object(map) = query else {
        return Ok(String::new());
    };

    let mut pairs: Vec<(String, String)> = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                pairs.extend(items.iter().filter_map(scalar).map(|v| (key.clone(), v)));
            }
            other => {
                if let Some(v) = scalar(other) {
                    pairs.push((key.clone(), v));
                }
            }
        }
    }

    serde_urlencoded::to_string(&pairs).map_err(|e| SecureError::Internal(e.to_string()))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn rebuild_request(mut parts: Parts, request: InboundRequest) -> Result<Request<Body>, SecureError> {
    let query = encode_query(&request.query)?;
    let path_and_query = if query.is_empty() {
        parts.uri.path().to_string()
    } else {
        format!("{}?{}", parts.uri.path(), query)
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query).map_err(|e| SecureError::Internal(e.to_string()))?,
    );
    parts.uri = Uri::from_parts(uri_parts).map_err(|e| SecureError::Internal(e.to_string()))?;

    let body = match request.body {
        Some(value) => serde_json::to_vec(&value).map_err(|e| SecureError::Internal(e.to_string()))?,
        None => Vec::new(),
    };
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(Request::from_parts(parts, Body::from(body)))
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// Encrypt a 2xx JSON response under the request's channel keys.
///
/// The request body cap does not apply here; handler output of any size is
/// sealed.
async fn encrypt_response(response: Response, context: &RequestContext) -> Response {
    if !response.status().is_success() || !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(channel_id = %context.channel_id, error = %e, "Response body unreadable, not encrypted");
            return SecureError::Internal(e.to_string()).into_response();
        }
    };

    let Ok(value) = serde_json::from_slice::<Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    let sealed = serde_json::to_vec(&value)
        .map_err(|e| SecureError::Internal(e.to_string()))
        .and_then(|plaintext| {
            shared_crypto::encrypt_envelope(&context.keys, &context.channel_id, &plaintext)
                .map_err(SecureError::from)
        })
        .and_then(|envelope| {
            serde_json::to_vec(&envelope).map_err(|e| SecureError::Internal(e.to_string()))
        });

    match sealed {
        Ok(encrypted) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(encrypted))
        }
        Err(e) => {
            warn!(channel_id = %context.channel_id, error = %e, "Response encryption failed");
            e.into_response()
        }
    }
}
