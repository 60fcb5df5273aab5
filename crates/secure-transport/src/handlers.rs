//! Handshake endpoint.

use crate::channel::ChannelService;
use crate::domain::{HandshakeResponse, InitChannel, InitChannelRequest, InvalidReason, SecureError};
use crate::ports::Authenticator;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

/// Route of the channel handshake.
pub const INIT_CHANNEL_PATH: &str = "/api/v1/security/channel/init";

/// Shared state of the handshake route
#[derive(Clone)]
pub struct HandshakeState {
    pub channels: Arc<ChannelService>,
    pub authenticator: Arc<dyn Authenticator>,
}

/// Router exposing `POST /api/v1/security/channel/init`.
pub fn handshake_router(state: HandshakeState) -> Router {
    Router::new()
        .route(INIT_CHANNEL_PATH, post(init_channel))
        .with_state(state)
}

/// `POST /api/v1/security/channel/init`
pub async fn init_channel(
    State(state): State<HandshakeState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HandshakeResponse>, SecureError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| SecureError::Unauthenticated("missing bearer token".into()))?;
    let user_id = state
        .authenticator
        .authenticate(token)
        .await
        .ok_or_else(|| SecureError::Unauthenticated("invalid or expired token".into()))?;

    let request: InitChannelRequest = serde_json::from_slice(&body).map_err(|e| {
        SecureError::invalid(InvalidReason::Handshake(format!("malformed body: {}", e)))
    })?;
    if request.client_public_key.is_empty() {
        return Err(SecureError::invalid(InvalidReason::Handshake(
            "clientPublicKey is required".into(),
        )));
    }
    if request.client_random.is_empty() {
        return Err(SecureError::invalid(InvalidReason::Handshake(
            "clientRandom is required".into(),
        )));
    }

    let ip_address = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let response = state
        .channels
        .init_channel(InitChannel {
            user_id,
            access_token: Some(token.to_string()),
            client_public_key: request.client_public_key,
            client_random: request.client_random,
            device_id: request.device_id,
            ip_address,
            user_agent,
        })
        .await?;

    Ok(Json(response))
}

/// Token of an `Authorization: Bearer <token>` header; scheme is
/// case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
