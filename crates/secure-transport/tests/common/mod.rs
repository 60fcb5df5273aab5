//! Shared fixtures: an in-memory gateway on a manual clock and a client
//! that performs the handshake and builds secure requests.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    extract::Query,
    http::{header, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use secure_transport::{
    normalize_path, GatewayDeps, InMemoryChannelStore, InMemoryReplayStore, ManualTimeSource,
    MemoryEventSink, RequestContext, SecureConfig, SecureGatewayService, StaticAuthenticator,
    TimeSource, INIT_CHANNEL_PATH,
};
use serde_json::{json, Value};
use shared_crypto::{
    b64_encode, decrypt_envelope, request_sign_material, response_sign_material, seal_envelope,
    sign, verify_signature, ChannelKeys, ClientHandshake, Envelope, SignedEnvelope,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const T0: u64 = 1_700_000_000_000;
pub const TOKEN: &str = "token-alice";
pub const USER: &str = "alice";

pub fn enabled_config() -> SecureConfig {
    SecureConfig {
        enabled: true,
        kek_base64: b64_encode([7u8; 32]),
        ..Default::default()
    }
}

pub struct TestGateway {
    pub router: Router,
    pub service: SecureGatewayService,
    pub clock: Arc<ManualTimeSource>,
    pub events: Arc<MemoryEventSink>,
    pub channel_store: Arc<InMemoryChannelStore>,
    pub replay_store: Arc<InMemoryReplayStore>,
}

impl TestGateway {
    pub fn new(config: SecureConfig) -> Self {
        let clock = Arc::new(ManualTimeSource::new(T0));
        let events = Arc::new(MemoryEventSink::new());
        let channel_store = Arc::new(InMemoryChannelStore::new());
        let replay_store = Arc::new(InMemoryReplayStore::new());
        let authenticator = Arc::new(StaticAuthenticator::new().with_token(TOKEN, USER, None));

        let deps = GatewayDeps {
            channel_store: channel_store.clone(),
            replay_store: replay_store.clone(),
            sessions: authenticator.clone(),
            authenticator,
            events: events.clone(),
            clock: clock.clone(),
        };
        let service = SecureGatewayService::new(config, deps).expect("valid config");
        let router = service.router(app());

        Self {
            router,
            service,
            clock,
            events,
            channel_store,
            replay_store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Response) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        (response.status(), response)
    }

    pub async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, response) = self.send(request).await;
        (status, body_json(response).await)
    }
}

/// Business routes behind the secure layer.
fn app() -> Router {
    Router::new()
        .route("/api/v1/docs", post(echo_body).get(echo_query))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/text", get(|| async { "plain text" }))
        .route("/api/v1/missing", post(not_found))
        .route("/api/v1/export", post(export))
}

/// Size of the `/api/v1/export` payload, above the default request body cap.
pub const EXPORT_BYTES: usize = 2 * 1024 * 1024;

async fn export() -> Json<Value> {
    Json(json!({"data": "x".repeat(EXPORT_BYTES)}))
}

async fn echo_body(
    context: Option<Extension<Arc<RequestContext>>>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    Json(json!({
        "body": body.map(|Json(v)| v).unwrap_or(Value::Null),
        "query": query,
        "user": context.map(|Extension(ctx)| ctx.user_id.clone()),
    }))
}

async fn echo_query(
    context: Option<Extension<Arc<RequestContext>>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    Json(json!({
        "query": query,
        "user": context.map(|Extension(ctx)| ctx.user_id.clone()),
    }))
}

async fn login() -> Json<Value> {
    Json(json!({"token": "issued"}))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"success": false}))).into_response()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub fn handshake_request(token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(INIT_CHANNEL_PATH)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// A client holding negotiated channel keys.
pub struct SecureClient {
    pub channel_id: String,
    pub keys: ChannelKeys,
    pub ts: u64,
}

/// Where the envelope travels.
#[derive(Clone, Copy)]
pub enum Carrier {
    Body,
    Query,
}

impl SecureClient {
    pub async fn connect(gateway: &TestGateway) -> Self {
        let handshake = ClientHandshake::new();
        let (status, response) = gateway
            .send_json(handshake_request(
                Some(TOKEN),
                &json!({
                    "clientPublicKey": handshake.public_key_b64().unwrap(),
                    "clientRandom": handshake.random_b64(),
                    "deviceId": "test-device",
                }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "handshake failed: {}", response);

        let keys = handshake
            .finish(
                response["serverPublicKey"].as_str().unwrap(),
                response["serverRandom"].as_str().unwrap(),
            )
            .unwrap();

        Self {
            channel_id: response["channelId"].as_str().unwrap().to_string(),
            keys,
            ts: gateway.clock.now(),
        }
    }

    pub fn seal(&self, payload: &Value) -> Envelope {
        seal_envelope(&self.keys.enc_key, payload.to_string().as_bytes()).unwrap()
    }

    /// Build a signed request for an already sealed envelope.
    pub fn request_with(
        &self,
        method: Method,
        path: &str,
        req_id: &str,
        nonce: &str,
        ts: &str,
        envelope: &Envelope,
        carrier: Carrier,
    ) -> Request<Body> {
        let material = request_sign_material(
            method.as_str(),
            &normalize_path(path),
            req_id,
            nonce,
            ts,
            &envelope.iv,
            &envelope.ciphertext,
        );

        let (uri, body) = match carrier {
            Carrier::Body => (path.to_string(), Body::from(serde_json::to_vec(envelope).unwrap())),
            Carrier::Query => {
                let qs = serde_urlencoded::to_string([
                    ("v", "1"),
                    ("iv", envelope.iv.as_str()),
                    ("ciphertext", envelope.ciphertext.as_str()),
                ])
                .unwrap();
                (format!("{}?{}", path, qs), Body::empty())
            }
        };

        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-sec-enabled", "1")
            .header("x-sec-channel-id", &self.channel_id)
            .header("x-sec-req-id", req_id)
            .header("x-sec-nonce", nonce)
            .header("x-sec-ts", ts)
            .header("x-sec-sig", sign(&self.keys.mac_key, &material))
            .header("x-sec-kv", "v1")
            .body(body)
            .unwrap()
    }

    pub fn post(&self, path: &str, req_id: &str, nonce: &str, payload: &Value) -> Request<Body> {
        self.request_with(
            Method::POST,
            path,
            req_id,
            nonce,
            &self.ts.to_string(),
            &self.seal(payload),
            Carrier::Body,
        )
    }

    /// Verify and decrypt an encrypted response body.
    pub fn open(&self, body: &Value) -> Value {
        let envelope: SignedEnvelope = serde_json::from_value(body.clone()).unwrap();
        let material = response_sign_material(&self.channel_id, &envelope.iv, &envelope.ciphertext);
        assert!(
            verify_signature(&self.keys.mac_key, &material, &envelope.sig),
            "response signature must verify"
        );
        let plaintext = decrypt_envelope(&self.keys.enc_key, &envelope.iv, &envelope.ciphertext)
            .unwrap();
        serde_json::from_slice(&plaintext).unwrap()
    }
}
