//! # Transport Pipeline
//!
//! Framework-neutral request processing for secure mode. The middleware
//! adapts HTTP requests into [`InboundRequest`] and acts on the [`Outcome`].
//!
//! ## Order
//!
//! ```text
//! bypass? → mode → headers → timestamp → envelope → channel
//!         → signature → replay → decrypt → rewrite → touch
//! ```
//!
//! The signature is checked before the replay record is written; a request
//! that fails verification never consumes its request id or nonce.

pub mod envelope;
pub mod headers;

pub use envelope::{extract_envelope, rewrite_parts, EnvelopeSource};
pub use headers::{check_clock_skew, parse_timestamp, secure_requested, SecureHeaders};

use crate::channel::ChannelService;
use crate::domain::{
    normalize_path, InvalidReason, OpenPaths, RequestContext, RequestMeta, SecureChannel,
    SecureConfig, SecureError, SecurityEvent, SecurityEventType, Severity,
};
use crate::ports::{SecurityEventSink, TimeSource};
use crate::replay::ReplayGuard;
use axum::http::{header, HeaderMap, Method};
use serde_json::Value;
use shared_crypto::request_sign_material;
use std::sync::Arc;
use tracing::{debug, warn};

/// A request as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Request path, possibly with a query string
    pub path: String,
    pub headers: HeaderMap,
    /// Parsed JSON body, if any
    pub body: Option<Value>,
    /// Parsed query parameters as a JSON object
    pub query: Value,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl InboundRequest {
    fn is_multipart(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().contains("multipart/form-data"))
            .unwrap_or(false)
    }
}

/// Pipeline result.
#[derive(Debug)]
pub enum Outcome {
    /// Not a secure request; forward unchanged.
    Bypass(InboundRequest),
    /// Decrypted request and its channel context.
    Secured {
        request: InboundRequest,
        context: Arc<RequestContext>,
    },
}

/// Secure-mode request processor.
pub struct TransportPipeline {
    config: Arc<SecureConfig>,
    open_paths: OpenPaths,
    channels: Arc<ChannelService>,
    replay: Arc<ReplayGuard>,
    events: Arc<dyn SecurityEventSink>,
    clock: Arc<dyn TimeSource>,
}

impl TransportPipeline {
    pub fn new(
        config: Arc<SecureConfig>,
        channels: Arc<ChannelService>,
        replay: Arc<ReplayGuard>,
        events: Arc<dyn SecurityEventSink>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let open_paths = OpenPaths::new(&config.open_paths);
        Self {
            config,
            open_paths,
            channels,
            replay,
            events,
            clock,
        }
    }

    pub fn config(&self) -> &SecureConfig {
        &self.config
    }

    pub fn channels(&self) -> &Arc<ChannelService> {
        &self.channels
    }

    /// Run one request through the pipeline.
    pub async fn process(&self, request: InboundRequest) -> Result<Outcome, SecureError> {
        if !self.config.enabled || request.method == Method::OPTIONS {
            return Ok(Outcome::Bypass(request));
        }

        let path = normalize_path(&request.path);
        if !secure_requested(&request.headers) {
            if self.is_forced(&request, &path) {
                debug!(path = %path, "Plain request on forced secure path");
                return Err(SecureError::invalid(InvalidReason::SecureChannelRequired));
            }
            return Ok(Outcome::Bypass(request));
        }

        if request.is_multipart() {
            return Err(SecureError::invalid(InvalidReason::MultipartUnsupported));
        }

        let secure = SecureHeaders::extract(&request.headers)?;
        let ts = parse_timestamp(&secure.ts_raw)?;
        check_clock_skew(ts, self.clock.now(), self.config.clock_skew_ms)?;

        let (envelope, source) = extract_envelope(request.body.as_ref(), &request.query)?;

        let channel = self.channels.load_active_channel(&secure.channel_id).await?;
        let context = self.channels.build_request_context(
            &channel,
            RequestMeta {
                req_id: secure.req_id.clone(),
                nonce: secure.nonce.clone(),
                timestamp: ts.max(0) as u64,
            },
        )?;

        let material = request_sign_material(
            request.method.as_str(),
            &path,
            &secure.req_id,
            &secure.nonce,
            &secure.ts_raw,
            &envelope.iv,
            &envelope.ciphertext,
        );
        if !self
            .channels
            .engine()
            .verify_signature(&context.keys.mac_key, &material, &secure.signature)
        {
            warn!(channel_id = %secure.channel_id, path = %path, "Secure signature rejected");
            self.emit(
                &request,
                &channel,
                SecurityEventType::SecureSignatureInvalid,
                Severity::High,
                serde_json::json!({
                    "channelId": secure.channel_id,
                    "reqId": secure.req_id,
                    "nonce": secure.nonce,
                    "path": path,
                }),
            );
            return Err(SecureError::SignatureInvalid);
        }

        if let Err(e) = self
            .replay
            .assert_not_replay(&secure.channel_id, &secure.req_id, &secure.nonce)
            .await
        {
            if e == SecureError::ReplayDetected {
                warn!(channel_id = %secure.channel_id, req_id = %secure.req_id, "Replay blocked");
                self.emit(
                    &request,
                    &channel,
                    SecurityEventType::SecureReplayBlocked,
                    Severity::High,
                    self.event_ids(&secure),
                );
            }
            return Err(e);
        }

        let plaintext = match self.decrypt(&context, &envelope.iv, &envelope.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(channel_id = %secure.channel_id, req_id = %secure.req_id, "Secure payload decryption failed");
                self.emit(
                    &request,
                    &channel,
                    SecurityEventType::SecureDecryptFailed,
                    Severity::Medium,
                    self.event_ids(&secure),
                );
                return Err(e);
            }
        };

        let (body, query) = rewrite_parts(plaintext, source);
        let mut request = request;
        request.body = Some(body);
        request.query = query;

        let channels = Arc::clone(&self.channels);
        let channel_id = secure.channel_id;
        tokio::spawn(async move {
            channels.touch_activity(&channel_id).await;
        });

        Ok(Outcome::Secured {
            request,
            context: Arc::new(context),
        })
    }

    /// Forced mode applies to non-exempt, non-upload API calls.
    fn is_forced(&self, request: &InboundRequest, path: &str) -> bool {
        self.config.force
            && request.method != Method::HEAD
            && !request.is_multipart()
            && path.starts_with(self.config.forced_prefix.as_str())
            && !self.open_paths.is_open(path)
    }

    fn decrypt(&self, context: &RequestContext, iv: &str, ciphertext: &str) -> Result<Value, SecureError> {
        let bytes = self
            .channels
            .engine()
            .decrypt_envelope(&context.keys.enc_key, iv, ciphertext)?;
        serde_json::from_slice(&bytes).map_err(|_| SecureError::DecryptFailed)
    }

    fn event_ids(&self, secure: &SecureHeaders) -> Value {
        serde_json::json!({
            "channelId": secure.channel_id,
            "reqId": secure.req_id,
            "nonce": secure.nonce,
        })
    }

    fn emit(
        &self,
        request: &InboundRequest,
        channel: &SecureChannel,
        event_type: SecurityEventType,
        severity: Severity,
        details: Value,
    ) {
        self.events.emit(
            SecurityEvent::new(event_type, severity, self.clock.now())
                .user(channel.user_id.clone())
                .client(request.client_ip.as_deref(), request.user_agent.as_deref())
                .details(details)
                .blocked_threat(severity),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryChannelStore, InMemoryReplayStore, MemoryEventSink, NoSessionResolver};
    use crate::domain::InitChannel;
    use crate::ports::ManualTimeSource;
    use axum::http::HeaderValue;
    use serde_json::json;
    use shared_crypto::{
        b64_encode, seal_envelope, sign, ChannelKeys, ClientHandshake, CryptoEngine, Kek, SecretKey,
    };
    use std::time::Duration;

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        pipeline: TransportPipeline,
        events: Arc<MemoryEventSink>,
        clock: Arc<ManualTimeSource>,
        channel_id: String,
        keys: ChannelKeys,
    }

    async fn harness(config: SecureConfig) -> Harness {
        let clock = Arc::new(ManualTimeSource::new(T0));
        let events = Arc::new(MemoryEventSink::new());
        let engine = Arc::new(CryptoEngine::new(Kek::from_key(SecretKey::from_bytes([9u8; 32]))));
        let channels = Arc::new(ChannelService::new(
            Arc::new(InMemoryChannelStore::new()),
            engine,
            Arc::new(NoSessionResolver),
            events.clone(),
            clock.clone(),
            Duration::from_secs(1800),
        ));
        let replay = Arc::new(ReplayGuard::new(
            Arc::new(InMemoryReplayStore::new()),
            clock.clone(),
            Duration::from_secs(120),
        ));

        let client = ClientHandshake::new();
        let handshake = channels
            .init_channel(InitChannel {
                user_id: "user-1".into(),
                access_token: None,
                client_public_key: client.public_key_b64().unwrap(),
                client_random: client.random_b64(),
                device_id: None,
                ip_address: None,
                user_agent: None,
            })
            .await
            .unwrap();
        let keys = client
            .finish(&handshake.server_public_key, &handshake.server_random)
            .unwrap();

        Harness {
            pipeline: TransportPipeline::new(
                Arc::new(config),
                channels,
                replay,
                events.clone(),
                clock.clone(),
            ),
            events,
            clock,
            channel_id: handshake.channel_id,
            keys,
        }
    }

    fn enabled() -> SecureConfig {
        SecureConfig {
            enabled: true,
            kek_base64: b64_encode([9u8; 32]),
            ..Default::default()
        }
    }

    fn plain(method: Method, path: &str) -> InboundRequest {
        InboundRequest {
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: None,
            query: json!({}),
            client_ip: Some("10.0.0.1".into()),
            user_agent: None,
        }
    }

    impl Harness {
        fn secure_post(&self, path: &str, req_id: &str, nonce: &str, payload: &Value) -> InboundRequest {
            let envelope =
                seal_envelope(&self.keys.enc_key, payload.to_string().as_bytes()).unwrap();
            let ts = self.clock.now().to_string();
            let material = request_sign_material(
                "POST",
                &normalize_path(path),
                req_id,
                nonce,
                &ts,
                &envelope.iv,
                &envelope.ciphertext,
            );

            let mut request = plain(Method::POST, path);
            let headers = &mut request.headers;
            headers.insert("x-sec-enabled", HeaderValue::from_static("1"));
            headers.insert("x-sec-channel-id", HeaderValue::from_str(&self.channel_id).unwrap());
            headers.insert("x-sec-req-id", HeaderValue::from_str(req_id).unwrap());
            headers.insert("x-sec-nonce", HeaderValue::from_str(nonce).unwrap());
            headers.insert("x-sec-ts", HeaderValue::from_str(&ts).unwrap());
            headers.insert(
                "x-sec-sig",
                HeaderValue::from_str(&sign(&self.keys.mac_key, &material)).unwrap(),
            );
            request.body = Some(serde_json::to_value(&envelope).unwrap());
            request
        }
    }

    #[tokio::test]
    async fn test_disabled_and_options_bypass() {
        let h = harness(SecureConfig::default()).await;
        let outcome = h.pipeline.process(plain(Method::POST, "/api/v1/docs")).await.unwrap();
        assert!(matches!(outcome, Outcome::Bypass(_)));

        let h = harness(SecureConfig { force: true, ..enabled() }).await;
        let outcome = h.pipeline.process(plain(Method::OPTIONS, "/api/v1/docs")).await.unwrap();
        assert!(matches!(outcome, Outcome::Bypass(_)));
    }

    #[tokio::test]
    async fn test_forced_mode() {
        let h = harness(SecureConfig { force: true, ..enabled() }).await;

        assert_eq!(
            h.pipeline.process(plain(Method::GET, "/api/v1/docs")).await.unwrap_err(),
            SecureError::invalid(InvalidReason::SecureChannelRequired)
        );

        for (method, path) in [
            (Method::POST, "/api/v1/auth/login"),
            (Method::GET, "/api/v1/assets/a1/file/"),
            (Method::HEAD, "/api/v1/docs"),
            (Method::GET, "/health"),
        ] {
            let outcome = h.pipeline.process(plain(method, path)).await.unwrap();
            assert!(matches!(outcome, Outcome::Bypass(_)), "{}", path);
        }

        let mut upload = plain(Method::POST, "/api/v1/docs");
        upload.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=x"),
        );
        assert!(matches!(h.pipeline.process(upload).await.unwrap(), Outcome::Bypass(_)));
    }

    #[tokio::test]
    async fn test_secure_multipart_rejected() {
        let h = harness(enabled()).await;
        let mut request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({}));
        request.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Multipart/Form-Data; boundary=x"),
        );
        assert_eq!(
            h.pipeline.process(request).await.unwrap_err(),
            SecureError::invalid(InvalidReason::MultipartUnsupported)
        );
    }

    #[tokio::test]
    async fn test_secured_request_is_rewritten() {
        let h = harness(enabled()).await;
        let request = h.secure_post("/api/v1/docs/", "r1", "n1", &json!({"title": "hello"}));

        let Outcome::Secured { request, context } = h.pipeline.process(request).await.unwrap() else {
            panic!("expected secured outcome");
        };
        assert_eq!(request.body, Some(json!({"title": "hello"})));
        assert_eq!(request.query, json!({}));
        assert_eq!(context.channel_id, h.channel_id);
        assert_eq!(context.user_id, "user-1");
        assert_eq!(context.req_id, "r1");
        assert_eq!(context.timestamp, T0);
    }

    #[tokio::test]
    async fn test_tampered_signature_emits_event() {
        let h = harness(enabled()).await;
        let mut request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({"a": 1}));
        // Signed for a different path
        request.path = "/api/v1/other".into();

        assert_eq!(
            h.pipeline.process(request).await.unwrap_err(),
            SecureError::SignatureInvalid
        );
        let events = h.events.events();
        let event = events
            .iter()
            .find(|e| e.event_type == SecurityEventType::SecureSignatureInvalid)
            .unwrap();
        assert_eq!(event.severity, Severity::High);
        assert!(event.blocked);
        assert_eq!(event.ip_address, "10.0.0.1");
        assert_eq!(event.details["path"], "/api/v1/other");

        // A forged request does not consume the ids
        let request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({"a": 1}));
        assert!(h.pipeline.process(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_emits_event() {
        let h = harness(enabled()).await;
        let request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({"a": 1}));

        assert!(h.pipeline.process(request.clone()).await.is_ok());
        assert_eq!(
            h.pipeline.process(request).await.unwrap_err(),
            SecureError::ReplayDetected
        );
        assert_eq!(h.events.count_of(SecurityEventType::SecureReplayBlocked), 1);
    }

    #[tokio::test]
    async fn test_non_json_plaintext_is_decrypt_failure() {
        let h = harness(enabled()).await;
        let mut request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({}));

        // Re-seal raw text under the same headers
        let envelope = seal_envelope(&h.keys.enc_key, b"not json").unwrap();
        let ts = request.headers["x-sec-ts"].to_str().unwrap().to_string();
        let material = request_sign_material(
            "POST", "/api/v1/docs", "r1", "n1", &ts, &envelope.iv, &envelope.ciphertext,
        );
        request.headers.insert(
            "x-sec-sig",
            HeaderValue::from_str(&sign(&h.keys.mac_key, &material)).unwrap(),
        );
        request.body = Some(serde_json::to_value(&envelope).unwrap());

        assert_eq!(
            h.pipeline.process(request).await.unwrap_err(),
            SecureError::DecryptFailed
        );
        let events = h.events.events();
        let event = events
            .iter()
            .find(|e| e.event_type == SecurityEventType::SecureDecryptFailed)
            .unwrap();
        assert_eq!(event.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_clock_skew_rejected() {
        let h = harness(enabled()).await;
        let request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({}));
        h.clock.advance(60_001);

        let err = h.pipeline.process(request).await.unwrap_err();
        assert_eq!(err, SecureError::ClockSkewExceeded { clock_skew_ms: 60_000 });
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let h = harness(enabled()).await;
        let mut request = h.secure_post("/api/v1/docs", "r1", "n1", &json!({}));
        request
            .headers
            .insert("x-sec-channel-id", HeaderValue::from_static("sch_missing"));

        assert_eq!(
            h.pipeline.process(request).await.unwrap_err(),
            SecureError::invalid(InvalidReason::UnknownChannel)
        );
    }
}
