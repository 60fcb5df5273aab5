//! Handshake plus secure requests through the full axum stack.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::*;
use secure_transport::{ChannelStore, SecureConfig, SecurityEventType};
use shared_crypto::b64_encode;
use serde_json::json;

#[tokio::test]
async fn handshake_requires_bearer_token() {
    let gateway = TestGateway::new(enabled_config());
    let body = json!({"clientPublicKey": "pk", "clientRandom": "rnd"});

    let (status, response) = gateway.send_json(handshake_request(None, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["code"], "UNAUTHORIZED");

    let (status, _) = gateway
        .send_json(handshake_request(Some("wrong-token"), &body))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn handshake_rejects_bad_input() {
    let gateway = TestGateway::new(enabled_config());

    let (status, response) = gateway
        .send_json(handshake_request(
            Some(TOKEN),
            &json!({"clientPublicKey": "not-a-key", "clientRandom": "AAAAAAAAAAAAAAAAAAAAAA=="}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_CHANNEL_INVALID");

    let (status, _) = gateway
        .send_json(handshake_request(
            Some(TOKEN),
            &json!({"clientPublicKey": "", "clientRandom": "x"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(gateway.channel_store.len(), 0);
}

#[tokio::test]
async fn handshake_response_shape() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    assert!(client.channel_id.starts_with("sch_"));
    assert_eq!(gateway.channel_store.len(), 1);
    assert_eq!(
        gateway
            .events
            .count_of(SecurityEventType::SecureChannelInit),
        1
    );
}

#[tokio::test]
async fn secure_post_is_decrypted_and_response_encrypted() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let (status, response) = gateway
        .send_json(client.post("/api/v1/docs", "req-1", "nonce-1", &json!({"title": "hello"})))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Response is an envelope, not the handler output
    assert_eq!(response["v"], 1);
    assert!(response.get("body").is_none());

    let opened = client.open(&response);
    assert_eq!(opened["body"], json!({"title": "hello"}));
    assert_eq!(opened["user"], USER);
}

#[tokio::test]
async fn split_payload_sets_body_and_query() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let payload = json!({"body": {"title": "t"}, "query": {"page": "2"}});
    let (status, response) = gateway
        .send_json(client.post("/api/v1/docs", "req-1", "nonce-1", &payload))
        .await;
    assert_eq!(status, StatusCode::OK);

    let opened = client.open(&response);
    assert_eq!(opened["body"], json!({"title": "t"}));
    assert_eq!(opened["query"], json!({"page": "2"}));
}

#[tokio::test]
async fn envelope_in_query_string() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let envelope = client.seal(&json!({"q": "rust", "page": "3"}));
    let request = client.request_with(
        Method::GET,
        "/api/v1/docs",
        "req-1",
        "nonce-1",
        &client.ts.to_string(),
        &envelope,
        Carrier::Query,
    );

    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::OK);

    let opened = client.open(&response);
    assert_eq!(opened["query"], json!({"q": "rust", "page": "3"}));
}

#[tokio::test]
async fn replays_are_rejected() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;
    let payload = json!({"n": 1});

    let envelope = client.seal(&payload);
    let ts = client.ts.to_string();
    let build = |req_id: &str, nonce: &str| {
        client.request_with(
            Method::POST,
            "/api/v1/docs",
            req_id,
            nonce,
            &ts,
            &envelope,
            Carrier::Body,
        )
    };

    let (status, _) = gateway.send(build("req-1", "nonce-1")).await;
    assert_eq!(status, StatusCode::OK);

    // Byte-for-byte replay
    let (status, response) = gateway.send_json(build("req-1", "nonce-1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["error"]["code"], "SECURE_REPLAY_DETECTED");

    // Same request id, fresh nonce
    let (status, _) = gateway.send(build("req-1", "nonce-2")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Fresh request id, reused nonce
    let (status, _) = gateway.send(build("req-2", "nonce-1")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = gateway.send(build("req-3", "nonce-3")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(
        gateway
            .events
            .count_of(SecurityEventType::SecureReplayBlocked),
        3
    );
}

#[tokio::test]
async fn tampered_request_is_rejected() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let mut request = client.post("/api/v1/docs", "req-1", "nonce-1", &json!({"a": 1}));
    request
        .headers_mut()
        .insert("x-sec-nonce", "nonce-forged".parse().unwrap());

    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["code"], "SECURE_SIGNATURE_INVALID");
    assert_eq!(
        gateway
            .events
            .count_of(SecurityEventType::SecureSignatureInvalid),
        1
    );
    assert!(gateway.replay_store.is_empty());
}

#[tokio::test]
async fn undecryptable_payload_is_rejected() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    // Sealed under a different key, but correctly signed
    let other = shared_crypto::ChannelKeys::generate();
    let envelope = shared_crypto::seal_envelope(&other.enc_key, b"{}").unwrap();
    let request = client.request_with(
        Method::POST,
        "/api/v1/docs",
        "req-1",
        "nonce-1",
        &client.ts.to_string(),
        &envelope,
        Carrier::Body,
    );

    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_DECRYPT_FAILED");
    assert_eq!(
        gateway
            .events
            .count_of(SecurityEventType::SecureDecryptFailed),
        1
    );
}

#[tokio::test]
async fn missing_envelope_and_headers() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let mut request = client.post("/api/v1/docs", "req-1", "nonce-1", &json!({}));
    request.headers_mut().remove("x-sec-sig");
    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_CHANNEL_INVALID");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/docs")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-sec-enabled", "1")
        .header("x-sec-channel-id", &client.channel_id)
        .header("x-sec-req-id", "req-2")
        .header("x-sec-nonce", "nonce-2")
        .header("x-sec-ts", client.ts.to_string())
        .header("x-sec-sig", "c2ln")
        .body(Body::from(r#"{"title":"plain"}"#))
        .unwrap();
    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_CHANNEL_INVALID");
}

#[tokio::test]
async fn error_and_non_json_responses_pass_unencrypted() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let (status, response) = gateway
        .send_json(client.post("/api/v1/missing", "req-1", "nonce-1", &json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response, json!({"success": false}));

    let envelope = client.seal(&json!({}));
    let request = client.request_with(
        Method::GET,
        "/api/v1/text",
        "req-2",
        "nonce-2",
        &client.ts.to_string(),
        &envelope,
        Carrier::Query,
    );
    let (status, response) = gateway.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"plain text");
}

#[tokio::test]
async fn forced_mode_requires_secure_requests() {
    let gateway = TestGateway::new(SecureConfig {
        force: true,
        ..enabled_config()
    });

    let plain = |uri: &str| {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"title":"plain"}"#))
            .unwrap()
    };

    let (status, response) = gateway.send_json(plain("/api/v1/docs")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_CHANNEL_INVALID");

    // Open paths stay reachable
    let (status, response) = gateway.send_json(plain("/api/v1/auth/login")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["token"], "issued");

    // Handshake is an open path
    let client = SecureClient::connect(&gateway).await;
    let (status, _) = gateway
        .send(client.post("/api/v1/docs", "req-1", "nonce-1", &json!({"title": "x"})))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn disabled_gateway_passes_everything_through() {
    let gateway = TestGateway::new(SecureConfig {
        force: true,
        ..SecureConfig::default()
    });

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/docs?page=1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"title":"plain"}"#))
        .unwrap();
    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["body"], json!({"title": "plain"}));
    assert_eq!(response["query"], json!({"page": "1"}));
    assert!(response["user"].is_null());
}

#[tokio::test]
async fn large_json_response_is_encrypted() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;
    assert!(EXPORT_BYTES > gateway.service.config().max_body_bytes);

    let (status, response) = gateway
        .send_json(client.post("/api/v1/export", "req-1", "nonce-1", &json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.get("data").is_none());

    let opened = client.open(&response);
    assert_eq!(opened["data"].as_str().map(str::len), Some(EXPORT_BYTES));
}

#[tokio::test]
async fn unsupported_key_version_is_rejected() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let mut request = client.post("/api/v1/docs", "req-1", "nonce-1", &json!({}));
    request
        .headers_mut()
        .insert("x-sec-kv", "v2".parse().unwrap());

    let (status, response) = gateway.send_json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "SECURE_CHANNEL_INVALID");
    assert!(gateway.replay_store.is_empty());
}

#[tokio::test]
async fn corrupted_wrapped_keys_fail_unwrap() {
    let gateway = TestGateway::new(enabled_config());
    let client = SecureClient::connect(&gateway).await;

    let mut channel = gateway
        .channel_store
        .get(&client.channel_id)
        .await
        .unwrap()
        .unwrap();
    channel.channel_id = "sch_corrupted".to_string();
    channel.wrapped_keys.tag = b64_encode([0u8; 16]);
    gateway.channel_store.create(channel).await.unwrap();

    let corrupted = SecureClient {
        channel_id: "sch_corrupted".to_string(),
        keys: client.keys.clone(),
        ts: client.ts,
    };
    let (status, response) = gateway
        .send_json(corrupted.post("/api/v1/docs", "req-1", "nonce-1", &json!({"a": 1})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["code"], "SECURE_KEY_UNWRAP_FAILED");
    assert!(gateway.replay_store.is_empty());

    // The intact channel keeps working
    let (status, _) = gateway
        .send(client.post("/api/v1/docs", "req-2", "nonce-2", &json!({"a": 1})))
        .await;
    assert_eq!(status, StatusCode::OK);
}
