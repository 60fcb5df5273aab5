//! # Secure Node
//!
//! Runs the secure gateway over a demo document API.
//!
//! ## Environment
//!
//! - `SECURE_*` - see `SecureConfig::from_env`
//! - `SECURE_BIND_ADDR` - listen address (default `0.0.0.0:3000`)
//! - `SECURE_DEMO_TOKENS` - `token:user[:session],...` bearer tokens accepted
//!   by the handshake
//! - `SECURE_AUDIT_QUEUE` - security event queue capacity (default 1024)
//! - `RUST_LOG` - log filter (default `info`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::Query,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use secure_transport::{
    GatewayDeps, QueuedEventSink, RequestContext, SecureConfig, SecureGatewayService,
    StaticAuthenticator, TracingEventSink,
};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_AUDIT_QUEUE: usize = 1024;
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct NodeSettings {
    bind_addr: SocketAddr,
    demo_tokens: String,
    audit_queue: usize,
}

fn load_settings() -> Result<NodeSettings> {
    let bind_addr = std::env::var("SECURE_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .context("SECURE_BIND_ADDR must be host:port")?;

    let audit_queue = std::env::var("SECURE_AUDIT_QUEUE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_AUDIT_QUEUE);

    Ok(NodeSettings {
        bind_addr,
        demo_tokens: std::env::var("SECURE_DEMO_TOKENS").unwrap_or_default(),
        audit_queue,
    })
}

/// Demo document API served behind the secure layer.
fn app() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/api/v1/docs", post(create_doc).get(list_docs))
}

async fn create_doc(
    context: Option<Extension<Arc<RequestContext>>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "document": body,
            "secure": context.is_some(),
            "owner": context.map(|Extension(ctx)| ctx.user_id.clone()),
        }
    }))
}

async fn list_docs(
    context: Option<Extension<Arc<RequestContext>>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "items": [],
            "query": query,
            "secure": context.is_some(),
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = secure_transport::VERSION, "Starting secure node");

    let settings = load_settings()?;
    let config = SecureConfig::from_env();
    info!(config = ?config, "Loaded secure transport configuration");

    let authenticator = StaticAuthenticator::from_list(&settings.demo_tokens);
    if authenticator.is_empty() {
        warn!("SECURE_DEMO_TOKENS is empty, every handshake will be rejected");
    }
    let authenticator = Arc::new(authenticator);

    let (events, audit_task) =
        QueuedEventSink::spawn(Arc::new(TracingEventSink), settings.audit_queue);

    let deps = GatewayDeps {
        sessions: authenticator.clone(),
        events: Arc::new(events),
        ..GatewayDeps::in_memory(authenticator)
    };

    let service =
        SecureGatewayService::new(config, deps).context("invalid secure transport configuration")?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    };

    service
        .serve(settings.bind_addr, app(), shutdown)
        .await
        .context("secure gateway failed")?;

    // Queue drains once the last sink clone is dropped
    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Audit task ended abnormally"),
        Err(_) => warn!("Timed out draining security events"),
    }

    info!("Secure node stopped");
    Ok(())
}
