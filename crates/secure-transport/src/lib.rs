// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Secure Transport - per-session encrypted, signed and replay-protected
//! request/response channel for axum services.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       SECURE GATEWAY                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  POST /api/v1/security/channel/init      business routes          │
//! │        (ECDH handshake)                        │                  │
//! │               │                ┌───────────────┴──────────────┐   │
//! │               │                │   SecureTransportLayer        │   │
//! │               │                │ headers → ts → envelope →     │   │
//! │               │                │ channel → sig → replay →      │   │
//! │               │                │ decrypt → rewrite             │   │
//! │               │                └───────────────┬──────────────┘   │
//! │        ┌──────┴─────────┐              ┌───────┴───────┐          │
//! │        │ ChannelService │──────────────│  ReplayGuard  │          │
//! │        └──────┬─────────┘              └───────┬───────┘          │
//! └───────────────┼────────────────────────────────┼──────────────────┘
//!                 ▼                                ▼
//!           ChannelStore                    ReplayGuardStore
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use secure_transport::{GatewayDeps, SecureConfig, SecureGatewayService, StaticAuthenticator};
//!
//! let config = SecureConfig::from_env();
//! let deps = GatewayDeps::in_memory(Arc::new(StaticAuthenticator::from_list("token:user")));
//! let service = SecureGatewayService::new(config, deps)?;
//! service.serve(addr, app_router, shutdown).await?;
//! ```
//!
//! Handlers behind the layer read the channel context through
//! `Extension<Arc<RequestContext>>`.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod channel;
pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod ports;
pub mod replay;
pub mod service;

// Re-exports for public API
pub use adapters::{
    AuditRecorder, InMemoryChannelStore, InMemoryReplayStore, MemoryEventSink, NoSessionResolver,
    QueuedEventSink, StaticAuthenticator, TracingEventSink,
};
pub use channel::{purge_task, ChannelService, TOUCH_INTERVAL};
pub use domain::error::codes;
pub use domain::*;
pub use handlers::{bearer_token, handshake_router, HandshakeState, INIT_CHANNEL_PATH};
pub use middleware::{SecureTransportLayer, TracingLayer};
pub use pipeline::{InboundRequest, Outcome, TransportPipeline};
pub use ports::*;
pub use replay::{ReplayGuard, SWEEP_INTERVAL};
pub use service::{GatewayDeps, SecureGatewayService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
