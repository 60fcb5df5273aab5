//! Domain types for the secure transport.
//!
//! Configuration, errors, persisted records, per-request context and audit
//! events. No I/O.

pub mod config;
pub mod context;
pub mod entities;
pub mod error;
pub mod events;
pub mod path;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, SecureConfig};
pub use context::{RequestContext, RequestMeta};
pub use entities::{ChannelStatus, ReplayGuardRecord, SecureChannel, Timestamp};
pub use error::{ErrorBody, GatewayError, InvalidReason, SecureError, StoreError};
pub use events::{SecurityEvent, SecurityEventType, Severity};
pub use path::{normalize_path, OpenPaths, PathPattern};
pub use types::{HandshakeResponse, InitChannel, InitChannelRequest};
