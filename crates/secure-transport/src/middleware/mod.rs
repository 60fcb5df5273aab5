//! Middleware stack for the secure gateway.
//!
//! Layer order: Request → Tracing → SecureTransport → Handler

pub mod secure_transport;
pub mod tracing;

pub use secure_transport::{encode_query, parse_query, SecureTransportLayer, SecureTransportService};
pub use tracing::{TracingLayer, TracingService};
