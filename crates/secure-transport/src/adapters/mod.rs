//! Adapters implementing the outbound ports.
//!
//! In-memory stores suit a single-process deployment and tests; a database
//! backend implements the same traits with unique constraints.

pub mod events;
pub mod identity;
pub mod memory;

pub use events::{AuditRecorder, MemoryEventSink, QueuedEventSink, TracingEventSink};
pub use identity::{NoSessionResolver, StaticAuthenticator};
pub use memory::{InMemoryChannelStore, InMemoryReplayStore};
