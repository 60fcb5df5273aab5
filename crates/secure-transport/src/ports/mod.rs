//! Ports: the contracts the secure transport needs from its environment.

pub mod outbound;

pub use outbound::{
    Authenticator, ChannelStore, InsertOutcome, ManualTimeSource, ReplayConflict,
    ReplayGuardStore, SecurityEventSink, SessionResolver, SystemTimeSource, TimeSource,
};
