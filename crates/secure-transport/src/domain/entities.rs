//! Persisted records owned by the secure transport.

use serde::{Deserialize, Serialize};
use shared_crypto::WrappedKeys;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Channel lifecycle state. `Expired` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Active,
    Expired,
    Closed,
}

impl ChannelStatus {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ChannelStatus) -> bool {
        matches!(
            (self, next),
            (ChannelStatus::Active, ChannelStatus::Expired)
                | (ChannelStatus::Active, ChannelStatus::Closed)
        )
    }
}

/// One negotiated session.
///
/// Only wrapped keys are stored; raw keys are rebuilt per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureChannel {
    pub channel_id: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub wrapped_keys: WrappedKeys,
    pub device_id: Option<String>,
    pub status: ChannelStatus,
    pub expires_at: Timestamp,
    pub last_activity_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SecureChannel {
    /// Lifetime has elapsed at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// One accepted request, unique per (channel, req_id) and per (channel, nonce).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayGuardRecord {
    pub channel_id: String,
    pub req_id: String,
    pub nonce: String,
    pub expire_at: Timestamp,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use ChannelStatus::*;
        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Closed));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChannelStatus::Expired).unwrap(),
            "\"expired\""
        );
    }
}
