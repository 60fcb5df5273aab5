//! Security audit events.

use super::entities::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event kinds emitted by the secure transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    SecureChannelInit,
    SecureSignatureInvalid,
    SecureReplayBlocked,
    SecureDecryptFailed,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecureChannelInit => "SECURE_CHANNEL_INIT",
            Self::SecureSignatureInvalid => "SECURE_SIGNATURE_INVALID",
            Self::SecureReplayBlocked => "SECURE_REPLAY_BLOCKED",
            Self::SecureDecryptFailed => "SECURE_DECRYPT_FAILED",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub threat_level: Option<Severity>,
    pub blocked: bool,
    pub occurred_at: Timestamp,
}

impl SecurityEvent {
    /// New event with an unknown client address and empty details.
    pub fn new(event_type: SecurityEventType, severity: Severity, occurred_at: Timestamp) -> Self {
        Self {
            event_type,
            severity,
            user_id: None,
            ip_address: "0.0.0.0".to_string(),
            user_agent: None,
            details: serde_json::Value::Object(Default::default()),
            threat_level: None,
            blocked: false,
            occurred_at,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Client address and agent; `None` keeps the defaults.
    pub fn client(mut self, ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        if let Some(ip) = ip_address {
            self.ip_address = ip.to_string();
        }
        self.user_agent = user_agent.map(String::from);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Mark as a blocked threat of the given level.
    pub fn blocked_threat(mut self, level: Severity) -> Self {
        self.threat_level = Some(level);
        self.blocked = true;
        self
    }
}
