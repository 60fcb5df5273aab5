//! Handshake wire types.

use serde::{Deserialize, Serialize};

/// Maximum device id length after trimming.
pub const MAX_DEVICE_ID_LENGTH: usize = 128;

/// Body of `POST /api/v1/security/channel/init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitChannelRequest {
    pub client_public_key: String,
    pub client_random: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Channel creation input, after authentication.
#[derive(Debug, Clone)]
pub struct InitChannel {
    pub user_id: String,
    pub access_token: Option<String>,
    pub client_public_key: String,
    pub client_random: String,
    pub device_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Handshake answer. Never carries raw or wrapped keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub channel_id: String,
    pub server_public_key: String,
    pub server_random: String,
    /// RFC 3339 with milliseconds, UTC
    pub expires_at: String,
    /// Server clock, epoch milliseconds
    pub server_time: u64,
    pub cipher_suite: String,
}
