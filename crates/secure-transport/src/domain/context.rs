//! Per-request secure context.

use super::entities::Timestamp;
use shared_crypto::ChannelKeys;

/// Validated channel state for one request.
///
/// Holds the unwrapped channel keys; they zeroize when the last reference is
/// dropped at the end of the request.
#[derive(Debug)]
pub struct RequestContext {
    pub channel_id: String,
    pub user_id: String,
    pub req_id: String,
    pub nonce: String,
    pub timestamp: Timestamp,
    pub keys: ChannelKeys,
}

/// Request metadata that goes into a [`RequestContext`].
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub req_id: String,
    pub nonce: String,
    pub timestamp: Timestamp,
}
