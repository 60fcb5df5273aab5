//! Channel key pair.

use crate::symmetric::SecretKey;
use std::fmt;

/// The encryption and MAC keys of one channel.
///
/// Both halves zeroize on drop. `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    /// AES-256-GCM key for envelope payloads.
    pub enc_key: SecretKey,
    /// HMAC-SHA256 key for sign material.
    pub mac_key: SecretKey,
}

impl ChannelKeys {
    /// Pair two keys.
    pub fn new(enc_key: SecretKey, mac_key: SecretKey) -> Self {
        Self { enc_key, mac_key }
    }

    /// Random key pair. Useful for tests and for fixtures.
    pub fn generate() -> Self {
        Self::new(SecretKey::generate(), SecretKey::generate())
    }
}

impl fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelKeys")
            .field("enc_key", &"<redacted>")
            .field("mac_key", &"<redacted>")
            .finish()
    }
}
