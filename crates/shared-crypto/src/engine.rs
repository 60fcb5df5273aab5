//! Crypto engine: the KEK-bound operations the transport layer calls.

use crate::ecdh::{self, DerivedChannelKeys};
use crate::envelope::{self, SignedEnvelope};
use crate::keys::ChannelKeys;
use crate::keywrap::{self, Kek, WrappedKeys};
use crate::symmetric::SecretKey;
use crate::{mac, CryptoError, CIPHER_SUITE};

/// Channel cryptography bound to one server KEK.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    kek: Kek,
}

impl CryptoEngine {
    /// Create an engine around `kek`.
    pub fn new(kek: Kek) -> Self {
        Self { kek }
    }

    /// Parse the KEK from base64 and build an engine.
    pub fn from_kek_base64(kek_base64: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(Kek::from_base64(kek_base64)?))
    }

    /// Negotiated cipher suite identity.
    pub fn cipher_suite(&self) -> &'static str {
        CIPHER_SUITE
    }

    /// Server side of the ECDH handshake.
    pub fn derive_channel_keys(
        &self,
        client_public_key: &str,
        client_random: &str,
    ) -> Result<DerivedChannelKeys, CryptoError> {
        ecdh::derive_channel_keys(client_public_key, client_random)
    }

    /// Seal keys for storage.
    pub fn wrap_channel_keys(&self, keys: &ChannelKeys) -> Result<WrappedKeys, CryptoError> {
        keywrap::wrap_channel_keys(&self.kek, keys)
    }

    /// Recover stored keys.
    pub fn unwrap_channel_keys(&self, wrapped: &WrappedKeys) -> Result<ChannelKeys, CryptoError> {
        keywrap::unwrap_channel_keys(&self.kek, wrapped)
    }

    /// Encrypt and sign a response payload.
    pub fn encrypt_envelope(
        &self,
        keys: &ChannelKeys,
        channel_id: &str,
        plaintext: &[u8],
    ) -> Result<SignedEnvelope, CryptoError> {
        envelope::encrypt_envelope(keys, channel_id, plaintext)
    }

    /// Decrypt a request payload.
    pub fn decrypt_envelope(
        &self,
        enc_key: &SecretKey,
        iv: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        envelope::decrypt_envelope(enc_key, iv, ciphertext)
    }

    /// Constant-time signature check.
    pub fn verify_signature(&self, mac_key: &SecretKey, material: &str, signature: &str) -> bool {
        mac::verify(mac_key, material, signature)
    }
}
