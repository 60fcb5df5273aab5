//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
///
/// Variants never carry key material or plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Client public key is not a base64 SPKI-encoded P-256 point
    #[error("client public key must be base64(spki) on P-256")]
    InvalidPublicKey,

    /// Client random is not base64 of exactly 16 bytes
    #[error("client random must be base64 of {expected} bytes")]
    InvalidClientRandom {
        /// Required length in bytes
        expected: usize,
    },

    /// Server random in a handshake response is not base64 of exactly 16 bytes
    #[error("server random must be base64 of {expected} bytes")]
    InvalidServerRandom {
        /// Required length in bytes
        expected: usize,
    },

    /// Key-encryption-key is missing or malformed
    #[error("invalid key-encryption-key: {0}")]
    InvalidKek(String),

    /// Invalid key length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Envelope could not be decoded or authenticated
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Wrapped channel keys could not be recovered
    #[error("channel key unwrap failed")]
    KeyUnwrapFailed,
}
