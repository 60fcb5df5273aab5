//! # Shared Crypto - Channel Cryptography
//!
//! Primitives for the application-layer secure channel. Pure functions, no
//! I/O.
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `ecdh` | P-256 ECDH + HKDF-SHA256 | Channel key agreement |
//! | `symmetric` | AES-256-GCM | Payload encryption |
//! | `mac` | HMAC-SHA256 | Request/response signatures |
//! | `keywrap` | AES-256-GCM under KEK | Keys at rest |
//! | `envelope` | - | Envelope format and sign material |
//!
//! ## Security Properties
//!
//! - Fresh 96-bit IV for every seal
//! - Signature comparison is constant-time
//! - Key types zeroize on drop and never print their bytes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdh;
pub mod encoding;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod keys;
pub mod keywrap;
pub mod mac;
pub mod symmetric;

// Re-exports
pub use ecdh::{derive_channel_keys, ClientHandshake, DerivedChannelKeys, CHANNEL_RANDOM_LENGTH};
pub use encoding::{b64_decode, b64_encode};
pub use engine::CryptoEngine;
pub use envelope::{
    decrypt_envelope, encrypt_envelope, request_sign_material, response_sign_material,
    seal_envelope, Envelope, SignedEnvelope, ENVELOPE_VERSION,
};
pub use errors::CryptoError;
pub use keys::ChannelKeys;
pub use keywrap::{unwrap_channel_keys, wrap_channel_keys, Kek, WrappedKeys};
pub use mac::{sign, verify as verify_signature};
pub use symmetric::{Iv, SecretKey};

/// Cipher suite identity reported by the handshake.
pub const CIPHER_SUITE: &str = "ECDH_P256+HKDF_SHA256+AES_256_GCM+HMAC_SHA256";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
