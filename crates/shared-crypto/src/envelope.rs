//! # Envelope Codec
//!
//! Versioned AEAD envelopes and the canonical strings their signatures
//! cover.
//!
//! ## Wire Format
//!
//! ```text
//! request:  {"v":1,"iv":"<b64 12B>","ciphertext":"<b64 encrypted||tag>"}
//! response: {"v":1,"iv":"…","ciphertext":"…","sig":"<b64 HMAC>"}
//! ```
//!
//! ## Sign Material
//!
//! ```text
//! request:  METHOD \n PATH \n REQ_ID \n NONCE \n TS \n IV \n CIPHERTEXT
//! response: CHANNEL_ID \n IV \n CIPHERTEXT
//! ```

use crate::encoding::{b64_decode, b64_encode};
use crate::keys::ChannelKeys;
use crate::mac;
use crate::symmetric::{self, Iv, SecretKey};
use crate::CryptoError;
use serde::{Deserialize, Serialize};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Unsigned envelope, as carried by requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version
    pub v: u8,
    /// base64 IV
    pub iv: String,
    /// base64 of `encrypted || tag`
    pub ciphertext: String,
}

/// Signed envelope, as carried by responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Format version
    pub v: u8,
    /// base64 IV
    pub iv: String,
    /// base64 of `encrypted || tag`
    pub ciphertext: String,
    /// base64 HMAC over the response sign material
    pub sig: String,
}

/// Canonical request sign material. `method` is upper-cased here; `path`
/// must already be normalized.
pub fn request_sign_material(
    method: &str,
    path: &str,
    req_id: &str,
    nonce: &str,
    timestamp: &str,
    iv: &str,
    ciphertext: &str,
) -> String {
    [
        method.to_ascii_uppercase().as_str(),
        path,
        req_id,
        nonce,
        timestamp,
        iv,
        ciphertext,
    ]
    .join("\n")
}

/// Canonical response sign material.
pub fn response_sign_material(channel_id: &str, iv: &str, ciphertext: &str) -> String {
    [channel_id, iv, ciphertext].join("\n")
}

/// Encrypt `plaintext` under a fresh IV.
pub fn seal_envelope(enc_key: &SecretKey, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    let iv = Iv::generate();
    let sealed = symmetric::seal(enc_key, &iv, plaintext)?;

    Ok(Envelope {
        v: ENVELOPE_VERSION,
        iv: b64_encode(iv.as_bytes()),
        ciphertext: b64_encode(sealed),
    })
}

/// Encrypt and sign a response payload for `channel_id`.
pub fn encrypt_envelope(
    keys: &ChannelKeys,
    channel_id: &str,
    plaintext: &[u8],
) -> Result<SignedEnvelope, CryptoError> {
    let Envelope { v, iv, ciphertext } = seal_envelope(&keys.enc_key, plaintext)?;
    let sig = mac::sign(
        &keys.mac_key,
        &response_sign_material(channel_id, &iv, &ciphertext),
    );

    Ok(SignedEnvelope {
        v,
        iv,
        ciphertext,
        sig,
    })
}

/// Decrypt an envelope payload.
///
/// # Errors
///
/// `DecryptionFailed` on bad base64, an IV that is not 12 bytes, a
/// ciphertext not longer than the tag, or authentication failure.
pub fn decrypt_envelope(
    enc_key: &SecretKey,
    iv: &str,
    ciphertext: &str,
) -> Result<Vec<u8>, CryptoError> {
    let iv = b64_decode(iv)
        .and_then(|bytes| Iv::from_slice(&bytes))
        .ok_or(CryptoError::DecryptionFailed)?;
    let sealed = b64_decode(ciphertext).ok_or(CryptoError::DecryptionFailed)?;

    symmetric::open(enc_key, &iv, &sealed)
}
