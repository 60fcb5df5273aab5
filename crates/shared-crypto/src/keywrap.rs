//! # Key Wrapping
//!
//! Channel keys are stored only in wrapped form: AES-256-GCM under a
//! server-wide key-encryption-key (KEK), with the JSON document
//! `{"encKey": b64, "macKey": b64}` as plaintext. Ciphertext, IV and tag
//! are stored as separate base64 strings.

use crate::encoding::{b64_decode, b64_encode};
use crate::keys::ChannelKeys;
use crate::symmetric::{self, Iv, SecretKey, KEY_LENGTH, TAG_LENGTH};
use crate::CryptoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Server-wide key-encryption-key.
#[derive(Clone)]
pub struct Kek(SecretKey);

impl Kek {
    /// Parse a KEK from base64. Must decode to exactly 32 bytes.
    pub fn from_base64(value: &str) -> Result<Self, CryptoError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::InvalidKek("missing".into()));
        }
        let bytes = Zeroizing::new(
            b64_decode(trimmed).ok_or_else(|| CryptoError::InvalidKek("not base64".into()))?,
        );
        if bytes.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKek(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        Ok(Self(SecretKey::from_slice(&bytes)?))
    }

    /// Wrap raw key bytes.
    pub fn from_key(key: SecretKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for Kek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Kek(<redacted>)")
    }
}

/// Channel keys sealed under the KEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeys {
    /// base64 ciphertext without tag
    pub cipher: String,
    /// base64 12-byte IV
    pub iv: String,
    /// base64 16-byte GCM tag
    pub tag: String,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct KeyDocument {
    enc_key: String,
    mac_key: String,
}

/// Seal a channel key pair under the KEK.
pub fn wrap_channel_keys(kek: &Kek, keys: &ChannelKeys) -> Result<WrappedKeys, CryptoError> {
    let document = KeyDocument {
        enc_key: b64_encode(keys.enc_key.as_bytes()),
        mac_key: b64_encode(keys.mac_key.as_bytes()),
    };
    let plaintext = Zeroizing::new(
        serde_json::to_vec(&document).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?,
    );

    let iv = Iv::generate();
    let mut sealed = symmetric::seal(&kek.0, &iv, &plaintext)?;
    let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

    Ok(WrappedKeys {
        cipher: b64_encode(&sealed),
        iv: b64_encode(iv.as_bytes()),
        tag: b64_encode(&tag),
    })
}

/// Recover a channel key pair.
///
/// # Errors
///
/// `KeyUnwrapFailed` for any malformed field, authentication failure, or a
/// decrypted key that is not 32 bytes.
pub fn unwrap_channel_keys(kek: &Kek, wrapped: &WrappedKeys) -> Result<ChannelKeys, CryptoError> {
    let cipher = b64_decode(&wrapped.cipher).ok_or(CryptoError::KeyUnwrapFailed)?;
    let iv = b64_decode(&wrapped.iv)
        .and_then(|bytes| Iv::from_slice(&bytes))
        .ok_or(CryptoError::KeyUnwrapFailed)?;
    let tag = b64_decode(&wrapped.tag).ok_or(CryptoError::KeyUnwrapFailed)?;
    if tag.len() != TAG_LENGTH {
        return Err(CryptoError::KeyUnwrapFailed);
    }

    let mut sealed = cipher;
    sealed.extend_from_slice(&tag);

    let plaintext = Zeroizing::new(
        symmetric::open(&kek.0, &iv, &sealed).map_err(|_| CryptoError::KeyUnwrapFailed)?,
    );
    let document: KeyDocument =
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::KeyUnwrapFailed)?;

    Ok(ChannelKeys::new(
        decode_key(&document.enc_key)?,
        decode_key(&document.mac_key)?,
    ))
}

fn decode_key(value: &str) -> Result<SecretKey, CryptoError> {
    let bytes = Zeroizing::new(b64_decode(value).ok_or(CryptoError::KeyUnwrapFailed)?);
    SecretKey::from_slice(&bytes).map_err(|_| CryptoError::KeyUnwrapFailed)
}
