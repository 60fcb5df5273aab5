//! # HMAC-SHA256 Signing
//!
//! Signs canonical sign-material strings with a channel MAC key.
//! Signatures travel base64-encoded.

use crate::encoding::{b64_decode, b64_encode};
use crate::symmetric::SecretKey;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output length in bytes.
pub const MAC_LENGTH: usize = 32;

/// Compute the raw HMAC-SHA256 tag of `material`.
pub fn hmac_sha256(mac_key: &SecretKey, material: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(material);
    mac.finalize().into_bytes().into()
}

/// Sign `material`, returning the base64 signature.
pub fn sign(mac_key: &SecretKey, material: &str) -> String {
    b64_encode(hmac_sha256(mac_key, material.as_bytes()))
}

/// Verify a base64 signature over `material`.
///
/// Returns `false` on decode failure or length mismatch; never panics.
/// The byte comparison is constant-time.
pub fn verify(mac_key: &SecretKey, material: &str, signature: &str) -> bool {
    let Some(received) = b64_decode(signature) else {
        return false;
    };

    if received.len() != MAC_LENGTH {
        return false;
    }

    let expected = hmac_sha256(mac_key, material.as_bytes());
    expected.as_slice().ct_eq(received.as_slice()).into()
}
