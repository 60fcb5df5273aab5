//! Base64 helpers shared by the envelope and key-wrap formats.
//!
//! Standard alphabet with padding on output; decoding also accepts
//! unpadded input from clients that strip `=`.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Encode bytes as padded standard base64.
pub fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, padded or not. `None` on malformed input.
pub fn b64_decode(value: &str) -> Option<Vec<u8>> {
    let trimmed = value.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed.trim_end_matches('=')))
        .ok()
}
