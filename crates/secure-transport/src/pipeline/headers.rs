//! Secure header extraction and timestamp checks.

use crate::domain::{InvalidReason, SecureError, Timestamp};
use axum::http::HeaderMap;

pub const HEADER_ENABLED: &str = "x-sec-enabled";
pub const HEADER_CHANNEL_ID: &str = "x-sec-channel-id";
pub const HEADER_REQ_ID: &str = "x-sec-req-id";
pub const HEADER_NONCE: &str = "x-sec-nonce";
pub const HEADER_TS: &str = "x-sec-ts";
pub const HEADER_SIG: &str = "x-sec-sig";
pub const HEADER_KEY_VERSION: &str = "x-sec-kv";

/// Only accepted `x-sec-kv` value.
pub const KEY_VERSION: &str = "v1";

const MAX_CHANNEL_ID_LENGTH: usize = 64;
const MAX_REQ_ID_LENGTH: usize = 128;
const MAX_NONCE_LENGTH: usize = 128;
const MAX_TS_LENGTH: usize = 20;
const MAX_SIG_LENGTH: usize = 1024;

/// The `x-sec-*` headers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureHeaders {
    pub channel_id: String,
    pub req_id: String,
    pub nonce: String,
    /// Raw timestamp text, signed as sent
    pub ts_raw: String,
    pub signature: String,
}

/// Whether the client asked for secure mode.
pub fn secure_requested(headers: &HeaderMap) -> bool {
    header_str(headers, HEADER_ENABLED).as_deref() == Some("1")
}

impl SecureHeaders {
    /// Read and bound-check the secure headers.
    pub fn extract(headers: &HeaderMap) -> Result<Self, SecureError> {
        let parsed = Self {
            channel_id: required(headers, HEADER_CHANNEL_ID, MAX_CHANNEL_ID_LENGTH)?,
            req_id: required(headers, HEADER_REQ_ID, MAX_REQ_ID_LENGTH)?,
            nonce: required(headers, HEADER_NONCE, MAX_NONCE_LENGTH)?,
            ts_raw: required(headers, HEADER_TS, MAX_TS_LENGTH)?,
            signature: required(headers, HEADER_SIG, MAX_SIG_LENGTH)?,
        };

        if let Some(version) = header_str(headers, HEADER_KEY_VERSION) {
            if version != KEY_VERSION {
                return Err(SecureError::invalid(
                    InvalidReason::UnsupportedProtocolVersion(version),
                ));
            }
        }

        Ok(parsed)
    }
}

/// Parse `x-sec-ts` as epoch milliseconds.
///
/// Integers are taken as-is; finite decimals are truncated toward zero.
pub fn parse_timestamp(raw: &str) -> Result<i64, SecureError> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    match raw.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms.abs() < i64::MAX as f64 => Ok(ms.trunc() as i64),
        _ => Err(SecureError::TimestampInvalid),
    }
}

/// Reject timestamps further than `clock_skew_ms` from `now`.
pub fn check_clock_skew(ts: i64, now: Timestamp, clock_skew_ms: u64) -> Result<(), SecureError> {
    let skew = (i128::from(now) - i128::from(ts)).unsigned_abs();
    if skew > u128::from(clock_skew_ms) {
        return Err(SecureError::ClockSkewExceeded { clock_skew_ms });
    }
    Ok(())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(
    headers: &HeaderMap,
    name: &'static str,
    max_len: usize,
) -> Result<String, SecureError> {
    let value = header_str(headers, name)
        .ok_or(SecureError::invalid(InvalidReason::MissingHeader(name)))?;
    if value.len() > max_len {
        return Err(SecureError::invalid(InvalidReason::HeaderTooLong(name)));
    }
    Ok(value)
}
