//! Secure transport error types with HTTP status and stable error codes.
//!
//! Every rejection the pipeline produces is a [`SecureError`]. Crypto
//! failures are converted here so that no `CryptoError` reaches a handler.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared_crypto::CryptoError;
use std::fmt;

/// Stable error codes carried in the JSON error body
pub mod codes {
    pub const SECURE_CHANNEL_INVALID: &str = "SECURE_CHANNEL_INVALID";
    pub const SECURE_CHANNEL_EXPIRED: &str = "SECURE_CHANNEL_EXPIRED";
    pub const SECURE_TIMESTAMP_INVALID: &str = "SECURE_TIMESTAMP_INVALID";
    pub const SECURE_SIGNATURE_INVALID: &str = "SECURE_SIGNATURE_INVALID";
    pub const SECURE_REPLAY_DETECTED: &str = "SECURE_REPLAY_DETECTED";
    pub const SECURE_DECRYPT_FAILED: &str = "SECURE_DECRYPT_FAILED";
    pub const SECURE_KEY_UNWRAP_FAILED: &str = "SECURE_KEY_UNWRAP_FAILED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Why a request was classified `ChannelInvalid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Forced policy applies and the caller did not opt in
    SecureChannelRequired,
    /// multipart/form-data cannot carry an envelope
    MultipartUnsupported,
    /// Required `x-sec-*` header absent or empty
    MissingHeader(&'static str),
    /// Header longer than its bound
    HeaderTooLong(&'static str),
    /// `x-sec-kv` present but not `v1`
    UnsupportedProtocolVersion(String),
    /// No `{v, iv, ciphertext}` in body or query
    MissingEnvelope,
    /// Envelope present with `v != 1`
    UnsupportedEnvelopeVersion,
    /// No such channel, or channel not active
    UnknownChannel,
    /// Secure request body larger than the buffering limit
    BodyTooLarge(usize),
    /// Handshake input rejected
    Handshake(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecureChannelRequired => write!(
                f,
                "secure channel required: initialize a channel and send an encrypted request"
            ),
            Self::MultipartUnsupported => {
                write!(f, "multipart/form-data is not supported over the secure channel")
            }
            Self::MissingHeader(name) => write!(f, "missing secure header: {}", name),
            Self::HeaderTooLong(name) => write!(f, "secure header {} exceeds length limit", name),
            Self::UnsupportedProtocolVersion(v) => {
                write!(f, "unsupported secure protocol version: {}", v)
            }
            Self::MissingEnvelope => write!(f, "request is missing envelope fields (v/iv/ciphertext)"),
            Self::UnsupportedEnvelopeVersion => {
                write!(f, "unsupported envelope version, only v=1 is accepted")
            }
            Self::UnknownChannel => write!(f, "secure channel does not exist or is not active"),
            Self::BodyTooLarge(limit) => {
                write!(f, "secure request body exceeds {} bytes", limit)
            }
            Self::Handshake(detail) => write!(f, "invalid handshake: {}", detail),
        }
    }
}

/// Store-level failures (persistence is an external collaborator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A record with this id already exists
    #[error("duplicate record: {0}")]
    Duplicate(String),
    /// Backend unavailable or failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Request-path errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecureError {
    /// Malformed request, unknown channel, or policy violation
    #[error("{0}")]
    ChannelInvalid(InvalidReason),

    /// Channel lifetime elapsed
    #[error("secure channel has expired, initialize a new channel")]
    ChannelExpired,

    /// `x-sec-ts` is not numeric
    #[error("invalid request timestamp")]
    TimestampInvalid,

    /// `x-sec-ts` outside the clock-skew budget
    #[error("request timestamp outside allowed skew, synchronize the client clock")]
    ClockSkewExceeded {
        /// Configured budget in milliseconds
        clock_skew_ms: u64,
    },

    /// HMAC over the sign material did not verify
    #[error("secure channel signature verification failed")]
    SignatureInvalid,

    /// reqId or nonce already seen on this channel
    #[error("request replay detected and blocked")]
    ReplayDetected,

    /// Envelope could not be decrypted
    #[error("secure channel decryption failed")]
    DecryptFailed,

    /// Stored channel keys could not be unwrapped
    #[error("secure channel keys could not be recovered")]
    ChannelKeyUnwrapFailed,

    /// Bearer token missing or invalid
    #[error("unauthorized: {0}")]
    Unauthenticated(String),

    /// Transient persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Server-side fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl SecureError {
    /// Shorthand for `ChannelInvalid`.
    pub fn invalid(reason: InvalidReason) -> Self {
        Self::ChannelInvalid(reason)
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ChannelInvalid(InvalidReason::UnknownChannel) => StatusCode::UNAUTHORIZED,
            Self::ChannelInvalid(_) => StatusCode::BAD_REQUEST,
            Self::ChannelExpired => StatusCode::UNAUTHORIZED,
            Self::TimestampInvalid => StatusCode::BAD_REQUEST,
            Self::ClockSkewExceeded { .. } => StatusCode::UNAUTHORIZED,
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::ReplayDetected => StatusCode::CONFLICT,
            Self::DecryptFailed => StatusCode::BAD_REQUEST,
            Self::ChannelKeyUnwrapFailed => StatusCode::UNAUTHORIZED,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChannelInvalid(_) => codes::SECURE_CHANNEL_INVALID,
            Self::ChannelExpired => codes::SECURE_CHANNEL_EXPIRED,
            Self::TimestampInvalid | Self::ClockSkewExceeded { .. } => {
                codes::SECURE_TIMESTAMP_INVALID
            }
            Self::SignatureInvalid => codes::SECURE_SIGNATURE_INVALID,
            Self::ReplayDetected => codes::SECURE_REPLAY_DETECTED,
            Self::DecryptFailed => codes::SECURE_DECRYPT_FAILED,
            Self::ChannelKeyUnwrapFailed => codes::SECURE_KEY_UNWRAP_FAILED,
            Self::Unauthenticated(_) => codes::UNAUTHORIZED,
            Self::Store(_) => codes::SERVICE_UNAVAILABLE,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Optional structured detail for the error body.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::ClockSkewExceeded { clock_skew_ms } => {
                Some(serde_json::json!({ "clockSkewMs": clock_skew_ms }))
            }
            _ => None,
        }
    }

    /// Error body sent to the client.
    pub fn to_body(&self) -> ErrorBody {
        // Store and internal details stay in the logs.
        let message = match self {
            Self::Store(_) => "service temporarily unavailable".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code(),
                message,
                data: self.data(),
            },
        }
    }
}

impl From<CryptoError> for SecureError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidPublicKey | CryptoError::InvalidClientRandom { .. } => {
                SecureError::invalid(InvalidReason::Handshake(e.to_string()))
            }
            CryptoError::InvalidServerRandom { .. } => SecureError::Internal(e.to_string()),
            CryptoError::DecryptionFailed => SecureError::DecryptFailed,
            CryptoError::KeyUnwrapFailed => SecureError::ChannelKeyUnwrapFailed,
            CryptoError::InvalidKek(_)
            | CryptoError::InvalidKeyLength { .. }
            | CryptoError::EncryptionFailed(_) => SecureError::Internal(e.to_string()),
        }
    }
}

/// JSON error envelope: `{"success": false, "error": {...}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

/// Code, message and optional data.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IntoResponse for SecureError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.to_body())).into_response();
        if matches!(self, Self::Unauthenticated(_)) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Gateway-level errors (startup and serving, not request path)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Server terminated with an I/O error
    #[error("server error: {0}")]
    Serve(String),
}

impl From<crate::domain::config::ConfigError> for GatewayError {
    fn from(e: crate::domain::config::ConfigError) -> Self {
        GatewayError::Config(e.to_string())
    }
}
