//! Secure transport configuration with validation.
//!
//! Values come from `SECURE_*` environment variables. Unparseable values keep
//! the default; numeric values below their floor are raised to the floor.

use serde::{Deserialize, Serialize};
use shared_crypto::Kek;
use std::fmt;
use std::time::Duration;

/// Channel lifetime default, seconds.
pub const DEFAULT_CHANNEL_TTL_SECS: u64 = 1800;
/// Channel lifetime floor, seconds.
pub const MIN_CHANNEL_TTL_SECS: u64 = 60;
/// Clock-skew budget default, milliseconds.
pub const DEFAULT_CLOCK_SKEW_MS: u64 = 60_000;
/// Clock-skew budget floor, milliseconds.
pub const MIN_CLOCK_SKEW_MS: u64 = 1_000;
/// Replay record lifetime default, seconds.
pub const DEFAULT_REPLAY_TTL_SECS: u64 = 120;
/// Replay record lifetime floor, seconds.
pub const MIN_REPLAY_TTL_SECS: u64 = 10;

/// Paths exempt from forced secure mode.
pub const DEFAULT_OPEN_PATHS: &[&str] = &[
    "/api/v1/auth/login",
    "/api/v1/auth/register",
    "/api/v1/auth/refresh",
    "/api/v1/security/channel/init",
    "/api/v1/assets/upload",
    "/api/v1/assets/:assetId/file",
];

/// Secure transport configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureConfig {
    /// Master switch; when false every request bypasses the pipeline
    pub enabled: bool,
    /// Require secure mode for every path under `forced_prefix`
    pub force: bool,
    /// Channel lifetime in seconds
    pub channel_ttl_secs: u64,
    /// Maximum |now - x-sec-ts| in milliseconds
    pub clock_skew_ms: u64,
    /// Replay record lifetime in seconds
    pub replay_ttl_secs: u64,
    /// Key-encryption-key, base64 of 32 bytes
    pub kek_base64: String,
    /// Open-path patterns (`:param` matches one segment)
    pub open_paths: Vec<String>,
    /// Prefix that forced mode applies to
    pub forced_prefix: String,
    /// Largest request or response body the middleware will buffer
    pub max_body_bytes: usize,
    /// Interval between expired-channel purges, seconds
    pub purge_interval_secs: u64,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force: false,
            channel_ttl_secs: DEFAULT_CHANNEL_TTL_SECS,
            clock_skew_ms: DEFAULT_CLOCK_SKEW_MS,
            replay_ttl_secs: DEFAULT_REPLAY_TTL_SECS,
            kek_base64: String::new(),
            open_paths: DEFAULT_OPEN_PATHS.iter().map(|p| p.to_string()).collect(),
            forced_prefix: "/api/".to_string(),
            max_body_bytes: 1024 * 1024,
            purge_interval_secs: 300,
        }
    }
}

impl fmt::Debug for SecureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConfig")
            .field("enabled", &self.enabled)
            .field("force", &self.force)
            .field("channel_ttl_secs", &self.channel_ttl_secs)
            .field("clock_skew_ms", &self.clock_skew_ms)
            .field("replay_ttl_secs", &self.replay_ttl_secs)
            .field("kek_base64", &"<redacted>")
            .field("open_paths", &self.open_paths)
            .field("forced_prefix", &self.forced_prefix)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("purge_interval_secs", &self.purge_interval_secs)
            .finish()
    }
}

impl SecureConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Missing keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("SECURE_CHANNEL_ENABLED").and_then(|v| parse_bool(&v)) {
            config.enabled = v;
        }
        if let Some(v) = lookup("SECURE_CHANNEL_FORCE").and_then(|v| parse_bool(&v)) {
            config.force = v;
        }
        if let Some(v) = lookup("SECURE_CHANNEL_TTL_SECONDS").and_then(|v| parse_int(&v)) {
            config.channel_ttl_secs = v;
        }
        if let Some(v) = lookup("SECURE_CLOCK_SKEW_MS").and_then(|v| parse_int(&v)) {
            config.clock_skew_ms = v;
        }
        if let Some(v) = lookup("SECURE_REPLAY_TTL_SECONDS").and_then(|v| parse_int(&v)) {
            config.replay_ttl_secs = v;
        }
        if let Some(v) = lookup("SECURE_KEK_BASE64") {
            config.kek_base64 = v.trim().to_string();
        }
        if let Some(v) = lookup("SECURE_OPEN_PATHS") {
            let paths: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if !paths.is_empty() {
                config.open_paths = paths;
            }
        }

        config.apply_floors();
        config
    }

    /// Raise numeric settings to their floors.
    pub fn apply_floors(&mut self) {
        self.channel_ttl_secs = self.channel_ttl_secs.max(MIN_CHANNEL_TTL_SECS);
        self.clock_skew_ms = self.clock_skew_ms.max(MIN_CLOCK_SKEW_MS);
        self.replay_ttl_secs = self.replay_ttl_secs.max(MIN_REPLAY_TTL_SECS);
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_ttl_secs < MIN_CHANNEL_TTL_SECS {
            return Err(ConfigError::BelowFloor {
                field: "channel_ttl_secs",
                floor: MIN_CHANNEL_TTL_SECS,
            });
        }
        if self.clock_skew_ms < MIN_CLOCK_SKEW_MS {
            return Err(ConfigError::BelowFloor {
                field: "clock_skew_ms",
                floor: MIN_CLOCK_SKEW_MS,
            });
        }
        if self.replay_ttl_secs < MIN_REPLAY_TTL_SECS {
            return Err(ConfigError::BelowFloor {
                field: "replay_ttl_secs",
                floor: MIN_REPLAY_TTL_SECS,
            });
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes cannot be 0".into()));
        }
        if self.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "purge_interval_secs cannot be 0".into(),
            ));
        }
        if !self.forced_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(
                "forced_prefix must start with '/'".into(),
            ));
        }

        if self.enabled {
            self.kek()?;
        }

        Ok(())
    }

    /// Parse the configured KEK.
    pub fn kek(&self) -> Result<Kek, ConfigError> {
        if self.kek_base64.trim().is_empty() {
            return Err(ConfigError::MissingKek);
        }
        Kek::from_base64(&self.kek_base64).map_err(|e| ConfigError::InvalidKek(e.to_string()))
    }

    /// Channel lifetime.
    pub fn channel_ttl(&self) -> Duration {
        Duration::from_secs(self.channel_ttl_secs)
    }

    /// Replay record lifetime.
    pub fn replay_ttl(&self) -> Duration {
        Duration::from_secs(self.replay_ttl_secs)
    }

    /// Interval between channel purges.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Signed integer, negatives clamped to zero ahead of the floors.
fn parse_int(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .map(|n| u64::try_from(n).unwrap_or(0))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Secure mode is enabled without a KEK
    #[error("SECURE_KEK_BASE64 is required when secure channels are enabled")]
    MissingKek,
    /// KEK does not decode to 32 bytes
    #[error("invalid key-encryption-key: {0}")]
    InvalidKek(String),
    /// Numeric setting below its floor
    #[error("{field} must be at least {floor}")]
    BelowFloor {
        /// Offending field
        field: &'static str,
        /// Minimum value
        floor: u64,
    },
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
