//! Outbound (Driven) ports for the secure transport.
//!
//! Persistence, identity and audit are external collaborators reached only
//! through these traits.

use crate::domain::{
    ChannelStatus, ReplayGuardRecord, SecureChannel, SecurityEvent, StoreError, Timestamp,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

/// Channel record storage.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Insert a new channel.
    ///
    /// # Errors
    /// `StoreError::Duplicate` if `channel_id` already exists.
    async fn create(&self, channel: SecureChannel) -> Result<(), StoreError>;

    /// Read one channel by id.
    async fn get(&self, channel_id: &str) -> Result<Option<SecureChannel>, StoreError>;

    /// Move an `Active` channel to `status`.
    ///
    /// Returns `Ok(false)` when the channel is missing or no longer active,
    /// so terminal states stay terminal.
    async fn transition(
        &self,
        channel_id: &str,
        status: ChannelStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Set `last_activity_at`.
    async fn touch(&self, channel_id: &str, at: Timestamp) -> Result<(), StoreError>;

    /// Delete channels whose `expires_at` is before `before`. Returns the count.
    async fn delete_expired(&self, before: Timestamp) -> Result<usize, StoreError>;
}

/// Which uniqueness key a replay insert collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayConflict {
    RequestId,
    Nonce,
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict(ReplayConflict),
}

/// Replay record storage.
///
/// `insert_if_absent` must be atomic with respect to both
/// (channel_id, req_id) and (channel_id, nonce): two concurrent inserts that
/// share either key can never both succeed.
#[async_trait]
pub trait ReplayGuardStore: Send + Sync {
    async fn insert_if_absent(&self, record: ReplayGuardRecord)
        -> Result<InsertOutcome, StoreError>;

    /// Delete records with `expire_at < now`. Returns the count.
    async fn delete_expired(&self, now: Timestamp) -> Result<usize, StoreError>;
}

/// Maps a caller's access token to its authentication session.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_session(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<String>, StoreError>;
}

/// Bearer token validation.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// User id for a valid token, `None` otherwise.
    async fn authenticate(&self, bearer_token: &str) -> Option<String>;
}

/// Audit event sink.
///
/// Must not block and must not fail the caller; implementations swallow
/// and log their own errors.
pub trait SecurityEventSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Time source for consistent timestamp handling.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
