//! Channel lifecycle: creation, active-channel loading, activity touch,
//! close and purge.
//!
//! ## State Machine
//!
//! ```text
//! Active ──(now >= expires_at, on load)──→ Expired
//!    └────(close_channel)────────────────→ Closed
//! ```
//!
//! Expired and Closed are terminal.

use crate::domain::types::MAX_DEVICE_ID_LENGTH;
use crate::domain::{
    ChannelStatus, HandshakeResponse, InitChannel, InvalidReason, RequestContext, RequestMeta,
    SecureChannel, SecureError, SecurityEvent, SecurityEventType, Severity, Timestamp,
};
use crate::ports::{ChannelStore, SecurityEventSink, SessionResolver, TimeSource};
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use shared_crypto::CryptoEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Minimum spacing between persisted activity touches per channel.
pub const TOUCH_INTERVAL: Duration = Duration::from_secs(15);

/// Channel lifecycle service.
pub struct ChannelService {
    store: Arc<dyn ChannelStore>,
    engine: Arc<CryptoEngine>,
    sessions: Arc<dyn SessionResolver>,
    events: Arc<dyn SecurityEventSink>,
    clock: Arc<dyn TimeSource>,
    channel_ttl: Duration,
    /// channel id -> last persisted touch (ms)
    last_touch: DashMap<String, Timestamp>,
}

impl ChannelService {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        engine: Arc<CryptoEngine>,
        sessions: Arc<dyn SessionResolver>,
        events: Arc<dyn SecurityEventSink>,
        clock: Arc<dyn TimeSource>,
        channel_ttl: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            sessions,
            events,
            clock,
            channel_ttl,
            last_touch: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &CryptoEngine {
        &self.engine
    }

    /// Negotiate and persist a new channel.
    pub async fn init_channel(&self, input: InitChannel) -> Result<HandshakeResponse, SecureError> {
        let device_id = normalize_device_id(input.device_id.as_deref())?;

        let derived = self
            .engine
            .derive_channel_keys(&input.client_public_key, &input.client_random)?;
        let wrapped_keys = self.engine.wrap_channel_keys(&derived.keys)?;

        let session_id = match input.access_token.as_deref() {
            Some(token) => match self.sessions.resolve_session(&input.user_id, token).await {
                Ok(session) => session,
                Err(e) => {
                    debug!(user_id = %input.user_id, error = %e, "Session lookup failed, continuing without session");
                    None
                }
            },
            None => None,
        };

        let now = self.clock.now();
        let expires_at = now.saturating_add(self.channel_ttl.as_millis() as u64);
        let channel_id = format!("sch_{}", uuid::Uuid::new_v4().simple());

        self.store
            .create(SecureChannel {
                channel_id: channel_id.clone(),
                user_id: input.user_id.clone(),
                session_id,
                wrapped_keys,
                device_id: device_id.clone(),
                status: ChannelStatus::Active,
                expires_at,
                last_activity_at: now,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            channel_id = %channel_id,
            user_id = %input.user_id,
            expires_at = expires_at,
            "Secure channel initialized"
        );

        self.events.emit(
            SecurityEvent::new(SecurityEventType::SecureChannelInit, Severity::Low, now)
                .user(input.user_id.clone())
                .client(input.ip_address.as_deref(), input.user_agent.as_deref())
                .details(serde_json::json!({
                    "channelId": channel_id,
                    "deviceId": device_id,
                    "expiresAt": expires_at,
                })),
        );

        Ok(HandshakeResponse {
            channel_id,
            server_public_key: derived.server_public_key,
            server_random: derived.server_random,
            expires_at: format_timestamp(expires_at)?,
            server_time: now,
            cipher_suite: self.engine.cipher_suite().to_string(),
        })
    }

    /// Load a channel that is active and unexpired.
    ///
    /// An active channel past `expires_at` is flipped to `Expired`
    /// (best effort) and rejected.
    pub async fn load_active_channel(&self, channel_id: &str) -> Result<SecureChannel, SecureError> {
        let channel = self
            .store
            .get(channel_id)
            .await?
            .filter(|c| c.status == ChannelStatus::Active)
            .ok_or(SecureError::invalid(InvalidReason::UnknownChannel))?;

        let now = self.clock.now();
        if channel.is_expired_at(now) {
            if let Err(e) = self
                .store
                .transition(channel_id, ChannelStatus::Expired, now)
                .await
            {
                warn!(channel_id = %channel_id, error = %e, "Failed to persist channel expiry");
            }
            self.last_touch.remove(channel_id);
            debug!(channel_id = %channel_id, "Secure channel expired");
            return Err(SecureError::ChannelExpired);
        }

        Ok(channel)
    }

    /// Unwrap the channel keys into a request context.
    pub fn build_request_context(
        &self,
        channel: &SecureChannel,
        meta: RequestMeta,
    ) -> Result<RequestContext, SecureError> {
        let keys = self
            .engine
            .unwrap_channel_keys(&channel.wrapped_keys)
            .map_err(|e| {
                warn!(channel_id = %channel.channel_id, error = %e, "Channel key unwrap failed");
                SecureError::ChannelKeyUnwrapFailed
            })?;

        Ok(RequestContext {
            channel_id: channel.channel_id.clone(),
            user_id: channel.user_id.clone(),
            req_id: meta.req_id,
            nonce: meta.nonce,
            timestamp: meta.timestamp,
            keys,
        })
    }

    /// Claim the touch slot for `channel_id` if the throttle interval has
    /// passed. Returns the touch time when claimed.
    pub fn claim_touch(&self, channel_id: &str) -> Option<Timestamp> {
        let now = self.clock.now();
        let interval = TOUCH_INTERVAL.as_millis() as u64;

        let mut entry = self.last_touch.entry(channel_id.to_string()).or_insert(0);
        if *entry != 0 && now.saturating_sub(*entry) < interval {
            return None;
        }
        *entry = now;
        Some(now)
    }

    /// Throttled `last_activity_at` update. Failures are logged only.
    pub async fn touch_activity(&self, channel_id: &str) {
        let Some(at) = self.claim_touch(channel_id) else {
            return;
        };
        if let Err(e) = self.store.touch(channel_id, at).await {
            warn!(channel_id = %channel_id, error = %e, "Failed to record channel activity");
        }
    }

    /// Close an active channel. Returns `false` if it was not active.
    pub async fn close_channel(&self, channel_id: &str) -> Result<bool, SecureError> {
        let closed = self
            .store
            .transition(channel_id, ChannelStatus::Closed, self.clock.now())
            .await?;
        self.last_touch.remove(channel_id);
        if closed {
            info!(channel_id = %channel_id, "Secure channel closed");
        }
        Ok(closed)
    }

    /// Delete channels past expiry and drop stale touch entries.
    pub async fn purge_expired_channels(&self) -> Result<usize, SecureError> {
        let now = self.clock.now();
        let removed = self.store.delete_expired(now).await?;

        let horizon = now.saturating_sub(self.channel_ttl.as_millis() as u64);
        self.last_touch.retain(|_, touched| *touched >= horizon);

        if removed > 0 {
            debug!(removed = removed, "Purged expired secure channels");
        }
        Ok(removed)
    }

    /// Number of channels with a tracked touch.
    pub fn tracked_touch_count(&self) -> usize {
        self.last_touch.len()
    }
}

/// Periodic channel purge.
pub async fn purge_task(channels: Arc<ChannelService>, interval: Duration) {
    let mut purge_interval = tokio::time::interval(interval);
    purge_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        purge_interval.tick().await;
        if let Err(e) = channels.purge_expired_channels().await {
            warn!(error = %e, "Secure channel purge failed");
        }
    }
}

fn normalize_device_id(device_id: Option<&str>) -> Result<Option<String>, SecureError> {
    let Some(trimmed) = device_id.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_DEVICE_ID_LENGTH {
        return Err(SecureError::invalid(InvalidReason::Handshake(format!(
            "deviceId exceeds {} characters",
            MAX_DEVICE_ID_LENGTH
        ))));
    }
    Ok(Some(trimmed.to_string()))
}

fn format_timestamp(millis: Timestamp) -> Result<String, SecureError> {
    let millis = i64::try_from(millis)
        .map_err(|_| SecureError::Internal("timestamp out of range".into()))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| SecureError::Internal("timestamp out of range".into()))
}
