//! Replay guard.
//!
//! Every accepted request leaves a record unique on (channel, req_id) and on
//! (channel, nonce). Reusing either is a replay. Records outlive the
//! clock-skew window and are swept opportunistically.

use crate::domain::{ReplayGuardRecord, SecureError, Timestamp};
use crate::ports::{InsertOutcome, ReplayGuardStore, TimeSource};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum spacing between opportunistic sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct SweepState {
    in_progress: AtomicBool,
    last_started_at: AtomicU64,
}

/// Atomic replay detection over a [`ReplayGuardStore`].
pub struct ReplayGuard {
    store: Arc<dyn ReplayGuardStore>,
    clock: Arc<dyn TimeSource>,
    ttl: Duration,
    sweep: Arc<SweepState>,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn ReplayGuardStore>, clock: Arc<dyn TimeSource>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            sweep: Arc::new(SweepState::default()),
        }
    }

    /// Record (channel, req_id, nonce) or reject it as a replay.
    ///
    /// # Errors
    /// - `ReplayDetected` if either key was already recorded
    /// - `Store` for any other persistence failure
    pub async fn assert_not_replay(
        &self,
        channel_id: &str,
        req_id: &str,
        nonce: &str,
    ) -> Result<(), SecureError> {
        let now = self.clock.now();
        let record = ReplayGuardRecord {
            channel_id: channel_id.to_string(),
            req_id: req_id.to_string(),
            nonce: nonce.to_string(),
            expire_at: now.saturating_add(self.ttl.as_millis() as u64),
            created_at: now,
        };

        match self.store.insert_if_absent(record).await? {
            InsertOutcome::Inserted => {
                self.maybe_spawn_sweep(now);
                Ok(())
            }
            InsertOutcome::Conflict(which) => {
                debug!(channel_id = %channel_id, conflict = ?which, "Replay detected");
                Err(SecureError::ReplayDetected)
            }
        }
    }

    /// Delete expired records now.
    pub async fn sweep_expired(&self) -> Result<usize, SecureError> {
        Ok(self.store.delete_expired(self.clock.now()).await?)
    }

    /// Whether an opportunistic sweep is running.
    pub fn sweep_in_progress(&self) -> bool {
        self.sweep.in_progress.load(Ordering::Acquire)
    }

    fn maybe_spawn_sweep(&self, now: Timestamp) {
        let last = self.sweep.last_started_at.load(Ordering::Acquire);
        if last != 0 && now.saturating_sub(last) < SWEEP_INTERVAL.as_millis() as u64 {
            return;
        }
        if self
            .sweep
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.sweep.last_started_at.store(now, Ordering::Release);

        let store = Arc::clone(&self.store);
        let sweep = Arc::clone(&self.sweep);
        tokio::spawn(async move {
            match store.delete_expired(now).await {
                Ok(removed) if removed > 0 => {
                    debug!(removed = removed, "Swept expired replay records");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Replay record sweep failed"),
            }
            sweep.in_progress.store(false, Ordering::Release);
        });
    }
}
