use crate::domain::{ChannelStatus, ReplayGuardRecord, SecureChannel, StoreError, Timestamp};
use crate::ports::{ChannelStore, InsertOutcome, ReplayConflict, ReplayGuardStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory channel store keyed by channel id.
#[derive(Default)]
pub struct InMemoryChannelStore {
    channels: DashMap<String, SecureChannel>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn create(&self, channel: SecureChannel) -> Result<(), StoreError> {
        match self.channels.entry(channel.channel_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(channel.channel_id)),
            Entry::Vacant(slot) => {
                slot.insert(channel);
                Ok(())
            }
        }
    }

    async fn get(&self, channel_id: &str) -> Result<Option<SecureChannel>, StoreError> {
        Ok(self.channels.get(channel_id).map(|c| c.value().clone()))
    }

    async fn transition(
        &self,
        channel_id: &str,
        status: ChannelStatus,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let Some(mut channel) = self.channels.get_mut(channel_id) else {
            return Ok(false);
        };
        if !channel.status.can_transition_to(status) {
            return Ok(false);
        }
        channel.status = status;
        channel.updated_at = now;
        Ok(true)
    }

    async fn touch(&self, channel_id: &str, at: Timestamp) -> Result<(), StoreError> {
        if let Some(mut channel) = self.channels.get_mut(channel_id) {
            channel.last_activity_at = at;
            channel.updated_at = at;
        }
        Ok(())
    }

    async fn delete_expired(&self, before: Timestamp) -> Result<usize, StoreError> {
        let initial = self.channels.len();
        self.channels.retain(|_, channel| channel.expires_at >= before);
        Ok(initial.saturating_sub(self.channels.len()))
    }
}

type ScopedKey = (String, String);

#[derive(Default)]
struct ReplayIndex {
    by_req_id: HashMap<ScopedKey, Timestamp>,
    by_nonce: HashMap<ScopedKey, Timestamp>,
}

/// In-memory replay store.
///
/// Both uniqueness indexes sit under one lock, so check-and-insert is a
/// single atomic step.
#[derive(Default)]
pub struct InMemoryReplayStore {
    index: Mutex<ReplayIndex>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.lock().by_req_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplayGuardStore for InMemoryReplayStore {
    async fn insert_if_absent(
        &self,
        record: ReplayGuardRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let req_key = (record.channel_id.clone(), record.req_id);
        let nonce_key = (record.channel_id, record.nonce);

        let mut index = self.index.lock();
        if index.by_req_id.contains_key(&req_key) {
            return Ok(InsertOutcome::Conflict(ReplayConflict::RequestId));
        }
        if index.by_nonce.contains_key(&nonce_key) {
            return Ok(InsertOutcome::Conflict(ReplayConflict::Nonce));
        }

        index.by_req_id.insert(req_key, record.expire_at);
        index.by_nonce.insert(nonce_key, record.expire_at);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut index = self.index.lock();
        let initial = index.by_req_id.len();
        index.by_req_id.retain(|_, expire_at| *expire_at >= now);
        index.by_nonce.retain(|_, expire_at| *expire_at >= now);
        Ok(initial.saturating_sub(index.by_req_id.len()))
    }
}
