//! Security event sinks.
//!
//! None of these block the caller or report failure to it.

use crate::domain::{SecurityEvent, Severity, StoreError};
use crate::ports::SecurityEventSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Writes each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn emit(&self, event: SecurityEvent) {
        let details = event.details.to_string();
        match event.severity {
            Severity::Low => info!(
                target: "security_audit",
                event_type = %event.event_type,
                severity = %event.severity,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                ip = %event.ip_address,
                blocked = event.blocked,
                details = %details,
                "security event"
            ),
            Severity::Medium => warn!(
                target: "security_audit",
                event_type = %event.event_type,
                severity = %event.severity,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                ip = %event.ip_address,
                blocked = event.blocked,
                details = %details,
                "security event"
            ),
            Severity::High | Severity::Critical => error!(
                target: "security_audit",
                event_type = %event.event_type,
                severity = %event.severity,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                ip = %event.ip_address,
                blocked = event.blocked,
                details = %details,
                "security event"
            ),
        }
    }
}

#[async_trait]
impl AuditRecorder for TracingEventSink {
    async fn record(&self, event: SecurityEvent) -> Result<(), StoreError> {
        self.emit(event);
        Ok(())
    }
}

/// Durable audit backend driven by [`QueuedEventSink`].
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, event: SecurityEvent) -> Result<(), StoreError>;
}

/// Bounded queue in front of an [`AuditRecorder`].
///
/// `emit` never waits: a full queue drops the event with a warning, and
/// recorder failures are logged by the flush task.
#[derive(Clone)]
pub struct QueuedEventSink {
    tx: mpsc::Sender<SecurityEvent>,
}

impl QueuedEventSink {
    /// Start the flush task. Must be called inside a tokio runtime.
    ///
    /// The task ends once every sink clone is dropped and the queue drains.
    pub fn spawn(recorder: Arc<dyn AuditRecorder>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SecurityEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_type = event.event_type;
                if let Err(e) = recorder.record(event).await {
                    warn!(event_type = %event_type, error = %e, "Failed to record security event");
                }
            }
            debug!("Security event queue closed");
        });

        (Self { tx }, handle)
    }
}

impl SecurityEventSink for QueuedEventSink {
    fn emit(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event_type = %event.event_type, "Security event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_type = %event.event_type, "Security event queue closed, dropping event");
            }
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().clone()
    }

    pub fn count_of(&self, event_type: crate::domain::SecurityEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl SecurityEventSink for MemoryEventSink {
    fn emit(&self, event: SecurityEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl AuditRecorder for MemoryEventSink {
    async fn record(&self, event: SecurityEvent) -> Result<(), StoreError> {
        self.emit(event);
        Ok(())
    }
}
