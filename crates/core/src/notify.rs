//! Outbound notifications: trait for reporting lifecycle outcomes to the
//! external notification collaborator (mail queue, admin feed, webhooks).
//!
//! Emission is fire-and-forget: a sink that drops a notification never
//! affects the state machine.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ServiceActivated,
    ServiceSuspended,
    ServiceReactivated,
    ServiceTerminated,
    ProvisioningFailed,
}

/// A lifecycle notification. Carries the recorded note on failure; never
/// carries credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub service_id: Uuid,
    pub kind: NotificationKind,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, service_id: Uuid) -> Self {
        Self {
            service_id,
            kind,
            note: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Trait for delivering notifications to the outside world.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

/// No-op sink for tests and callers that don't need notifications.
pub struct NoOpSink;

impl NotificationSink for NoOpSink {
    fn emit(&self, _notification: Notification) {}
}

/// In-memory sink that captures notifications for testing.
#[derive(Default)]
pub struct CaptureSink {
    notifications: Mutex<Vec<Notification>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().expect("notify mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().expect("notify mutex poisoned").len()
    }

    pub fn count_kind(&self, kind: NotificationKind) -> usize {
        self.notifications
            .lock()
            .expect("notify mutex poisoned")
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.notifications.lock().expect("notify mutex poisoned").clear();
    }
}

impl NotificationSink for CaptureSink {
    fn emit(&self, notification: Notification) {
        self.notifications
            .lock()
            .expect("notify mutex poisoned")
            .push(notification);
    }
}

/// Convenience: create a no-op sink.
pub fn noop_sink() -> Arc<dyn NotificationSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
