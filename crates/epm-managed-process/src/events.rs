//! Lifecycle event notification.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of lifecycle event delivered to an [`EventSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    StartFailed,
    Stopped,
    Crashed,
    Restarted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Started => write!(f, "started"),
            EventKind::StartFailed => write!(f, "start_failed"),
            EventKind::Stopped => write!(f, "stopped"),
            EventKind::Crashed => write!(f, "crashed"),
            EventKind::Restarted => write!(f, "restarted"),
        }
    }
}

/// Receives lifecycle events from the manager.
///
/// Called synchronously right after the transition it reports, while no
/// registry lock is held. Implementations that do I/O (mail, webhooks)
/// must hand the work off themselves rather than block the caller.
pub trait EventSink: Send + Sync {
    fn on_event(
        &self,
        process_name: &str,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        detail: Option<&str>,
    );
}

/// Default sink: one tracing record per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn on_event(
        &self,
        process_name: &str,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        detail: Option<&str>,
    ) {
        let detail = detail.unwrap_or("");
        match kind {
            EventKind::StartFailed | EventKind::Crashed => tracing::warn!(
                process_id = %process_name,
                event = %kind,
                at = %timestamp,
                "{}",
                detail
            ),
            _ => tracing::info!(
                process_id = %process_name,
                event = %kind,
                at = %timestamp,
                "{}",
                detail
            ),
        }
    }
}

/// An event captured by [`MemoryEventSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub process_name: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Keeps every event in memory. Handy for tests and status endpoints.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ProcessEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    /// Event kinds recorded for one process, in delivery order
    pub fn kinds_for(&self, process_name: &str) -> Vec<EventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.process_name == process_name)
            .map(|e| e.kind)
            .collect()
    }

    pub fn count(&self, process_name: &str, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.process_name == process_name && e.kind == kind)
            .count()
    }
}

impl EventSink for MemoryEventSink {
    fn on_event(
        &self,
        process_name: &str,
        kind: EventKind,
        timestamp: DateTime<Utc>,
        detail: Option<&str>,
    ) {
        self.events.lock().push(ProcessEvent {
            process_name: process_name.to_string(),
            kind,
            timestamp,
            detail: detail.map(str::to_string),
        });
    }
}
