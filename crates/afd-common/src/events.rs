//! Directory events raised by the ingestion pipeline.

use std::sync::Mutex;

/// Event categories emitted to the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ErrorStart,
    ErrorEnd,
    InfoTimeUnset,
    WarnTimeUnset,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ErrorStart => "EA_ERROR_START",
            EventKind::ErrorEnd => "EA_ERROR_END",
            EventKind::InfoTimeUnset => "EA_INFO_TIME_UNSET",
            EventKind::WarnTimeUnset => "EA_WARN_TIME_UNSET",
        }
    }
}

/// Sink for directory events. The payload is the directory alias.
pub trait EventSink: Send + Sync {
    fn emit(&self, kind: EventKind, alias: &str);
}

/// Sink that forwards events to the tracing log only.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, kind: EventKind, alias: &str) {
        tracing::info!(event = kind.as_str(), alias = %alias, "directory event");
    }
}

/// Sink that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(EventKind, String)>>,
}

impl RecordingEventSink {
    pub fn take(&self) -> Vec<(EventKind, String)> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *events)
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, kind: EventKind, alias: &str) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((kind, alias.to_string()));
    }
}
