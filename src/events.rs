//! Observation surface: typed lifecycle events for external renderers and
//! test harnesses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Lifecycle events published by the driver and runner.
///
/// `SequenceFinished.ok` reports whether the run completed without an abort;
/// individual task failures under the `Continue` policy are counted in
/// `failed` while `ok` stays true.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SequenceEvent {
    SequenceStarted {
        task_count: usize,
    },
    SequenceFinished {
        ok: bool,
        failed: usize,
        duration_ms: u64,
    },
    TaskStarted {
        id: String,
        attempt: u32,
    },
    TaskAttemptFailed {
        id: String,
        attempt: u32,
        message: String,
    },
    TaskSucceeded {
        id: String,
        duration_ms: u64,
    },
    TaskFailed {
        id: String,
        attempts: u32,
        message: String,
    },
    TaskSkipped {
        id: String,
    },
    SpanOpened {
        name: String,
    },
    SpanClosed {
        name: String,
        ok: bool,
    },
}

/// Event envelope with per-run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic per-run sequence number.
    pub sequence: u64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    /// Offset from the start of the run, in milliseconds.
    pub at_ms: u64,
    pub event: SequenceEvent,
}

/// Sink for emitted events.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &EventEnvelope);
}

/// A simple logging event sink.
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        tracing::debug!(
            sequence = envelope.sequence,
            run_id = %envelope.run_id,
            at_ms = envelope.at_ms,
            "event: {:?}",
            envelope.event
        );
    }
}

/// A buffering event sink that collects events for later inspection.
#[derive(Default)]
pub struct BufferingEventSink {
    events: Arc<parking_lot::RwLock<Vec<EventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &EventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

/// Per-run event emitter, owned by the sequence and shared with launched
/// tasks. Carries the run-relative clock used for all metrics.
pub(crate) struct EventBus {
    run_id: String,
    started: Instant,
    counter: AtomicU64,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new(run_id: String, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            counter: AtomicU64::new(0),
            sinks,
        }
    }

    /// Milliseconds elapsed since the run started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn emit(&self, event: SequenceEvent) {
        let envelope = EventEnvelope {
            sequence: self.counter.fetch_add(1, Ordering::SeqCst),
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            at_ms: self.elapsed_ms(),
            event,
        };
        for sink in &self.sinks {
            sink.emit(&envelope);
        }
    }
}
