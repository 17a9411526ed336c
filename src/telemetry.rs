//! Fire-and-forget telemetry seam.
//!
//! The core emits lifecycle events through an injected [`TelemetrySink`];
//! shipping them anywhere (metrics, logs, a UI event bus) is the embedding
//! application's concern. Absence of a real sink never affects correctness.

use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle events emitted by the orchestration core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    BatchSubmitted {
        batch_id: String,
        request_count: usize,
    },
    BatchCancelled {
        batch_id: String,
    },
    RequestCompleted {
        request_id: String,
        provider: String,
        duration_ms: u64,
    },
    RequestFailed {
        request_id: String,
        reason: String,
    },
    RequestDropped {
        request_id: String,
    },
    ProviderSkipped {
        provider: String,
    },
    ProviderCallFailed {
        provider: String,
        reason: String,
    },
    CircuitOpened {
        provider: String,
    },
    CircuitClosed {
        provider: String,
    },
    CacheHit {
        key: String,
    },
    CacheMiss {
        key: String,
    },
}

/// Injected telemetry sink. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink: drops everything.
#[derive(Debug, Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Broadcast-channel sink for applications that want to fan events out to
/// in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastTelemetry {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastTelemetry {
    /// Create a new broadcast sink with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl TelemetrySink for BroadcastTelemetry {
    fn record(&self, event: TelemetryEvent) {
        // send() errors only when there are no subscribers, which is fine -
        // events are fire-and-forget.
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastTelemetry {
    fn default() -> Self {
        Self::new(1024)
    }
}
