//! Mirroring telemetry collector and helpers.
//!
//! The collector multiplexes context lifecycle, shadow bookkeeping and
//! failure events into a bounded history plus a broadcast stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::error::ErrorCode;

pub mod events;

pub use events::{LifecyclePhase, MirrorEvent};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MirrorEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub replayed_operations: u64,
}

/// Broadcast-based collector retaining a bounded history of events.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MirrorEvent>,
    history: Mutex<VecDeque<MirrorEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MirrorEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.tx.subscribe()
    }

    fn history(&self) -> Vec<MirrorEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Top-level hub wrapping the collector plus a replay counter.
///
/// Successful replays are counted rather than published; one event per
/// mirrored call would flood the history.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    replays: AtomicU64,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            replays: AtomicU64::new(0),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.collector.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            recent: self.collector.history(),
            total_events: self.collector.total_events.load(Ordering::Relaxed),
            dropped_events: self.collector.dropped_history.load(Ordering::Relaxed),
            replayed_operations: self.replays.load(Ordering::Relaxed),
        }
    }

    pub fn record_lifecycle(&self, context: &str, phase: LifecyclePhase) {
        self.collector.publish(MirrorEvent::ContextLifecycle {
            context: context.to_string(),
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_bank_loaded(&self, context: &str, bank: &str, strings: bool) {
        self.collector.publish(MirrorEvent::BankLoaded {
            context: context.to_string(),
            bank: bank.to_string(),
            strings,
        });
    }

    pub fn record_duplicate(&self, context: &str, primary: u64, shadow: u64) {
        self.collector.publish(MirrorEvent::InstanceDuplicated {
            context: context.to_string(),
            primary,
            shadow,
        });
    }

    pub fn record_destroyed(&self, context: &str, primary: u64) {
        self.collector.publish(MirrorEvent::DuplicateDestroyed {
            context: context.to_string(),
            primary,
        });
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay_failure(&self, context: &str, operation: &str, err: &dyn ErrorCode) {
        self.collector.publish(MirrorEvent::ReplayFailed {
            context: context.to_string(),
            operation: operation.to_string(),
            code: err.code(),
        });
    }

    pub fn record_device_bound(&self, context: &str, device: &str, fallback: bool) {
        self.collector.publish(MirrorEvent::DeviceBound {
            context: context.to_string(),
            device: device.to_string(),
            fallback,
        });
    }

    pub fn record_error(&self, err: &dyn ErrorCode, context: impl Into<String>) {
        self.collector.publish(MirrorEvent::Error {
            code: err.code(),
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, MirrorError};

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(MirrorEvent::BankLoaded {
            context: "music".to_string(),
            bank: "master".to_string(),
            strings: true,
        });
        collector.publish(MirrorEvent::InstanceDuplicated {
            context: "music".to_string(),
            primary: 1,
            shadow: 2,
        });
        collector.publish(MirrorEvent::DuplicateDestroyed {
            context: "music".to_string(),
            primary: 1,
        });

        let history = collector.history();
        assert_eq!(history.len(), 3);
        assert!(matches!(history[0], MirrorEvent::BankLoaded { strings: true, .. }));
        assert!(matches!(history[2], MirrorEvent::DuplicateDestroyed { primary: 1, .. }));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let hub = TelemetryHub::new(8, 2);
        for primary in 0..3 {
            hub.record_destroyed("music", primary);
        }

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(matches!(
            snapshot.recent[0],
            MirrorEvent::DuplicateDestroyed { primary: 1, .. }
        ));
    }

    #[test]
    fn hub_counts_replays_without_publishing() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_replay();
        hub.record_replay();

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.replayed_operations, 2);
        assert_eq!(snapshot.total_events, 0);
    }

    #[test]
    fn hub_records_error_codes() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_error(&MirrorError::ToggleInProgress, "toggle");
        hub.record_replay_failure(
            "music",
            "instance.start",
            &EngineError::InvalidHandle { handle: 3 },
        );

        let snapshot = hub.snapshot();
        assert!(matches!(
            snapshot.recent[0],
            MirrorEvent::Error { code: 2007, .. }
        ));
        assert!(matches!(
            snapshot.recent[1],
            MirrorEvent::ReplayFailed { code: 1003, .. }
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = TelemetryHub::new(8, 8);
        let mut rx = hub.subscribe();
        hub.record_lifecycle("music", LifecyclePhase::Initialized);

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            MirrorEvent::ContextLifecycle {
                phase: LifecyclePhase::Initialized,
                ..
            }
        ));
    }

    #[test]
    fn events_serialize_tagged() {
        let event = MirrorEvent::DeviceBound {
            context: "music".to_string(),
            device: "hp".to_string(),
            fallback: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "device_bound");
        assert_eq!(json["payload"]["device"], "hp");
    }
}
