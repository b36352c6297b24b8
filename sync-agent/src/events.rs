//! Observer channel for engine status and log lines.
//!
//! Events fan out over a broadcast channel: each subscriber sees every event
//! at most once, in emission order, and a slow subscriber loses the oldest
//! events rather than stalling the engine. The bus also keeps a snapshot of
//! the latest values so late subscribers (and the status endpoint) can catch
//! up without replaying history.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Maximum number of queued events per subscriber
const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Syncing,
    Idle,
    Error,
    NoDifference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Event types delivered to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncEvent {
    #[serde(rename = "sync:status")]
    Status(SyncStatus),

    /// Once per cycle, after diffing
    #[serde(rename = "sync:counts")]
    Counts {
        upload: usize,
        download: usize,
        delete: usize,
    },

    /// File currently being transferred; `None` clears it
    #[serde(rename = "sync:current")]
    CurrentFile { path: Option<String> },

    #[serde(rename = "sync:next")]
    NextRetry { seconds: u64 },

    #[serde(rename = "sync:log")]
    Log { level: LogLevel, message: String },
}

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Waiting,
    Stopped,
}

/// Latest known values, for polling observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub cycle_count: u64,
    pub status: Option<SyncStatus>,
    pub upload: usize,
    pub download: usize,
    pub delete: usize,
    pub current_file: Option<String>,
    pub next_retry_secs: Option<u64>,
}

/// Shared event bus
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    snapshot: Arc<RwLock<StatusSnapshot>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            snapshot: Arc::new(RwLock::new(StatusSnapshot::default())),
        }
    }

    /// Deliver an event to all current subscribers.
    pub fn emit(&self, event: SyncEvent) {
        self.update_snapshot(|snap| match &event {
            SyncEvent::Status(status) => snap.status = Some(*status),
            SyncEvent::Counts { upload, download, delete } => {
                snap.upload = *upload;
                snap.download = *download;
                snap.delete = *delete;
            }
            SyncEvent::CurrentFile { path } => snap.current_file = path.clone(),
            SyncEvent::NextRetry { seconds } => snap.next_retry_secs = Some(*seconds),
            SyncEvent::Log { .. } => {}
        });

        if let Ok(count) = self.tx.send(event) {
            debug!("Delivered event to {} observer(s)", count);
        }
    }

    /// Log through tracing and deliver the same line to observers.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        self.emit(SyncEvent::Log { level, message });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        self.update_snapshot(|snap| snap.state = state);
    }

    pub(crate) fn set_cycle(&self, cycle: u64) {
        self.update_snapshot(|snap| snap.cycle_count = cycle);
    }

    fn update_snapshot(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut snap = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        f(&mut snap);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::Status(SyncStatus::Idle));
        assert_eq!(bus.snapshot().status, Some(SyncStatus::Idle));
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::Status(SyncStatus::Syncing));
        bus.emit(SyncEvent::CurrentFile { path: Some("a.jpg".into()) });
        bus.emit(SyncEvent::CurrentFile { path: None });
        bus.log(LogLevel::Info, "done");

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::Status(SyncStatus::Syncing));
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::CurrentFile { path: Some("a.jpg".into()) });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::CurrentFile { path: None });
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::Log { level: LogLevel::Info, message: "done".into() }
        );
        assert_eq!(bus.snapshot().current_file, None);
    }

    #[test]
    fn test_snapshot_tracks_counts() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::Counts { upload: 2, download: 0, delete: 1 });
        bus.emit(SyncEvent::NextRetry { seconds: 300 });

        let snap = bus.snapshot();
        assert_eq!((snap.upload, snap.download, snap.delete), (2, 0, 1));
        assert_eq!(snap.next_retry_secs, Some(300));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&SyncEvent::Status(SyncStatus::NoDifference)).unwrap();
        assert_eq!(json, r#"{"type":"sync:status","payload":"no_difference"}"#);

        let json = serde_json::to_string(&SyncEvent::Counts { upload: 1, download: 0, delete: 2 }).unwrap();
        assert!(json.contains("sync:counts"));
        assert!(json.contains(r#""delete":2"#));
    }
}
