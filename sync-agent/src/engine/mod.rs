//! Cycle orchestrator.
//!
//! One background worker per engine runs the pipeline on a fixed interval.
//! Cycles never overlap, a failing cycle never ends the loop, and only
//! [`SyncEngine::stop`] does.

pub mod cycle;
pub mod transfer;

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use cycle::{CycleOutcome, CycleRunner};
pub use transfer::{TransferPhase, TransferReport};

use crate::config::SyncProfile;
use crate::events::{EngineState, EventBus, LogLevel, StatusSnapshot, SyncEvent, SyncStatus};
use crate::store::ObjectStore;
use crate::utils::errors::{Result, SyncError};

/// How long `stop` waits for the worker before giving up on it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct EngineShared {
    store: Arc<dyn ObjectStore>,
    data_dir: PathBuf,
    events: EventBus,
    kick: Notify,
    cycles: AtomicU64,
    /// Held for the whole of a cycle
    cycle_gate: tokio::sync::Mutex<()>,
}

struct Worker {
    cancel: CancellationToken,
    /// Cancelled when the worker task has ended, however it ended
    exited: CancellationToken,
}

impl Worker {
    fn is_alive(&self) -> bool {
        !self.exited.is_cancelled()
    }
}

pub struct SyncEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<Worker>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, data_dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                store,
                data_dir: data_dir.into(),
                events,
                kick: Notify::new(),
                cycles: AtomicU64::new(0),
                cycle_gate: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the background worker. Returns `false` if one is already running.
    pub fn start(&self, profile: SyncProfile) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.as_ref().is_some_and(Worker::is_alive) {
            debug!("Sync worker still alive, start ignored");
            return false;
        }

        info!(
            local_dir = %profile.local_dir.display(),
            interval_secs = profile.interval_secs(),
            "Starting sync engine"
        );

        let cancel = CancellationToken::new();
        let exited = CancellationToken::new();
        let shared = self.shared.clone();
        let token = cancel.clone();
        let exit_guard = exited.clone().drop_guard();
        tokio::spawn(async move {
            let _exit_guard = exit_guard;
            shared.run_loop(profile, token).await
        });

        *worker = Some(Worker { cancel, exited });
        true
    }

    /// Request cooperative shutdown and wait a bounded time for the worker.
    ///
    /// A cycle in flight is allowed to finish. If it outlives the timeout the
    /// worker stays registered, cancelled, until it exits on its own; until
    /// then the engine still counts as running and `start` is refused.
    pub async fn stop(&self) {
        let tokens = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|w| w.is_alive())
            .map(|w| (w.cancel.clone(), w.exited.clone()));
        let Some((cancel, exited)) = tokens else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, exited.cancelled()).await {
            Ok(()) => info!("Sync engine stopped"),
            Err(_) => self.shared.events.log(
                LogLevel::Warn,
                format!(
                    "Sync worker did not stop within {:?}, it will exit after the current cycle",
                    STOP_TIMEOUT
                ),
            ),
        }
    }

    /// Cut the current wait short and start the next cycle.
    ///
    /// A kick while a cycle is running is held until that cycle ends, then
    /// skips the following wait. Kicks while no worker is alive are dropped.
    pub fn kick(&self) -> bool {
        match self.state() {
            EngineState::Running | EngineState::Waiting => {
                self.shared.kick.notify_one();
                self.shared.events.log(LogLevel::Info, "Immediate sync requested");
                true
            }
            EngineState::Idle | EngineState::Stopped => {
                debug!("Kick ignored, engine is not running");
                false
            }
        }
    }

    /// Run exactly one cycle on the caller's task.
    ///
    /// Refused while the background worker is alive.
    pub async fn run_once(&self, profile: &SyncProfile) -> Result<CycleOutcome> {
        if self.is_running() {
            return Err(SyncError::Engine("sync engine is already running".to_string()));
        }
        let result = self.shared.execute_cycle(profile).await;
        self.shared.events.set_state(EngineState::Idle);
        result
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(Worker::is_alive)
    }

    pub fn state(&self) -> EngineState {
        self.shared.events.snapshot().state
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.events.snapshot()
    }

    pub fn cycle_count(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }
}

impl EngineShared {
    async fn run_loop(&self, profile: SyncProfile, cancel: CancellationToken) {
        let interval = profile.interval_secs();

        while !cancel.is_cancelled() {
            // Errors are already reported by execute_cycle
            let _ = self.execute_cycle(&profile).await;

            self.events.emit(SyncEvent::NextRetry { seconds: interval });
            if cancel.is_cancelled() {
                break;
            }

            self.events.set_state(EngineState::Waiting);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.kick.notified() => debug!("Wait interrupted by kick"),
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            }
        }

        self.events.set_state(EngineState::Stopped);
        info!("Sync worker exiting");
    }

    /// Run one pipeline pass, reporting its terminal status to observers.
    /// Panics inside the pipeline are caught and reported like errors.
    async fn execute_cycle(&self, profile: &SyncProfile) -> Result<CycleOutcome> {
        let _gate = self.cycle_gate.lock().await;

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.set_cycle(cycle);
        self.events.set_state(EngineState::Running);
        self.events.log(LogLevel::Info, format!("Starting sync cycle {}", cycle));
        self.events.emit(SyncEvent::Status(SyncStatus::Syncing));

        let runner = CycleRunner {
            store: self.store.as_ref(),
            events: &self.events,
            profile,
            data_dir: &self.data_dir,
        };

        let result = match AssertUnwindSafe(runner.run()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(SyncError::Engine(format!("cycle panicked: {}", message)))
            }
        };

        match &result {
            Ok(CycleOutcome::NoDifference) => {
                self.events.emit(SyncEvent::Status(SyncStatus::NoDifference))
            }
            Ok(_) => self.events.emit(SyncEvent::Status(SyncStatus::Idle)),
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Sync cycle {} failed: {}", cycle, e));
                self.events.emit(SyncEvent::Status(SyncStatus::Error));
            }
        }
        result
    }
}
