//! Sync Agent Library
//!
//! Mirrors a local directory tree to a remote object store. Cycles are
//! serialized across devices with a lease lock stored next to a full-snapshot
//! manifest.

pub mod api;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod engine;
pub mod events;
pub mod fs;
pub mod lock;
pub mod manifest;
pub mod state;
pub mod store;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::{Config, SyncProfile};
pub use engine::{CycleOutcome, SyncEngine};
pub use events::{EventBus, SyncEvent, SyncStatus};
pub use utils::errors::{Result, SyncError};
