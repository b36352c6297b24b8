//! Local, rebuildable derivatives of remote state.
//!
//! Everything here may be deleted at any time: the worst outcome is one
//! redundant cycle, never data loss.

pub mod cache;
pub mod ledger;
pub mod profile;

pub use cache::{CacheEntry, ManifestCache};
pub use ledger::Ledger;
pub use profile::{ProfileKey, ProfileRecord};
