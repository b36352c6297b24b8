//! Lease-based mutual exclusion over a plain object store.
//!
//! Before a cycle mutates the remote side it writes a lease object under
//! [`LOCK_KEY`]. Other devices that find an unexpired foreign lease skip
//! their cycle; a lease that stays past expiry plus a grace period is taken
//! to be abandoned and reclaimed.
//!
//! Acquisition is optimistic. The backend has no create-if-absent, so two
//! devices that both read "no lease" in the same instant will both write one
//! and both proceed. That window is accepted rather than hidden: the
//! `manifest_seq_when_locked` fencing value and the full-snapshot manifest
//! keep the damage to one redundant or overwritten manifest generation.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::ObjectStore;
use crate::utils::errors::{Result, SyncError};

/// Reserved key of the lease object.
pub const LOCK_KEY: &str = "__sync/lock.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseLock {
    pub owner_device_id: String,
    pub locked_at_utc: DateTime<Utc>,
    pub expires_at_utc: DateTime<Utc>,
    /// Manifest sequence observed when the lease was taken
    pub manifest_seq_when_locked: u64,
    pub nonce: String,
}

impl LeaseLock {
    pub fn new(owner: &str, manifest_seq: u64, ttl: Duration, nonce: String, now: DateTime<Utc>) -> Self {
        Self {
            owner_device_id: owner.to_string(),
            locked_at_utc: now,
            expires_at_utc: now + ttl,
            manifest_seq_when_locked: manifest_seq,
            nonce,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at_utc
    }

    pub fn is_expired_with_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now >= self.expires_at_utc + grace
    }
}

fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// TTL and reclaim grace for leases.
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
    pub ttl: Duration,
    pub grace: Duration,
}

impl LeasePolicy {
    pub fn from_minutes(ttl_minutes: i64, grace_minutes: i64) -> Self {
        Self {
            ttl: Duration::minutes(ttl_minutes),
            grace: Duration::minutes(grace_minutes),
        }
    }
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self::from_minutes(15, 5)
    }
}

/// Result of trying to take the lease for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// No lease existed; ours is written
    Acquired(LeaseLock),
    /// We already held it; expiry refreshed
    Renewed(LeaseLock),
    /// A foreign lease was abandoned; it was removed and ours written
    Reclaimed {
        lease: LeaseLock,
        previous_owner: String,
    },
    /// Force-override: the protocol was skipped entirely
    Bypassed,
    /// A foreign, live lease exists; this cycle must not write
    Held {
        owner: String,
        expires_at: DateTime<Utc>,
    },
}

impl LockOutcome {
    /// Whether this cycle may transfer and rewrite the manifest.
    pub fn may_write(&self) -> bool {
        !matches!(self, LockOutcome::Held { .. })
    }

    /// Whether a lease object was written this cycle and must be released.
    pub fn must_release(&self) -> bool {
        matches!(
            self,
            LockOutcome::Acquired(_) | LockOutcome::Renewed(_) | LockOutcome::Reclaimed { .. }
        )
    }
}

/// Runs the lease protocol for one device against one store.
pub struct LeaseManager<'a> {
    store: &'a dyn ObjectStore,
    device_id: &'a str,
    policy: LeasePolicy,
}

impl<'a> LeaseManager<'a> {
    pub fn new(store: &'a dyn ObjectStore, device_id: &'a str, policy: LeasePolicy) -> Self {
        Self {
            store,
            device_id,
            policy,
        }
    }

    /// Take, renew or reclaim the lease, or report that someone else holds it.
    ///
    /// A failed read of the current lease, or a failed write of ours, aborts
    /// the cycle with [`SyncError::LockAcquisition`].
    pub async fn acquire(&self, manifest_seq: u64, force: bool) -> Result<LockOutcome> {
        if force {
            debug!("Force upload enabled, skipping lease protocol");
            return Ok(LockOutcome::Bypassed);
        }

        let now = Utc::now();
        let existing = self
            .store
            .get(LOCK_KEY)
            .await
            .map_err(|e| SyncError::LockAcquisition(format!("reading lease: {}", e)))?;

        let Some(object) = existing else {
            let lease = self.write_new(manifest_seq, new_nonce(), now).await?;
            debug!("Lease acquired");
            return Ok(LockOutcome::Acquired(lease));
        };

        let current = match serde_json::from_slice::<LeaseLock>(&object.body) {
            Ok(lease) => lease,
            Err(e) => {
                debug!("Unreadable lease object, treating it as abandoned: {}", e);
                let lease = self.write_new(manifest_seq, new_nonce(), now).await?;
                return Ok(LockOutcome::Reclaimed {
                    lease,
                    previous_owner: String::new(),
                });
            }
        };

        if current.owner_device_id == self.device_id {
            let lease = self.write_new(manifest_seq, current.nonce, now).await?;
            debug!("Lease already held by this device, renewed");
            return Ok(LockOutcome::Renewed(lease));
        }

        if !current.is_expired_with_grace(now, self.policy.grace) {
            debug!(
                owner = %current.owner_device_id,
                expires_at = %current.expires_at_utc,
                "Lease held by another device, skipping this cycle"
            );
            return Ok(LockOutcome::Held {
                owner: current.owner_device_id,
                expires_at: current.expires_at_utc,
            });
        }

        debug!(
            owner = %current.owner_device_id,
            expires_at = %current.expires_at_utc,
            "Reclaiming abandoned lease"
        );
        if let Err(e) = self.store.delete(LOCK_KEY).await {
            warn!("Failed to delete abandoned lease, overwriting it: {}", e);
        }
        let lease = self.write_new(manifest_seq, new_nonce(), now).await?;
        Ok(LockOutcome::Reclaimed {
            lease,
            previous_owner: current.owner_device_id,
        })
    }

    /// Delete the lease if this cycle wrote one. Failures are logged; the
    /// lease then simply expires.
    pub async fn release(&self, outcome: &LockOutcome) -> bool {
        if !outcome.must_release() {
            return false;
        }
        match self.store.delete(LOCK_KEY).await {
            Ok(()) => {
                debug!("Lease released");
                true
            }
            Err(e) => {
                warn!("Failed to release lease (it will expire): {}", e);
                false
            }
        }
    }

    async fn write_new(&self, manifest_seq: u64, nonce: String, now: DateTime<Utc>) -> Result<LeaseLock> {
        let lease = LeaseLock::new(self.device_id, manifest_seq, self.policy.ttl, nonce, now);
        let body = serde_json::to_vec(&lease)?;
        self.store
            .put(LOCK_KEY, Bytes::from(body))
            .await
            .map_err(|e| SyncError::LockAcquisition(format!("writing lease: {}", e)))?;
        Ok(lease)
    }
}
