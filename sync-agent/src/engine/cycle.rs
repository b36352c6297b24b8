//! One pass of the sync pipeline: scan, resolve, diff, lock, transfer,
//! rewrite, release.

use chrono::{DateTime, Utc};
use std::path::Path;

use super::transfer::{TransferPhase, TransferReport};
use crate::config::SyncProfile;
use crate::diff::compute_diff;
use crate::events::{EventBus, LogLevel, SyncEvent};
use crate::fs::Scanner;
use crate::lock::{LeaseManager, LeasePolicy, LockOutcome};
use crate::manifest::{
    fetch_remote_manifest, resolve_manifest, utc_now_iso, FileIndex, ManifestSource,
};
use crate::state::ledger::LEDGER_FILE;
use crate::state::{Ledger, ManifestCache, ProfileKey, ProfileRecord};
use crate::store::ObjectStore;
use crate::utils::errors::{Result, SyncError};

/// How a cycle ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Local and server indices matched; nothing was locked or written
    NoDifference,
    /// Another device holds a live lease; nothing was written
    LockHeld {
        owner: String,
        expires_at: DateTime<Utc>,
    },
    /// Transfers ran and a new manifest was attempted
    Completed(TransferReport),
}

pub struct CycleRunner<'a> {
    pub store: &'a dyn ObjectStore,
    pub events: &'a EventBus,
    pub profile: &'a SyncProfile,
    pub data_dir: &'a Path,
}

impl CycleRunner<'_> {
    pub async fn run(&self) -> Result<CycleOutcome> {
        let profile_key = ProfileKey::for_profile(self.profile);
        let skip_remote_deletes = self.check_profile_switch(&profile_key);

        let local_dir = &self.profile.local_dir;
        if !tokio::fs::metadata(local_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(SyncError::Config(format!(
                "Local directory not found: {}",
                local_dir.display()
            )));
        }

        let local = self.scan().await?;

        let remote = fetch_remote_manifest(self.store).await?;
        let cache = ManifestCache::new(self.data_dir);
        let resolved = resolve_manifest(remote, cache.load(&profile_key), &self.profile.device_id);
        let seq = resolved.manifest.manifest_seq;
        match resolved.source {
            ManifestSource::Remote => self
                .events
                .log(LogLevel::Info, format!("Using remote manifest (seq {})", seq)),
            ManifestSource::Cache => self.events.log(
                LogLevel::Info,
                format!("Using cached manifest (seq {}), not older than remote", seq),
            ),
            ManifestSource::Empty => self
                .events
                .log(LogLevel::Info, "No manifest found, starting from empty"),
        }

        let mut diff = compute_diff(&local, &resolved.manifest.files);
        if skip_remote_deletes {
            let dropped = diff.suppress_remote_deletes();
            if dropped > 0 {
                self.events.log(
                    LogLevel::Warn,
                    format!("Held back {} remote delete(s) after profile change", dropped),
                );
            }
        }

        self.events.log(
            LogLevel::Info,
            format!(
                "To upload: {}, to download: {}, to delete remote: {}",
                diff.to_upload.len(),
                diff.to_download.len(),
                diff.to_delete_remote.len()
            ),
        );
        self.events.emit(SyncEvent::Counts {
            upload: diff.to_upload.len(),
            download: diff.to_download.len(),
            delete: diff.to_delete_remote.len(),
        });

        if diff.is_empty() {
            self.events
                .log(LogLevel::Info, "No differences, skipping lock and upload");
            return Ok(CycleOutcome::NoDifference);
        }

        let leases = LeaseManager::new(
            self.store,
            &self.profile.device_id,
            LeasePolicy::from_minutes(self.profile.lock_ttl_minutes, self.profile.lock_grace_minutes),
        );
        let outcome = leases
            .acquire(seq, self.profile.force_upload_ignore_lock)
            .await?;

        match &outcome {
            LockOutcome::Bypassed => self
                .events
                .log(LogLevel::Warn, "Force upload enabled, ignoring lock"),
            LockOutcome::Acquired(_) => self.events.log(LogLevel::Info, "Lock acquired"),
            LockOutcome::Renewed(_) => self
                .events
                .log(LogLevel::Info, "Lock already held by this device, renewed"),
            LockOutcome::Reclaimed { previous_owner, .. } if previous_owner.is_empty() => self
                .events
                .log(LogLevel::Warn, "Replaced unreadable lock object"),
            LockOutcome::Reclaimed { previous_owner, .. } => self.events.log(
                LogLevel::Warn,
                format!("Reclaimed expired lock from {}", previous_owner),
            ),
            LockOutcome::Held { owner, expires_at } => {
                self.events.log(
                    LogLevel::Info,
                    format!(
                        "Lock held by {} until {}, skipping this cycle",
                        owner,
                        expires_at.to_rfc3339()
                    ),
                );
                return Ok(CycleOutcome::LockHeld {
                    owner: owner.clone(),
                    expires_at: *expires_at,
                });
            }
        }

        let phase = TransferPhase {
            store: self.store,
            events: self.events,
            profile: self.profile,
            cache: &cache,
            profile_key: &profile_key,
        };
        let report = phase.run(&diff, &local, &resolved).await;

        if outcome.must_release() {
            if leases.release(&outcome).await {
                self.events.log(LogLevel::Info, "Lock released");
            }
        } else {
            self.events
                .log(LogLevel::Debug, "No lock created this cycle, skipping release");
        }

        Ok(CycleOutcome::Completed(report))
    }

    /// Persist the current profile key; `true` when it changed since the
    /// last run, in which case remote deletes are held back for this cycle.
    fn check_profile_switch(&self, key: &ProfileKey) -> bool {
        let record = ProfileRecord::new(self.data_dir);
        match record.switch_to(key) {
            Ok(false) => false,
            Ok(true) => {
                self.events.log(
                    LogLevel::Warn,
                    format!("Profile changed ({}), skipping remote deletes this cycle", key),
                );
                true
            }
            Err(e) => {
                self.events.log(
                    LogLevel::Warn,
                    format!("Failed to record profile key, skipping remote deletes: {}", e),
                );
                true
            }
        }
    }

    /// Walk the local root off the async runtime and record the scan in the
    /// ledger. Ledger failures are logged only.
    async fn scan(&self) -> Result<FileIndex> {
        let scanner = Scanner::new(self.profile.local_dir.clone(), self.profile.device_id.clone());
        let ledger_path = self.data_dir.join(LEDGER_FILE);

        let (local, recorded) = tokio::task::spawn_blocking(move || {
            let local = scanner.index();
            let recorded = Ledger::open(&ledger_path)
                .and_then(|mut ledger| ledger.record_scan(&local, &utc_now_iso()));
            (local, recorded)
        })
        .await?;

        if let Err(e) = recorded {
            self.events
                .log(LogLevel::Warn, format!("Failed to update scan ledger: {}", e));
        }
        self.events
            .log(LogLevel::Info, format!("Scanned {} local file(s)", local.len()));
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LeaseLock, LOCK_KEY};
    use crate::manifest::{FileRecord, Manifest, MANIFEST_KEY};
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        local: TempDir,
        data: TempDir,
        store: MemoryStore,
        events: EventBus,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                local: TempDir::new().unwrap(),
                data: TempDir::new().unwrap(),
                store: MemoryStore::new(),
                events: EventBus::new(),
            }
        }

        fn write(&self, rel: &str, body: &[u8]) {
            let path = self.local.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }

        fn profile(&self) -> SyncProfile {
            SyncProfile::new("dev-a", self.local.path())
        }

        async fn run(&self, profile: &SyncProfile) -> Result<CycleOutcome> {
            CycleRunner {
                store: &self.store,
                events: &self.events,
                profile,
                data_dir: self.data.path(),
            }
            .run()
            .await
        }

        fn remote_manifest(&self) -> Manifest {
            Manifest::from_slice(&self.store.object(MANIFEST_KEY).unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_first_cycle_uploads_everything() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        fx.write("assets/site.css", b"css");

        let outcome = fx.run(&fx.profile()).await.unwrap();
        let CycleOutcome::Completed(report) = outcome else {
            panic!("expected a completed cycle, got {:?}", outcome);
        };
        assert_eq!(report.uploaded, vec!["assets/site.css", "images/a.jpg"]);
        assert_eq!(report.manifest_seq, Some(1));

        let manifest = fx.remote_manifest();
        assert_eq!(manifest.manifest_seq, 1);
        assert_eq!(manifest.generator_device_id, "dev-a");
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(&fx.store.object("images/a.jpg").unwrap()[..], b"a");
        assert!(fx.store.object(LOCK_KEY).is_none(), "lease must be released");
    }

    #[tokio::test]
    async fn test_second_cycle_is_no_difference() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        let profile = fx.profile();

        fx.run(&profile).await.unwrap();
        let before = fx.store.calls();
        let lock_ops = fx.store.ops_for(LOCK_KEY).len();

        assert_eq!(fx.run(&profile).await.unwrap(), CycleOutcome::NoDifference);
        let after = fx.store.calls();
        assert_eq!(after.writes(), before.writes());
        assert_eq!(fx.store.ops_for(LOCK_KEY).len(), lock_ops);
    }

    #[tokio::test]
    async fn test_subdir_prefixes_remote_keys() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        let mut profile = fx.profile();
        profile.subdir = Some("site".to_string());

        fx.run(&profile).await.unwrap();
        assert!(fx.store.object("site/images/a.jpg").is_some());
        assert!(fx.remote_manifest().files.contains_key("images/a.jpg"));
    }

    #[tokio::test]
    async fn test_missing_local_root_is_an_error() {
        let fx = Fixture::new();
        let profile = SyncProfile::new("dev-a", fx.local.path().join("missing"));
        fx.store.insert(
            MANIFEST_KEY,
            Manifest::empty("dev-b")
                .successor("dev-b", &FileIndex::from([(
                    "images/x.jpg".to_string(),
                    FileRecord {
                        rel_path: "images/x.jpg".to_string(),
                        size: 1,
                        mtime_utc: utc_now_iso(),
                        checksum: "h".to_string(),
                        transfer_checksum: "h".to_string(),
                        ext: ".jpg".to_string(),
                        modified_by_device_id: "dev-b".to_string(),
                        deleted: 0,
                    },
                )]))
                .to_vec()
                .unwrap(),
        );

        assert!(matches!(fx.run(&profile).await, Err(SyncError::Config(_))));
        assert_eq!(fx.store.calls().writes(), 0);
    }

    #[tokio::test]
    async fn test_foreign_live_lock_skips_cycle() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        let profile = fx.profile();
        let lease = LeaseLock::new("dev-b", 0, chrono::Duration::minutes(15), "abcd1234".into(), Utc::now());
        fx.store.insert(LOCK_KEY, serde_json::to_vec(&lease).unwrap());

        let outcome = fx.run(&profile).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::LockHeld { ref owner, .. } if owner == "dev-b"));
        assert!(fx.store.object("images/a.jpg").is_none());
        assert!(fx.store.object(MANIFEST_KEY).is_none());
        assert_eq!(fx.store.calls().writes(), 0);
    }

    #[tokio::test]
    async fn test_force_upload_skips_lock_entirely() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        let mut profile = fx.profile();
        profile.force_upload_ignore_lock = true;
        let lease = LeaseLock::new("dev-b", 0, chrono::Duration::minutes(15), "abcd1234".into(), Utc::now());
        fx.store.insert(LOCK_KEY, serde_json::to_vec(&lease).unwrap());

        let outcome = fx.run(&profile).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert!(fx.store.ops_for(LOCK_KEY).is_empty());
        assert!(fx.store.object(LOCK_KEY).is_some(), "foreign lease left untouched");
    }

    #[tokio::test]
    async fn test_counts_event_emitted() {
        let fx = Fixture::new();
        fx.write("images/a.jpg", b"a");
        fx.write("images/b.jpg", b"b");

        fx.run(&fx.profile()).await.unwrap();
        let snap = fx.events.snapshot();
        assert_eq!((snap.upload, snap.download, snap.delete), (2, 0, 0));
        assert_eq!(snap.current_file, None);
    }
}
