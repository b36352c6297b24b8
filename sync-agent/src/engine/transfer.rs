//! Transfer and manifest-rewrite phase.
//!
//! Runs only while the cycle holds the lease (or force-override is on).
//! Individual transfer failures are logged and skipped; the batch always
//! runs to the end and a new manifest is always attempted.

use bytes::Bytes;

use crate::config::SyncProfile;
use crate::diff::DiffResult;
use crate::events::{EventBus, LogLevel, SyncEvent};
use crate::manifest::{FileIndex, Manifest, ResolvedManifest, MANIFEST_KEY};
use crate::state::{ManifestCache, ProfileKey};
use crate::store::ObjectStore;

/// What one transfer phase achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub uploaded: Vec<String>,
    pub failed_uploads: Vec<String>,
    /// Upload candidates that disappeared before they could be sent
    pub vanished: Vec<String>,
    pub deleted: Vec<String>,
    pub failed_deletes: Vec<String>,
    /// Sequence of the published manifest, if publishing succeeded
    pub manifest_seq: Option<u64>,
}

pub struct TransferPhase<'a> {
    pub store: &'a dyn ObjectStore,
    pub events: &'a EventBus,
    pub profile: &'a SyncProfile,
    pub cache: &'a ManifestCache,
    pub profile_key: &'a ProfileKey,
}

impl TransferPhase<'_> {
    pub async fn run(
        &self,
        diff: &DiffResult,
        local: &FileIndex,
        previous: &ResolvedManifest,
    ) -> TransferReport {
        let mut report = TransferReport::default();

        for rel in &diff.to_upload {
            self.announce(Some(rel));
            self.upload(rel, &mut report).await;
        }

        for rel in &diff.to_delete_remote {
            self.announce(Some(rel));
            self.delete(rel, &mut report).await;
        }

        self.announce(None);

        // The new manifest mirrors the scan even when some transfers failed;
        // the next cycle sees the mismatch only if the checksum changes.
        let manifest = previous.manifest.successor(&self.profile.device_id, local);
        if self.publish(&manifest, previous.freshness.as_deref()).await {
            report.manifest_seq = Some(manifest.manifest_seq);
        }

        report
    }

    fn announce(&self, rel: Option<&str>) {
        self.events.emit(SyncEvent::CurrentFile {
            path: rel.map(str::to_string),
        });
    }

    fn describe(&self, rel: &str) -> String {
        match self.profile.public_url(rel) {
            Some(url) => format!("{} -> {}", rel, url),
            None => rel.to_string(),
        }
    }

    async fn upload(&self, rel: &str, report: &mut TransferReport) {
        let local_path = rel
            .split('/')
            .fold(self.profile.local_dir.clone(), |p, seg| p.join(seg));

        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            self.events
                .log(LogLevel::Debug, format!("Skipped vanished file: {}", rel));
            report.vanished.push(rel.to_string());
            return;
        }

        let key = self.profile.remote_key(rel);
        match self.store.put_file(&key, &local_path).await {
            Ok(()) => {
                self.events
                    .log(LogLevel::Info, format!("Uploaded: {}", self.describe(rel)));
                report.uploaded.push(rel.to_string());
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Warn, format!("Upload failed: {} ({})", rel, e));
                report.failed_uploads.push(rel.to_string());
            }
        }
    }

    async fn delete(&self, rel: &str, report: &mut TransferReport) {
        let key = self.profile.remote_key(rel);
        match self.store.delete(&key).await {
            Ok(()) => {
                self.events
                    .log(LogLevel::Info, format!("Deleted remote: {}", self.describe(rel)));
                report.deleted.push(rel.to_string());
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Warn, format!("Remote delete failed: {} ({})", rel, e));
                report.failed_deletes.push(rel.to_string());
            }
        }
    }

    async fn publish(&self, manifest: &Manifest, freshness: Option<&str>) -> bool {
        let body = match manifest.to_vec() {
            Ok(body) => body,
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to encode manifest: {}", e));
                return false;
            }
        };

        if let Err(e) = self.store.put(MANIFEST_KEY, Bytes::from(body)).await {
            self.events
                .log(LogLevel::Error, format!("Manifest upload failed: {}", e));
            return false;
        }

        self.events.log(
            LogLevel::Info,
            format!(
                "Manifest updated (seq {}, {} files)",
                manifest.manifest_seq,
                manifest.files.len()
            ),
        );

        if let Err(e) = self.cache.save(self.profile_key, manifest, freshness) {
            self.events
                .log(LogLevel::Warn, format!("Failed to cache manifest: {}", e));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Scanner;
    use crate::manifest::{ManifestSource, MANIFEST_KEY};
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct Fixture {
        local: TempDir,
        data: TempDir,
        store: MemoryStore,
        events: EventBus,
        profile: SyncProfile,
        key: ProfileKey,
    }

    impl Fixture {
        fn new() -> Self {
            let local = TempDir::new().unwrap();
            let profile = SyncProfile::new("dev-a", local.path());
            Self {
                key: ProfileKey::for_profile(&profile),
                local,
                data: TempDir::new().unwrap(),
                store: MemoryStore::new(),
                events: EventBus::new(),
                profile,
            }
        }

        fn write(&self, rel: &str, body: &[u8]) {
            std::fs::write(self.local.path().join(rel), body).unwrap();
        }

        async fn run(&self, diff: DiffResult, local: &FileIndex) -> (TransferReport, ManifestCache) {
            let cache = ManifestCache::new(self.data.path());
            let previous = ResolvedManifest {
                manifest: Manifest::empty("dev-b"),
                freshness: Some("\"rev-9\"".to_string()),
                source: ManifestSource::Remote,
            };
            let phase = TransferPhase {
                store: &self.store,
                events: &self.events,
                profile: &self.profile,
                cache: &cache,
                profile_key: &self.key,
            };
            let report = phase.run(&diff, local, &previous).await;
            (report, cache)
        }
    }

    #[tokio::test]
    async fn test_vanished_file_is_skipped() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        fx.write("gone.jpg", b"g");
        let local = Scanner::new(fx.local.path(), "dev-a").index();
        std::fs::remove_file(fx.local.path().join("gone.jpg")).unwrap();

        let diff = DiffResult {
            to_upload: vec!["a.jpg".into(), "gone.jpg".into()],
            ..Default::default()
        };
        let (report, _) = fx.run(diff, &local).await;

        assert_eq!(report.uploaded, vec!["a.jpg"]);
        assert_eq!(report.vanished, vec!["gone.jpg"]);
        assert!(report.failed_uploads.is_empty());
        assert_eq!(fx.store.ops_for("gone.jpg"), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn test_failed_delete_continues() {
        let fx = Fixture::new();
        fx.store.insert("x.jpg", &b"x"[..]);
        fx.store.insert("y.jpg", &b"y"[..]);
        fx.store.fail_key("x.jpg");

        let diff = DiffResult {
            to_delete_remote: vec!["x.jpg".into(), "y.jpg".into()],
            ..Default::default()
        };
        let (report, _) = fx.run(diff, &FileIndex::new()).await;

        assert_eq!(report.failed_deletes, vec!["x.jpg"]);
        assert_eq!(report.deleted, vec!["y.jpg"]);
        assert_eq!(report.manifest_seq, Some(1));
        assert_eq!(fx.events.snapshot().current_file, None);
    }

    #[tokio::test]
    async fn test_published_manifest_is_cached_with_previous_token() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        let local = Scanner::new(fx.local.path(), "dev-a").index();
        let diff = DiffResult {
            to_upload: vec!["a.jpg".into()],
            ..Default::default()
        };

        let (report, cache) = fx.run(diff, &local).await;
        assert_eq!(report.manifest_seq, Some(1));

        let cached = cache.load(&fx.key).unwrap();
        assert_eq!(cached.manifest.manifest_seq, 1);
        assert_eq!(cached.manifest.files, local);
        assert_eq!(cached.etag.as_deref(), Some("\"rev-9\""));
    }

    #[tokio::test]
    async fn test_manifest_upload_failure_leaves_cache_alone() {
        let fx = Fixture::new();
        fx.write("a.jpg", b"a");
        fx.store.fail_key(MANIFEST_KEY);
        let local = Scanner::new(fx.local.path(), "dev-a").index();
        let diff = DiffResult {
            to_upload: vec!["a.jpg".into()],
            ..Default::default()
        };

        let (report, cache) = fx.run(diff, &local).await;
        assert_eq!(report.uploaded, vec!["a.jpg"]);
        assert_eq!(report.manifest_seq, None);
        assert!(cache.load(&fx.key).is_none());
    }
}
