//! Manifest types and freshness resolution.
//!
//! A manifest is a full snapshot of the synced tree, rewritten by whichever
//! device last completed a cycle with changes. The remote copy is
//! authoritative; a local cache copy exists only to out-vote a stale read
//! caused by propagation lag on the backend.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::state::cache::CacheEntry;
use crate::store::{ObjectStore, StoredObject};
use crate::utils::errors::{Result, SyncError};

/// Reserved key of the authoritative manifest.
pub const MANIFEST_KEY: &str = "__sync/manifest.json";

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Index of files keyed by normalized relative path.
pub type FileIndex = BTreeMap<String, FileRecord>;

/// Metadata for a single file, as scanned locally or listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub rel_path: String,
    pub size: u64,
    pub mtime_utc: String,
    /// Content checksum (hex SHA-256); the only field compared when diffing
    pub checksum: String,
    /// Backend content address; currently identical to `checksum`
    #[serde(default)]
    pub transfer_checksum: String,
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub modified_by_device_id: String,
    #[serde(default)]
    pub deleted: u8,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub manifest_seq: u64,
    /// RFC 3339 UTC; compared lexicographically for freshness
    #[serde(default)]
    pub generated_at_utc: String,
    #[serde(default)]
    pub generator_device_id: String,
    #[serde(default)]
    pub files: FileIndex,
}

fn default_version() -> u32 {
    MANIFEST_FORMAT_VERSION
}

/// Timestamp format shared by manifests and scanned records.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Manifest {
    /// The synthesized sequence-0 manifest used when nothing exists yet.
    pub fn empty(device_id: &str) -> Self {
        Self {
            version: MANIFEST_FORMAT_VERSION,
            manifest_seq: 0,
            generated_at_utc: utc_now_iso(),
            generator_device_id: device_id.to_string(),
            files: FileIndex::new(),
        }
    }

    /// The next full snapshot after `self`, listing exactly `files`.
    pub fn successor(&self, device_id: &str, files: &FileIndex) -> Self {
        let files = files
            .iter()
            .map(|(rel, record)| {
                let mut record = record.clone();
                record.modified_by_device_id = device_id.to_string();
                (rel.clone(), record)
            })
            .collect();

        Self {
            version: MANIFEST_FORMAT_VERSION,
            manifest_seq: self.manifest_seq + 1,
            generated_at_utc: utc_now_iso(),
            generator_device_id: device_id.to_string(),
            files,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Manifest(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Where the resolved manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    Remote,
    Cache,
    Empty,
}

#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub freshness: Option<String>,
    pub source: ManifestSource,
}

/// Pick the authoritative manifest between a remote read and the local cache.
///
/// Ties go to the cache: a read right after our own write may still return
/// the previous object.
pub fn resolve_manifest(
    remote: Option<(Manifest, Option<String>)>,
    cached: Option<CacheEntry>,
    device_id: &str,
) -> ResolvedManifest {
    match (remote, cached) {
        (Some((remote, remote_token)), Some(cache)) => {
            if cache.manifest.generated_at_utc >= remote.generated_at_utc {
                ResolvedManifest {
                    manifest: cache.manifest,
                    freshness: cache.etag,
                    source: ManifestSource::Cache,
                }
            } else {
                ResolvedManifest {
                    manifest: remote,
                    freshness: remote_token,
                    source: ManifestSource::Remote,
                }
            }
        }
        (Some((remote, remote_token)), None) => ResolvedManifest {
            manifest: remote,
            freshness: remote_token,
            source: ManifestSource::Remote,
        },
        (None, Some(cache)) => ResolvedManifest {
            manifest: cache.manifest,
            freshness: cache.etag,
            source: ManifestSource::Cache,
        },
        (None, None) => ResolvedManifest {
            manifest: Manifest::empty(device_id),
            freshness: None,
            source: ManifestSource::Empty,
        },
    }
}

/// Read the remote manifest.
///
/// A missing or unparseable object counts as absent; a transport failure is
/// returned so the cycle stops before any remote mutation.
pub async fn fetch_remote_manifest(
    store: &dyn ObjectStore,
) -> Result<Option<(Manifest, Option<String>)>> {
    let Some(StoredObject { body, freshness }) = store.get(MANIFEST_KEY).await? else {
        debug!("No remote manifest yet");
        return Ok(None);
    };

    match Manifest::from_slice(&body) {
        Ok(manifest) => {
            debug!(
                seq = manifest.manifest_seq,
                files = manifest.files.len(),
                "Fetched remote manifest"
            );
            Ok(Some((manifest, freshness)))
        }
        Err(e) => {
            warn!("Ignoring unreadable remote manifest: {}", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_at(seq: u64, ts: &str) -> Manifest {
        Manifest {
            version: 1,
            manifest_seq: seq,
            generated_at_utc: ts.to_string(),
            generator_device_id: "dev-x".to_string(),
            files: FileIndex::new(),
        }
    }

    fn cache_at(seq: u64, ts: &str) -> CacheEntry {
        CacheEntry {
            manifest: manifest_at(seq, ts),
            etag: Some("cached".to_string()),
        }
    }

    #[test]
    fn test_newer_cache_wins() {
        let resolved = resolve_manifest(
            Some((manifest_at(3, "2026-01-01T00:00:00.000000Z"), Some("remote".into()))),
            Some(cache_at(4, "2026-01-01T00:05:00.000000Z")),
            "dev-a",
        );
        assert_eq!(resolved.source, ManifestSource::Cache);
        assert_eq!(resolved.manifest.manifest_seq, 4);
        assert_eq!(resolved.freshness.as_deref(), Some("cached"));
    }

    #[test]
    fn test_tie_favors_cache() {
        let ts = "2026-01-01T00:00:00.000000Z";
        let resolved = resolve_manifest(
            Some((manifest_at(3, ts), None)),
            Some(cache_at(3, ts)),
            "dev-a",
        );
        assert_eq!(resolved.source, ManifestSource::Cache);
    }

    #[test]
    fn test_newer_remote_wins() {
        let resolved = resolve_manifest(
            Some((manifest_at(9, "2026-02-01T00:00:00.000000Z"), Some("remote".into()))),
            Some(cache_at(4, "2026-01-01T00:00:00.000000Z")),
            "dev-a",
        );
        assert_eq!(resolved.source, ManifestSource::Remote);
        assert_eq!(resolved.manifest.manifest_seq, 9);
        assert_eq!(resolved.freshness.as_deref(), Some("remote"));
    }

    #[test]
    fn test_single_source_and_empty() {
        let only_remote = resolve_manifest(Some((manifest_at(2, "t"), None)), None, "dev-a");
        assert_eq!(only_remote.source, ManifestSource::Remote);

        let only_cache = resolve_manifest(None, Some(cache_at(5, "t")), "dev-a");
        assert_eq!(only_cache.source, ManifestSource::Cache);
        assert_eq!(only_cache.manifest.manifest_seq, 5);

        let neither = resolve_manifest(None, None, "dev-a");
        assert_eq!(neither.source, ManifestSource::Empty);
        assert_eq!(neither.manifest.manifest_seq, 0);
        assert_eq!(neither.manifest.generator_device_id, "dev-a");
        assert!(neither.manifest.files.is_empty());
    }

    #[test]
    fn test_successor_is_full_snapshot() {
        let mut files = FileIndex::new();
        files.insert(
            "images/a.jpg".to_string(),
            FileRecord {
                rel_path: "images/a.jpg".to_string(),
                size: 3,
                mtime_utc: "t".to_string(),
                checksum: "h1".to_string(),
                transfer_checksum: "h1".to_string(),
                ext: ".jpg".to_string(),
                modified_by_device_id: String::new(),
                deleted: 0,
            },
        );

        let next = manifest_at(7, "t").successor("dev-b", &files);
        assert_eq!(next.manifest_seq, 8);
        assert_eq!(next.generator_device_id, "dev-b");
        assert_eq!(next.files.len(), 1);
        assert_eq!(next.files["images/a.jpg"].modified_by_device_id, "dev-b");
    }

    #[test]
    fn test_parse_with_missing_optional_fields() {
        let json = r#"{
            "version": 1,
            "manifest_seq": 12,
            "generated_at_utc": "2025-09-01T10:00:00+00:00",
            "generator_device_id": "dev-old",
            "files": {
                "new/x.png": {
                    "rel_path": "new/x.png", "size": 10, "mtime_utc": "2025-09-01T09:00:00+00:00",
                    "checksum": "abc"
                }
            }
        }"#;
        let manifest = Manifest::from_slice(json.as_bytes()).unwrap();
        assert_eq!(manifest.manifest_seq, 12);
        assert_eq!(manifest.files["new/x.png"].checksum, "abc");
        assert_eq!(manifest.files["new/x.png"].ext, "");
        assert!(!manifest.files["new/x.png"].is_deleted());

        assert!(matches!(Manifest::from_slice(b"not json"), Err(SyncError::Manifest(_))));
    }
}
