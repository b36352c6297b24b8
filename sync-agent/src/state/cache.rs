//! Per-profile manifest cache.
//!
//! Holds the last manifest this agent wrote (or resolved) together with the
//! freshness token it was paired with. Only ever used to out-vote a stale
//! remote read; never treated as authoritative on its own merits.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::profile::ProfileKey;
use crate::manifest::Manifest;
use crate::utils::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub manifest: Manifest,
    #[serde(default)]
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ManifestCache {
    dir: PathBuf,
}

impl ManifestCache {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.to_path_buf(),
        }
    }

    fn file_for(&self, key: &ProfileKey) -> PathBuf {
        self.dir.join(format!("manifest_cache_{}.json", key))
    }

    /// Cached entry for `key`; missing or unreadable files count as absent.
    pub fn load(&self, key: &ProfileKey) -> Option<CacheEntry> {
        let path = self.file_for(key);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read manifest cache {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring corrupt manifest cache {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, key: &ProfileKey, manifest: &Manifest, etag: Option<&str>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            manifest: manifest.clone(),
            etag: etag.map(str::to_string),
        };
        let path = self.file_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_per_profile() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = ManifestCache::new(dir.path());
        let a = ProfileKey::compute("a", None, Path::new("/x"), None);
        let b = ProfileKey::compute("b", None, Path::new("/x"), None);

        assert!(cache.load(&a).is_none());

        let mut manifest = Manifest::empty("dev-a");
        manifest.manifest_seq = 4;
        cache.save(&a, &manifest, Some("\"etag-1\""))?;

        let entry = cache.load(&a).expect("cached entry");
        assert_eq!(entry.manifest, manifest);
        assert_eq!(entry.etag.as_deref(), Some("\"etag-1\""));
        assert!(cache.load(&b).is_none());
        Ok(())
    }

    #[test]
    fn test_corrupt_cache_is_absent() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = ManifestCache::new(dir.path());
        let key = ProfileKey::compute("a", None, Path::new("/x"), None);
        std::fs::write(cache.file_for(&key), b"not json")?;

        assert!(cache.load(&key).is_none());
        Ok(())
    }
}
