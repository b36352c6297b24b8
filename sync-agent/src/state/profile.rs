//! Sync binding fingerprint and the "last profile seen" record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{normalize_subdir, SyncProfile};
use crate::utils::errors::Result;

const STATE_FILE: &str = "profile_state.json";

/// Stable fingerprint of (bucket, domain, local root, remote prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn compute(bucket: &str, domain: Option<&str>, local_dir: &Path, subdir: Option<&str>) -> Self {
        let local = std::fs::canonicalize(local_dir)
            .or_else(|_| std::path::absolute(local_dir))
            .unwrap_or_else(|_| local_dir.to_path_buf());
        let raw = format!(
            "bucket={}|domain={}|local={}|subdir={}",
            bucket,
            domain.unwrap_or(""),
            local.display(),
            normalize_subdir(subdir).unwrap_or_default()
        );
        let digest = Sha256::digest(raw.as_bytes());
        Self(format!("{:x}", digest)[..16].to_string())
    }

    pub fn for_profile(profile: &SyncProfile) -> Self {
        Self::compute(
            &profile.bucket,
            profile.domain.as_deref(),
            &profile.local_dir,
            profile.subdir.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileState {
    last_profile_key: Option<ProfileKey>,
}

/// Persists the last profile key this agent ran with.
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    path: PathBuf,
}

impl ProfileRecord {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STATE_FILE),
        }
    }

    /// The previously saved key; unreadable state counts as none.
    pub fn load(&self) -> Option<ProfileKey> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<ProfileState>(&content) {
            Ok(state) => state.last_profile_key,
            Err(e) => {
                warn!("Ignoring corrupt {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, key: &ProfileKey) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = ProfileState {
            last_profile_key: Some(key.clone()),
        };
        std::fs::write(&self.path, serde_json::to_vec(&state)?)?;
        Ok(())
    }

    /// Record `current` and report whether it differs from the saved key.
    pub fn switch_to(&self, current: &ProfileKey) -> Result<bool> {
        let changed = self.load().as_ref() != Some(current);
        if changed {
            self.save(current)?;
        }
        Ok(changed)
    }
}
