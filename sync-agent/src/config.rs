//! Configuration management for the sync agent.
//!
//! Loads configuration from a TOML file. Every section has defaults so a
//! partial file (or none at all) still produces a usable `Config`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::utils::errors::{Result, SyncError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable device identifier (derived from the hostname when unset)
    #[serde(default)]
    pub id: Option<String>,

    /// Directory for the manifest cache, profile record and scan ledger
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Local root that is mirrored to the remote store
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Remote key prefix for uploaded content
    #[serde(default)]
    pub subdir: Option<String>,

    /// Minutes between cycles (minimum 1)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_minutes: u64,

    /// Skip the lease protocol entirely (manual recovery only)
    #[serde(default)]
    pub force_upload_ignore_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Which object store implementation to use
    #[serde(default)]
    pub backend: BackendKind,

    /// Base URL of the HTTP object endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Bucket / container name
    #[serde(default)]
    pub bucket: String,

    /// Public download domain, used only to render URLs in log lines
    #[serde(default)]
    pub domain: Option<String>,

    /// Bearer token for the HTTP backend
    #[serde(default)]
    pub token: Option<String>,

    /// Root directory for the directory backend
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Http,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease lifetime in minutes
    #[serde(default = "default_lock_ttl")]
    pub ttl_minutes: i64,

    /// Extra minutes past expiry before a foreign lease may be reclaimed
    #[serde(default = "default_lock_grace")]
    pub grace_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the local control API
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Listen address for the control API
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

// Default values
fn default_data_dir() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("sync-agent")
}

fn default_local_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_scan_interval() -> u64 {
    5
}

fn default_lock_ttl() -> i64 {
    15
}

fn default_lock_grace() -> i64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9991))
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: None,
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            subdir: None,
            scan_interval_minutes: default_scan_interval(),
            force_upload_ignore_lock: false,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: String::new(),
            bucket: String::new(),
            domain: None,
            token: None,
            root: None,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_lock_ttl(),
            grace_minutes: default_lock_grace(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.lock.ttl_minutes <= 0 {
            return Err(SyncError::Config("lock.ttl_minutes must be positive".into()));
        }
        if self.lock.grace_minutes < 0 {
            return Err(SyncError::Config("lock.grace_minutes must not be negative".into()));
        }
        if self.remote.backend == BackendKind::Directory && self.remote.root.is_none() {
            return Err(SyncError::Config(
                "remote.root is required for the directory backend".into(),
            ));
        }
        Ok(())
    }

    /// The configured device id, or one derived from this host.
    pub fn device_id(&self) -> String {
        match self.device.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_device_id(),
        }
    }

    /// Build the per-binding sync profile consumed by the engine.
    pub fn sync_profile(&self) -> SyncProfile {
        SyncProfile {
            device_id: self.device_id(),
            local_dir: self.profile.local_dir.clone(),
            subdir: normalize_subdir(self.profile.subdir.as_deref()),
            scan_interval_minutes: self.profile.scan_interval_minutes.max(1),
            force_upload_ignore_lock: self.profile.force_upload_ignore_lock,
            bucket: self.remote.bucket.clone(),
            domain: self.remote.domain.clone().filter(|d| !d.trim().is_empty()),
            lock_ttl_minutes: self.lock.ttl_minutes,
            lock_grace_minutes: self.lock.grace_minutes,
        }
    }
}

/// Everything one engine run needs to know about its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProfile {
    pub device_id: String,
    pub local_dir: PathBuf,
    /// Remote key prefix, already trimmed of leading/trailing separators
    pub subdir: Option<String>,
    pub scan_interval_minutes: u64,
    pub force_upload_ignore_lock: bool,
    pub bucket: String,
    pub domain: Option<String>,
    pub lock_ttl_minutes: i64,
    pub lock_grace_minutes: i64,
}

impl SyncProfile {
    /// A profile with default policy for the given device and root.
    pub fn new(device_id: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id: device_id.into(),
            local_dir: local_dir.into(),
            subdir: None,
            scan_interval_minutes: default_scan_interval(),
            force_upload_ignore_lock: false,
            bucket: String::new(),
            domain: None,
            lock_ttl_minutes: default_lock_ttl(),
            lock_grace_minutes: default_lock_grace(),
        }
    }

    /// Wait between cycles, in seconds.
    pub fn interval_secs(&self) -> u64 {
        self.scan_interval_minutes.max(1).saturating_mul(60)
    }

    /// Remote object key for a scanned relative path.
    pub fn remote_key(&self, rel_path: &str) -> String {
        match &self.subdir {
            Some(prefix) => format!("{}/{}", prefix, rel_path),
            None => rel_path.to_string(),
        }
    }

    /// Public URL of a scanned path, when a download domain is configured.
    pub fn public_url(&self, rel_path: &str) -> Option<String> {
        let domain = self.domain.as_deref()?.trim().trim_end_matches('/');
        if domain.is_empty() {
            return None;
        }
        let lower = domain.to_ascii_lowercase();
        let base = if lower.starts_with("http://") || lower.starts_with("https://") {
            domain.to_string()
        } else {
            format!("https://{}", domain)
        };
        Some(format!("{}/{}", base, self.remote_key(rel_path).replace('\\', "/")))
    }
}

/// Strip surrounding whitespace and path separators; empty means no prefix.
pub fn normalize_subdir(subdir: Option<&str>) -> Option<String> {
    let trimmed = subdir?.trim().trim_matches(|c| c == '/' || c == '\\');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn derive_device_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty());

    match host {
        Some(host) => {
            let fingerprint = format!("{}|{}|{}", host, std::env::consts::OS, std::env::consts::ARCH);
            let digest = Sha256::digest(fingerprint.as_bytes());
            format!("dev-{}", &format!("{:x}", digest)[..16])
        }
        None => uuid::Uuid::new_v4().to_string(),
    }
}
