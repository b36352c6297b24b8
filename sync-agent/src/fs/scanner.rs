//! Local tree scanning with a fixed inclusion policy.
//!
//! The agent publishes site images and assets, not arbitrary files, so the
//! policy is deliberately not configurable: only a handful of top-level
//! folders are traversed, bookkeeping directories are pruned everywhere, and
//! document/archive/executable formats are never picked up.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::checksum::file_checksum;
use crate::manifest::{FileIndex, FileRecord};

/// Directory names pruned at any depth (exact match).
const PRUNED_DIRS: &[&str] = &["__sync", ".stfolder"];

/// Top-level folders that are traversed (compared case-insensitively).
const ALLOWED_TOP_LEVEL: &[&str] = &["index.files", "new", "images", "assets", "android"];

/// File names that are never synced (lower-case).
const SKIPPED_FILE_NAMES: &[&str] = &[".stfolder", ".htaccess"];

/// Extensions that are never synced (lower-case, with the dot).
const SKIPPED_EXTENSIONS: &[&str] = &[
    ".exe", ".txt", ".ini", ".xls", ".xlsx", ".doc", ".docx", ".ppt", ".pptx", ".ink", ".apk",
    ".zip", ".pdf", ".tmp",
];

/// Scans one local root into [`FileRecord`]s.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    device_id: String,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            device_id: device_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree. Call again to rescan from the start.
    ///
    /// Unreadable entries are skipped; they never abort the scan.
    pub fn iter(&self) -> impl Iterator<Item = FileRecord> + '_ {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(keep_entry)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir() && keep_file_name(entry))
            .filter_map(move |entry| match self.record_for(&entry) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    None
                }
            })
    }

    /// Scan everything into an index keyed by relative path.
    pub fn index(&self) -> FileIndex {
        self.iter().map(|r| (r.rel_path.clone(), r)).collect()
    }

    fn record_for(&self, entry: &DirEntry) -> std::io::Result<Option<FileRecord>> {
        let path = entry.path();

        // Symlinks are followed to regular files only
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let Some(rel_path) = normalize_rel_path(path, &self.root) else {
            return Ok(None);
        };

        let mtime: DateTime<Utc> = metadata.modified()?.into();
        let checksum = file_checksum(path)?;

        Ok(Some(FileRecord {
            ext: extension_tag(path),
            rel_path,
            size: metadata.len(),
            mtime_utc: mtime.to_rfc3339_opts(SecondsFormat::Micros, true),
            transfer_checksum: checksum.clone(),
            checksum,
            modified_by_device_id: self.device_id.clone(),
            deleted: 0,
        }))
    }
}

/// Directory pruning: bookkeeping dirs everywhere, allow-list at the top.
fn keep_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if PRUNED_DIRS.contains(&&*name) {
        return false;
    }
    entry.depth() > 1 || ALLOWED_TOP_LEVEL.contains(&name.to_lowercase().as_str())
}

fn keep_file_name(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy().to_lowercase();
    if SKIPPED_FILE_NAMES.contains(&name.as_str()) {
        return false;
    }
    !SKIPPED_EXTENSIONS.contains(&extension_tag(entry.path()).as_str())
}

/// Lower-cased extension including the dot, or empty (also for a trailing dot).
fn extension_tag(path: &Path) -> String {
    path.extension()
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Forward-slash path relative to `root`, or `None` if it is not below it.
fn normalize_rel_path(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() || parts.first().is_some_and(|p| p == "__sync") {
        return None;
    }
    Some(parts.join("/"))
}
