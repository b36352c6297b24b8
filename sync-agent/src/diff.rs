//! Content-hash diff between the local scan and the server index.
//!
//! Equality is path + content checksum only. There is no merge step: the
//! lease lock keeps two devices from writing at once, so conflicting edits
//! are prevented rather than reconciled.

use crate::manifest::FileIndex;

/// Work a cycle has to do, each list sorted ascending by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// New locally, or content differs from the server copy
    pub to_upload: Vec<String>,
    /// Reserved for a bidirectional mode; never populated today
    pub to_download: Vec<String>,
    /// Listed on the server but gone locally
    pub to_delete_remote: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_download.is_empty() && self.to_delete_remote.is_empty()
    }

    /// Drop remote deletions for this cycle (used right after a profile switch).
    pub fn suppress_remote_deletes(&mut self) -> usize {
        let dropped = self.to_delete_remote.len();
        self.to_delete_remote.clear();
        dropped
    }
}

/// Compare a local index with the server index.
pub fn compute_diff(local: &FileIndex, server: &FileIndex) -> DiffResult {
    // BTreeMap iteration is already path-ordered, so the output is too.
    let to_upload = local
        .iter()
        .filter(|(path, record)| {
            server
                .get(*path)
                .map_or(true, |remote| remote.checksum != record.checksum)
        })
        .map(|(path, _)| path.clone())
        .collect();

    let to_delete_remote = server
        .iter()
        .filter(|(path, record)| !record.is_deleted() && !local.contains_key(*path))
        .map(|(path, _)| path.clone())
        .collect();

    DiffResult {
        to_upload,
        to_download: Vec::new(),
        to_delete_remote,
    }
}
