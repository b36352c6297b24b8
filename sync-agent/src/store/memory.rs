//! In-process object store.
//!
//! Keeps objects in a map and counts every operation, so tests can assert on
//! exactly which remote calls a cycle made.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{validate_key, ObjectStore, StoreError, StoredObject};

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub put: AtomicUsize,
    pub get: AtomicUsize,
    pub delete: AtomicUsize,
    pub stat: AtomicUsize,
}

/// Snapshot of [`CallCounts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub put: usize,
    pub get: usize,
    pub delete: usize,
    pub stat: usize,
}

impl CallSnapshot {
    /// Number of mutating calls (put + delete).
    pub fn writes(&self) -> usize {
        self.put + self.delete
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    failing: Mutex<HashSet<String>>,
    calls: CallCounts,
    /// Per-key access log, in call order
    log: Mutex<Vec<(&'static str, String)>>,
    revision: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `key` fail with an `Unavailable` error.
    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string());
    }

    /// Clear a failure injected with [`MemoryStore::fail_key`].
    pub fn heal_key(&self, key: &str) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    pub fn calls(&self) -> CallSnapshot {
        CallSnapshot {
            put: self.calls.put.load(Ordering::SeqCst),
            get: self.calls.get.load(Ordering::SeqCst),
            delete: self.calls.delete.load(Ordering::SeqCst),
            stat: self.calls.stat.load(Ordering::SeqCst),
        }
    }

    /// Operations recorded against `key`, e.g. `["get", "put", "delete"]`.
    pub fn ops_for(&self, key: &str) -> Vec<&'static str> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, k)| k == key)
            .map(|(op, _)| *op)
            .collect()
    }

    /// Current body of `key`, bypassing counters.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|(body, _)| body.clone())
    }

    /// All stored keys, bypassing counters.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Seed an object without counting it as a call.
    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        let etag = self.next_etag();
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (body.into(), etag));
    }

    fn next_etag(&self) -> String {
        format!("\"rev-{}\"", self.revision.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, op: &'static str, key: &str) -> Result<(), StoreError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((op, key.to_string()));
        validate_key(key)?;
        if self.failing.lock().unwrap_or_else(|e| e.into_inner()).contains(key) {
            return Err(StoreError::Unavailable(format!("injected failure for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        self.calls.put.fetch_add(1, Ordering::SeqCst);
        self.record("put", key)?;
        self.insert(key, body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.record("get", key)?;
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        Ok(objects.get(key).map(|(body, etag)| StoredObject {
            body: body.clone(),
            freshness: Some(etag.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.record("delete", key)?;
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<bool, StoreError> {
        self.calls.stat.fetch_add(1, Ordering::SeqCst);
        self.record("stat", key)?;
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key))
    }
}
