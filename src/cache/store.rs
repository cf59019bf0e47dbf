use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::cache::entry::{epoch_secs, CacheEntry};
use crate::response::SharedResponse;

/// Result of a cache lookup: the response (if the key exists), whether the
/// entry is still within its validity window, and an opaque entry handle
/// the caller may lock to lease the entry across its own critical section.
pub struct CacheHit {
    pub response: Option<SharedResponse>,
    pub valid: bool,
    pub entry: Option<Arc<CacheEntry>>,
}

/// Keyed store of response artifacts.
///
/// The map is guarded by a process-wide `RwLock`; per-entry leases live on
/// the entries themselves (see [`CacheEntry`]). Writers use last-writer-wins
/// semantics.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up `key` under the map read lock.
    ///
    /// A present entry is returned even when stale; `valid` tells the
    /// caller whether the response can be served as-is or must be
    /// regenerated. A missing key yields `(None, false, None)`.
    pub fn get(&self, key: &str) -> CacheHit {
        let entries = self.entries.read().expect("response cache lock poisoned");
        match entries.get(key) {
            Some(entry) => {
                let valid = entry.is_valid_at(epoch_secs());
                debug!(key = %key, valid = valid, "cache hit");
                CacheHit {
                    response: Some(entry.response()),
                    valid,
                    entry: Some(entry.clone()),
                }
            }
            None => {
                debug!(key = %key, "cache miss");
                CacheHit {
                    response: None,
                    valid: false,
                    entry: None,
                }
            }
        }
    }

    /// Upsert `key` under the map write lock and return the entry handle
    /// plus whether this was a new insertion.
    ///
    /// On update the previous response handle is dropped (freeing the
    /// response once the last holder releases it) and the timestamp is
    /// refreshed when a validity window is given. The swap itself runs
    /// under the entry's write lease, acquired after the map lock has been
    /// released.
    pub fn put(
        &self,
        key: &str,
        response: SharedResponse,
        validity: Option<u64>,
    ) -> (Arc<CacheEntry>, bool) {
        let now = epoch_secs();
        let (entry, inserted) = {
            let mut entries = self.entries.write().expect("response cache lock poisoned");
            match entries.get(key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let entry = Arc::new(CacheEntry::new(response.clone(), validity, now));
                    entries.insert(key.to_string(), entry.clone());
                    (entry, true)
                }
            }
        };
        if inserted {
            info!(key = %key, validity = ?validity, "cache entry inserted");
        } else {
            entry.lock(true);
            entry.refresh(response, validity, now);
            entry.unlock();
            debug!(key = %key, validity = ?validity, "cache entry updated");
        }
        (entry, inserted)
    }

    /// Drop the entry for `key`, if any.
    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.write().expect("response cache lock poisoned");
        if entries.remove(key).is_some() {
            debug!(key = %key, "cache entry removed");
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("response cache lock poisoned");
        entries.clear();
        info!("response cache cleared");
    }

    /// Whether `key` exists and is within its validity window.
    pub fn is_valid(&self, key: &str) -> bool {
        let entries = self.entries.read().expect("response cache lock poisoned");
        entries
            .get(key)
            .map(|e| e.is_valid_at(epoch_secs()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("response cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
