use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::response::SharedResponse;

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Read,
    Write,
}

#[derive(Default)]
struct RwState {
    readers: usize,
    writer: bool,
}

/// A reader/writer lock that tolerates re-acquisition by the holding thread.
///
/// The platform primitive is not reentrant, so holders are tracked in a set
/// of thread identities guarded by a short mutex. `lock` on a thread already
/// recorded returns immediately without touching the underlying state; the
/// matching `unlock` removes the record and performs the real release, and
/// any further `unlock` from that thread is a no-op. The rendezvous between
/// "did I already lock?" and "acquire now" is serialised by the holder
/// mutex, which is released before blocking on the acquisition itself.
///
/// There is no atomic upgrade: a holder that needs to move from read to
/// write must release and re-acquire.
pub struct ReentrantRwLock {
    state: Mutex<RwState>,
    cond: Condvar,
    holders: Mutex<HashMap<ThreadId, LockMode>>,
}

impl Default for ReentrantRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrantRwLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RwState::default()),
            cond: Condvar::new(),
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire in the requested mode, or return immediately if this thread
    /// already holds the lock in any mode.
    pub fn lock(&self, write: bool) {
        let tid = thread::current().id();
        let mode = if write { LockMode::Write } else { LockMode::Read };
        {
            let mut holders = self.holders.lock().expect("lock holder set poisoned");
            if holders.contains_key(&tid) {
                return;
            }
            holders.insert(tid, mode);
        }
        let mut state = self.state.lock().expect("rwlock state poisoned");
        match mode {
            LockMode::Write => {
                while state.writer || state.readers > 0 {
                    state = self.cond.wait(state).expect("rwlock state poisoned");
                }
                state.writer = true;
            }
            LockMode::Read => {
                while state.writer {
                    state = self.cond.wait(state).expect("rwlock state poisoned");
                }
                state.readers += 1;
            }
        }
    }

    /// Release this thread's lease, if it holds one.
    pub fn unlock(&self) {
        let tid = thread::current().id();
        let mode = {
            let mut holders = self.holders.lock().expect("lock holder set poisoned");
            holders.remove(&tid)
        };
        if let Some(mode) = mode {
            let mut state = self.state.lock().expect("rwlock state poisoned");
            match mode {
                LockMode::Write => state.writer = false,
                LockMode::Read => state.readers -= 1,
            }
            self.cond.notify_all();
        }
    }
}

struct Slot {
    response: SharedResponse,
    ts: Option<u64>,
    validity: Option<u64>,
}

/// One cached response plus its validity window and lease lock.
///
/// The entry lock guards the response swap only, never the response's
/// internal state, which stays the response's own business.
pub struct CacheEntry {
    slot: Mutex<Slot>,
    lock: ReentrantRwLock,
}

impl CacheEntry {
    pub(crate) fn new(response: SharedResponse, validity: Option<u64>, now: u64) -> Self {
        Self {
            slot: Mutex::new(Slot {
                response,
                ts: validity.map(|_| now),
                validity,
            }),
            lock: ReentrantRwLock::new(),
        }
    }

    pub fn lock(&self, write: bool) {
        self.lock.lock(write);
    }

    pub fn unlock(&self) {
        self.lock.unlock();
    }

    /// The currently installed response.
    pub fn response(&self) -> SharedResponse {
        self.slot.lock().expect("cache entry slot poisoned").response.clone()
    }

    pub(crate) fn refresh(&self, response: SharedResponse, validity: Option<u64>, now: u64) {
        let mut slot = self.slot.lock().expect("cache entry slot poisoned");
        slot.response = response;
        if validity.is_some() {
            slot.ts = Some(now);
        }
        slot.validity = validity;
    }

    /// Validity relative to a supplied clock value (unix seconds).
    pub fn is_valid_at(&self, now: u64) -> bool {
        let slot = self.slot.lock().expect("cache entry slot poisoned");
        match (slot.validity, slot.ts) {
            (None, _) => true,
            (Some(validity), Some(ts)) => now.saturating_sub(ts) <= validity,
            (Some(_), None) => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(epoch_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::TextResponse;

    #[test]
    fn reentrant_lock_is_a_noop_for_the_holder() {
        let lock = ReentrantRwLock::new();
        lock.lock(false);
        lock.lock(true);
        lock.lock(false);
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn unlock_without_lock_is_a_noop() {
        let lock = ReentrantRwLock::new();
        lock.unlock();
        lock.lock(true);
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn validity_window_relative_to_clock() {
        let entry = CacheEntry::new(TextResponse::new("x").shared(), Some(2), 100);
        assert!(entry.is_valid_at(100));
        assert!(entry.is_valid_at(102));
        assert!(!entry.is_valid_at(103));
    }

    #[test]
    fn no_validity_means_always_valid() {
        let entry = CacheEntry::new(TextResponse::new("x").shared(), None, 100);
        assert!(entry.is_valid_at(u64::MAX));
    }

    #[test]
    fn refresh_restarts_the_window() {
        let entry = CacheEntry::new(TextResponse::new("a").shared(), Some(2), 100);
        assert!(!entry.is_valid_at(200));
        entry.refresh(TextResponse::new("b").shared(), Some(2), 200);
        assert!(entry.is_valid_at(201));
    }
}
