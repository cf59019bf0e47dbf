//! # Response Cache Module
//!
//! Thread-safe keyed store of shared response handles with per-entry
//! validity windows and reader/writer leases.
//!
//! ## Locking discipline
//!
//! The cache map itself sits behind a process-wide `RwLock`: lookups and
//! validity checks take the read side, mutations the write side. Each entry
//! additionally carries its own [`ReentrantRwLock`] so a caller can hold a
//! response across its own critical section while other threads update the
//! map. A thread that already holds an entry's lock may re-acquire it in any
//! mode without deadlocking; the re-acquisition is a no-op and the first
//! unlock releases the lease.
//!
//! Entry locks are never acquired while the map lock is held, which keeps a
//! slow entry holder from stalling unrelated cache traffic.
//!
//! ## Validity
//!
//! An entry stores the unix timestamp of its last refresh and an optional
//! validity window in seconds. No window means the entry never expires and
//! the timestamp is ignored.

mod entry;
mod store;

pub use entry::{CacheEntry, ReentrantRwLock};
pub use store::{CacheHit, ResponseCache};
