//! Pending-start table
//!
//! Bridges the start event and the end event of one logical operation. Keyed
//! by [`Identity`], valued by the start timestamp. Mirrors the kernel's
//! `PENDING_STARTS` hash map, including its bounded capacity: a start for a
//! new identity is dropped once the whole table holds `capacity` entries,
//! like a failed `bpf_map_update_elem` on a full map.
//!
//! Sharded so that unrelated identities rarely touch the same lock, and every
//! critical section is a single hash map operation. The entry count is one
//! atomic shared by all shards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::clock::Clock;
use crate::domain::Identity;

const SHARDS: usize = 16;

/// Concurrent `identity → start_ns` store
#[derive(Debug)]
pub struct PendingStarts<C> {
    clock: C,
    shards: Box<[Mutex<HashMap<u64, u64>>]>,
    capacity: usize,
    entries: AtomicUsize,
}

impl<C: Clock> PendingStarts<C> {
    /// Create a table holding at most `capacity` in-flight starts
    pub fn new(clock: C, capacity: usize) -> Self {
        let shards = (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self { clock, shards, capacity, entries: AtomicUsize::new(0) }
    }

    /// Claim room for one new entry; false if the table is full
    fn reserve(&self) -> bool {
        self.entries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, id: Identity) -> MutexGuard<'_, HashMap<u64, u64>> {
        // Thread IDs are dense; the low bits spread well
        let index = (id.0 as usize) % SHARDS;
        // A panic while holding the lock cannot leave a HashMap half-updated
        self.shards[index].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `now()` for `id`, superseding any unmatched earlier start
    ///
    /// Returns false if the table is full and `id` had no entry.
    pub fn begin(&self, id: Identity) -> bool {
        let now = self.clock.now();
        let mut shard = self.shard(id);
        // Reserved under the shard lock so one identity is never counted twice
        if !shard.contains_key(&id.0) && !self.reserve() {
            return false;
        }
        shard.insert(id.0, now);
        true
    }

    /// Take the start for `id` and return the elapsed time
    ///
    /// `None` if `id` never started (or started before the hooks existed).
    /// The difference wraps, as `now - start` does in `lat_end`.
    pub fn end(&self, id: Identity) -> Option<u64> {
        let now = self.clock.now();
        let start = self.shard(id).remove(&id.0)?;
        self.entries.fetch_sub(1, Ordering::AcqRel);
        Some(now.wrapping_sub(start))
    }

    /// Number of in-flight starts
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
