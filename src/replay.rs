//! Time-windowed replay cache guarding against Sphinx packet re-injection.
//!
//! Insertion is the only entry point — there is no separate "contains"
//! check, so a concurrent insert of the same tag can never pass between a
//! check and a set (spec §4.2: insert-only, compare-and-set).

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Result of attempting to record a replay tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Tag was not previously present (within the live window); recorded now.
    Inserted,
    /// Tag is already present and still live; this is a replay.
    AlreadyPresent,
}

/// Insert-only, time-windowed set of replay tags.
///
/// Backed by `DashMap` for lock-striped concurrent access; entries older
/// than `window` are lazily reaped on insert and by the periodic
/// `sweep` the pipeline runs on a timer.
pub struct ReplayCache {
    entries: DashMap<[u8; 32], Instant>,
    window: Duration,
}

impl ReplayCache {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    /// Atomically record `tag` if it is not already present and live.
    ///
    /// Uses `DashMap::entry` so the check-and-set is a single atomic
    /// operation under the shard lock, not two round trips.
    pub fn insert(&self, tag: [u8; 32]) -> InsertOutcome {
        let now = Instant::now();
        match self.entries.entry(tag) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(now);
                InsertOutcome::Inserted
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) >= self.window {
                    slot.insert(now);
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::AlreadyPresent
                }
            }
        }
    }

    /// Remove entries older than the configured window. Intended to be
    /// called periodically so memory does not grow unbounded between
    /// inserts for tags that are never seen again.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, seen_at| now.duration_since(*seen_at) < self.window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
