// ============================================
// File: crates/blemesh-node/src/services/replay.rs
// ============================================
//! # Replay Protection and Message Cache
//!
//! ## Main Functionality
//! - `ReplayList`: last accepted sequence number per source, bounded
//! - `MessageCache`: recently seen `(src, seq)` pairs, drops duplicates
//!   before relay and local processing
//!
//! ## ⚠️ Important Note for Next Developer
//! - A full replay list rejects unknown sources; entries are never evicted
//! - Accepted entries are written back in batches, see `take_pending`
//!
//! ## Last Modified
//! v0.1.0 - Initial replay protection

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tracing::{trace, warn};

use blemesh_bearer::traits::ReplayRecord;
use blemesh_common::types::Address;
use blemesh_core::error::CoreError;

use crate::error::Result;

// ============================================
// ReplayList
// ============================================

/// Delay between the first unsaved replay entry and its write.
pub const REPLAY_STORE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct ReplayEntry {
    seq: u32,
    old_iv: bool,
}

/// Bounded replay protection list.
#[derive(Debug)]
pub struct ReplayList {
    entries: HashMap<Address, ReplayEntry>,
    pending: HashSet<Address>,
    capacity: usize,
}

impl ReplayList {
    /// Creates an empty list.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            pending: HashSet::new(),
            capacity,
        }
    }

    /// Checks a PDU and records it when accepted.
    ///
    /// `old_iv` is set when the PDU used the previous IV index.
    ///
    /// # Errors
    /// `ReplayDetected` for an old or repeated sequence number, or when
    /// the list is full and `src` is new.
    pub fn check_and_update(&mut self, src: Address, seq: u32, old_iv: bool) -> Result<()> {
        let replay = || CoreError::replay(src.value(), seq);

        if let Some(entry) = self.entries.get_mut(&src) {
            if old_iv && !entry.old_iv {
                trace!(src = %src, seq, "Old IV index after current one");
                return Err(replay().into());
            }
            if (!old_iv && entry.old_iv) || seq > entry.seq {
                entry.seq = seq;
                entry.old_iv = old_iv;
                self.pending.insert(src);
                return Ok(());
            }
            trace!(src = %src, seq, last = entry.seq, "Replay rejected");
            return Err(replay().into());
        }

        if self.entries.len() >= self.capacity {
            warn!(src = %src, "Replay list full");
            return Err(replay().into());
        }
        self.entries.insert(src, ReplayEntry { seq, old_iv });
        self.pending.insert(src);
        Ok(())
    }

    /// `true` while accepted entries wait to be stored.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes the entries changed since the last call.
    pub fn take_pending(&mut self) -> Vec<ReplayRecord> {
        let entries = &self.entries;
        let mut records: Vec<ReplayRecord> = self
            .pending
            .drain()
            .filter_map(|src| {
                entries.get(&src).map(|e| ReplayRecord {
                    src,
                    seq: e.seq,
                    old_iv: e.old_iv,
                })
            })
            .collect();
        records.sort_unstable_by_key(|r| r.src.value());
        records
    }

    /// Replaces the list with stored entries, up to capacity.
    pub fn load(&mut self, records: &[ReplayRecord]) {
        self.entries.clear();
        self.pending.clear();
        for record in records.iter().take(self.capacity) {
            self.entries.insert(
                record.src,
                ReplayEntry {
                    seq: record.seq,
                    old_iv: record.old_iv,
                },
            );
        }
    }

    /// Number of tracked sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no source is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every source.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

// ============================================
// MessageCache
// ============================================

/// FIFO cache of recently seen network PDUs.
#[derive(Debug)]
pub struct MessageCache {
    order: VecDeque<(Address, u32)>,
    seen: HashSet<(Address, u32)>,
    capacity: usize,
}

impl MessageCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a PDU. Returns `false` if it was already cached.
    pub fn insert(&mut self, src: Address, seq: u32) -> bool {
        if !self.seen.insert((src, seq)) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back((src, seq));
        true
    }

    /// Empties the cache.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

// ============================================
// Tests
// ============================================
