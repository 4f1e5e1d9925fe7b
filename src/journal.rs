//! Per-store change tracking.
//!
//! Every synchronizable store keeps one [`Journal`]: a fixed table of
//! `{key, size, seq}` tuples plus a global sequence counter. Each write
//! (local or applied from a peer) bumps the counter and stamps the touched
//! object, so the set of objects changed since any snapshot falls out of a
//! single filtered scan. The table is sized once at startup and sorted by
//! key, which makes `changes_since` ascend in key order as the delta
//! encoding requires.

use alloc::vec::Vec;

/// One tracked object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct JournalEntry {
    /// Object key (buffer offset).
    pub key: u32,
    /// Object size in bytes.
    pub size: u16,
    /// Sequence number of the last write, 0 if never written.
    pub seq: u64,
}

/// Write-sequence journal for one store.
#[derive(Debug, Clone)]
pub struct Journal {
    /// Sorted by key.
    entries: Vec<JournalEntry>,
    seq_now: u64,
}

impl Journal {
    /// Build a journal over the given `(key, size)` set. Duplicate keys are
    /// collapsed.
    pub fn new(objects: impl IntoIterator<Item = (u32, u16)>) -> Self {
        let mut entries: Vec<JournalEntry> = objects
            .into_iter()
            .map(|(key, size)| JournalEntry { key, size, seq: 0 })
            .collect();

        entries.sort_by_key(|e| e.key);
        entries.dedup_by_key(|e| e.key);

        Self {
            entries,
            seq_now: 0,
        }
    }

    /// The current sequence number; strictly increases with every write.
    pub fn seq_now(&self) -> u64 {
        self.seq_now
    }

    /// Freeze the current instant. `changes_since` of the returned value is
    /// empty until the next write.
    pub fn snapshot(&self) -> u64 {
        self.seq_now
    }

    /// Record a write to `key`: bump the global sequence and stamp the
    /// entry. Returns the new sequence number, or `None` for an untracked
    /// key.
    pub fn touch(&mut self, key: u32) -> Option<u64> {
        let idx = self.entries.binary_search_by_key(&key, |e| e.key).ok()?;

        self.seq_now += 1;
        self.entries[idx].seq = self.seq_now;

        Some(self.seq_now)
    }

    /// `true` if any object changed after snapshot `seq`.
    pub fn has_changes_since(&self, seq: u64) -> bool {
        // seq_now only moves on touch, so comparing the counter is enough.
        self.seq_now > seq
    }

    /// All objects written after snapshot `seq`, in ascending key order.
    pub fn changes_since(&self, seq: u64) -> impl Iterator<Item = &JournalEntry> + '_ {
        self.entries.iter().filter(move |e| e.seq > seq)
    }

    /// Every tracked object, in ascending key order.
    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> + '_ {
        self.entries.iter()
    }

    /// Look up the tracked size of `key`.
    pub fn size_of(&self, key: u32) -> Option<u16> {
        self.entries
            .binary_search_by_key(&key, |e| e.key)
            .ok()
            .map(|idx| self.entries[idx].size)
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the journal tracks nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
