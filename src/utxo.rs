//! # UTXO Index
//!
//! Working set of outputs produced but not yet spent during the current run.
//!
//! The index is owned by the block processor and mutated only by it. It is
//! never persisted: restart a run from genesis against an empty ledger to
//! rebuild it. The `UtxoIndex` trait is the seam for a persistent backing
//! store if crash-resume is ever needed.

use std::collections::HashMap;

use crate::types::{Outpoint, UtxoEntry};

/// Outpoint -> (owner, value) store
pub trait UtxoIndex {
    /// Register a freshly created output. Replaces any previous entry for the
    /// same outpoint and returns it.
    fn insert(&mut self, outpoint: Outpoint, entry: UtxoEntry) -> Option<UtxoEntry>;

    /// Consume an output. `None` when the outpoint was never seen or is
    /// already spent.
    fn remove(&mut self, outpoint: &Outpoint) -> Option<UtxoEntry>;

    fn get(&self, outpoint: &Outpoint) -> Option<&UtxoEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all tracked values in satoshis, saturating at `u64::MAX`
    fn total_value(&self) -> u64;

    fn clear(&mut self);
}

/// In-memory UTXO index
#[derive(Debug, Default)]
pub struct MemoryUtxoIndex {
    entries: HashMap<Outpoint, UtxoEntry>,
    // Wide enough that no sequence of u64 inserts can overflow it
    total: u128,
}

impl MemoryUtxoIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UtxoIndex for MemoryUtxoIndex {
    fn insert(&mut self, outpoint: Outpoint, entry: UtxoEntry) -> Option<UtxoEntry> {
        self.total += u128::from(entry.value);
        let previous = self.entries.insert(outpoint, entry);
        if let Some(prev) = &previous {
            self.total -= u128::from(prev.value);
        }
        previous
    }

    fn remove(&mut self, outpoint: &Outpoint) -> Option<UtxoEntry> {
        let removed = self.entries.remove(outpoint);
        if let Some(entry) = &removed {
            self.total -= u128::from(entry.value);
        }
        removed
    }

    fn get(&self, outpoint: &Outpoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn total_value(&self) -> u64 {
        u64::try_from(self.total).unwrap_or(u64::MAX)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}
