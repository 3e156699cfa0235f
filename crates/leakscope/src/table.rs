//! The active-allocation table: every allocation handed out and not
//! yet freed, keyed by address.

use std::collections::HashMap;

use crate::site::SiteKey;

/// A single live allocation.
///
/// The address is only an identity for lookup; it is never
/// dereferenced by the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveRecord {
    pub addr: usize,
    /// Fingerprint of the site that produced this allocation.
    pub site: SiteKey,
    /// The site counter's value at the moment of this allocation.
    pub sequence: u64,
}

/// Address-keyed table of outstanding allocations.
#[derive(Debug, Default)]
pub struct ActiveTable {
    records: HashMap<usize, ActiveRecord>,
}

impl ActiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the record for its address, returning the record it
    /// displaced.
    ///
    /// A displaced record means the raw allocator returned an address
    /// the table still considers live, which should be impossible;
    /// callers log it and keep the new record.
    pub fn insert(&mut self, record: ActiveRecord) -> Option<ActiveRecord> {
        self.records.insert(record.addr, record)
    }

    /// Removes the record for `addr` if one exists.
    ///
    /// Unknown addresses are ignored: the free may be for memory
    /// allocated before tracking began, or a double free that already
    /// lost its record.
    pub fn remove(&mut self, addr: usize) -> Option<ActiveRecord> {
        self.records.remove(&addr)
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.records.contains_key(&addr)
    }

    /// Point-in-time copy of the table, ordered by address.
    ///
    /// Consistency depends on the caller holding the tracker lock for
    /// the duration of the call.
    pub fn snapshot(&self) -> Vec<ActiveRecord> {
        let mut records: Vec<ActiveRecord> = self.records.values().copied().collect();
        records.sort_by_key(|record| record.addr);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::CallSite;

    fn record(addr: usize, sequence: u64) -> ActiveRecord {
        ActiveRecord {
            addr,
            site: CallSite::new("src/widget.rs", 42).key(),
            sequence,
        }
    }

    #[test]
    fn insert_then_remove_leaves_nothing() {
        let mut table = ActiveTable::new();
        assert!(table.insert(record(0x1000, 1)).is_none());
        assert!(table.contains(0x1000));

        let removed = table.remove(0x1000).unwrap();
        assert_eq!(removed.sequence, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn insert_over_live_address_returns_displaced_record() {
        let mut table = ActiveTable::new();
        assert!(table.insert(record(0x1000, 1)).is_none());

        let displaced = table.insert(record(0x1000, 2)).unwrap();
        assert_eq!(displaced.sequence, 1);

        // The new record wins.
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot()[0].sequence, 2);
    }

    #[test]
    fn remove_of_unknown_address_is_a_no_op() {
        let mut table = ActiveTable::new();
        assert!(table.remove(0xdead).is_none());

        table.insert(record(0x1000, 1));
        assert!(table.remove(0xdead).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_address() {
        let mut table = ActiveTable::new();
        table.insert(record(0x3000, 3));
        table.insert(record(0x1000, 1));
        table.insert(record(0x2000, 2));

        let snapshot = table.snapshot();
        let addrs: Vec<usize> = snapshot.iter().map(|r| r.addr).collect();
        assert_eq!(addrs, vec![0x1000, 0x2000, 0x3000]);
    }
}
