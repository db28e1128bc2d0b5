//! An in-memory journal backend for tests (§2 added row: "Test harness").

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use zonecore_content::{JournalKey, Serial};

use super::{EntryFlags, FetchPredicate, Journal, JournalEntryMeta, Region, Transaction, WalkAction};
use crate::error::JournalError;

#[derive(Clone)]
struct StoredEntry {
    flags: EntryFlags,
    payload: Option<Bytes>,
}

/// A `Journal` backed entirely by an in-process `BTreeMap`, for unit and
/// integration tests that exercise the pipeline without touching disk.
pub struct MemJournal {
    entries: Mutex<BTreeMap<JournalKey, StoredEntry>>,
    open_txn: Mutex<Option<u64>>,
    next_txn_id: AtomicU64,
    capacity: usize,
    used: Mutex<usize>,
}

impl MemJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            open_txn: Mutex::new(None),
            next_txn_id: AtomicU64::new(1),
            capacity,
            used: Mutex::new(0),
        }
    }
}

impl Default for MemJournal {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl Journal for MemJournal {
    fn begin_trans(&self) -> Result<Transaction, JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        if open.is_some() {
            return Err(JournalError::TransactionAlreadyOpen);
        }
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        *open = Some(id);
        Ok(Transaction { id })
    }

    fn map(&self, txn: &Transaction, key: JournalKey, size: usize) -> Result<Region, JournalError> {
        debug_assert_eq!(self.open_txn.lock().unwrap().as_ref(), Some(&txn.id));
        let mut used = self.used.lock().unwrap();
        if *used + size > self.capacity {
            return Err(JournalError::Full);
        }
        *used += size;
        self.entries.lock().unwrap().insert(
            key,
            StoredEntry {
                flags: EntryFlags::TRANS,
                payload: None,
            },
        );
        Ok(Region { key, size })
    }

    fn write(&self, txn: &Transaction, region: &Region, data: &[u8]) -> Result<(), JournalError> {
        debug_assert_eq!(self.open_txn.lock().unwrap().as_ref(), Some(&txn.id));
        if data.len() != region.size {
            return Err(JournalError::Malformed);
        }
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&region.key).ok_or(JournalError::NotFound)?;
        entry.payload = Some(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn unmap(&self, txn: &Transaction, region: Region, validate: bool) -> Result<(), JournalError> {
        debug_assert_eq!(self.open_txn.lock().unwrap().as_ref(), Some(&txn.id));
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&region.key).ok_or(JournalError::NotFound)?;
        if validate {
            entry.flags = EntryFlags::VALID.union(EntryFlags::DIRTY);
        }
        Ok(())
    }

    fn commit(&self, txn: Transaction) -> Result<(), JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        if *open != Some(txn.id) {
            return Err(JournalError::NotFound);
        }
        *open = None;
        Ok(())
    }

    fn rollback(&self, txn: Transaction) -> Result<(), JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        if *open != Some(txn.id) {
            return Err(JournalError::NotFound);
        }
        *open = None;
        let mut entries = self.entries.lock().unwrap();
        let mut used = self.used.lock().unwrap();
        entries.retain(|_, entry| {
            let keep = entry.flags != EntryFlags::TRANS;
            if !keep {
                if let Some(payload) = &entry.payload {
                    *used = used.saturating_sub(payload.len());
                }
            }
            keep
        });
        Ok(())
    }

    fn fetch(&self, predicate: FetchPredicate) -> Vec<JournalEntryMeta> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.flags.contains(EntryFlags::VALID))
            .map(|(key, entry)| JournalEntryMeta {
                key: *key,
                flags: entry.flags,
            })
            .filter(|meta| predicate.matches(meta))
            .collect()
    }

    fn walk(&self, visitor: &mut dyn FnMut(&JournalEntryMeta) -> WalkAction) {
        let mut entries = self.entries.lock().unwrap();
        for (key, entry) in entries.iter_mut() {
            let meta = JournalEntryMeta {
                key: *key,
                flags: entry.flags,
            };
            match visitor(&meta) {
                WalkAction::Continue => {}
                WalkAction::ClearDirty => entry.flags = entry.flags.difference(EntryFlags::DIRTY),
                WalkAction::Stop => break,
            }
        }
    }

    fn is_used(&self) -> bool {
        self.entries
            .lock()
            .unwrap()
            .values()
            .any(|entry| entry.flags.contains(EntryFlags::VALID))
    }

    fn read(&self, key: JournalKey) -> Result<Bytes, JournalError> {
        self.entries
            .lock()
            .unwrap()
            .get(&key)
            .and_then(|entry| entry.payload.clone())
            .ok_or(JournalError::NotFound)
    }

    fn compact(&self, zonefile_serial: Serial) -> Result<(), JournalError> {
        let mut entries = self.entries.lock().unwrap();
        let mut used = self.used.lock().unwrap();
        entries.retain(|key, entry| {
            let keep = zonefile_serial.precedes(&key.to());
            if !keep {
                if let Some(payload) = &entry.payload {
                    *used = used.saturating_sub(payload.len());
                }
            }
            keep
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(from: u32, to: u32) -> JournalKey {
        JournalKey::pack(Serial::new(from), Serial::new(to))
    }

    #[test]
    fn store_and_read_roundtrip() {
        let journal = MemJournal::default();
        let txn = journal.begin_trans().unwrap();
        let region = journal.map(&txn, key(1, 2), 4).unwrap();
        journal.write(&txn, &region, b"abcd").unwrap();
        journal.unmap(&txn, region, true).unwrap();
        journal.commit(txn).unwrap();

        assert!(journal.is_used());
        assert_eq!(journal.read(key(1, 2)).unwrap(), Bytes::from_static(b"abcd"));
    }

    #[test]
    fn second_transaction_is_rejected_while_one_is_open() {
        let journal = MemJournal::default();
        let _txn = journal.begin_trans().unwrap();
        assert!(matches!(
            journal.begin_trans(),
            Err(JournalError::TransactionAlreadyOpen)
        ));
    }

    #[test]
    fn rollback_discards_reserved_region() {
        let journal = MemJournal::default();
        let txn = journal.begin_trans().unwrap();
        let region = journal.map(&txn, key(1, 2), 4).unwrap();
        journal.write(&txn, &region, b"abcd").unwrap();
        journal.rollback(txn).unwrap();

        assert!(!journal.is_used());
        assert!(journal.read(key(1, 2)).is_err());
    }

    #[test]
    fn map_fails_full_when_over_capacity() {
        let journal = MemJournal::new(2);
        let txn = journal.begin_trans().unwrap();
        assert!(matches!(journal.map(&txn, key(1, 2), 4), Err(JournalError::Full)));
    }

    #[test]
    fn fetch_by_from_returns_entries_in_order() {
        let journal = MemJournal::default();
        for (from, to) in [(1, 2), (2, 3), (3, 4)] {
            let txn = journal.begin_trans().unwrap();
            let region = journal.map(&txn, key(from, to), 1).unwrap();
            journal.write(&txn, &region, b"x").unwrap();
            journal.unmap(&txn, region, true).unwrap();
            journal.commit(txn).unwrap();
        }

        let results = journal.fetch(FetchPredicate::ByFrom(Serial::new(2)));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].from_serial(), Serial::new(2));
    }
}
