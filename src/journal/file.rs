//! A single-file, segmented journal backend (§4.2, §6: "Journal file
//! layout... the implementation may choose a fixed-size ring or a segmented
//! log").
//!
//! The file is a flat append log of `(key, flags, len, payload)` records.
//! An in-memory index (`BTreeMap<JournalKey, IndexEntry>`) tracks every
//! entry's flags and byte offset so lookups never re-scan the file; only
//! `open` pays for a single sequential read to rebuild that index.
//! Compaction rewrites the file from scratch with a temp-file-plus-rename,
//! the same atomicity discipline the flush path (§4.9) uses for the
//! zonefile itself.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};

use zonecore_content::{JournalKey, Serial};

use super::{EntryFlags, FetchPredicate, Journal, JournalEntryMeta, Region, Transaction, WalkAction};
use crate::error::JournalError;

/// Magic bytes identifying a zonecore journal file, written once at offset 0.
const MAGIC: &[u8; 8] = b"ZCJRNL01";

#[derive(Clone, Copy)]
struct IndexEntry {
    flags: EntryFlags,
    offset: u64,
    len: u64,
}

/// A record header as written on disk: key (8), flags (1), payload len (8).
const HEADER_LEN: u64 = 8 + 1 + 8;

/// A [`Journal`] backed by a single growable file plus an in-memory index.
pub struct FileJournal {
    path: Utf8PathBuf,
    file: Mutex<File>,
    index: Mutex<BTreeMap<JournalKey, IndexEntry>>,
    open_txn: Mutex<Option<OpenTxn>>,
    next_txn_id: AtomicU64,
    capacity: u64,
    used: Mutex<u64>,
}

struct OpenTxn {
    id: u64,
    /// Regions reserved (mapped) during this transaction, to be finalized or
    /// rolled back together on `commit`/`rollback`.
    pending: Vec<(JournalKey, u64, u64)>,
}

impl FileJournal {
    /// Open (creating if necessary) a journal file at `path`, rebuilding its
    /// in-memory index from whatever is already on disk.
    ///
    /// `capacity` bounds the total payload bytes the journal will hold
    /// before [`Journal::map`] starts failing with [`JournalError::Full`].
    pub fn open(path: &Utf8Path, capacity: u64) -> io::Result<Self> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;

        if is_new {
            file.write_all(MAGIC)?;
            file.sync_all()?;
        }

        let index = Self::rebuild_index(&mut file)?;
        let used = index.values().map(|e| e.len).sum();

        Ok(Self {
            path: path.to_owned(),
            file: Mutex::new(file),
            index: Mutex::new(index),
            open_txn: Mutex::new(None),
            next_txn_id: AtomicU64::new(1),
            capacity,
            used: Mutex::new(used),
        })
    }

    fn rebuild_index(file: &mut File) -> io::Result<BTreeMap<JournalKey, IndexEntry>> {
        let mut index = BTreeMap::new();
        let len = file.metadata()?.len();
        if len < MAGIC.len() as u64 {
            return Ok(index);
        }

        file.seek(SeekFrom::Start(MAGIC.len() as u64))?;
        let mut offset = MAGIC.len() as u64;
        loop {
            if offset + HEADER_LEN > len {
                break;
            }
            let mut key_buf = [0u8; 8];
            if file.read_exact(&mut key_buf).is_err() {
                break;
            }
            let mut flags_buf = [0u8; 1];
            file.read_exact(&mut flags_buf)?;
            let mut len_buf = [0u8; 8];
            file.read_exact(&mut len_buf)?;
            let payload_len = u64::from_be_bytes(len_buf);
            let payload_offset = offset + HEADER_LEN;
            if payload_offset + payload_len > len {
                // Torn write at the tail; stop here and let the writer
                // recover by simply appending past this point.
                break;
            }
            file.seek(SeekFrom::Current(payload_len as i64))?;

            let key = JournalKey(u64::from_be_bytes(key_buf));
            let flags = EntryFlags::from_raw(flags_buf[0]);
            // A TRANS entry whose transaction never committed is dead on
            // reload; the writer will reuse the space via compaction.
            if flags.contains(EntryFlags::VALID) {
                index.insert(
                    key,
                    IndexEntry {
                        flags,
                        offset: payload_offset,
                        len: payload_len,
                    },
                );
            }
            offset = payload_offset + payload_len;
        }
        Ok(index)
    }

    fn append_record(
        file: &mut File,
        key: JournalKey,
        flags: EntryFlags,
        payload: &[u8],
    ) -> io::Result<u64> {
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&key.0.to_be_bytes())?;
        file.write_all(&[flags.raw()])?;
        file.write_all(&(payload.len() as u64).to_be_bytes())?;
        file.write_all(payload)?;
        Ok(offset + HEADER_LEN)
    }

    fn rewrite_flags_at(file: &mut File, payload_offset: u64, flags: EntryFlags) -> io::Result<()> {
        let flags_offset = payload_offset - HEADER_LEN + 8;
        file.seek(SeekFrom::Start(flags_offset))?;
        file.write_all(&[flags.raw()])
    }

    /// Rewrite the file keeping only entries whose `to` serial does not
    /// precede `zonefile_serial`, i.e. history the flush path has already
    /// embedded in the on-disk zonefile.
    fn compact_locked(&self, zonefile_serial: Serial) -> Result<(), JournalError> {
        let mut index = self.index.lock().unwrap();
        let mut file = self.file.lock().unwrap();

        let keep: Vec<(JournalKey, IndexEntry)> = index
            .iter()
            .filter(|(key, _)| zonefile_serial.precedes(&key.to()))
            .map(|(k, v)| (*k, *v))
            .collect();

        let tmp_path = self.path.with_extension("journal.tmp");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(MAGIC)?;

        let mut new_index = BTreeMap::new();
        let mut used = 0u64;
        for (key, entry) in keep {
            let mut payload = vec![0u8; entry.len as usize];
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut payload)?;
            let payload_offset = Self::append_record(&mut tmp, key, entry.flags, &payload)?;
            used += entry.len;
            new_index.insert(
                key,
                IndexEntry {
                    flags: entry.flags,
                    offset: payload_offset,
                    len: entry.len,
                },
            );
        }
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        *file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *index = new_index;
        *self.used.lock().unwrap() = used;
        Ok(())
    }
}

impl EntryFlags {
    const fn raw(self) -> u8 {
        self.0
    }

    const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }
}

impl Journal for FileJournal {
    fn begin_trans(&self) -> Result<Transaction, JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        if open.is_some() {
            return Err(JournalError::TransactionAlreadyOpen);
        }
        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        *open = Some(OpenTxn {
            id,
            pending: Vec::new(),
        });
        Ok(Transaction { id })
    }

    fn map(&self, txn: &Transaction, key: JournalKey, size: usize) -> Result<Region, JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        let open_txn = open.as_mut().filter(|t| t.id == txn.id).ok_or(JournalError::NotFound)?;

        let mut used = self.used.lock().unwrap();
        if *used + size as u64 > self.capacity {
            return Err(JournalError::Full);
        }
        *used += size as u64;
        open_txn.pending.push((key, 0, size as u64));
        Ok(Region { key, size })
    }

    fn write(&self, txn: &Transaction, region: &Region, data: &[u8]) -> Result<(), JournalError> {
        if data.len() != region.size {
            return Err(JournalError::Malformed);
        }
        let mut open = self.open_txn.lock().unwrap();
        let open_txn = open.as_mut().filter(|t| t.id == txn.id).ok_or(JournalError::NotFound)?;
        let mut file = self.file.lock().unwrap();
        let payload_offset = Self::append_record(&mut file, region.key, EntryFlags::TRANS, data)?;
        if let Some(slot) = open_txn.pending.iter_mut().find(|(k, _, sz)| *k == region.key && *sz == region.size as u64)
        {
            slot.1 = payload_offset;
        }
        Ok(())
    }

    fn unmap(&self, txn: &Transaction, region: Region, validate: bool) -> Result<(), JournalError> {
        let open = self.open_txn.lock().unwrap();
        let open_txn = open.as_ref().filter(|t| t.id == txn.id).ok_or(JournalError::NotFound)?;
        let (_, offset, _) = open_txn
            .pending
            .iter()
            .find(|(k, _, sz)| *k == region.key && *sz == region.size as u64)
            .ok_or(JournalError::NotFound)?;

        if validate {
            let mut file = self.file.lock().unwrap();
            let flags = EntryFlags::VALID.union(EntryFlags::DIRTY);
            Self::rewrite_flags_at(&mut file, *offset, flags)?;
            self.index.lock().unwrap().insert(
                region.key,
                IndexEntry {
                    flags,
                    offset: *offset,
                    len: region.size as u64,
                },
            );
        }
        Ok(())
    }

    fn commit(&self, txn: Transaction) -> Result<(), JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        if open.as_ref().map(|t| t.id) != Some(txn.id) {
            return Err(JournalError::NotFound);
        }
        self.file.lock().unwrap().sync_data()?;
        *open = None;
        Ok(())
    }

    fn rollback(&self, txn: Transaction) -> Result<(), JournalError> {
        let mut open = self.open_txn.lock().unwrap();
        let open_txn = match open.take() {
            Some(t) if t.id == txn.id => t,
            Some(other) => {
                *open = Some(other);
                return Err(JournalError::NotFound);
            }
            None => return Err(JournalError::NotFound),
        };

        // Reserved-but-unfinalized regions are simply left as dead TRANS
        // records in the file; they are never indexed (the index only ever
        // gains VALID entries) and are reclaimed by the next compaction.
        let mut used = self.used.lock().unwrap();
        for (_, _, size) in open_txn.pending {
            *used = used.saturating_sub(size);
        }
        Ok(())
    }

    fn fetch(&self, predicate: FetchPredicate) -> Vec<JournalEntryMeta> {
        self.index
            .lock()
            .unwrap()
            .iter()
            .map(|(key, entry)| JournalEntryMeta {
                key: *key,
                flags: entry.flags,
            })
            .filter(|meta| predicate.matches(meta))
            .collect()
    }

    fn walk(&self, visitor: &mut dyn FnMut(&JournalEntryMeta) -> WalkAction) {
        let mut index = self.index.lock().unwrap();
        let keys: Vec<JournalKey> = index.keys().copied().collect();
        for key in keys {
            let entry = index[&key];
            let meta = JournalEntryMeta {
                key,
                flags: entry.flags,
            };
            match visitor(&meta) {
                WalkAction::Continue => {}
                WalkAction::ClearDirty => {
                    let new_flags = entry.flags.difference(EntryFlags::DIRTY);
                    if let Ok(mut file) = self.file.lock() {
                        let _ = Self::rewrite_flags_at(&mut file, entry.offset, new_flags);
                    }
                    index.insert(
                        key,
                        IndexEntry {
                            flags: new_flags,
                            ..entry
                        },
                    );
                }
                WalkAction::Stop => break,
            }
        }
    }

    fn is_used(&self) -> bool {
        self.index
            .lock()
            .unwrap()
            .values()
            .any(|e| e.flags.contains(EntryFlags::VALID))
    }

    fn read(&self, key: JournalKey) -> Result<Bytes, JournalError> {
        let entry = *self.index.lock().unwrap().get(&key).ok_or(JournalError::NotFound)?;
        let mut buf = vec![0u8; entry.len as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(entry.offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn compact(&self, zonefile_serial: Serial) -> Result<(), JournalError> {
        self.compact_locked(zonefile_serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(from: u32, to: u32) -> JournalKey {
        JournalKey::pack(Serial::new(from), Serial::new(to))
    }

    #[test]
    fn store_read_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("zone.jnl")).unwrap();

        {
            let journal = FileJournal::open(&path, 1 << 20).unwrap();
            let txn = journal.begin_trans().unwrap();
            let region = journal.map(&txn, key(1, 2), 5).unwrap();
            journal.write(&txn, &region, b"hello").unwrap();
            journal.unmap(&txn, region, true).unwrap();
            journal.commit(txn).unwrap();
            assert!(journal.is_used());
        }

        // Reopening must rebuild the index from disk.
        let reopened = FileJournal::open(&path, 1 << 20).unwrap();
        assert!(reopened.is_used());
        assert_eq!(reopened.read(key(1, 2)).unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn rollback_leaves_no_valid_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("zone.jnl")).unwrap();
        let journal = FileJournal::open(&path, 1 << 20).unwrap();
        let txn = journal.begin_trans().unwrap();
        let region = journal.map(&txn, key(1, 2), 4).unwrap();
        journal.write(&txn, &region, b"abcd").unwrap();
        journal.rollback(txn).unwrap();

        assert!(!journal.is_used());
        assert!(journal.read(key(1, 2)).is_err());
    }

    #[test]
    fn compact_drops_entries_older_than_zonefile_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("zone.jnl")).unwrap();
        let journal = FileJournal::open(&path, 1 << 20).unwrap();

        for (from, to) in [(1u32, 2u32), (2, 3)] {
            let txn = journal.begin_trans().unwrap();
            let region = journal.map(&txn, key(from, to), 1).unwrap();
            journal.write(&txn, &region, b"x").unwrap();
            journal.unmap(&txn, region, true).unwrap();
            journal.commit(txn).unwrap();
        }

        journal.compact(Serial::new(2)).unwrap();
        assert!(journal.read(key(1, 2)).is_err());
        assert!(journal.read(key(2, 3)).is_ok());
    }

    #[test]
    fn map_fails_full_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("zone.jnl")).unwrap();
        let journal = FileJournal::open(&path, 4).unwrap();
        let txn = journal.begin_trans().unwrap();
        assert!(matches!(journal.map(&txn, key(1, 2), 8), Err(JournalError::Full)));
    }
}
