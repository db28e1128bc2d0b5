//! The change-log journal (§4.2).
//!
//! A journal stores changesets keyed by their packed `(from, to)` serial
//! pair (§4.1). The C-style handle/retain/release vocabulary in the
//! original contract maps onto ordinary Rust ownership here: a "handle" is
//! an `Arc<dyn Journal>` (cloning it *is* `retain`, dropping the last clone
//! *is* `release`), and `begin_trans`/`commit`/`rollback` become a
//! [`Transaction`] value that can only be consumed once, so the "mutually
//! exclusive terminals" rule is enforced by the type system rather than by
//! convention.

pub mod file;
pub mod mem;

use bytes::Bytes;

use zonecore_content::{JournalKey, Serial};

use crate::error::JournalError;

//----------- EntryFlags --------------------------------------------------------------

/// Per-entry state bits, mirroring the VALID/TRANS/DIRTY vocabulary of
/// §4.2's contract.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EntryFlags(u8);

impl EntryFlags {
    pub const NONE: EntryFlags = EntryFlags(0);
    /// The entry's region has been reserved (`map`ped) but not yet
    /// finalized; a reader must never return this entry.
    pub const TRANS: EntryFlags = EntryFlags(1 << 0);
    /// The entry has been finalized (`unmap`ped with `validate = true`) and
    /// is part of the journal's committed history.
    pub const VALID: EntryFlags = EntryFlags(1 << 1);
    /// The entry has not yet been reflected in the on-disk zonefile.
    pub const DIRTY: EntryFlags = EntryFlags(1 << 2);

    pub const fn contains(self, other: EntryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: EntryFlags) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: EntryFlags) -> Self {
        Self(self.0 & !other.0)
    }
}

//----------- JournalEntryMeta ---------------------------------------------------------

/// Metadata for one journal entry, without its payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JournalEntryMeta {
    pub key: JournalKey,
    pub flags: EntryFlags,
}

impl JournalEntryMeta {
    pub fn from_serial(&self) -> Serial {
        self.key.from()
    }

    pub fn to_serial(&self) -> Serial {
        self.key.to()
    }
}

//----------- FetchPredicate ------------------------------------------------------------

/// The two lookup predicates named in §4.1: search by the `from` half or
/// the `to` half of an entry's key.
#[derive(Clone, Copy, Debug)]
pub enum FetchPredicate {
    /// First entry whose `from` serial is greater than or equal to `target`.
    ByFrom(Serial),
    /// First entry whose `to` serial is greater than or equal to `target`.
    ByTo(Serial),
}

impl FetchPredicate {
    fn matches(self, entry: &JournalEntryMeta) -> bool {
        match self {
            FetchPredicate::ByFrom(target) => !entry.from_serial().precedes(&target),
            FetchPredicate::ByTo(target) => !entry.to_serial().precedes(&target),
        }
    }
}

/// What a [`Journal::walk`] visitor asks for after seeing one entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalkAction {
    /// Leave the entry's flags untouched and continue.
    Continue,
    /// Clear the [`EntryFlags::DIRTY`] bit on this entry and continue.
    ClearDirty,
    /// Stop walking.
    Stop,
}

//----------- Transaction --------------------------------------------------------------

/// A journal transaction in progress.
///
/// Consumed by exactly one of [`Journal::commit`] or [`Journal::rollback`];
/// there is no way to observe a transaction after either call, so "mutually
/// exclusive terminals" (§4.2) holds structurally. Dropping a `Transaction`
/// without committing it is equivalent to an implicit rollback — the
/// journal's `Drop` impl reclaims the reserved-but-unfinalized region.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) id: u64,
}

//----------- Journal ------------------------------------------------------------------

/// The journal contract (§4.2).
pub trait Journal: Send + Sync {
    /// Begin a transaction. Fails with [`JournalError::TransactionAlreadyOpen`]
    /// if one is already open on this journal.
    fn begin_trans(&self) -> Result<Transaction, JournalError>;

    /// Reserve `size` bytes under `key` within `txn`. May fail with
    /// [`JournalError::Full`] if no space remains after discarding entries
    /// already reflected in the zonefile (see [`Journal::compact`]).
    fn map(&self, txn: &Transaction, key: JournalKey, size: usize) -> Result<Region, JournalError>;

    /// Write `data` into a region previously returned by [`Journal::map`].
    /// `data.len()` must equal the region's reserved size.
    fn write(&self, txn: &Transaction, region: &Region, data: &[u8]) -> Result<(), JournalError>;

    /// Finalize a region. If `validate`, the entry becomes
    /// [`EntryFlags::VALID`] (and [`EntryFlags::DIRTY`]) once the
    /// transaction commits.
    fn unmap(&self, txn: &Transaction, region: Region, validate: bool) -> Result<(), JournalError>;

    /// Commit a transaction, consuming it.
    fn commit(&self, txn: Transaction) -> Result<(), JournalError>;

    /// Roll a transaction back, consuming it and discarding any regions it
    /// reserved.
    fn rollback(&self, txn: Transaction) -> Result<(), JournalError>;

    /// The first entry matching `predicate`, and every entry from there on
    /// in key order, suitable for driving a catch-up or IXFR walk.
    fn fetch(&self, predicate: FetchPredicate) -> Vec<JournalEntryMeta>;

    /// Apply `visitor` to every entry in key order.
    fn walk(&self, visitor: &mut dyn FnMut(&JournalEntryMeta) -> WalkAction);

    /// Whether the journal has any [`EntryFlags::VALID`] entries.
    fn is_used(&self) -> bool;

    /// Read back the payload for a committed entry.
    fn read(&self, key: JournalKey) -> Result<Bytes, JournalError>;

    /// Discard every entry whose `to` serial does not precede
    /// `zonefile_serial` per RFC1982 — i.e. history already embedded in the
    /// on-disk zonefile and no longer needed for catch-up (§4.10 only ever
    /// reads forward from the zonefile's serial). The flush path
    /// ([`crate::flush`]) calls this right after a successful flush so a
    /// subsequent `map` retry has room; `map` itself never compacts on its
    /// own, matching §4.2's "caller must flush to zonefile then retry".
    fn compact(&self, zonefile_serial: Serial) -> Result<(), JournalError>;
}

/// A reserved-but-not-yet-finalized region within a journal, as returned by
/// [`Journal::map`].
#[derive(Clone, Copy, Debug)]
pub struct Region {
    pub(crate) key: JournalKey,
    pub(crate) size: usize,
}

impl Region {
    pub fn size(&self) -> usize {
        self.size
    }
}
