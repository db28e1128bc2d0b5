//! A single zone difference and the ordered batch that makes up a
//! contiguous history (§3, §4.3, §4.4).

use bytes::{Bytes, BytesMut};

use crate::codec::{CodecError, CodecRecord, RecordCodec};
use crate::record::{RegularRecord, SoaRecord};
use crate::serial::{JournalKey, Serial};

//----------- ChangesetFlags ------------------------------------------------------

/// Bits stored in the flags word ahead of a serialized changeset.
///
/// Mirrors the journal entry's VALID/TRANS/DIRTY distinction one layer up:
/// a changeset read back with `TRANSIENT` set was abandoned mid-write and
/// must be treated as absent by the reader, never replayed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChangesetFlags(u32);

impl ChangesetFlags {
    pub const NONE: ChangesetFlags = ChangesetFlags(0);
    /// The changeset transfers IXFR semantics verbatim (no internal
    /// compaction was applied before it was written).
    pub const VERBATIM: ChangesetFlags = ChangesetFlags(1 << 0);
    /// The changeset was produced by merging two or more adjacent
    /// changesets (§4.4), so its remove/add lists may have been compacted.
    pub const MERGED: ChangesetFlags = ChangesetFlags(1 << 1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: ChangesetFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: ChangesetFlags) -> Self {
        Self(self.0 | other.0)
    }
}

//----------- Changeset -----------------------------------------------------------

/// One zone version transition: `soa_from -> soa_to`, with the records
/// removed and added to get there.
///
/// Record lists are in removal-then-addition order, as the wire-level IXFR
/// difference delivers them; `same_data`-equal remove/add pairs are not
/// collapsed here; collapsing is [`Changeset::merge`]'s job when two
/// changesets are combined, not a single changeset's own concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changeset {
    pub flags: ChangesetFlags,
    pub soa_from: SoaRecord,
    pub soa_to: SoaRecord,
    pub removed: Vec<RegularRecord>,
    pub added: Vec<RegularRecord>,
}

/// An error merging two changesets that do not form a contiguous history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeError {
    /// The first changeset's `soa_to` does not match the second's `soa_from`.
    NotContiguous { expected: Serial, found: Serial },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::NotContiguous { expected, found } => write!(
                f,
                "changesets are not contiguous: expected soa_from {expected}, found {found}"
            ),
        }
    }
}

impl std::error::Error for MergeError {}

impl Changeset {
    pub fn new(soa_from: SoaRecord, soa_to: SoaRecord) -> Self {
        Self {
            flags: ChangesetFlags::VERBATIM,
            soa_from,
            soa_to,
            removed: Vec::new(),
            added: Vec::new(),
        }
    }

    pub fn remove(&mut self, record: RegularRecord) {
        self.removed.push(record);
    }

    pub fn add(&mut self, record: RegularRecord) {
        self.added.push(record);
    }

    /// The `(from, to)` journal key for this changeset.
    pub fn journal_key(&self) -> JournalKey {
        JournalKey::pack(self.soa_from.serial, self.soa_to.serial)
    }

    /// Merge `self` followed by `next` into a single changeset covering
    /// `self.soa_from.serial .. next.soa_to.serial` (§4.4).
    ///
    /// This is plain concatenation, not compaction: `next.removed` is
    /// appended to `self.removed` and `next.added` to `self.added`
    /// verbatim, even when a record added by `self` is removed again by
    /// `next` (or vice versa). §4.4 is explicit that the merge itself does
    /// not collapse such pairs — it is downstream apply logic's job to be a
    /// no-op under a remove-then-add of the same record.
    pub fn merge(&self, next: &Changeset) -> Result<Changeset, MergeError> {
        if self.soa_to.serial != next.soa_from.serial {
            return Err(MergeError::NotContiguous {
                expected: self.soa_to.serial,
                found: next.soa_from.serial,
            });
        }

        let mut removed = self.removed.clone();
        removed.extend(next.removed.iter().cloned());

        let mut added = self.added.clone();
        added.extend(next.added.iter().cloned());

        Ok(Changeset {
            flags: self.flags.union(next.flags).union(ChangesetFlags::MERGED),
            soa_from: self.soa_from.clone(),
            soa_to: next.soa_to.clone(),
            removed,
            added,
        })
    }

    /// Serialize this changeset against a [`RecordCodec`]: flags word,
    /// `soa_from`, the remove list, `soa_to` as the removes/adds delimiter,
    /// then the add list (§4.3).
    pub fn serialize(&self, codec: &dyn RecordCodec) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(&self.flags.bits().to_be_bytes());

        codec.serialize(&CodecRecord::Soa(self.soa_from.clone()), &mut out);

        out.extend_from_slice(&(self.removed.len() as u32).to_be_bytes());
        for record in &self.removed {
            codec.serialize(&CodecRecord::Regular(record.clone()), &mut out);
        }

        codec.serialize(&CodecRecord::Soa(self.soa_to.clone()), &mut out);

        out.extend_from_slice(&(self.added.len() as u32).to_be_bytes());
        for record in &self.added {
            codec.serialize(&CodecRecord::Regular(record.clone()), &mut out);
        }

        out.freeze()
    }

    /// Deserialize a changeset previously written by [`Changeset::serialize`].
    pub fn deserialize(input: &[u8], codec: &dyn RecordCodec) -> Result<Self, CodecError> {
        let flags = ChangesetFlags::from_bits(u32::from_be_bytes(
            input.get(0..4).ok_or(CodecError::Truncated)?.try_into().unwrap(),
        ));
        let mut at = 4usize;

        let (soa_from, consumed) = codec.deserialize(&input[at..])?;
        at += consumed;
        let soa_from = expect_soa(soa_from)?;

        let removed_count = read_u32(input, &mut at)?;
        let mut removed = Vec::with_capacity(removed_count as usize);
        for _ in 0..removed_count {
            let (record, consumed) = codec.deserialize(&input[at..])?;
            at += consumed;
            removed.push(expect_regular(record)?);
        }

        let (soa_to, consumed) = codec.deserialize(&input[at..])?;
        at += consumed;
        let soa_to = expect_soa(soa_to)?;

        let added_count = read_u32(input, &mut at)?;
        let mut added = Vec::with_capacity(added_count as usize);
        for _ in 0..added_count {
            let (record, consumed) = codec.deserialize(&input[at..])?;
            at += consumed;
            added.push(expect_regular(record)?);
        }

        Ok(Changeset {
            flags,
            soa_from,
            soa_to,
            removed,
            added,
        })
    }
}

fn read_u32(input: &[u8], at: &mut usize) -> Result<u32, CodecError> {
    let bytes = input
        .get(*at..*at + 4)
        .ok_or(CodecError::Truncated)?
        .try_into()
        .unwrap();
    *at += 4;
    Ok(u32::from_be_bytes(bytes))
}

fn expect_soa(record: CodecRecord) -> Result<SoaRecord, CodecError> {
    match record {
        CodecRecord::Soa(soa) => Ok(soa),
        CodecRecord::Regular(_) => Err(CodecError::Malformed),
    }
}

fn expect_regular(record: CodecRecord) -> Result<RegularRecord, CodecError> {
    match record {
        CodecRecord::Regular(regular) => Ok(regular),
        CodecRecord::Soa(_) => Err(CodecError::Malformed),
    }
}

//----------- ChangesetBatch -------------------------------------------------------

/// An ordered, contiguous run of changesets covering `first().soa_from` to
/// `last().soa_to`.
///
/// A batch is the unit an IXFR response or a journal range query works
/// with; it is always kept contiguous (§4.4's merge is how two batches
/// become one when the journal is compacted).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangesetBatch {
    changesets: Vec<Changeset>,
}

impl ChangesetBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `changeset` to the batch, requiring contiguity with the
    /// current last entry (if any).
    pub fn push(&mut self, changeset: Changeset) -> Result<(), MergeError> {
        if let Some(last) = self.changesets.last() {
            if last.soa_to.serial != changeset.soa_from.serial {
                return Err(MergeError::NotContiguous {
                    expected: last.soa_to.serial,
                    found: changeset.soa_from.serial,
                });
            }
        }
        self.changesets.push(changeset);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Changeset> {
        self.changesets.iter()
    }

    pub fn first_serial(&self) -> Option<Serial> {
        self.changesets.first().map(|c| c.soa_from.serial)
    }

    pub fn last_serial(&self) -> Option<Serial> {
        self.changesets.last().map(|c| c.soa_to.serial)
    }

    /// Collapse the whole batch into a single changeset spanning its full
    /// serial range, by repeated pairwise [`Changeset::merge`].
    pub fn merge_all(&self) -> Result<Option<Changeset>, MergeError> {
        let mut iter = self.changesets.iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        let mut acc = first.clone();
        for next in iter {
            acc = acc.merge(next)?;
        }
        Ok(Some(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpaqueRecordCodec;
    use domain::base::{Class, Name, Rtype, Ttl};

    fn soa(serial: u32) -> SoaRecord {
        SoaRecord {
            owner: Name::from_str_relaxed("example.com.").unwrap().octets_into(),
            class: Class::IN,
            ttl: Ttl::from_secs(3600),
            mname: Name::from_str_relaxed("ns1.example.com.").unwrap().octets_into(),
            rname: Name::from_str_relaxed("hostmaster.example.com.").unwrap().octets_into(),
            serial: Serial(serial),
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 3600,
        }
    }

    fn a_record(owner: &str, addr: [u8; 4]) -> RegularRecord {
        RegularRecord::new(
            Name::from_str_relaxed(owner).unwrap().octets_into(),
            Class::IN,
            Ttl::from_secs(300),
            Rtype::A,
            Bytes::copy_from_slice(&addr),
        )
    }

    #[test]
    fn roundtrips_through_codec() {
        let codec = OpaqueRecordCodec;
        let mut cs = Changeset::new(soa(1), soa(2));
        cs.remove(a_record("old.example.com.", [192, 0, 2, 1]));
        cs.add(a_record("new.example.com.", [192, 0, 2, 2]));

        let bytes = cs.serialize(&codec);
        let decoded = Changeset::deserialize(&bytes, &codec).unwrap();
        assert_eq!(decoded, cs);
    }

    #[test]
    fn merge_requires_contiguity() {
        let a = Changeset::new(soa(1), soa(2));
        let b = Changeset::new(soa(3), soa(4));
        assert_eq!(
            a.merge(&b),
            Err(MergeError::NotContiguous {
                expected: Serial(2),
                found: Serial(3)
            })
        );
    }

    #[test]
    fn merge_does_not_compact_add_then_remove() {
        // §4.4: merge is plain concatenation; a record added by the first
        // changeset and removed again by the second still appears in both
        // lists of the merged result rather than cancelling out.
        let mut a = Changeset::new(soa(1), soa(2));
        a.add(a_record("www.example.com.", [192, 0, 2, 10]));

        let mut b = Changeset::new(soa(2), soa(3));
        b.remove(a_record("www.example.com.", [192, 0, 2, 10]));

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.added.len(), 1);
        assert_eq!(merged.removed.len(), 1);
        assert_eq!(merged.soa_from.serial, Serial(1));
        assert_eq!(merged.soa_to.serial, Serial(3));
    }

    #[test]
    fn merge_associativity_in_the_chain_sense() {
        let a = Changeset::new(soa(1), soa(2));
        let b = Changeset::new(soa(2), soa(3));
        let c = Changeset::new(soa(3), soa(4));

        let left = a.merge(&b).unwrap().merge(&c).unwrap();
        let right_inner = b.merge(&c).unwrap();
        let right = a.merge(&right_inner).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn batch_rejects_non_contiguous_push() {
        let mut batch = ChangesetBatch::new();
        batch.push(Changeset::new(soa(1), soa(2))).unwrap();
        let err = batch.push(Changeset::new(soa(5), soa(6))).unwrap_err();
        assert_eq!(
            err,
            MergeError::NotContiguous {
                expected: Serial(2),
                found: Serial(5)
            }
        );
    }

    #[test]
    fn batch_merge_all_spans_full_range() {
        let mut batch = ChangesetBatch::new();
        batch.push(Changeset::new(soa(1), soa(2))).unwrap();
        batch.push(Changeset::new(soa(2), soa(3))).unwrap();
        batch.push(Changeset::new(soa(3), soa(4))).unwrap();

        let merged = batch.merge_all().unwrap().unwrap();
        assert_eq!(merged.soa_from.serial, Serial(1));
        assert_eq!(merged.soa_to.serial, Serial(4));
    }
}
