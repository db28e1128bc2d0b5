//! Processing a dynamic-update request against a zone's current content
//! (§4.6 step 2).
//!
//! The wire-level UPDATE message (zone section, prerequisite section,
//! update section) is parsed by the caller; this module only works with
//! already-decoded [`RegularRecord`]s, matching the record-codec boundary
//! in `contracts.rs`. RFC2136 prerequisite and update-section semantics
//! are evaluated here, since they are core content logic, not wire
//! parsing.

use zonecore_content::{Changeset, RegularRecord, Serial, ZoneContents};

//----------- Prerequisite ---------------------------------------------------------

/// One RFC2136 prerequisite, checked against the zone's content before any
/// update section is applied.
#[derive(Clone, Debug)]
pub enum Prerequisite {
    /// RRset exists (value independent): some record-set of `rtype` exists
    /// at `owner`.
    RrsetExists { owner: domain::base::Name<bytes::Bytes>, rtype: domain::base::Rtype },
    /// RRset exists (value dependent): a record with this exact rdata
    /// exists at `owner`/`rtype`.
    RrsetExistsValue(RegularRecord),
    /// RRset does not exist: no record-set of `rtype` exists at `owner`.
    RrsetDoesNotExist { owner: domain::base::Name<bytes::Bytes>, rtype: domain::base::Rtype },
    /// Name is in use: some record-set, of any type, exists at `owner`.
    NameInUse { owner: domain::base::Name<bytes::Bytes> },
    /// Name is not in use: no record-set exists at `owner`.
    NameNotInUse { owner: domain::base::Name<bytes::Bytes> },
}

/// One entry of the update section.
#[derive(Clone, Debug)]
pub enum UpdateOp {
    /// Delete every record-set of `rtype` at `owner`.
    DeleteRrset { owner: domain::base::Name<bytes::Bytes>, rtype: domain::base::Rtype },
    /// Delete every record-set at `owner`, regardless of type.
    DeleteName { owner: domain::base::Name<bytes::Bytes> },
    /// Delete exactly the record-set matching `same_data`.
    DeleteRecord(RegularRecord),
    /// Add a record-set, replacing nothing (duplicates collapse via
    /// `same_data` when the builder re-sorts).
    AddRecord(RegularRecord),
}

/// A fully decoded dynamic-update request.
#[derive(Clone, Debug, Default)]
pub struct UpdateRequest {
    pub prerequisites: Vec<Prerequisite>,
    pub ops: Vec<UpdateOp>,
}

/// Why an update request was rejected before any content was touched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpdateRejection {
    /// A prerequisite did not hold (NXRRSET/YXRRSET/NXDOMAIN/YXDOMAIN in
    /// RFC2136 terms).
    PrerequisiteFailed,
}

/// Check every prerequisite against `contents`, in order, short-circuiting
/// on the first failure.
pub fn check_prerequisites(contents: &ZoneContents, prerequisites: &[Prerequisite]) -> Result<(), UpdateRejection> {
    for prereq in prerequisites {
        let holds = match prereq {
            Prerequisite::RrsetExists { owner, rtype } => contents
                .node(owner)
                .is_some_and(|node| node.records.iter().any(|r| r.rtype == *rtype)),
            Prerequisite::RrsetExistsValue(record) => contents
                .node(&record.owner)
                .is_some_and(|node| node.records.iter().any(|r| r.same_data(record))),
            Prerequisite::RrsetDoesNotExist { owner, rtype } => !contents
                .node(owner)
                .is_some_and(|node| node.records.iter().any(|r| r.rtype == *rtype)),
            Prerequisite::NameInUse { owner } => contents.node(owner).is_some_and(|node| !node.records.is_empty()),
            Prerequisite::NameNotInUse { owner } => {
                !contents.node(owner).is_some_and(|node| !node.records.is_empty())
            }
        };
        if !holds {
            return Err(UpdateRejection::PrerequisiteFailed);
        }
    }
    Ok(())
}

/// Apply `request` to `contents`, producing the new content tree and the
/// user changeset describing exactly what moved (§4.6 step 2).
///
/// Prerequisites must already have been checked with
/// [`check_prerequisites`]; this function applies the update section
/// unconditionally.
pub fn apply(contents: &ZoneContents, request: &UpdateRequest, new_serial: Serial) -> (ZoneContents, Changeset) {
    let mut builder = contents.to_builder();
    let soa_from = contents.soa.clone();
    let soa_to = soa_from.with_serial(new_serial);
    let mut changeset = Changeset::new(soa_from, soa_to.clone());

    for op in &request.ops {
        match op {
            UpdateOp::DeleteRrset { owner, rtype } => {
                if let Some(node) = contents.node(owner) {
                    for record in node.records.iter().filter(|r| r.rtype == *rtype).cloned().collect::<Vec<_>>() {
                        builder.remove(&record);
                        changeset.remove(record);
                    }
                }
            }
            UpdateOp::DeleteName { owner } => {
                if let Some(node) = contents.node(owner) {
                    for record in node.records.clone() {
                        builder.remove(&record);
                        changeset.remove(record);
                    }
                }
            }
            UpdateOp::DeleteRecord(target) => {
                if contents
                    .node(&target.owner)
                    .is_some_and(|node| node.records.iter().any(|r| r.same_data(target)))
                {
                    builder.remove(target);
                    changeset.remove(target.clone());
                }
            }
            UpdateOp::AddRecord(record) => {
                let already_present = contents
                    .node(&record.owner)
                    .is_some_and(|node| node.records.iter().any(|r| r.same_data(record)));
                if !already_present {
                    builder.insert(record.clone());
                    changeset.add(record.clone());
                }
            }
        }
    }

    builder.set_soa(soa_to);
    (builder.build(), changeset)
}
