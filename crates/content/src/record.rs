//! Opaque record-set representation.
//!
//! The core does not interpret rdata except for the SOA fields it needs for
//! serial bookkeeping (§6 of the design: "The core does not interpret rdata
//! except for SOA fields"). Every other record-set is carried around as a
//! length-known blob that is only ever handed to a [`RecordCodec`](crate::RecordCodec)
//! implementation, never parsed in place.

use bytes::Bytes;
use domain::base::{Class, Name, Ttl};

use crate::serial::Serial;

//----------- RegularRecord ------------------------------------------------------

/// A non-SOA record-set: owner, class, TTL, type, and opaque rdata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegularRecord {
    pub owner: Name<Bytes>,
    pub class: Class,
    pub ttl: Ttl,
    pub rtype: domain::base::Rtype,
    /// Opaque, already-encoded rdata. The core never inspects this.
    pub rdata: Bytes,
}

impl RegularRecord {
    pub fn new(
        owner: Name<Bytes>,
        class: Class,
        ttl: Ttl,
        rtype: domain::base::Rtype,
        rdata: Bytes,
    ) -> Self {
        Self {
            owner,
            class,
            ttl,
            rtype,
            rdata,
        }
    }

    /// Whether two records name the same RRset member (owner, class, type,
    /// rdata) while possibly differing in TTL.
    ///
    /// Used by the merge/apply logic (§4.4) to recognise a remove-then-add of
    /// the same record as a no-op, independent of a TTL bump.
    pub fn same_data(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.class == other.class
            && self.rtype == other.rtype
            && self.rdata == other.rdata
    }
}

//----------- SoaRecord ----------------------------------------------------------

/// A SOA record-set, with its fields parsed out.
///
/// This is the one record type the core reads deeply, since zone versioning
/// hinges on the serial and the timer fields it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaRecord {
    pub owner: Name<Bytes>,
    pub class: Class,
    pub ttl: Ttl,
    pub mname: Name<Bytes>,
    pub rname: Name<Bytes>,
    pub serial: Serial,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl SoaRecord {
    /// A record-set view of this SOA, for serialization by a [`RecordCodec`](crate::RecordCodec).
    pub fn with_serial(&self, serial: Serial) -> Self {
        Self {
            serial,
            ..self.clone()
        }
    }
}
