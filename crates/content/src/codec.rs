//! The record codec contract (§6: "Record codec contract (consumed by the
//! core)").
//!
//! This stands in for the wire parser the core does not implement itself —
//! `zonecore` is handed an implementation (normally backed by `domain`'s
//! message/record types) and only ever calls through this trait.

use bytes::{Bytes, BytesMut};

use crate::record::{RegularRecord, SoaRecord};

/// A single record-set as seen by a [`RecordCodec`]: either the distinguished
/// SOA or an opaque regular record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecRecord {
    Soa(SoaRecord),
    Regular(RegularRecord),
}

/// An error from a [`RecordCodec`] operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The input did not contain a complete, well-formed record.
    Malformed,
    /// The input ran out before a complete record could be read.
    Truncated,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CodecError::Malformed => "malformed record data",
            CodecError::Truncated => "truncated record data",
        })
    }
}

impl std::error::Error for CodecError {}

/// The external record (de)serialization contract.
///
/// `serialize`/`deserialize`/`binary_size` mirror the three operations named
/// in §6 of the design. The core calls these to turn record-sets into the
/// length-prefixed blobs a changeset batch is made of (§4.3), and back.
pub trait RecordCodec: Send + Sync {
    /// Serialize a record-set, appending its wire bytes to `out`.
    fn serialize(&self, record: &CodecRecord, out: &mut BytesMut);

    /// Deserialize one record-set starting at the front of `input`.
    ///
    /// Returns the record and the number of bytes consumed.
    fn deserialize(&self, input: &[u8]) -> Result<(CodecRecord, usize), CodecError>;

    /// The number of bytes `serialize` would write for `record`, without
    /// actually writing them. Used by the journal to size a `map` reservation
    /// before the payload itself is ready.
    fn binary_size(&self, record: &CodecRecord) -> usize {
        let mut scratch = BytesMut::new();
        self.serialize(record, &mut scratch);
        scratch.len()
    }
}

/// A length-prefixed, `domain`-independent codec used by the in-memory
/// journal and the core's own tests.
///
/// Production deployments plug in a codec backed by `domain`'s wire types;
/// this one exists so the core's unit and integration tests do not need a
/// live wire parser to exercise the journal and pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueRecordCodec;

impl OpaqueRecordCodec {
    fn serialize_regular(record: &RegularRecord, out: &mut BytesMut) {
        let owner = record.owner.as_octets();
        let rdata = &record.rdata;
        out.extend_from_slice(&(owner.len() as u32).to_be_bytes());
        out.extend_from_slice(owner);
        out.extend_from_slice(&record.class.to_int().to_be_bytes());
        out.extend_from_slice(&record.ttl.as_secs().to_be_bytes());
        out.extend_from_slice(&record.rtype.to_int().to_be_bytes());
        out.extend_from_slice(&(rdata.len() as u32).to_be_bytes());
        out.extend_from_slice(rdata);
    }

    fn serialize_soa(soa: &SoaRecord, out: &mut BytesMut) {
        let owner = soa.owner.as_octets();
        let mname = soa.mname.as_octets();
        let rname = soa.rname.as_octets();
        out.extend_from_slice(&(owner.len() as u32).to_be_bytes());
        out.extend_from_slice(owner);
        out.extend_from_slice(&soa.class.to_int().to_be_bytes());
        out.extend_from_slice(&soa.ttl.as_secs().to_be_bytes());
        out.extend_from_slice(&(mname.len() as u32).to_be_bytes());
        out.extend_from_slice(mname);
        out.extend_from_slice(&(rname.len() as u32).to_be_bytes());
        out.extend_from_slice(rname);
        out.extend_from_slice(&soa.serial.get().to_be_bytes());
        out.extend_from_slice(&soa.refresh.to_be_bytes());
        out.extend_from_slice(&soa.retry.to_be_bytes());
        out.extend_from_slice(&soa.expire.to_be_bytes());
        out.extend_from_slice(&soa.minimum.to_be_bytes());
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

fn read_name(input: &[u8], at: &mut usize) -> Result<domain::base::Name<Bytes>, CodecError> {
    let len = read_u32(input, at)? as usize;
    let octets = input.get(*at..*at + len).ok_or(CodecError::Truncated)?;
    *at += len;
    domain::base::Name::from_octets(Bytes::copy_from_slice(octets))
        .map_err(|_| CodecError::Malformed)
}

/// Discriminant byte written ahead of every record to tell a SOA apart from a
/// regular record-set on read.
const TAG_REGULAR: u8 = 0;
const TAG_SOA: u8 = 1;

impl RecordCodec for OpaqueRecordCodec {
    fn serialize(&self, record: &CodecRecord, out: &mut BytesMut) {
        match record {
            CodecRecord::Regular(r) => {
                out.extend_from_slice(&[TAG_REGULAR]);
                Self::serialize_regular(r, out);
            }
            CodecRecord::Soa(soa) => {
                out.extend_from_slice(&[TAG_SOA]);
                Self::serialize_soa(soa, out);
            }
        }
    }

    fn deserialize(&self, input: &[u8]) -> Result<(CodecRecord, usize), CodecError> {
        let tag = *input.first().ok_or(CodecError::Truncated)?;
        let mut at = 1usize;
        match tag {
            TAG_REGULAR => {
                let owner = read_name(input, &mut at)?;
                let class = domain::base::Class::from_int(read_u32(input, &mut at)? as u16);
                let ttl = domain::base::Ttl::from_secs(read_u32(input, &mut at)?);
                let rtype = domain::base::Rtype::from_int(read_u32(input, &mut at)? as u16);
                let rlen = read_u32(input, &mut at)? as usize;
                let rdata = input.get(at..at + rlen).ok_or(CodecError::Truncated)?;
                at += rlen;
                Ok((
                    CodecRecord::Regular(RegularRecord::new(
                        owner,
                        class,
                        ttl,
                        rtype,
                        Bytes::copy_from_slice(rdata),
                    )),
                    at,
                ))
            }
            TAG_SOA => {
                let owner = read_name(input, &mut at)?;
                let class = domain::base::Class::from_int(read_u32(input, &mut at)? as u16);
                let ttl = domain::base::Ttl::from_secs(read_u32(input, &mut at)?);
                let mname = read_name(input, &mut at)?;
                let rname = read_name(input, &mut at)?;
                let serial = crate::serial::Serial(read_u32(input, &mut at)?);
                let refresh = read_u32(input, &mut at)?;
                let retry = read_u32(input, &mut at)?;
                let expire = read_u32(input, &mut at)?;
                let minimum = read_u32(input, &mut at)?;
                Ok((
                    CodecRecord::Soa(SoaRecord {
                        owner,
                        class,
                        ttl,
                        mname,
                        rname,
                        serial,
                        refresh,
                        retry,
                        expire,
                        minimum,
                    }),
                    at,
                ))
            }
            _ => Err(CodecError::Malformed),
        }
    }
}
