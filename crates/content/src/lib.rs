//! In-memory zone content and the changesets that transform it.
//!
//! This crate provides the data model that `zonecore` builds its journal,
//! state machine and update pipeline around:
//!
//! - [`serial`]: RFC1982 serial arithmetic and journal keys.
//! - [`record`]: the opaque record-set representation the core treats as a
//!   length-prefixed blob, except for the SOA fields it must read.
//! - [`changeset`]: a single (SOA-from, SOA-to) difference, and the ordered
//!   batch of changesets that make up a contiguous history.
//! - [`contents`]: the immutable, arena-allocated zone content tree, and the
//!   builder used to construct or patch one.
//! - [`codec`]: the record (de)serialization contract the core delegates to.

pub mod changeset;
pub mod codec;
pub mod contents;
pub mod record;
pub mod serial;

pub use changeset::{Changeset, ChangesetBatch, ChangesetFlags, MergeError};
pub use codec::{OpaqueRecordCodec, RecordCodec};
pub use contents::{ZoneContents, ZoneContentsBuilder};
pub use record::{RegularRecord, SoaRecord};
pub use serial::{JournalKey, Serial, SerialPolicy};
