//! Journal apply on startup (§4.10).
//!
//! After a zone's content is loaded from its on-disk zonefile at serial
//! `S0`, replay every journal entry from `S0` forward to reconstruct the
//! live tree. A discontinuous journal is not an error — catch-up simply
//! ends at the last contiguous point, and the normal REFRESH cycle is
//! left to bring the zone the rest of the way forward.

use zonecore_content::{Changeset, RecordCodec, Serial, ZoneContents, ZoneContentsBuilder};

use crate::journal::{FetchPredicate, Journal};

/// The outcome of a catch-up pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CatchUpOutcome {
    /// Every entry from `S0` onward applied cleanly; the zone is fully
    /// caught up to the journal's tip.
    Ok,
    /// The journal's history was discontinuous, or ended, before the
    /// journal's own latest entry; the zone is behind and REFRESH will
    /// eventually catch it up the rest of the way.
    Erange,
}

/// Replay journal history starting at `zonefile_serial` onto `base`,
/// returning the resulting content tree and how far the replay got.
///
/// `base`'s serial must equal `zonefile_serial`; this is the "content
/// loaded from the zonefile at serial S0" precondition of §4.10.
pub fn catch_up(
    base: ZoneContents,
    zonefile_serial: Serial,
    journal: &dyn Journal,
    codec: &dyn RecordCodec,
) -> (ZoneContents, CatchUpOutcome) {
    let mut entries = journal.fetch(FetchPredicate::ByFrom(zonefile_serial));
    entries.sort_by_key(|e| e.key);

    let mut current = base;
    let mut expected_from = zonefile_serial;

    for entry in entries {
        if entry.from_serial() != expected_from {
            // Discontinuous: stop here, the caller gets a partial result.
            return (current, CatchUpOutcome::Erange);
        }

        let payload = match journal.read(entry.key) {
            Ok(payload) => payload,
            Err(_) => return (current, CatchUpOutcome::Erange),
        };

        let changeset = match Changeset::deserialize(&payload, codec) {
            Ok(changeset) => changeset,
            Err(_) => return (current, CatchUpOutcome::Erange),
        };

        current = apply_changeset(&current, &changeset);
        expected_from = entry.to_serial();
    }

    (current, CatchUpOutcome::Ok)
}

fn apply_changeset(contents: &ZoneContents, changeset: &Changeset) -> ZoneContents {
    let mut builder: ZoneContentsBuilder = contents.to_builder();
    for record in &changeset.removed {
        builder.remove(record);
    }
    for record in &changeset.added {
        builder.insert(record.clone());
    }
    builder.set_soa(changeset.soa_to.clone());
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::mem::MemJournal;
    use domain::base::{Class, Name, Rtype, Ttl};
    use zonecore_content::{JournalKey, OpaqueRecordCodec, RegularRecord, SoaRecord};

    fn name(s: &str) -> Name<bytes::Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    fn soa(serial: u32) -> SoaRecord {
        SoaRecord {
            owner: name("example.com."),
            class: Class::IN,
            ttl: Ttl::from_secs(3600),
            mname: name("ns1.example.com."),
            rname: name("hostmaster.example.com."),
            serial: Serial::new(serial),
            refresh: 3600,
            retry: 900,
            expire: 604_800,
            minimum: 300,
        }
    }

    fn store(journal: &MemJournal, codec: &OpaqueRecordCodec, changeset: &Changeset) {
        let payload = changeset.serialize(codec);
        let txn = journal.begin_trans().unwrap();
        let region = journal.map(&txn, changeset.journal_key(), payload.len()).unwrap();
        journal.write(&txn, &region, &payload).unwrap();
        journal.unmap(&txn, region, true).unwrap();
        journal.commit(txn).unwrap();
    }

    #[test]
    fn catch_up_applies_a_contiguous_chain() {
        let journal = MemJournal::default();
        let codec = OpaqueRecordCodec;
        let base = ZoneContentsBuilder::new(name("example.com."), soa(100)).build();

        let record = RegularRecord::new(name("www.example.com."), Class::IN, Ttl::from_secs(300), Rtype::A, bytes::Bytes::from_static(&[1, 2, 3, 4]));

        let mut c1 = Changeset::new(soa(100), soa(101));
        c1.add(record.clone());
        store(&journal, &codec, &c1);

        let c2 = Changeset::new(soa(101), soa(102));
        store(&journal, &codec, &c2);

        let (result, outcome) = catch_up(base, Serial::new(100), &journal, &codec);
        assert_eq!(outcome, CatchUpOutcome::Ok);
        assert_eq!(result.serial(), Serial::new(102));
        assert!(result.node(&name("www.example.com.")).is_some());
    }

    #[test]
    fn catch_up_stops_at_a_gap() {
        let journal = MemJournal::default();
        let codec = OpaqueRecordCodec;
        let base = ZoneContentsBuilder::new(name("example.com."), soa(100)).build();

        // Entry for 101->102 exists, but nothing for 100->101: a gap at
        // the very start of the requested range.
        let c = Changeset::new(soa(101), soa(102));
        store(&journal, &codec, &c);

        let (result, outcome) = catch_up(base, Serial::new(100), &journal, &codec);
        assert_eq!(outcome, CatchUpOutcome::Erange);
        assert_eq!(result.serial(), Serial::new(100));
    }

    #[test]
    fn journal_key_ordering_matches_fetch_predicate() {
        assert_eq!(JournalKey::pack(Serial::new(1), Serial::new(2)).from(), Serial::new(1));
    }
}
