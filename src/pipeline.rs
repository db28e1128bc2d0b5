//! The end-to-end update pipeline (§4.6): verify -> build diff -> (optionally)
//! sign -> merge -> persist -> apply -> swap -> commit.
//!
//! [`apply_update`] is the single entry point a caller (an already
//! TSIG-verified dynamic-update handler, or the inbound-transfer path once
//! it has turned a transfer into a changeset) drives. Everything before the
//! journal commit can fail and roll back without making a single change
//! visible to a reader; everything from the commit onward is treated as
//! fatal for the zone if it fails (§7: "Post-commit failures ... are
//! treated as fatal for the update").

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use domain::base::Name;
use tracing::{info, warn};

use zonecore_content::{Changeset, JournalKey, Serial};

use crate::contracts::SignSerialPolicy;
use crate::diffsign::{sign_and_merge, DiffSignError};
use crate::error::{journal_error_to_core, pipeline_error_to_core, CoreError, JournalError, PipelineError};
use crate::flush::FlushError;
use crate::metrics::PipelineOutcome;
use crate::runtime::ZoneRuntime;
use crate::update::{apply, check_prerequisites, UpdateRequest};
use crate::zone::Zone;

/// What a successful pipeline run did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// A new instance was built, journaled and published.
    Applied { new_serial: Serial },
    /// The update section was a no-op against the current content; nothing
    /// was journaled or swapped (§4.6 step 2: "NOERROR with no changes").
    NoChange,
}

pub(crate) fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Run a dynamic-update request through the full pipeline against `zone`.
///
/// The caller is expected to have already TSIG-verified the request (§1:
/// the TSIG primitive is external); this function only does the RFC2136
/// prerequisite checks that are core content logic (§4.6 step 2).
///
/// At most one pipeline run is in flight per zone at a time: this awaits
/// `zone.update_lock` for the duration of the run, which is the "per-zone
/// mutex acquisition in the update pipeline" suspension point named in §5.
pub async fn apply_update(
    zone: &Arc<Zone>,
    runtime: &Arc<ZoneRuntime>,
    request: UpdateRequest,
) -> Result<UpdateOutcome, CoreError> {
    let _guard = zone.update_lock.lock().await;

    let outcome = run(zone, runtime, &request).await;

    let metric = match &outcome {
        Ok((UpdateOutcome::Applied { .. }, true)) => PipelineOutcome::SerialRegression,
        Ok((UpdateOutcome::Applied { .. }, false)) => PipelineOutcome::Committed,
        Ok((UpdateOutcome::NoChange, _)) => PipelineOutcome::NoDiff,
        Err(CoreError::JournalFull { .. }) => PipelineOutcome::JournalFull,
        Err(_) => PipelineOutcome::RolledBack,
    };
    runtime.metrics.record_pipeline_outcome(&zone.name, metric);

    outcome.map(|(outcome, _regressed)| outcome)
}

/// Runs the pipeline once, additionally reporting whether the computed
/// serial regressed (§4.7) so the caller can label the run for metrics
/// without `UpdateOutcome` itself having to carry that detail.
async fn run(zone: &Arc<Zone>, runtime: &Arc<ZoneRuntime>, request: &UpdateRequest) -> Result<(UpdateOutcome, bool), CoreError> {
    // Step 1: a stub zone has nothing to update against.
    let Some(old_contents) = zone.read_contents() else {
        return Err(CoreError::NotAuthoritative { zone: zone.name.clone() });
    };

    check_prerequisites(&old_contents, &request.prerequisites).map_err(|_| CoreError::InvalidArgument {
        zone: zone.name.clone(),
        detail: "an RFC2136 prerequisite was not satisfied".to_owned(),
    })?;

    let config = zone.config.load_full();
    let old_serial = old_contents.serial();
    let new_serial = config.serial_policy.next_serial(old_serial, now_unix_secs());
    let regressed = !old_serial.precedes(&new_serial);
    if regressed {
        // §4.7: proceed regardless, this is a warning, not a rejection.
        warn!(
            zone = %zone.name,
            old = %old_serial,
            new = %new_serial,
            "new serial does not advance past the old one",
        );
    }

    // Step 2: apply the update section, producing the candidate tree and
    // the user's changeset.
    let (mut new_contents, user_changeset) = apply(&old_contents, request, new_serial);

    if old_contents.same_records(&new_contents) {
        return Ok((UpdateOutcome::NoChange, false));
    }

    // Step 3-4: sign (if enabled) and merge the signing changeset into the
    // user's, with the signing SOA_to taking ownership of the merged tail.
    let (merged_changeset, refresh_at) = sign_and_merge(
        runtime.signer.as_ref(),
        &zone.name,
        &old_contents,
        &mut new_contents,
        user_changeset,
        new_serial,
    )
    .map_err(|err| diffsign_error_to_core(&zone.name, err))?;

    // Step 5: persist the merged changeset, recovering once from a full
    // journal by flushing to the zonefile and retrying (§4.2, §9's Open
    // Question resolved as the stricter behavior: abort on flush failure).
    persist(zone, runtime, &merged_changeset).await?;

    // Step 6-7: the signer already wrote its signatures into `new_contents`
    // in place (§4.6 step 6 is a no-op beyond that when there is nothing
    // further to apply); publish the result, making it visible to readers.
    zone.publish(new_contents);

    if let Some(refresh_at_unix) = refresh_at {
        let delay = Duration::from_secs(refresh_at_unix.saturating_sub(now_unix_secs()));
        zone.timers.lock().unwrap().arm_resign(tokio::time::Instant::now() + delay);
        runtime.metrics.record_resign();
        info!(zone = %zone.name, refresh_at_unix, "resign timer rescheduled after update");
    }

    // Step 8: the journal transaction was already committed in `persist`
    // before the swap above, matching §5's "journal commit happens-before
    // content swap" ordering guarantee.
    Ok((UpdateOutcome::Applied { new_serial }, regressed))
}

/// Run a periodic DNSSEC resign outside of the update pipeline (§4.5's
/// resign timer, as distinct from the signing that happens as part of
/// [`apply_update`]'s step 3).
///
/// Returns the signer's next `refresh_at` wall-clock second, if it produced
/// one, so the caller can reschedule the timer; `Ok(None)` covers both "no
/// content yet" and "the signer had nothing to do".
pub async fn run_resign(zone: &Arc<Zone>, runtime: &Arc<ZoneRuntime>) -> Result<Option<u64>, CoreError> {
    let _guard = zone.update_lock.lock().await;

    let Some(old_contents) = zone.read_contents() else {
        return Ok(None);
    };
    if !runtime.signer.is_enabled(&zone.name) {
        return Ok(None);
    }

    let config = zone.config.load_full();
    let old_serial = old_contents.serial();
    let candidate_serial = config.serial_policy.next_serial(old_serial, now_unix_secs());

    let mut new_contents = old_contents.to_builder().build();
    let outcome = runtime
        .signer
        .sign_zone(&zone.name, &mut new_contents, SignSerialPolicy::Update, candidate_serial)
        .map_err(|err| CoreError::Fatal {
            zone: zone.name.clone(),
            detail: err.0,
        })?;

    let Some(signing_changeset) = outcome.changeset else {
        return Ok(Some(outcome.refresh_at_unix_secs));
    };

    persist(zone, runtime, &signing_changeset).await?;
    zone.publish(new_contents);
    runtime.metrics.record_resign();
    info!(zone = %zone.name, refresh_at_unix = outcome.refresh_at_unix_secs, "zone resigned");

    Ok(Some(outcome.refresh_at_unix_secs))
}

fn diffsign_error_to_core(zone: &Name<Bytes>, err: DiffSignError) -> CoreError {
    match err {
        DiffSignError::Signer(e) => CoreError::Fatal {
            zone: zone.clone(),
            detail: e.0,
        },
        DiffSignError::NotContiguous => CoreError::Fatal {
            zone: zone.clone(),
            detail: "signer produced a non-contiguous changeset".to_owned(),
        },
    }
}

/// Store `changeset` in `zone`'s journal, retrying exactly once after a
/// zonefile flush if the first attempt reports [`JournalError::Full`].
pub(crate) async fn persist(zone: &Arc<Zone>, runtime: &Arc<ZoneRuntime>, changeset: &Changeset) -> Result<(), CoreError> {
    let payload = changeset.serialize(runtime.codec.as_ref());
    let key = changeset.journal_key();

    match store_once(zone, &payload, key) {
        Ok(()) => Ok(()),
        Err(PipelineError::Journal(JournalError::Full)) => {
            warn!(zone = %zone.name, "journal full, flushing to zonefile before retrying");
            flush_or_abort(zone, runtime).await?;
            runtime.metrics.record_journal_compaction();
            store_once(zone, &payload, key).map_err(|err| pipeline_error_to_core(&zone.name, err))
        }
        Err(err) => Err(pipeline_error_to_core(&zone.name, err)),
    }
}

fn store_once(zone: &Zone, payload: &Bytes, key: JournalKey) -> Result<(), PipelineError> {
    let txn = zone.journal.begin_trans()?;

    let region = match zone.journal.map(&txn, key, payload.len()) {
        Ok(region) => region,
        Err(err) => {
            let _ = zone.journal.rollback(txn);
            return Err(err.into());
        }
    };

    if let Err(err) = zone.journal.write(&txn, &region, payload) {
        let _ = zone.journal.rollback(txn);
        return Err(err.into());
    }

    if let Err(err) = zone.journal.unmap(&txn, region, true) {
        let _ = zone.journal.rollback(txn);
        return Err(err.into());
    }

    zone.journal.commit(txn).map_err(PipelineError::from)
}

/// Flush the zonefile to reclaim journal space. Per §9's Open Question, a
/// flush failure aborts the pipeline rather than risking a second `map`
/// attempt against a journal that never actually gained room.
async fn flush_or_abort(zone: &Arc<Zone>, runtime: &Arc<ZoneRuntime>) -> Result<(), CoreError> {
    crate::flush::flush_zone(zone, runtime.zonefile_writer.as_ref())
        .await
        .map(|_| ())
        .map_err(|err| match err {
            FlushError::Io(source) => CoreError::Io {
                zone: zone.name.clone(),
                source: Arc::new(source),
            },
            FlushError::Journal(journal_err) => journal_error_to_core(&zone.name, journal_err),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::contracts::{
        RecordCodec, SignOutcome, SignSerialPolicy, Signer, SignerError, TransferEnqueueError, TransferSubsystem, TransferTask,
        TsigOutcome, TsigVerifier, ZonefileWriter,
    };
    use crate::journal::mem::MemJournal;
    use crate::journal::Journal;
    use crate::metrics::CoreMetrics;
    use crate::registry::ZoneRegistry;
    use crate::update::UpdateOp;
    use domain::base::{Class, Name, Rtype, Ttl};
    use zonecore_content::{OpaqueRecordCodec, SoaRecord, ZoneContents, ZoneContentsBuilder};

    fn name(s: &str) -> Name<Bytes> {
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

    fn a_record(owner: &str) -> zonecore_content::RegularRecord {
        zonecore_content::RegularRecord::new(name(owner), Class::IN, Ttl::from_secs(3600), Rtype::A, Bytes::from_static(&[127, 0, 0, 1]))
    }

    struct NoopWriter;
    impl ZonefileWriter for NoopWriter {
        fn write(&self, _contents: &ZoneContents, _out: &mut dyn std::io::Write) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct DisabledSigner;
    impl Signer for DisabledSigner {
        fn is_enabled(&self, _zone: &Name<Bytes>) -> bool {
            false
        }
        fn sign_zone(&self, _: &Name<Bytes>, _: &mut ZoneContents, _: SignSerialPolicy, _: Serial) -> Result<SignOutcome, SignerError> {
            unreachable!()
        }
        fn sign_changeset(
            &self,
            _: &Name<Bytes>,
            _: &mut ZoneContents,
            _: &Changeset,
            _: SignSerialPolicy,
            _: Serial,
        ) -> Result<SignOutcome, SignerError> {
            unreachable!()
        }
    }

    struct NullTsig;
    impl TsigVerifier for NullTsig {
        fn verify(&self, _key_name: &Name<Bytes>, _mac: &[u8], _signed_data: &[u8]) -> TsigOutcome {
            TsigOutcome::Ok
        }
    }

    struct NullTransfer;
    impl TransferSubsystem for NullTransfer {
        fn enqueue(&self, _task: TransferTask) -> Result<(), TransferEnqueueError> {
            Ok(())
        }
    }

    fn test_runtime() -> Arc<ZoneRuntime> {
        Arc::new(ZoneRuntime::new(
            Arc::new(ZoneRegistry::new()),
            Arc::new(OpaqueRecordCodec) as Arc<dyn RecordCodec>,
            Arc::new(DisabledSigner) as Arc<dyn Signer>,
            Arc::new(NullTsig) as Arc<dyn TsigVerifier>,
            Arc::new(NullTransfer) as Arc<dyn TransferSubsystem>,
            Arc::new(NoopWriter) as Arc<dyn ZonefileWriter>,
            Arc::new(CoreMetrics::new()),
        ))
    }

    fn test_zone(journal_capacity: usize) -> Arc<Zone> {
        let contents = ZoneContentsBuilder::new(name("example.com."), soa(1)).build();
        let zone = Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::new(journal_capacity)));
        zone.publish(contents);
        Arc::new(zone)
    }

    #[tokio::test]
    async fn add_record_commits_and_publishes_new_serial() {
        let zone = test_zone(usize::MAX);
        let runtime = test_runtime();
        let request = UpdateRequest {
            prerequisites: vec![],
            ops: vec![UpdateOp::AddRecord(a_record("www.example.com."))],
        };

        let outcome = apply_update(&zone, &runtime, request).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied { new_serial: Serial::new(2) });
        assert_eq!(zone.live_serial(), Some(Serial::new(2)));
        assert!(zone.journal.is_used());
    }

    #[tokio::test]
    async fn duplicate_add_is_reported_as_no_change() {
        let zone = test_zone(usize::MAX);
        let runtime = test_runtime();

        // Seed the record first.
        apply_update(
            &zone,
            &runtime,
            UpdateRequest {
                prerequisites: vec![],
                ops: vec![UpdateOp::AddRecord(a_record("www.example.com."))],
            },
        )
        .await
        .unwrap();

        let outcome = apply_update(
            &zone,
            &runtime,
            UpdateRequest {
                prerequisites: vec![],
                ops: vec![UpdateOp::AddRecord(a_record("www.example.com."))],
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, UpdateOutcome::NoChange);
        assert_eq!(zone.live_serial(), Some(Serial::new(2)));
    }

    #[tokio::test]
    async fn stub_zone_is_not_authoritative() {
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        let runtime = test_runtime();
        let err = apply_update(
            &zone,
            &runtime,
            UpdateRequest {
                prerequisites: vec![],
                ops: vec![UpdateOp::AddRecord(a_record("www.example.com."))],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::NotAuthoritative { .. }));
    }

    #[tokio::test]
    async fn journal_full_flushes_zonefile_then_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ZoneConfig::default();
        config.storage_dir = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        // A previously committed, still-dirty changeset sized to exactly
        // fill the journal; flushing at the live serial (2, matching this
        // entry's soa_to) compacts it away and frees the room the retry
        // below needs.
        let codec = OpaqueRecordCodec;
        let prior_record = a_record("pre.example.com.");
        let mut prior = Changeset::new(soa(1), soa(2));
        prior.add(prior_record);
        let prior_payload = prior.serialize(&codec);
        let capacity = prior_payload.len();

        let journal = MemJournal::new(capacity);
        let txn = journal.begin_trans().unwrap();
        let region = journal.map(&txn, prior.journal_key(), prior_payload.len()).unwrap();
        journal.write(&txn, &region, &prior_payload).unwrap();
        journal.unmap(&txn, region, true).unwrap();
        journal.commit(txn).unwrap();

        let contents = ZoneContentsBuilder::new(name("example.com."), soa(2)).build();
        let zone = Zone::new(name("example.com."), config, Arc::new(journal));
        zone.publish(contents);
        let zone = Arc::new(zone);
        let runtime = test_runtime();

        // Same owner-name and rdata length as `prior_record` above, so the
        // retried write's serialized length exactly matches the space the
        // flush frees: the first `map` attempt reports FULL (the prior
        // entry already fills `capacity`), and the post-flush retry fits.
        let outcome = apply_update(
            &zone,
            &runtime,
            UpdateRequest {
                prerequisites: vec![],
                ops: vec![UpdateOp::AddRecord(a_record("www.example.com."))],
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, UpdateOutcome::Applied { new_serial: Serial::new(3) });
        assert_eq!(*zone.zonefile_serial.lock().unwrap(), Serial::new(2));
    }

    struct RrsigSigner;
    impl Signer for RrsigSigner {
        fn is_enabled(&self, _zone: &Name<Bytes>) -> bool {
            true
        }
        fn sign_zone(
            &self,
            _zone: &Name<Bytes>,
            contents: &mut ZoneContents,
            _policy: SignSerialPolicy,
            _new_serial: Serial,
        ) -> Result<SignOutcome, SignerError> {
            let rrsig = zonecore_content::RegularRecord::new(
                name("example.com."),
                Class::IN,
                Ttl::from_secs(3600),
                Rtype::RRSIG,
                Bytes::from_static(&[0, 1, 2, 3]),
            );
            let mut builder = contents.to_builder();
            builder.insert(rrsig.clone());
            *contents = builder.build();

            let mut changeset = Changeset::new(contents.soa.clone(), contents.soa.clone());
            changeset.add(rrsig);
            Ok(SignOutcome {
                changeset: Some(changeset),
                refresh_at_unix_secs: now_unix_secs() + 3600,
            })
        }
        fn sign_changeset(
            &self,
            zone: &Name<Bytes>,
            contents: &mut ZoneContents,
            _user_changeset: &Changeset,
            policy: SignSerialPolicy,
            new_serial: Serial,
        ) -> Result<SignOutcome, SignerError> {
            self.sign_zone(zone, contents, policy, new_serial)
        }
    }

    #[tokio::test]
    async fn periodic_resign_journals_and_publishes_new_signatures() {
        let zone = test_zone(usize::MAX);
        let runtime = Arc::new(ZoneRuntime::new(
            Arc::new(ZoneRegistry::new()),
            Arc::new(OpaqueRecordCodec) as Arc<dyn RecordCodec>,
            Arc::new(RrsigSigner) as Arc<dyn Signer>,
            Arc::new(NullTsig) as Arc<dyn TsigVerifier>,
            Arc::new(NullTransfer) as Arc<dyn TransferSubsystem>,
            Arc::new(NoopWriter) as Arc<dyn ZonefileWriter>,
            Arc::new(CoreMetrics::new()),
        ));

        let refresh_at = run_resign(&zone, &runtime).await.unwrap();
        assert!(refresh_at.is_some());
        assert!(zone.journal.is_used());
        let contents = zone.read_contents().unwrap();
        assert!(contents
            .apex_records_of_type(Rtype::RRSIG)
            .iter()
            .any(|r| r.rdata == Bytes::from_static(&[0, 1, 2, 3])));
    }

    #[tokio::test]
    async fn periodic_resign_is_a_noop_for_a_stub_zone() {
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        let runtime = Arc::new(ZoneRuntime::new(
            Arc::new(ZoneRegistry::new()),
            Arc::new(OpaqueRecordCodec) as Arc<dyn RecordCodec>,
            Arc::new(RrsigSigner) as Arc<dyn Signer>,
            Arc::new(NullTsig) as Arc<dyn TsigVerifier>,
            Arc::new(NullTransfer) as Arc<dyn TransferSubsystem>,
            Arc::new(NoopWriter) as Arc<dyn ZonefileWriter>,
            Arc::new(CoreMetrics::new()),
        ));

        assert_eq!(run_resign(&zone, &runtime).await.unwrap(), None);
    }
}
