//! The per-zone timer set and state-machine driver loops (§4.5).
//!
//! Each timer is a `tokio::sync::watch` channel carrying the next deadline
//! as an `Option<Instant>`; a driver loop `select!`s between the channel
//! changing (the deadline was revised) and `sleep_until` firing, mirroring
//! a resign-loop pattern like `zone_signer.rs`'s. Revising a
//! deadline never requires cancelling and recreating a `tokio::time::Sleep`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::contracts::{TransferEnqueueError, TransferTask, TransferTaskKind, Transport};
use crate::runtime::ZoneRuntime;
use crate::zone::Zone;

/// Fraction of REFRESH/RETRY subtracted as jitter when a fixed factor is
/// wanted instead of a per-zone config value (§4.5's `JITTER_PCT`).
pub const DEFAULT_JITTER_PCT: f64 = 0.1;

/// Reduce `base_secs` by a uniformly random amount up to `jitter_pct` of
/// its value, so that many zones with the same REFRESH do not all wake up
/// in lockstep.
pub fn jittered_delay(base_secs: u32, jitter_pct: f64) -> Duration {
    let jitter_pct = jitter_pct.clamp(0.0, 1.0);
    let base = Duration::from_secs(base_secs as u64);
    if jitter_pct <= 0.0 {
        return base;
    }
    let actual_pct = rand::thread_rng().gen_range(0.0..=jitter_pct);
    base.saturating_sub(base.mul_f64(actual_pct))
}

//----------- ZoneTimers -----------------------------------------------------------

/// The live timer state for one zone: the next deadline for each of the
/// five timers named in §4.5, each independently revisable.
#[derive(Debug)]
pub struct ZoneTimers {
    refresh: watch::Sender<Option<Instant>>,
    expire: watch::Sender<Option<Instant>>,
    flush: watch::Sender<Option<Instant>>,
    resign: watch::Sender<Option<Instant>>,
}

impl Default for ZoneTimers {
    fn default() -> Self {
        Self {
            refresh: watch::channel(None).0,
            expire: watch::channel(None).0,
            flush: watch::channel(None).0,
            resign: watch::channel(None).0,
        }
    }
}

impl ZoneTimers {
    pub fn arm_refresh(&self, at: Instant) {
        let _ = self.refresh.send(Some(at));
    }

    pub fn cancel_refresh(&self) {
        let _ = self.refresh.send(None);
    }

    pub fn subscribe_refresh(&self) -> watch::Receiver<Option<Instant>> {
        self.refresh.subscribe()
    }

    /// Arm the EXPIRE timer, idempotently: a zone already bootstrapping has
    /// no EXPIRE armed yet (§4.5: "created on the first REFRESH attempt of
    /// a non-bootstrap zone").
    pub fn arm_expire(&self, at: Instant) {
        let _ = self.expire.send(Some(at));
    }

    pub fn cancel_expire(&self) {
        let _ = self.expire.send(None);
    }

    pub fn subscribe_expire(&self) -> watch::Receiver<Option<Instant>> {
        self.expire.subscribe()
    }

    pub fn arm_flush(&self, at: Instant) {
        let _ = self.flush.send(Some(at));
    }

    pub fn subscribe_flush(&self) -> watch::Receiver<Option<Instant>> {
        self.flush.subscribe()
    }

    pub fn arm_resign(&self, at: Instant) {
        let _ = self.resign.send(Some(at));
    }

    pub fn cancel_resign(&self) {
        let _ = self.resign.send(None);
    }

    pub fn subscribe_resign(&self) -> watch::Receiver<Option<Instant>> {
        self.resign.subscribe()
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

//----------- REFRESH / RETRY --------------------------------------------------------

/// Drive the REFRESH/RETRY timer for `zone` until the zone is removed from
/// `runtime`'s registry.
///
/// On fire: if the zone has no content yet, this is the bootstrap path and
/// an AXFR is requested without arming EXPIRE; otherwise an SOA probe is
/// requested over TCP and, on the first non-bootstrap attempt, EXPIRE is
/// armed at `SOA.expire + 2 * max_conn_idle`. Rescheduling happens before
/// the request is enqueued, so a slow transfer subsystem never delays the
/// next fire (§4.5).
pub async fn drive_refresh(zone: Arc<Zone>, runtime: Arc<ZoneRuntime>) {
    let mut rx = zone.timers.lock().unwrap().subscribe_refresh();
    let mut deadline = *rx.borrow_and_update();
    let mut expire_armed = false;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                deadline = *rx.borrow_and_update();
            }
            _ = sleep_until_or_forever(deadline) => {
                if runtime.registry.get(&zone.name).is_none() {
                    return;
                }
                fire_refresh(&zone, &runtime, &mut expire_armed);
                deadline = *zone.timers.lock().unwrap().subscribe_refresh().borrow();
            }
        }
    }
}

fn fire_refresh(zone: &Arc<Zone>, runtime: &Arc<ZoneRuntime>, expire_armed: &mut bool) {
    let is_bootstrap = zone.is_stub();
    let config = zone.config.load();

    let (base_secs, kind) = match zone.read_contents() {
        Some(contents) => (contents.soa.refresh, TransferTaskKind::SoaProbe),
        None => (config.dbsync_timeout_secs as u32, TransferTaskKind::Axfr),
    };

    {
        let timers = zone.timers.lock().unwrap();
        let next = Instant::now() + jittered_delay(base_secs, config.jitter_pct);
        timers.arm_refresh(next);
    }

    if !is_bootstrap && !*expire_armed {
        if let Some(contents) = zone.read_contents() {
            let expire_delay = Duration::from_secs(contents.soa.expire as u64) + Duration::from_millis(2 * config.max_conn_idle_ms);
            zone.timers.lock().unwrap().arm_expire(Instant::now() + expire_delay);
            *expire_armed = true;
        }
    }

    let mut state = zone.xfr_state.lock().unwrap();
    if !state.begin_transfer() {
        info!(zone = %zone.name, "refresh skipped: a transfer is already pending");
        return;
    }

    let Some(master) = config.master else {
        warn!(zone = %zone.name, "refresh fired but no master is configured");
        return;
    };

    let task = TransferTask {
        zone: zone.name.clone(),
        kind,
        address: master,
        tsig_key: None,
        transport: Transport::Tcp,
    };

    if let Err(TransferEnqueueError(detail)) = runtime.transfer.enqueue(task) {
        warn!(zone = %zone.name, detail, "failed to enqueue transfer task");
    }
}

//----------- EXPIRE --------------------------------------------------------------

/// Drive the EXPIRE timer: on fire, remove the zone's content from the
/// registry, cancel REFRESH, and let reclamation proceed once readers that
/// captured the old pointer have finished (§4.5, §4.8).
pub async fn drive_expire(zone: Arc<Zone>, runtime: Arc<ZoneRuntime>) {
    let mut rx = zone.timers.lock().unwrap().subscribe_expire();
    loop {
        let deadline = *rx.borrow_and_update();
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = sleep_until_or_forever(deadline) => {
                if runtime.registry.get(&zone.name).is_none() {
                    return;
                }
                warn!(zone = %zone.name, "zone expired");
                zone.contents.store(None);
                zone.timers.lock().unwrap().cancel_refresh();
                return;
            }
        }
    }
}

//----------- Flush ---------------------------------------------------------------

/// Drive the flush timer: every `dbsync_timeout` seconds, synchronize dirty
/// journal entries to the text zonefile (§4.5, §4.9).
pub async fn drive_flush(zone: Arc<Zone>, runtime: Arc<ZoneRuntime>) {
    loop {
        let dbsync_secs = zone.config.load().dbsync_timeout_secs;
        tokio::time::sleep(Duration::from_secs(dbsync_secs)).await;

        if runtime.registry.get(&zone.name).is_none() {
            return;
        }

        match crate::flush::flush_zone(&zone, runtime.zonefile_writer.as_ref()).await {
            Ok(crate::flush::FlushOutcome::Flushed) => runtime.metrics.record_flush(),
            Ok(crate::flush::FlushOutcome::UpToDate) => {}
            Err(err) => warn!(zone = %zone.name, %err, "flush failed"),
        }
    }
}

//----------- Resign --------------------------------------------------------------

/// Drive the DNSSEC resign timer: fires at the wall-clock second the signer
/// last asked for, resigns, and reschedules itself from the signer's
/// returned `refresh_at` (§4.5).
pub async fn drive_resign(zone: Arc<Zone>, runtime: Arc<ZoneRuntime>) {
    let mut rx = zone.timers.lock().unwrap().subscribe_resign();
    let mut deadline = *rx.borrow_and_update();

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                deadline = *rx.borrow_and_update();
            }
            _ = sleep_until_or_forever(deadline) => {
                if runtime.registry.get(&zone.name).is_none() {
                    return;
                }
                if !runtime.signer.is_enabled(&zone.name) {
                    return;
                }
                info!(zone = %zone.name, "resign timer fired");
                match crate::pipeline::run_resign(&zone, &runtime).await {
                    Ok(Some(refresh_at_unix)) => {
                        let delay = Duration::from_secs(refresh_at_unix.saturating_sub(now_unix_secs()));
                        let next = Instant::now() + delay;
                        zone.timers.lock().unwrap().arm_resign(next);
                        deadline = Some(next);
                    }
                    Ok(None) => {
                        deadline = None;
                    }
                    Err(err) => {
                        warn!(zone = %zone.name, %err, "DNSSEC resign failed");
                        deadline = None;
                    }
                }
            }
        }
    }
}

fn now_unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
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
    use crate::metrics::CoreMetrics;
    use crate::registry::ZoneRegistry;
    use domain::base::{Class, Name, Ttl};
    use std::net::SocketAddr;
    use zonecore_content::{Changeset, OpaqueRecordCodec, Serial, SoaRecord, ZoneContents, ZoneContentsBuilder};

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
            expire: 1,
            minimum: 300,
        }
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

    /// Captures every task handed to it on an unbounded channel, so a test
    /// can await the next one instead of polling.
    struct CapturingTransfer(tokio::sync::mpsc::UnboundedSender<TransferTask>);
    impl TransferSubsystem for CapturingTransfer {
        fn enqueue(&self, task: TransferTask) -> Result<(), TransferEnqueueError> {
            let _ = self.0.send(task);
            Ok(())
        }
    }

    fn test_runtime(transfer: Arc<dyn TransferSubsystem>) -> Arc<ZoneRuntime> {
        Arc::new(ZoneRuntime::new(
            Arc::new(ZoneRegistry::new()),
            Arc::new(OpaqueRecordCodec) as Arc<dyn RecordCodec>,
            Arc::new(DisabledSigner) as Arc<dyn Signer>,
            Arc::new(NullTsig) as Arc<dyn TsigVerifier>,
            transfer,
            Arc::new(NoopWriter) as Arc<dyn ZonefileWriter>,
            Arc::new(CoreMetrics::new()),
        ))
    }

    #[test]
    fn jittered_delay_never_exceeds_the_base() {
        for _ in 0..50 {
            let delay = jittered_delay(100, 0.2);
            assert!(delay <= Duration::from_secs(100));
            assert!(delay >= Duration::from_secs(80));
        }
    }

    #[test]
    fn zero_jitter_returns_the_base_exactly() {
        assert_eq!(jittered_delay(100, 0.0), Duration::from_secs(100));
    }

    #[tokio::test]
    async fn drive_refresh_bootstraps_a_stub_zone_with_axfr_and_does_not_arm_expire() {
        let addr: SocketAddr = "127.0.0.1:53".parse().unwrap();
        let mut config = ZoneConfig::default();
        config.master = Some(addr);
        let zone = Arc::new(Zone::new(name("example.com."), config, Arc::new(MemJournal::default())));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runtime = test_runtime(Arc::new(CapturingTransfer(tx)));
        runtime.registry.insert(zone.clone());

        zone.timers.lock().unwrap().arm_refresh(Instant::now());
        let handle = tokio::spawn(drive_refresh(zone.clone(), runtime.clone()));

        let task = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("drive_refresh did not fire in time")
            .expect("transfer channel closed unexpectedly");

        assert_eq!(task.kind, TransferTaskKind::Axfr);
        assert_eq!(task.address, addr);
        assert!(zone.timers.lock().unwrap().subscribe_expire().borrow().is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn drive_refresh_probes_a_loaded_zone_and_arms_expire_on_first_attempt() {
        let addr: SocketAddr = "127.0.0.1:53".parse().unwrap();
        let mut config = ZoneConfig::default();
        config.master = Some(addr);
        let zone = Arc::new(Zone::new(name("example.com."), config, Arc::new(MemJournal::default())));
        zone.publish(ZoneContentsBuilder::new(name("example.com."), soa(1)).build());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let runtime = test_runtime(Arc::new(CapturingTransfer(tx)));
        runtime.registry.insert(zone.clone());

        zone.timers.lock().unwrap().arm_refresh(Instant::now());
        let handle = tokio::spawn(drive_refresh(zone.clone(), runtime.clone()));

        let task = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("drive_refresh did not fire in time")
            .expect("transfer channel closed unexpectedly");

        assert_eq!(task.kind, TransferTaskKind::SoaProbe);
        assert!(zone.timers.lock().unwrap().subscribe_expire().borrow().is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn drive_expire_clears_content_and_cancels_refresh_while_a_prior_reader_keeps_its_snapshot() {
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        zone.publish(ZoneContentsBuilder::new(name("example.com."), soa(1)).build());
        zone.timers.lock().unwrap().arm_refresh(Instant::now() + Duration::from_secs(3600));

        // A reader that captured the tree before EXPIRE fires keeps a valid
        // snapshot regardless of what happens to the registry afterward.
        let snapshot = zone.read_contents().unwrap();

        let runtime = test_runtime(Arc::new(CapturingTransfer(tokio::sync::mpsc::unbounded_channel().0)));
        runtime.registry.insert(zone.clone());

        zone.timers.lock().unwrap().arm_expire(Instant::now());
        drive_expire(zone.clone(), runtime.clone()).await;

        assert!(zone.is_stub());
        assert!(zone.timers.lock().unwrap().subscribe_refresh().borrow().is_none());
        // A fresh read after expiry sees nothing.
        assert!(zone.read_contents().is_none());
        // The earlier snapshot is untouched.
        assert_eq!(snapshot.serial(), Serial::new(1));
    }

    #[tokio::test]
    async fn drive_expire_is_a_noop_once_the_zone_leaves_the_registry() {
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        zone.publish(ZoneContentsBuilder::new(name("example.com."), soa(1)).build());
        zone.timers.lock().unwrap().arm_expire(Instant::now());

        let runtime = test_runtime(Arc::new(CapturingTransfer(tokio::sync::mpsc::unbounded_channel().0)));
        // Deliberately not inserted into the registry: `drive_expire` must
        // check the registry before clearing content rather than just the
        // timer watch channel.
        drive_expire(zone.clone(), runtime.clone()).await;

        assert!(!zone.is_stub());
    }
}
