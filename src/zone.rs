//! The zone handle (§3: "Zone handle") and its live timer/transfer state
//! (§4.5: "Zone state machine").

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use domain::base::Name;

use zonecore_content::{Serial, ZoneContents};

use crate::config::ZoneConfig;
use crate::journal::Journal;
use crate::timers::ZoneTimers;

//----------- TransferState -----------------------------------------------------

/// The `xfr_in.state` flag described in §4.5.
///
/// `IDLE -> SCHEDULED` happens when a timer arms a future attempt;
/// `SCHEDULED -> PENDING` happens when a transfer request is actually
/// enqueued, guarded by [`Zone::xfr_state`]'s mutex so at most one transfer
/// is ever in flight per zone; any transition back to `IDLE` happens on
/// completion, success or terminal failure alike.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransferState {
    #[default]
    Idle,
    Scheduled,
    Pending,
}

impl TransferState {
    /// Attempt `IDLE|SCHEDULED -> PENDING`. Returns `false` (and leaves the
    /// state untouched) if a transfer is already `PENDING` — the duplicate
    /// suppression rule in §4.5 ("If PENDING is observed on a new attempt,
    /// the attempt is dropped").
    pub fn begin_transfer(&mut self) -> bool {
        if *self == TransferState::Pending {
            return false;
        }
        *self = TransferState::Pending;
        true
    }

    pub fn schedule(&mut self) {
        if *self == TransferState::Idle {
            *self = TransferState::Scheduled;
        }
    }

    pub fn finish(&mut self) {
        *self = TransferState::Idle;
    }
}

//----------- Zone ----------------------------------------------------------------

/// A zone handle: the stable identity the registry keys on.
///
/// Outlives any one [`ZoneContents`] tree; `contents` is swapped out from
/// under readers per §4.8, never mutated in place. The handle's own
/// `Arc<Zone>` reference count (held by the registry and by anything
/// currently acting on the zone) is the "reference count" §3 names —
/// ordinary `Arc` cloning, no separate field needed.
pub struct Zone {
    /// Canonical lowercase owner name of this zone's apex.
    pub name: Name<Bytes>,

    /// Configuration snapshot; swapped whole on reconfiguration, matching
    /// the "whole value, swapped" discipline the content tree uses.
    pub config: ArcSwap<ZoneConfig>,

    /// The zone's current content, or `None` for an empty "stub" zone that
    /// has not yet loaded anything (§3: "may be empty = stub").
    pub contents: ArcSwapOption<ZoneContents>,

    /// This zone's change-log journal.
    pub journal: Arc<dyn Journal>,

    /// Live timer deadlines for this zone (§4.5).
    pub timers: Mutex<ZoneTimers>,

    /// The `xfr_in.state` flag (§4.5), guarded separately from `timers` so
    /// a transfer-state check never has to wait on a timer deadline being
    /// revised and vice versa.
    pub xfr_state: Mutex<TransferState>,

    /// Serializes update-pipeline runs against this zone (§4.6, §5: "the
    /// per-zone mutex acquisition in the update pipeline"). An async mutex
    /// since it is held across the journal and signer suspension points a
    /// pipeline run goes through; distinct from `xfr_state`, which guards
    /// only the transfer-attempt flag.
    pub update_lock: tokio::sync::Mutex<()>,

    /// The serial last successfully persisted to the on-disk zonefile.
    ///
    /// A plain `Mutex<Serial>` rather than an atomic: §4's invariant
    /// compares this against the live serial using RFC1982 order, which is
    /// not representable as a single atomic compare-and-swap.
    pub zonefile_serial: Mutex<Serial>,

    /// Modification time of the zonefile as of the last successful flush.
    pub zonefile_mtime: Mutex<Option<SystemTime>>,
}

impl Zone {
    pub fn new(name: Name<Bytes>, config: ZoneConfig, journal: Arc<dyn Journal>) -> Self {
        Self {
            name,
            config: ArcSwap::from_pointee(config),
            contents: ArcSwapOption::empty(),
            journal,
            timers: Mutex::new(ZoneTimers::default()),
            xfr_state: Mutex::new(TransferState::default()),
            update_lock: tokio::sync::Mutex::new(()),
            zonefile_serial: Mutex::new(Serial::new(0)),
            zonefile_mtime: Mutex::new(None),
        }
    }

    /// Whether this zone is still a stub (no content loaded yet).
    pub fn is_stub(&self) -> bool {
        self.contents.load().is_none()
    }

    /// A reader's view of the current content: a brief, lock-free capture
    /// of the live pointer (§4.8). Holding the returned `Arc` for the
    /// duration of a read keeps the tree alive even if a writer swaps in a
    /// new one concurrently.
    pub fn read_contents(&self) -> Option<Arc<ZoneContents>> {
        self.contents.load_full()
    }

    /// Publish `new_contents` as the live tree (§4.8 steps 1-2). The
    /// previous tree, if any, is dropped here; `arc_swap` guarantees its
    /// backing allocation is only actually freed once every reader that
    /// captured it beforehand has dropped its guard (the quiescence
    /// barrier of §4.8 step 3, satisfied internally rather than by an
    /// explicit wait).
    pub fn publish(&self, new_contents: ZoneContents) {
        self.contents.store(Some(Arc::new(new_contents)));
    }

    /// The zone's live serial, or `None` for a stub zone.
    pub fn live_serial(&self) -> Option<Serial> {
        self.contents.load().as_deref().map(|c| c.serial())
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("is_stub", &self.is_stub())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::mem::MemJournal;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    #[test]
    fn fresh_zone_is_a_stub() {
        let zone = Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default()));
        assert!(zone.is_stub());
        assert_eq!(zone.live_serial(), None);
    }

    #[test]
    fn transfer_state_suppresses_duplicate_attempts() {
        let mut state = TransferState::default();
        state.schedule();
        assert_eq!(state, TransferState::Scheduled);
        assert!(state.begin_transfer());
        assert_eq!(state, TransferState::Pending);
        // A second attempt while PENDING is dropped.
        assert!(!state.begin_transfer());
        state.finish();
        assert_eq!(state, TransferState::Idle);
    }
}
