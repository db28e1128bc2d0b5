//! Trait contracts for the subsystems this crate consumes but does not
//! implement (§1, §6).
//!
//! Each trait here names the one external collaborator it stands in for, so
//! the boundary excluded from this crate's scope stays visible at the call
//! site rather than disappearing into a generic `Box<dyn Something>`.

use std::io::Write;
use std::net::SocketAddr;

use bytes::Bytes;
use domain::base::Name;
use zonecore_content::{Changeset, Serial, ZoneContents};

pub use zonecore_content::RecordCodec;

//----------- ZonefileWriter -----------------------------------------------------------

/// Stands in for the text-zonefile dump writer (§6: "Zonefile... as
/// produced by the external dump writer").
///
/// The flush path (§4.9) calls this to render `contents` as standard DNS
/// master-file text into a temporary file before the atomic rename; the
/// writer itself never sees the temp-file/rename discipline, only the
/// open `Write` handle.
pub trait ZonefileWriter: Send + Sync {
    fn write(&self, contents: &ZoneContents, out: &mut dyn Write) -> std::io::Result<()>;
}

//----------- Signer -----------------------------------------------------------------

/// Stands in for the DNSSEC signing engine.
///
/// The core calls this during step 3 of the update pipeline (§4.6) to
/// either fully resign a zone or sign just the records an update touched.
/// Real signing key management, key rollover and NSEC(3) chain maintenance
/// live entirely on the other side of this trait.
pub trait Signer: Send + Sync {
    /// Whether DNSSEC signing is enabled for `zone`.
    fn is_enabled(&self, zone: &Name<Bytes>) -> bool;

    /// Fully resign `contents`, writing new signatures in place and
    /// returning a changeset describing exactly what changed plus the wall
    /// clock second at which the signer wants to be invoked again.
    fn sign_zone(
        &self,
        zone: &Name<Bytes>,
        contents: &mut ZoneContents,
        serial_policy: SignSerialPolicy,
        new_serial: Serial,
    ) -> Result<SignOutcome, SignerError>;

    /// Sign only the records touched by `user_changeset`, writing new
    /// signatures into `contents` and returning a changeset describing the
    /// signing-only delta plus the next refresh instant.
    fn sign_changeset(
        &self,
        zone: &Name<Bytes>,
        contents: &mut ZoneContents,
        user_changeset: &Changeset,
        serial_policy: SignSerialPolicy,
        new_serial: Serial,
    ) -> Result<SignOutcome, SignerError>;
}

/// Whether a signing call should keep the SOA serial the pipeline already
/// picked, or is free to pick its own (mirrors the `KEEP`/`UPDATE` values
/// named in §6's signer contract).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignSerialPolicy {
    Keep,
    Update,
}

/// The result of a signing call: the signing-only changeset (possibly
/// empty) and the next wall-clock second the resign timer should fire at.
#[derive(Clone, Debug)]
pub struct SignOutcome {
    pub changeset: Option<Changeset>,
    pub refresh_at_unix_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SignerError(pub String);

impl std::fmt::Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "signer error: {}", self.0)
    }
}

impl std::error::Error for SignerError {}

//----------- TsigVerifier -------------------------------------------------------------

/// Stands in for the wire-level TSIG verification the caller performs
/// before handing a request to the update pipeline.
///
/// `zonecore` itself never parses wire messages or MAC bytes; this trait
/// exists only so a caller's verifier can be exercised with the same test
/// harness used for the rest of the pipeline.
pub trait TsigVerifier: Send + Sync {
    fn verify(&self, key_name: &Name<Bytes>, mac: &[u8], signed_data: &[u8]) -> TsigOutcome;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TsigOutcome {
    Ok,
    BadKey,
    BadSig,
    /// The time signed in the query, for constructing a BADTIME response.
    BadTime { time_signed: u64 },
}

//----------- TransferSubsystem --------------------------------------------------------

/// Stands in for the AXFR/IXFR/NOTIFY worker pool (§6: "Transfer subsystem
/// contract").
///
/// The core only ever constructs a [`TransferTask`] and hands it off;
/// connection management, retries below the zone-state-machine level, and
/// wire-level XFR parsing are all on the other side of this trait.
pub trait TransferSubsystem: Send + Sync {
    fn enqueue(&self, task: TransferTask) -> Result<(), TransferEnqueueError>;
}

#[derive(Clone, Debug)]
pub struct TransferTask {
    pub zone: Name<Bytes>,
    pub kind: TransferTaskKind,
    pub address: SocketAddr,
    pub tsig_key: Option<Name<Bytes>>,
    pub transport: Transport,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferTaskKind {
    SoaProbe,
    Axfr,
    Ixfr,
    Notify,
    UpdateForward,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

#[derive(Clone, Debug)]
pub struct TransferEnqueueError(pub String);

impl std::fmt::Display for TransferEnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to enqueue transfer task: {}", self.0)
    }
}

impl std::error::Error for TransferEnqueueError {}
