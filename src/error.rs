//! Error kinds for the zone-management core.
//!
//! Every leaf operation returns one of a small set of error kinds (journal,
//! pipeline, flush); these convert into [`CoreError`] at the boundary the
//! pipeline presents to its caller, carrying the zone name so a log line or
//! a caller doesn't need to thread it through separately.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use domain::base::Name;

/// The top-level error returned by the pipeline and the state machine.
#[derive(Clone, Debug)]
pub enum CoreError {
    /// A caller-supplied argument was invalid for the operation attempted.
    InvalidArgument { zone: Name<Bytes>, detail: String },

    /// The journal has no space left after flushing every non-dirty entry.
    JournalFull { zone: Name<Bytes> },

    /// A requested range of journal history is not fully present.
    JournalRange { zone: Name<Bytes> },

    /// The update packet, or a journal entry read back, was malformed.
    MalformedData { zone: Name<Bytes>, detail: String },

    /// An I/O error against the journal file or the zonefile.
    Io {
        zone: Name<Bytes>,
        source: Arc<std::io::Error>,
    },

    /// The update would produce a tree identical to the current one.
    NoDiff { zone: Name<Bytes> },

    /// The computed new serial does not precede the old one per RFC1982.
    SerialRegression {
        zone: Name<Bytes>,
        old: zonecore_content::Serial,
        new: zonecore_content::Serial,
    },

    /// A transfer or update is already pending for this zone.
    Busy { zone: Name<Bytes> },

    /// The requested operation found nothing to do.
    UpToDate { zone: Name<Bytes> },

    /// This server is not authoritative for the named zone.
    NotAuthoritative { zone: Name<Bytes> },

    /// TSIG verification rejected the request.
    Tsig { zone: Name<Bytes>, kind: TsigErrorKind },

    /// An unrecoverable condition; the caller should treat the zone (or the
    /// whole process, depending on context) as no longer usable.
    Fatal { zone: Name<Bytes>, detail: String },
}

/// The three negative TSIG outcomes the verifier contract can report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TsigErrorKind {
    BadKey,
    BadSig,
    BadTime,
}

impl fmt::Display for TsigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TsigErrorKind::BadKey => "BADKEY",
            TsigErrorKind::BadSig => "BADSIG",
            TsigErrorKind::BadTime => "BADTIME",
        })
    }
}

impl CoreError {
    /// The zone this error pertains to.
    pub fn zone(&self) -> &Name<Bytes> {
        match self {
            CoreError::InvalidArgument { zone, .. }
            | CoreError::JournalFull { zone }
            | CoreError::JournalRange { zone }
            | CoreError::MalformedData { zone, .. }
            | CoreError::Io { zone, .. }
            | CoreError::NoDiff { zone }
            | CoreError::SerialRegression { zone, .. }
            | CoreError::Busy { zone }
            | CoreError::UpToDate { zone }
            | CoreError::NotAuthoritative { zone }
            | CoreError::Tsig { zone, .. }
            | CoreError::Fatal { zone, .. } => zone,
        }
    }

    /// Whether this error should be treated as the benign "nothing to do"
    /// outcome rather than a failure (§7: "rolls back ... on any
    /// non-UP_TO_DATE error").
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, CoreError::UpToDate { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidArgument { zone, detail } => {
                write!(f, "zone '{zone}': invalid argument: {detail}")
            }
            CoreError::JournalFull { zone } => write!(f, "zone '{zone}': journal is full"),
            CoreError::JournalRange { zone } => {
                write!(f, "zone '{zone}': requested journal history is incomplete")
            }
            CoreError::MalformedData { zone, detail } => {
                write!(f, "zone '{zone}': malformed data: {detail}")
            }
            CoreError::Io { zone, source } => write!(f, "zone '{zone}': I/O error: {source}"),
            CoreError::NoDiff { zone } => write!(f, "zone '{zone}': update produces no change"),
            CoreError::SerialRegression { zone, old, new } => write!(
                f,
                "zone '{zone}': new serial {new} does not advance past old serial {old}"
            ),
            CoreError::Busy { zone } => write!(f, "zone '{zone}': an operation is already pending"),
            CoreError::UpToDate { zone } => write!(f, "zone '{zone}': already up to date"),
            CoreError::NotAuthoritative { zone } => {
                write!(f, "zone '{zone}': this server is not authoritative")
            }
            CoreError::Tsig { zone, kind } => write!(f, "zone '{zone}': TSIG {kind}"),
            CoreError::Fatal { zone, detail } => write!(f, "zone '{zone}': fatal: {detail}"),
        }
    }
}

impl std::error::Error for CoreError {}

//----------- JournalError ----------------------------------------------------------

/// An error from a [`crate::journal::Journal`] operation.
#[derive(Debug)]
pub enum JournalError {
    /// No space remains under `map` after flushing every non-dirty entry.
    Full,
    /// An I/O error reading or writing the journal file.
    Io(std::io::Error),
    /// The entry read back did not parse as a well-formed changeset.
    Malformed,
    /// `begin_trans` was called while another transaction is already open.
    TransactionAlreadyOpen,
    /// The requested entry or cursor position does not exist.
    NotFound,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Full => f.write_str("journal is full"),
            JournalError::Io(err) => write!(f, "journal I/O error: {err}"),
            JournalError::Malformed => f.write_str("malformed journal entry"),
            JournalError::TransactionAlreadyOpen => f.write_str("a journal transaction is already open"),
            JournalError::NotFound => f.write_str("no matching journal entry"),
        }
    }
}

impl std::error::Error for JournalError {}

impl From<std::io::Error> for JournalError {
    fn from(err: std::io::Error) -> Self {
        JournalError::Io(err)
    }
}

pub(crate) fn journal_error_to_core(zone: &Name<Bytes>, err: JournalError) -> CoreError {
    match err {
        JournalError::Full => CoreError::JournalFull { zone: zone.clone() },
        JournalError::Io(source) => CoreError::Io {
            zone: zone.clone(),
            source: Arc::new(source),
        },
        JournalError::Malformed => CoreError::MalformedData {
            zone: zone.clone(),
            detail: "malformed journal entry".to_owned(),
        },
        JournalError::TransactionAlreadyOpen => CoreError::Busy { zone: zone.clone() },
        JournalError::NotFound => CoreError::JournalRange { zone: zone.clone() },
    }
}

//----------- PipelineError ----------------------------------------------------------

/// An error from a single step of the update pipeline (§4.6).
#[derive(Debug)]
pub enum PipelineError {
    Journal(JournalError),
    Io(std::io::Error),
    Malformed(String),
    NoDiff,
    SerialRegression {
        old: zonecore_content::Serial,
        new: zonecore_content::Serial,
    },
    SignerFailed(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Journal(err) => write!(f, "{err}"),
            PipelineError::Io(err) => write!(f, "{err}"),
            PipelineError::Malformed(detail) => write!(f, "malformed update: {detail}"),
            PipelineError::NoDiff => f.write_str("update produces no change"),
            PipelineError::SerialRegression { old, new } => {
                write!(f, "new serial {new} does not advance past old serial {old}")
            }
            PipelineError::SignerFailed(detail) => write!(f, "signer failed: {detail}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<JournalError> for PipelineError {
    fn from(err: JournalError) -> Self {
        PipelineError::Journal(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

pub(crate) fn pipeline_error_to_core(zone: &Name<Bytes>, err: PipelineError) -> CoreError {
    match err {
        PipelineError::Journal(journal_err) => journal_error_to_core(zone, journal_err),
        PipelineError::Io(source) => CoreError::Io {
            zone: zone.clone(),
            source: Arc::new(source),
        },
        PipelineError::Malformed(detail) => CoreError::MalformedData {
            zone: zone.clone(),
            detail,
        },
        PipelineError::NoDiff => CoreError::NoDiff { zone: zone.clone() },
        PipelineError::SerialRegression { old, new } => CoreError::SerialRegression {
            zone: zone.clone(),
            old,
            new,
        },
        PipelineError::SignerFailed(detail) => CoreError::Fatal { zone: zone.clone(), detail },
    }
}
