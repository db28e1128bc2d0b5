//! Thin daemon front-end: wires the library to `tokio`, nothing more.
//!
//! This is not the configuration loader, the CLI or the wire-protocol
//! listener named in `contracts` — it parses a handful of flags, loads a
//! zone table, and spawns the per-zone state-machine driver loops. The
//! collaborators a real deployment plugs in (the signer, TSIG verifier,
//! transfer subsystem, zonefile writer) are represented here by
//! placeholders that log what they would have done.

use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use camino::Utf8PathBuf;
use clap::Parser;
use domain::base::Name;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

use zonecore::config::{Config, ZoneConfig};
use zonecore::contracts::{
    RecordCodec, SignOutcome, SignSerialPolicy, Signer, SignerError, TransferEnqueueError, TransferSubsystem, TransferTask,
    TsigOutcome, TsigVerifier, ZonefileWriter,
};
use zonecore::journal::file::FileJournal;
use zonecore::metrics::CoreMetrics;
use zonecore::registry::ZoneRegistry;
use zonecore::runtime::ZoneRuntime;
use zonecore::timers;
use zonecore::zone::Zone;
use zonecore_content::{Changeset, OpaqueRecordCodec, Serial, ZoneContents};

/// Default ceiling on a single zone's journal, in bytes, before `map` starts
/// reporting [`zonecore::error::JournalError::Full`].
const DEFAULT_JOURNAL_CAPACITY: u64 = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "zonecored", about = "The zonecore zone-management daemon", version)]
struct Args {
    /// Path to the TOML zone table.
    #[arg(long, default_value = "/etc/zonecore/zones.toml")]
    config: Utf8PathBuf,

    /// Maximum log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

/// A severity level for logging, mirroring `clap::ValueEnum` the way the
/// cli crate's own `Args` does, rather than deriving one from `tracing`
/// directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(LevelFilter::from(args.log_level)).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "zonecored exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(&args.config).await?;
    info!(path = %args.config, zones = config.zones.len(), "loaded zone table");

    let runtime = Arc::new(ZoneRuntime::new(
        Arc::new(ZoneRegistry::new()),
        Arc::new(OpaqueRecordCodec) as Arc<dyn RecordCodec>,
        Arc::new(DisabledSigner) as Arc<dyn Signer>,
        Arc::new(AllowAllTsig) as Arc<dyn TsigVerifier>,
        Arc::new(LoggingTransfer) as Arc<dyn TransferSubsystem>,
        Arc::new(PlaceholderWriter) as Arc<dyn ZonefileWriter>,
        Arc::new(CoreMetrics::new()),
    ));

    for (name, zone_config) in &config.zones {
        if let Err(err) = spawn_zone(&runtime, name, zone_config.clone()).await {
            error!(zone = %name, %err, "failed to bring up zone, skipping it");
        }
    }

    runtime.metrics.refresh_from_registry(&runtime.registry);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, flushing every zone before exit");

    for zone in runtime.registry.snapshot() {
        match zonecore::flush::flush_zone(&zone, runtime.zonefile_writer.as_ref()).await {
            Ok(_) => info!(zone = %zone.name, "flushed on shutdown"),
            Err(err) => warn!(zone = %zone.name, %err, "flush on shutdown failed"),
        }
    }

    Ok(())
}

/// Bring up one zone: open its journal, register a stub [`Zone`] handle, and
/// spawn the four timer-driver loops that carry it the rest of the way
/// through bootstrap.
async fn spawn_zone(runtime: &Arc<ZoneRuntime>, name: &str, zone_config: ZoneConfig) -> Result<(), Box<dyn std::error::Error>> {
    let apex: Name<Bytes> = Name::from_str_relaxed(name)?.octets_into();

    tokio::fs::create_dir_all(zone_config.storage_dir.as_std_path()).await?;
    let journal_path = zone_config.storage_dir.join("journal");
    let journal = tokio::task::spawn_blocking({
        let journal_path = journal_path.clone();
        move || FileJournal::open(&journal_path, DEFAULT_JOURNAL_CAPACITY)
    })
    .await??;

    let zone = Arc::new(Zone::new(apex.clone(), zone_config, Arc::new(journal)));
    runtime.registry.insert(zone.clone());

    zone.timers.lock().unwrap().arm_refresh(tokio::time::Instant::now());

    tokio::spawn(timers::drive_refresh(zone.clone(), runtime.clone()));
    tokio::spawn(timers::drive_expire(zone.clone(), runtime.clone()));
    tokio::spawn(timers::drive_flush(zone.clone(), runtime.clone()));
    tokio::spawn(timers::drive_resign(zone.clone(), runtime.clone()));

    info!(zone = %apex, "zone registered, bootstrap refresh armed");
    Ok(())
}

//----------- Placeholder collaborators ------------------------------------------------

/// Stands in for a real DNSSEC signer until one is wired up; never enabled,
/// so the pipeline and resign timer always treat every zone as unsigned.
struct DisabledSigner;

impl Signer for DisabledSigner {
    fn is_enabled(&self, _zone: &Name<Bytes>) -> bool {
        false
    }

    fn sign_zone(&self, _zone: &Name<Bytes>, _contents: &mut ZoneContents, _policy: SignSerialPolicy, _new_serial: Serial) -> Result<SignOutcome, SignerError> {
        unreachable!("never called while is_enabled returns false")
    }

    fn sign_changeset(
        &self,
        _zone: &Name<Bytes>,
        _contents: &mut ZoneContents,
        _user_changeset: &Changeset,
        _policy: SignSerialPolicy,
        _new_serial: Serial,
    ) -> Result<SignOutcome, SignerError> {
        unreachable!("never called while is_enabled returns false")
    }
}

/// Accepts every TSIG signature. A real deployment authenticates updates and
/// transfers before they ever reach this crate's pipeline; this stub exists
/// only so the binary links and runs against a zone table with no keys
/// configured.
struct AllowAllTsig;

impl TsigVerifier for AllowAllTsig {
    fn verify(&self, _key_name: &Name<Bytes>, _mac: &[u8], _signed_data: &[u8]) -> TsigOutcome {
        TsigOutcome::Ok
    }
}

/// Logs every transfer task instead of dispatching it to an AXFR/IXFR/NOTIFY
/// worker pool.
struct LoggingTransfer;

impl TransferSubsystem for LoggingTransfer {
    fn enqueue(&self, task: TransferTask) -> Result<(), TransferEnqueueError> {
        info!(zone = %task.zone, kind = ?task.kind, address = %task.address, "transfer task (no transfer subsystem wired up)");
        Ok(())
    }
}

/// Writes a one-line placeholder instead of a full master-file rendition.
struct PlaceholderWriter;

impl ZonefileWriter for PlaceholderWriter {
    fn write(&self, contents: &ZoneContents, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(out, "; {} serial {} ({} records)", contents.apex, contents.serial().get(), contents.record_count())
    }
}
