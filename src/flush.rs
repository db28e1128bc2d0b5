//! Flushing a zone's live content to its on-disk text zonefile (§4.9).
//!
//! Mirrors the `util::write_file` atomic-write pattern
//! (temp file in the target directory, then `persist` over the final
//! path), with the explicit `0600`/`0640` permission handling §4.9 calls
//! for instead of relying on `tempfile`'s own default mode.

use std::fmt;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use camino::Utf8Path;

use zonecore_content::Serial;

use crate::contracts::ZonefileWriter;
use crate::error::JournalError;
use crate::journal::{EntryFlags, WalkAction};
use crate::zone::Zone;

/// The result of a flush attempt that did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushOutcome {
    /// The zonefile was rewritten and dirty journal entries were cleared.
    Flushed,
    /// The live serial already equals the zonefile serial; nothing to do
    /// (§8's flush idempotence property).
    UpToDate,
}

#[derive(Debug)]
pub enum FlushError {
    Io(io::Error),
    Journal(JournalError),
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushError::Io(err) => write!(f, "flush I/O error: {err}"),
            FlushError::Journal(err) => write!(f, "flush journal error: {err}"),
        }
    }
}

impl std::error::Error for FlushError {}

impl From<io::Error> for FlushError {
    fn from(err: io::Error) -> Self {
        FlushError::Io(err)
    }
}

impl From<JournalError> for FlushError {
    fn from(err: JournalError) -> Self {
        FlushError::Journal(err)
    }
}

fn zonefile_path(storage_dir: &Utf8Path, apex: &domain::base::Name<bytes::Bytes>) -> camino::Utf8PathBuf {
    storage_dir.join(format!("{}zone", apex))
}

/// Flush `zone`'s live content to its text zonefile if it is out of date
/// with `zonefile_serial` (§4.9 steps 1-5).
///
/// Blocking file I/O runs on a dedicated thread via `spawn_blocking`; the
/// per-zone async driver loop calling this never blocks the runtime.
pub async fn flush_zone(zone: &Zone, writer: &dyn ZonefileWriter) -> Result<FlushOutcome, FlushError> {
    let Some(contents) = zone.read_contents() else {
        return Ok(FlushOutcome::UpToDate);
    };
    let live_serial = contents.serial();

    if *zone.zonefile_serial.lock().unwrap() == live_serial {
        return Ok(FlushOutcome::UpToDate);
    }

    let storage_dir = zone.config.load().storage_dir.clone();
    let apex = zone.name.clone();

    let mut buffer = Vec::new();
    writer.write(&contents, &mut buffer)?;

    let mtime = tokio::task::spawn_blocking(move || write_zonefile(&storage_dir, &apex, &buffer))
        .await
        .expect("flush blocking task panicked")?;

    *zone.zonefile_mtime.lock().unwrap() = Some(mtime);

    zone.journal.walk(&mut |entry| {
        if entry.flags.contains(EntryFlags::VALID) {
            WalkAction::ClearDirty
        } else {
            WalkAction::Continue
        }
    });

    *zone.zonefile_serial.lock().unwrap() = live_serial;
    zone.journal.compact(live_serial)?;

    Ok(FlushOutcome::Flushed)
}

fn write_zonefile(
    storage_dir: &Utf8Path,
    apex: &domain::base::Name<bytes::Bytes>,
    contents: &[u8],
) -> Result<std::time::SystemTime, io::Error> {
    std::fs::create_dir_all(storage_dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".zonefile-").tempfile_in(storage_dir.as_std_path())?;

    #[cfg(unix)]
    tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o600))?;

    tmp.as_file_mut().write_all(contents)?;
    tmp.as_file().sync_data()?;

    #[cfg(unix)]
    tmp.as_file().set_permissions(std::fs::Permissions::from_mode(0o640))?;

    let final_path = zonefile_path(storage_dir, apex);
    tmp.persist(final_path.as_std_path())?;

    std::fs::metadata(final_path.as_std_path())?.modified()
}
