//! Per-zone configuration snapshots (§2 added row, §9: "process-wide
//! singletons... treat them as a context value").
//!
//! A [`ZoneConfig`] is loaded once from TOML and handed to a zone as an
//! `Arc`-shared, immutable snapshot; reconfiguration replaces the `Arc`
//! under the zone's `ArcSwap` rather than mutating fields in place, the
//! same "whole value, swapped" discipline the content tree uses (§4.8).

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use zonecore_content::SerialPolicy;

/// A single zone's configuration, as loaded from the `[zones.<name>]` table
/// of the daemon's TOML configuration file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneConfig {
    /// Directory the zonefile and journal for this zone live in.
    pub storage_dir: Utf8PathBuf,

    /// The primary master to transfer from, if this zone is a secondary.
    pub master: Option<SocketAddr>,

    /// Name of the TSIG key used to authenticate transfers/updates, if any.
    pub tsig_key: Option<String>,

    /// How a locally-built instance's serial advances (§4.7).
    #[serde(default)]
    pub serial_policy: SerialPolicy,

    /// Whether DNSSEC signing is enabled for this zone.
    #[serde(default)]
    pub dnssec_enabled: bool,

    /// Maximum fraction of REFRESH/RETRY to subtract as jitter, e.g. `0.1`
    /// for up to 10% (§4.5's `JITTER_PCT`).
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,

    /// How often the flush timer synchronizes dirty journal entries to the
    /// zonefile, in seconds (§4.5's `dbsync_timeout`).
    #[serde(default = "default_dbsync_timeout_secs")]
    pub dbsync_timeout_secs: u64,

    /// Added to SOA EXPIRE (in ms) to compute the EXPIRE timer's deadline
    /// (§4.5's `2 * max_conn_idle`).
    #[serde(default = "default_max_conn_idle_ms")]
    pub max_conn_idle_ms: u64,

    /// Number of times the transfer subsystem should retry a NOTIFY to an
    /// unresponsive secondary before giving up on it for this cycle. Carried
    /// here as part of the zone's configuration snapshot; the retry loop
    /// itself lives behind [`TransferSubsystem`](crate::contracts::TransferSubsystem),
    /// which this crate only calls through.
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,
}

fn default_jitter_pct() -> f64 {
    0.1
}

fn default_dbsync_timeout_secs() -> u64 {
    60
}

fn default_max_conn_idle_ms() -> u64 {
    30_000
}

fn default_notify_retries() -> u32 {
    5
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            storage_dir: Utf8PathBuf::new(),
            master: None,
            tsig_key: None,
            serial_policy: SerialPolicy::default(),
            dnssec_enabled: false,
            jitter_pct: default_jitter_pct(),
            dbsync_timeout_secs: default_dbsync_timeout_secs(),
            max_conn_idle_ms: default_max_conn_idle_ms(),
            notify_retries: default_notify_retries(),
        }
    }
}

/// The top-level configuration file: one entry per zone.
///
/// This is deliberately small. Per-peer access control (which addresses may
/// transfer or update a zone) is modeled as an `Acl` kept by the caller that
/// builds [`TransferTask`](crate::contracts::TransferTask)s and
/// [`UpdateRequest`](crate::update::UpdateRequest)s, not as zone config here —
/// a full configuration grammar (listener addresses, key material, ACL
/// syntax) is "the configuration loader" excluded by scope (§1); this is only
/// enough ambient plumbing to start the daemon binary against a handful of
/// zones.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub zones: std::collections::BTreeMap<String, ZoneConfig>,
}

impl Config {
    /// Parse a configuration snapshot from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load and parse a configuration file from disk.
    pub async fn load(path: &camino::Utf8Path) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&text)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_zone_table() {
        let text = r#"
            [zones.example.com]
            storage-dir = "/var/lib/zonecore/example.com"
        "#;
        let config = Config::from_toml_str(text).unwrap();
        let zone = config.zones.get("example.com").unwrap();
        assert_eq!(zone.storage_dir, Utf8PathBuf::from("/var/lib/zonecore/example.com"));
        assert_eq!(zone.serial_policy, SerialPolicy::Increment);
        assert!((zone.jitter_pct - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(Config::from_toml_str("not valid = [").is_err());
    }
}
