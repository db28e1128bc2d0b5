//! Prometheus metrics for the zone core.
//!
//! Uses the usual `Registry`/`Gauge`/`Family` pattern: a handful of
//! plain gauges for counts that are cheap to recompute against the live
//! [`ZoneRegistry`](crate::registry::ZoneRegistry), plus label-keyed
//! families for per-zone and per-outcome counters that accumulate as the
//! pipeline runs.

use std::fmt;
use std::sync::atomic::AtomicU64;

use bytes::Bytes;
use domain::base::Name;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::registry::ZoneRegistry;

const PROMETHEUS_PREFIX: &str = "zonecore";

//------------ StoredName ----------------------------------------------------

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct StoredName(Name<Bytes>);

impl EncodeLabelValue for StoredName {
    fn encode(&self, encoder: &mut prometheus_client::encoding::LabelValueEncoder) -> Result<(), fmt::Error> {
        use fmt::Write;
        encoder.write_str(&self.0.to_string())
    }
}

//------------ PipelineOutcome -----------------------------------------------

/// The final disposition of one call through the update pipeline, used as
/// a metric label so success/failure rates are visible per zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, EncodeLabelValue)]
pub enum PipelineOutcome {
    Committed,
    NoDiff,
    SerialRegression,
    JournalFull,
    RolledBack,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ZoneOutcome {
    zone: StoredName,
    outcome: PipelineOutcome,
}

//------------ CoreMetrics ----------------------------------------------------

/// All metrics this crate exposes, bundled behind one `Registry`.
#[derive(Debug)]
pub struct CoreMetrics {
    registry: Registry,

    zones_registered: Gauge,
    zones_stub: Gauge<i64, AtomicU64>,

    pipeline_runs: Family<ZoneOutcome, Counter>,
    journal_compactions: Counter,
    resigns_performed: Counter,
    flushes_performed: Counter,
}

impl CoreMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(PROMETHEUS_PREFIX);

        let zones_registered = Gauge::default();
        registry.register(
            "zones_registered",
            "Number of zones currently held in the registry",
            zones_registered.clone(),
        );

        let zones_stub: Gauge<i64, AtomicU64> = Gauge::default();
        registry.register(
            "zones_stub",
            "Number of registered zones that have not loaded any content yet",
            zones_stub.clone(),
        );

        let pipeline_runs = Family::default();
        registry.register(
            "pipeline_runs",
            "Number of update pipeline runs by outcome",
            pipeline_runs.clone(),
        );

        let journal_compactions = Counter::default();
        registry.register(
            "journal_compactions",
            "Number of journal compaction passes run",
            journal_compactions.clone(),
        );

        let resigns_performed = Counter::default();
        registry.register(
            "resigns_performed",
            "Number of full or partial DNSSEC resign operations performed",
            resigns_performed.clone(),
        );

        let flushes_performed = Counter::default();
        registry.register(
            "flushes_performed",
            "Number of successful zonefile flushes",
            flushes_performed.clone(),
        );

        Self {
            registry,
            zones_registered,
            zones_stub,
            pipeline_runs,
            journal_compactions,
            resigns_performed,
            flushes_performed,
        }
    }

    /// Recompute the gauges that are cheap to derive from live state, given
    /// the current registry snapshot.
    pub fn refresh_from_registry(&self, registry: &ZoneRegistry) {
        let zones = registry.snapshot();
        self.zones_registered.set(zones.len() as i64);
        let stubs = zones.iter().filter(|z| z.is_stub()).count() as i64;
        self.zones_stub.set(stubs);
    }

    pub fn record_pipeline_outcome(&self, zone: &Name<Bytes>, outcome: PipelineOutcome) {
        self.pipeline_runs
            .get_or_create(&ZoneOutcome {
                zone: StoredName(zone.clone()),
                outcome,
            })
            .inc();
    }

    pub fn record_journal_compaction(&self) {
        self.journal_compactions.inc();
    }

    pub fn record_resign(&self) {
        self.resigns_performed.inc();
    }

    pub fn record_flush(&self) {
        self.flushes_performed.inc();
    }

    /// Render the current snapshot in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    #[test]
    fn encode_produces_nonempty_text() {
        let metrics = CoreMetrics::new();
        metrics.record_pipeline_outcome(&name("example.com."), PipelineOutcome::Committed);
        let text = metrics.encode().unwrap();
        assert!(text.contains("zonecore_pipeline_runs"));
    }

    #[test]
    fn refresh_reflects_registry_contents() {
        use crate::config::ZoneConfig;
        use crate::journal::mem::MemJournal;
        use crate::registry::ZoneRegistry;
        use crate::zone::Zone;
        use std::sync::Arc;

        let registry = ZoneRegistry::new();
        registry.insert(Arc::new(Zone::new(
            name("example.com."),
            ZoneConfig::default(),
            Arc::new(MemJournal::default()),
        )));

        let metrics = CoreMetrics::new();
        metrics.refresh_from_registry(&registry);
        let text = metrics.encode().unwrap();
        assert!(text.contains("zonecore_zones_registered 1"));
        assert!(text.contains("zonecore_zones_stub 1"));
    }
}
