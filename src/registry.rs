//! The process-wide zone registry (§3: "Zone registry", §4.8: "Registry
//! swap and content reclamation").
//!
//! Mirrors the `ArcSwap<ZoneTree>` discipline used in `center.rs`: the
//! name-to-handle map itself is swapped as a whole copy-on-write value, not
//! mutated in place, so a reader's `.load()` always sees either the map
//! before an add/remove or the map after it, never a partially-updated one.
//! Looking a zone up inside that snapshot and then working with its
//! `Arc<Zone>` is itself reader-safe regardless of later registry swaps,
//! since the `Arc<Zone>` keeps the handle alive independently of the map.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use domain::base::Name;

use crate::zone::Zone;

type ZoneMap = foldhash::HashMap<Name<Bytes>, Arc<Zone>>;

/// Process-wide mapping from zone name to zone handle.
#[derive(Default)]
pub struct ZoneRegistry {
    zones: ArcSwap<ZoneMap>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a zone's handle by name. Wait-free: callers do not block any
    /// concurrent `insert`/`remove`, and the returned `Arc<Zone>` stays
    /// valid even if the zone is later removed from the registry.
    pub fn get(&self, name: &Name<Bytes>) -> Option<Arc<Zone>> {
        self.zones.load().get(name).cloned()
    }

    /// Snapshot every zone currently registered, for iteration (e.g. the
    /// flush-timer sweep or a startup catch-up pass).
    pub fn snapshot(&self) -> Vec<Arc<Zone>> {
        self.zones.load().values().cloned().collect()
    }

    /// Insert or replace the handle registered under `zone.name`.
    ///
    /// Builds a new map from the current one (copy-on-write) and stores it
    /// atomically; in-flight readers that already loaded the previous map
    /// keep using it until they drop their guard.
    pub fn insert(&self, zone: Arc<Zone>) {
        self.zones.rcu(|current| {
            let mut next: ZoneMap = (**current).clone();
            next.insert(zone.name.clone(), zone.clone());
            next
        });
    }

    /// Remove the zone registered under `name`, if any, returning its
    /// handle. The handle's content is only actually freed once every
    /// `Arc<Zone>` clone — including ones held by in-flight readers — is
    /// dropped (§4.8's "old tree is scheduled for reclamation").
    pub fn remove(&self, name: &Name<Bytes>) -> Option<Arc<Zone>> {
        let removed = std::sync::Mutex::new(None);
        self.zones.rcu(|current| {
            let mut next: ZoneMap = (**current).clone();
            if let Some(zone) = next.remove(name) {
                *removed.lock().unwrap() = Some(zone);
            }
            next
        });
        removed.into_inner().unwrap()
    }

    pub fn len(&self) -> usize {
        self.zones.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::journal::mem::MemJournal;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let registry = ZoneRegistry::new();
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        registry.insert(zone.clone());

        let found = registry.get(&name("example.com.")).unwrap();
        assert!(Arc::ptr_eq(&found, &zone));
    }

    #[test]
    fn remove_drops_from_registry_but_not_handle() {
        let registry = ZoneRegistry::new();
        let zone = Arc::new(Zone::new(name("example.com."), ZoneConfig::default(), Arc::new(MemJournal::default())));
        registry.insert(zone.clone());

        let removed = registry.remove(&name("example.com.")).unwrap();
        assert!(Arc::ptr_eq(&removed, &zone));
        assert!(registry.get(&name("example.com.")).is_none());
        // The caller's own clone keeps the handle alive regardless.
        assert_eq!(Arc::strong_count(&zone), 2);
    }

    #[test]
    fn snapshot_reflects_concurrent_inserts() {
        let registry = ZoneRegistry::new();
        registry.insert(Arc::new(Zone::new(name("a.example."), ZoneConfig::default(), Arc::new(MemJournal::default()))));
        registry.insert(Arc::new(Zone::new(name("b.example."), ZoneConfig::default(), Arc::new(MemJournal::default()))));
        assert_eq!(registry.snapshot().len(), 2);
    }
}
