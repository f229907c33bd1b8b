//! The live kite directory (spec §4.6): indexed by the seven-field path,
//! evicted on heartbeat lapse, fanned out to watchers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use kite_core::{KiteIdentity, Query};
use serde_json::Value;
use tracing::info;

/// One live registration (spec §3 "Registry entry").
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub identity: KiteIdentity,
    pub url: String,
    pub last_heartbeat: Instant,
    pub properties: Value,
}

/// An event fanned out to `watchKites` subscribers (spec §4.6).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Register { identity: KiteIdentity, url: String },
    Deregister { identity: KiteIdentity },
}

pub type WatcherCallback = Arc<dyn Fn(RegistryEvent) -> bool + Send + Sync>;

struct Watcher {
    query: Query,
    callback: WatcherCallback,
}

/// The registry: current entries plus live watchers, each keyed to a
/// prefix query over the seven fixed fields (spec §4.6 "Storage").
pub struct Registry {
    entries: DashMap<uuid::Uuid, RegistryEntry>,
    watchers: DashMap<u64, Watcher>,
    next_watcher_id: std::sync::atomic::AtomicU64,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            entries: DashMap::new(),
            watchers: DashMap::new(),
            next_watcher_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Register (or re-register) `identity` (spec I3: uniqueness by `id`
    /// alone, since `id` is a fresh UUID per process instance — two
    /// simultaneous registrations can never collide).
    pub fn register(&self, identity: KiteIdentity, url: String, properties: Value) {
        let entry = RegistryEntry {
            identity: identity.clone(),
            url: url.clone(),
            last_heartbeat: Instant::now(),
            properties,
        };
        self.entries.insert(identity.id, entry);
        info!(id = %identity.id, "kite registered");
        self.fan_out(RegistryEvent::Register { identity, url });
    }

    pub fn heartbeat(&self, id: uuid::Uuid) -> bool {
        match self.entries.get_mut(&id) {
            Some(mut e) => {
                e.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn deregister(&self, id: uuid::Uuid) {
        if let Some((_, entry)) = self.entries.remove(&id) {
            self.fan_out(RegistryEvent::Deregister { identity: entry.identity });
        }
    }

    /// Evict entries whose heartbeat has lapsed by more than
    /// `interval + grace` (spec I4, open question (c)), firing `DEREGISTER`
    /// to watchers for each one evicted.
    pub fn evict_stale(&self, ttl: Duration) {
        let now = Instant::now();
        let stale: Vec<uuid::Uuid> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(e.last_heartbeat) > ttl)
            .map(|e| *e.key())
            .collect();
        for id in stale {
            info!(%id, "kite heartbeat lapsed, evicting");
            self.deregister(id);
        }
    }

    /// `getKites(query)` (spec §4.6 "Storage"): every entry whose fields are
    /// either empty in `query` or equal to the entry's, with wildcards only
    /// meaningful at the tail of the fixed field order.
    pub fn query(&self, query: &Query) -> Vec<RegistryEntry> {
        self.entries.iter().filter(|e| query.matches(&e.identity)).map(|e| e.clone()).collect()
    }

    /// Register a watcher against `query`; it receives every future
    /// register/deregister event whose identity matches (spec §4.6 "Watch
    /// fan-out", open question (a): future deltas only, no historical
    /// snapshot).
    pub fn watch(&self, query: Query, callback: WatcherCallback) -> u64 {
        let id = self.next_watcher_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.watchers.insert(id, Watcher { query, callback });
        id
    }

    pub fn unwatch(&self, watcher_id: u64) {
        self.watchers.remove(&watcher_id);
    }

    fn fan_out(&self, event: RegistryEvent) {
        let identity = match &event {
            RegistryEvent::Register { identity, .. } => identity,
            RegistryEvent::Deregister { identity } => identity,
        };
        let dead: Vec<u64> = self
            .watchers
            .iter()
            .filter(|w| w.query.matches(identity))
            .filter_map(|w| {
                // Pruned if the callback reports its peer has disconnected
                // (spec §4.6 "Callbacks whose peers have disconnected are
                // pruned").
                if (w.callback)(event.clone()) {
                    None
                } else {
                    Some(*w.key())
                }
            })
            .collect();
        for id in dead {
            self.watchers.remove(&id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> KiteIdentity {
        KiteIdentity::new("alice", "prod", name, "1.0.0", "us-east", "host-1", "ws://x").unwrap()
    }

    #[test]
    fn query_matches_nested_supersets() {
        let registry = Registry::new();
        registry.register(identity("square"), "ws://a".into(), Value::Null);
        registry.register(identity("circle"), "ws://b".into(), Value::Null);

        let all = registry.query(&Query::default());
        assert_eq!(all.len(), 2);

        let narrow = registry.query(&Query {
            name: "square".into(),
            ..Default::default()
        });
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].identity.name, "square");
    }

    #[test]
    fn eviction_removes_stale_entries_and_fires_deregister() {
        let registry = Registry::new();
        let id = identity("square");
        registry.register(id.clone(), "ws://a".into(), Value::Null);

        let events = Arc::new(std::sync::Mutex::new(vec![]));
        let events2 = Arc::clone(&events);
        registry.watch(
            Query::default(),
            Arc::new(move |event| {
                events2.lock().unwrap().push(event);
                true
            }),
        );

        // Simulate a lapsed heartbeat by evicting with a zero TTL.
        registry.evict_stale(Duration::from_secs(0));
        assert!(registry.query(&Query::default()).is_empty());
        assert!(matches!(events.lock().unwrap().last(), Some(RegistryEvent::Deregister { .. })));
    }
}
