//! Bounded identity-keyed cache with non-owning secondary keys.
//!
//! The primary map owns payloads in insertion order. The secondary map only
//! points auxiliary keys at primary keys; it never keeps a payload alive. A
//! secondary lookup resolves only while its target is still in the primary
//! map, and stale pointers are purged by the maintenance cycle.
//!
//! The capacity bound is enforced by maintenance, not on insert, so the
//! primary map may briefly exceed `max_items` between cycles.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, trace};

/// Which side of the primary map surplus entries are evicted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Evict the least recently inserted entries.
    #[default]
    OldestFirst,
    /// Evict the most recently inserted entries (legacy LIFO behaviour).
    NewestFirst,
}

/// Phase of a two-phase maintenance notification.
///
/// Maintenance work runs on `Start` only, so a notifier that reports both
/// phases of every tick still gets exactly one pass per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenancePhase {
    Start,
    Stop,
}

/// What a maintenance pass removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    /// Primary entries evicted to honour the capacity bound.
    pub evicted: usize,
    /// Secondary keys whose target was gone.
    pub pruned: usize,
}

impl MaintenanceReport {
    fn merge(self, other: Self) -> Self {
        Self {
            evicted: self.evicted + other.evicted,
            pruned: self.pruned + other.pruned,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.evicted == 0 && self.pruned == 0
    }
}

struct Maps<K, V> {
    primary: IndexMap<K, V>,
    secondary: HashMap<K, K>,
}

/// Insertion-ordered cache bounded by a periodic maintenance cycle.
pub struct BoundedWeakCache<K, V> {
    max_items: Option<usize>,
    eviction: EvictionOrder,
    maps: Mutex<Maps<K, V>>,
    closed: AtomicBool,
}

impl<K, V> BoundedWeakCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_items: Option<usize>, eviction: EvictionOrder) -> Self {
        Self {
            max_items,
            eviction,
            maps: Mutex::new(Maps {
                primary: IndexMap::new(),
                secondary: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, EvictionOrder::default())
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    /// Number of entries in the primary map.
    pub fn len(&self) -> usize {
        self.maps.lock().primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered secondary keys, live or stale.
    pub fn secondary_len(&self) -> usize {
        self.maps.lock().secondary.len()
    }

    /// Look a key up in the primary map, then among the secondary keys.
    pub fn get(&self, key: &K) -> Option<V> {
        let maps = self.maps.lock();
        if let Some(value) = maps.primary.get(key) {
            return Some(value.clone());
        }
        maps.secondary
            .get(key)
            .and_then(|target| maps.primary.get(target))
            .cloned()
    }

    /// Store `value` under `key` and point every auxiliary key at it.
    ///
    /// Re-inserting an existing key moves it to the newest position.
    pub fn upsert(&self, key: K, value: V, aux_keys: impl IntoIterator<Item = K>) {
        let mut maps = self.maps.lock();
        maps.primary.shift_remove(&key);
        for aux in aux_keys {
            maps.secondary.insert(aux, key.clone());
        }
        maps.primary.insert(key, value);
    }

    /// Remove `key` from the primary map. Secondary keys pointing at it stop
    /// resolving immediately and are purged on the next maintenance pass.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.maps.lock().primary.shift_remove(key)
    }

    /// Snapshot of all primary entries in insertion order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.maps
            .lock()
            .primary
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Drop every entry and secondary key.
    pub fn clear(&self) {
        let mut maps = self.maps.lock();
        maps.primary.clear();
        maps.secondary.clear();
    }

    /// Deregister from maintenance. Later cycles are no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Maintenance entry point.
    ///
    /// Returns `None` when the pass was skipped (a `Stop` notification, or a
    /// closed cache). Eviction and pruning happen under one lock, so a
    /// concurrent `upsert` is either fully visible to the pass or not at all.
    pub fn on_maintenance_cycle(&self, phase: MaintenancePhase) -> Option<MaintenanceReport> {
        if phase != MaintenancePhase::Start || self.is_closed() {
            return None;
        }

        let mut maps = self.maps.lock();
        let mut report = MaintenanceReport::default();

        if let Some(max_items) = self.max_items
            && maps.primary.len() > max_items
        {
            let surplus = maps.primary.len() - max_items;
            match self.eviction {
                EvictionOrder::OldestFirst => maps.primary.drain(..surplus).for_each(drop),
                EvictionOrder::NewestFirst => maps.primary.truncate(max_items),
            }
            report.evicted = surplus;
        }

        let Maps { primary, secondary } = &mut *maps;
        let before = secondary.len();
        secondary.retain(|_, target| primary.contains_key(target));
        report.pruned = before - secondary.len();

        trace!(evicted = report.evicted, pruned = report.pruned, "weak cache maintained");
        Some(report)
    }
}

/// Named namespace of [`BoundedWeakCache`]s.
pub struct WeakCacheRegistry<K, V> {
    eviction: EvictionOrder,
    caches: DashMap<String, Arc<BoundedWeakCache<K, V>>>,
}

impl<K, V> WeakCacheRegistry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(eviction: EvictionOrder) -> Self {
        Self {
            eviction,
            caches: DashMap::new(),
        }
    }

    /// Install a fresh, empty cache of capacity `max_items` under `name`.
    ///
    /// Any existing cache of that name is replaced, not resized; its
    /// contents are gone.
    pub fn set_capacity(&self, name: &str, max_items: usize) -> Arc<BoundedWeakCache<K, V>> {
        let cache = Arc::new(BoundedWeakCache::new(Some(max_items), self.eviction));
        if let Some(previous) = self.caches.insert(name.to_string(), Arc::clone(&cache)) {
            previous.close();
            debug!(cache = %name, max_items, "replaced weak cache");
        }
        cache
    }

    /// Get the cache called `name`, creating an unbounded one on first miss.
    pub fn cache_for(&self, name: &str) -> Arc<BoundedWeakCache<K, V>> {
        if let Some(cache) = self.caches.get(name) {
            return Arc::clone(cache.value());
        }
        let cache = self.caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = %name, "creating unbounded weak cache");
            Arc::new(BoundedWeakCache::new(None, self.eviction))
        });
        Arc::clone(cache.value())
    }

    /// Every registered cache, sorted by name.
    pub fn all_caches(&self) -> Vec<(String, Arc<BoundedWeakCache<K, V>>)> {
        let mut caches: Vec<_> = self
            .caches
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        caches.sort_by(|a, b| a.0.cmp(&b.0));
        caches
    }

    /// Deliver a maintenance notification to every cache.
    ///
    /// Returns `None` if no cache ran a pass.
    pub fn run_maintenance(&self, phase: MaintenancePhase) -> Option<MaintenanceReport> {
        self.all_caches()
            .into_iter()
            .filter_map(|(_, cache)| cache.on_maintenance_cycle(phase))
            .reduce(MaintenanceReport::merge)
    }

    /// Close every cache.
    pub fn close(&self) {
        for cache in self.caches.iter() {
            cache.value().close();
        }
    }
}

impl<K, V> Default for WeakCacheRegistry<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(EvictionOrder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(max_items: usize, eviction: EvictionOrder, count: u64) -> BoundedWeakCache<u64, u64> {
        let cache = BoundedWeakCache::new(Some(max_items), eviction);
        for key in 1..=count {
            cache.upsert(key, key * 10, []);
        }
        cache
    }

    #[test]
    fn test_get_checks_primary_then_secondary() {
        let cache = BoundedWeakCache::unbounded();
        cache.upsert(1u64, "one", [100]);
        cache.upsert(100u64, "hundred", []);

        // Primary wins over a secondary key with the same value.
        assert_eq!(cache.get(&100), Some("hundred"));
        cache.delete(&100);
        assert_eq!(cache.get(&100), Some("one"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn test_secondary_stops_resolving_when_target_gone() {
        let cache = BoundedWeakCache::unbounded();
        cache.upsert(1u64, "v", [7]);
        assert_eq!(cache.get(&7), Some("v"));

        cache.delete(&1);
        assert_eq!(cache.get(&7), None);
        assert_eq!(cache.secondary_len(), 1);

        let report = cache.on_maintenance_cycle(MaintenancePhase::Start).unwrap();
        assert_eq!(report, MaintenanceReport { evicted: 0, pruned: 1 });
        assert_eq!(cache.secondary_len(), 0);
    }

    #[test]
    fn test_maintenance_bounds_size_oldest_first() {
        let cache = filled(3, EvictionOrder::OldestFirst, 5);
        assert_eq!(cache.len(), 5);

        let report = cache.on_maintenance_cycle(MaintenancePhase::Start).unwrap();
        assert_eq!(report.evicted, 2);
        let keys: Vec<_> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![3, 4, 5]);
    }

    #[test]
    fn test_maintenance_bounds_size_newest_first() {
        let cache = filled(3, EvictionOrder::NewestFirst, 5);
        cache.on_maintenance_cycle(MaintenancePhase::Start);
        let keys: Vec<_> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_upsert_refreshes_position() {
        let cache = filled(2, EvictionOrder::OldestFirst, 3);
        cache.upsert(1, 11, []);
        cache.on_maintenance_cycle(MaintenancePhase::Start);
        let keys: Vec<_> = cache.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![3, 1]);
    }

    #[test]
    fn test_eviction_unlinks_secondary_keys() {
        let cache = BoundedWeakCache::new(Some(1), EvictionOrder::OldestFirst);
        cache.upsert(1u64, "old", [50]);
        cache.upsert(2u64, "new", [60]);

        let report = cache.on_maintenance_cycle(MaintenancePhase::Start).unwrap();
        assert_eq!(report, MaintenanceReport { evicted: 1, pruned: 1 });
        assert_eq!(cache.get(&50), None);
        assert_eq!(cache.get(&60), Some("new"));
    }

    #[test]
    fn test_stop_phase_and_closed_cache_skip() {
        let cache = filled(1, EvictionOrder::OldestFirst, 3);
        assert!(cache.on_maintenance_cycle(MaintenancePhase::Stop).is_none());
        assert_eq!(cache.len(), 3);

        cache.close();
        assert!(cache.on_maintenance_cycle(MaintenancePhase::Start).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_registry_set_capacity_replaces() {
        let registry: WeakCacheRegistry<u64, u64> = WeakCacheRegistry::default();
        let first = registry.set_capacity("messages", 10);
        first.upsert(1, 1, []);

        let second = registry.set_capacity("messages", 5);
        assert!(first.is_closed());
        assert!(second.is_empty());
        assert_eq!(second.max_items(), Some(5));
        assert!(Arc::ptr_eq(&second, &registry.cache_for("messages")));
    }

    #[test]
    fn test_registry_cache_for_falls_back_to_unbounded() {
        let registry: WeakCacheRegistry<u64, u64> = WeakCacheRegistry::default();
        let cache = registry.cache_for("users");
        assert_eq!(cache.max_items(), None);
        assert!(Arc::ptr_eq(&cache, &registry.cache_for("users")));
    }

    #[test]
    fn test_registry_run_maintenance_merges_reports() {
        let registry: WeakCacheRegistry<u64, u64> = WeakCacheRegistry::default();
        let a = registry.set_capacity("a", 1);
        let b = registry.set_capacity("b", 2);
        for key in 1..=3 {
            a.upsert(key, key, []);
            b.upsert(key, key, []);
        }

        assert!(registry.run_maintenance(MaintenancePhase::Stop).is_none());
        let report = registry.run_maintenance(MaintenancePhase::Start).unwrap();
        assert_eq!(report.evicted, 3);

        registry.close();
        assert!(registry.run_maintenance(MaintenancePhase::Start).is_none());
    }
}
