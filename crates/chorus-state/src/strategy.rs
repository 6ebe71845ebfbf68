//! Store strategies the synchronizer can run on.
//!
//! Both strategies expose the same operations, addressed by store name, so
//! the synchronizer never knows which one it has. The choice is made once,
//! when the synchronizer is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::indexed::{ParentSet, ScopedEntry};
use crate::registry::{MAX_ITEMS_SUFFIX, StoreRegistry};
use crate::weak::{
    BoundedWeakCache, EvictionOrder, MaintenancePhase, MaintenanceReport, WeakCacheRegistry,
};
use crate::{Entity, Snowflake};

/// Operations the synchronizer performs on named entity stores.
///
/// `id: None` means a parent-only lookup, which may match any entity filed
/// under one of `parents`.
pub trait StateStore: Send + Sync {
    fn get_one(&self, store: &str, parents: &[Snowflake], id: Option<Snowflake>)
    -> Option<Entity>;

    fn get_without_parents(&self, store: &str, id: Snowflake) -> Option<(ParentSet, Entity)>;

    fn insert(&self, store: &str, parents: &[Snowflake], id: Snowflake, entity: Entity);

    /// Upsert, returning the entity previously stored in scope.
    fn save(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Snowflake,
        entity: Entity,
    ) -> Option<Entity>;

    fn discard(&self, store: &str, parents: &[Snowflake], id: Option<Snowflake>)
    -> Option<Entity>;

    fn get_all(&self, store: &str) -> Vec<Entity>;

    /// Entities filed under any of `parents`, ordered by id.
    fn get_all_parent(&self, store: &str, parents: &[Snowflake]) -> Vec<Entity>;

    fn delete_all(&self, store: &str);

    fn delete_all_parent(&self, store: &str, parents: &[Snowflake]) -> usize;

    /// Entry count of every store that exists, sorted by name.
    fn store_sizes(&self) -> Vec<(String, usize)>;

    /// Run one maintenance notification. Strategies without maintenance
    /// return `None`.
    fn maintain(&self, _phase: MaintenancePhase) -> Option<MaintenanceReport> {
        None
    }
}

/// [`StateStore`] backed by a [`StoreRegistry`] of indexed stores.
///
/// Capacities are enforced on insert with a full flush.
#[derive(Default)]
pub struct IndexedStateStore {
    stores: StoreRegistry<Entity>,
}

impl IndexedStateStore {
    pub fn new(capacities: HashMap<String, usize>) -> Self {
        Self {
            stores: StoreRegistry::new(capacities),
        }
    }

    pub fn registry(&self) -> &StoreRegistry<Entity> {
        &self.stores
    }
}

impl StateStore for IndexedStateStore {
    fn get_one(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Option<Snowflake>,
    ) -> Option<Entity> {
        self.stores.store_for(store).get_one(parents, id)
    }

    fn get_without_parents(&self, store: &str, id: Snowflake) -> Option<(ParentSet, Entity)> {
        self.stores.store_for(store).get_without_parents(id)
    }

    fn insert(&self, store: &str, parents: &[Snowflake], id: Snowflake, entity: Entity) {
        self.stores.store_for(store).insert(parents, id, entity);
    }

    fn save(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Snowflake,
        entity: Entity,
    ) -> Option<Entity> {
        self.stores.store_for(store).save(parents, id, entity)
    }

    fn discard(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Option<Snowflake>,
    ) -> Option<Entity> {
        self.stores.store_for(store).discard(parents, id)
    }

    fn get_all(&self, store: &str) -> Vec<Entity> {
        self.stores.store_for(store).get_all()
    }

    fn get_all_parent(&self, store: &str, parents: &[Snowflake]) -> Vec<Entity> {
        self.stores.store_for(store).get_all_parent(parents)
    }

    fn delete_all(&self, store: &str) {
        self.stores.store_for(store).delete_all();
    }

    fn delete_all_parent(&self, store: &str, parents: &[Snowflake]) -> usize {
        self.stores.store_for(store).delete_all_parent(parents)
    }

    fn store_sizes(&self) -> Vec<(String, usize)> {
        self.stores
            .all_stores()
            .into_iter()
            .map(|(name, store)| (name, store.len()))
            .collect()
    }
}

/// Weak cache registry holding scoped entities keyed by their own id.
pub type EntityCacheRegistry = WeakCacheRegistry<Snowflake, ScopedEntry<Entity>>;

type EntityCache = BoundedWeakCache<Snowflake, ScopedEntry<Entity>>;

/// [`StateStore`] backed by a [`WeakCacheRegistry`].
///
/// Each entity's parents are registered as secondary keys, so a parent-only
/// lookup resolves through the secondary map first and falls back to a scan.
/// Capacities are enforced by the maintenance cycle.
pub struct WeakStateStore {
    caches: Arc<EntityCacheRegistry>,
}

impl WeakStateStore {
    /// Create the registry, pre-registering a bounded cache for every
    /// `<name>_max_items` entry in `capacities`.
    pub fn new(capacities: &HashMap<String, usize>, eviction: EvictionOrder) -> Self {
        let caches = EntityCacheRegistry::new(eviction);
        for (key, max_items) in capacities {
            if let Some(name) = key.strip_suffix(MAX_ITEMS_SUFFIX) {
                caches.set_capacity(name, *max_items);
            }
        }
        Self {
            caches: Arc::new(caches),
        }
    }

    pub fn registry(&self) -> Arc<EntityCacheRegistry> {
        Arc::clone(&self.caches)
    }

    fn lookup(
        cache: &EntityCache,
        parents: &[Snowflake],
        id: Option<Snowflake>,
    ) -> Option<ScopedEntry<Entity>> {
        match id {
            Some(id) => cache
                .get(&id)
                .filter(|entry| entry.id == id && entry.in_scope(parents)),
            None => parents.iter().find_map(|parent| {
                cache
                    .get(parent)
                    .filter(|entry| entry.parents.contains(parent))
                    .or_else(|| {
                        cache
                            .entries()
                            .into_iter()
                            .map(|(_, entry)| entry)
                            .filter(|entry| entry.parents.contains(parent))
                            .min_by_key(|entry| entry.id)
                    })
            }),
        }
    }

    fn under(cache: &EntityCache, parents: &[Snowflake]) -> Vec<ScopedEntry<Entity>> {
        let mut entries: Vec<_> = cache
            .entries()
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| parents.iter().any(|p| entry.parents.contains(p)))
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }
}

impl StateStore for WeakStateStore {
    fn get_one(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Option<Snowflake>,
    ) -> Option<Entity> {
        Self::lookup(&self.caches.cache_for(store), parents, id).map(|entry| entry.payload)
    }

    fn get_without_parents(&self, store: &str, id: Snowflake) -> Option<(ParentSet, Entity)> {
        Self::lookup(&self.caches.cache_for(store), &[], Some(id))
            .map(|entry| (entry.parents, entry.payload))
    }

    fn insert(&self, store: &str, parents: &[Snowflake], id: Snowflake, entity: Entity) {
        self.save(store, parents, id, entity);
    }

    fn save(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Snowflake,
        entity: Entity,
    ) -> Option<Entity> {
        let cache = self.caches.cache_for(store);
        let previous = Self::lookup(&cache, parents, Some(id)).map(|entry| entry.payload);
        cache.upsert(
            id,
            ScopedEntry::new(parents, id, entity),
            parents.iter().copied(),
        );
        previous
    }

    fn discard(
        &self,
        store: &str,
        parents: &[Snowflake],
        id: Option<Snowflake>,
    ) -> Option<Entity> {
        let cache = self.caches.cache_for(store);
        let entry = Self::lookup(&cache, parents, id)?;
        cache.delete(&entry.id).map(|entry| entry.payload)
    }

    fn get_all(&self, store: &str) -> Vec<Entity> {
        self.caches
            .cache_for(store)
            .entries()
            .into_iter()
            .map(|(_, entry)| entry.payload)
            .collect()
    }

    fn get_all_parent(&self, store: &str, parents: &[Snowflake]) -> Vec<Entity> {
        Self::under(&self.caches.cache_for(store), parents)
            .into_iter()
            .map(|entry| entry.payload)
            .collect()
    }

    fn delete_all(&self, store: &str) {
        self.caches.cache_for(store).clear();
    }

    fn delete_all_parent(&self, store: &str, parents: &[Snowflake]) -> usize {
        let cache = self.caches.cache_for(store);
        Self::under(&cache, parents)
            .into_iter()
            .filter(|entry| cache.delete(&entry.id).is_some())
            .count()
    }

    fn store_sizes(&self) -> Vec<(String, usize)> {
        self.caches
            .all_caches()
            .into_iter()
            .map(|(name, cache)| (name, cache.len()))
            .collect()
    }

    fn maintain(&self, phase: MaintenancePhase) -> Option<MaintenanceReport> {
        self.caches.run_maintenance(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::max_items_key;
    use crate::{Role, USERS, User};

    fn role(id: u64, guild: u64) -> Entity {
        Entity::Role(Role {
            id: Snowflake(id),
            name: format!("role-{id}"),
            guild_id: Some(Snowflake(guild)),
            color: 0,
            position: 0,
            permissions: None,
            hoist: false,
            managed: false,
        })
    }

    fn strategies() -> Vec<Box<dyn StateStore>> {
        vec![
            Box::new(IndexedStateStore::default()),
            Box::new(WeakStateStore::new(&HashMap::new(), EvictionOrder::OldestFirst)),
        ]
    }

    #[test]
    fn test_strategies_agree_on_scoped_lookup() {
        for store in strategies() {
            let g = Snowflake(1);
            store.insert("roles", &[g], Snowflake(10), role(10, 1));
            store.insert("roles", &[g], Snowflake(11), role(11, 1));
            store.insert("roles", &[Snowflake(2)], Snowflake(20), role(20, 2));

            assert_eq!(store.get_one("roles", &[g], Some(Snowflake(11))), Some(role(11, 1)));
            assert_eq!(store.get_one("roles", &[Snowflake(2)], Some(Snowflake(11))), None);
            assert!(store.get_one("roles", &[g], None).is_some());
            assert_eq!(
                store.get_all_parent("roles", &[g]),
                vec![role(10, 1), role(11, 1)]
            );

            assert_eq!(store.save("roles", &[g], Snowflake(10), role(10, 1)), Some(role(10, 1)));
            assert_eq!(store.discard("roles", &[g], Some(Snowflake(10))), Some(role(10, 1)));
            assert_eq!(store.get_one("roles", &[g], Some(Snowflake(10))), None);

            assert_eq!(store.delete_all_parent("roles", &[g]), 1);
            assert_eq!(store.get_all("roles"), vec![role(20, 2)]);

            let (parents, _) = store.get_without_parents("roles", Snowflake(20)).unwrap();
            assert_eq!(parents, ParentSet::from([Snowflake(2)]));
        }
    }

    #[test]
    fn test_weak_parent_lookup_survives_aux_target_removal() {
        let store = WeakStateStore::new(&HashMap::new(), EvictionOrder::OldestFirst);
        let g = Snowflake(1);
        store.insert("roles", &[g], Snowflake(10), role(10, 1));
        store.insert("roles", &[g], Snowflake(11), role(11, 1));

        // The guild key points at role 11; once it is gone the scan finds 10.
        store.discard("roles", &[g], Some(Snowflake(11)));
        assert_eq!(store.get_one("roles", &[g], None), Some(role(10, 1)));
    }

    #[test]
    fn test_weak_store_honours_capacities_on_maintenance() {
        let capacities = HashMap::from([(max_items_key("users"), 1)]);
        let store = WeakStateStore::new(&capacities, EvictionOrder::OldestFirst);
        for id in 1..=3 {
            let user = User {
                id: Snowflake(id),
                username: format!("u{id}"),
                global_name: None,
                discriminator: None,
                avatar: None,
                bot: false,
            };
            store.insert(USERS, &[], Snowflake(id), Entity::User(user));
        }
        assert_eq!(store.store_sizes(), vec![(USERS.to_string(), 3)]);

        let report = store.maintain(MaintenancePhase::Start).unwrap();
        assert_eq!(report.evicted, 2);
        assert_eq!(store.store_sizes(), vec![(USERS.to_string(), 1)]);
        assert!(store.get_one(USERS, &[], Some(Snowflake(3))).is_some());
    }

    #[test]
    fn test_indexed_store_has_no_maintenance() {
        let store = IndexedStateStore::default();
        assert!(store.maintain(MaintenancePhase::Start).is_none());
    }
}
