//! Named namespace of [`IndexedStore`]s.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::indexed::IndexedStore;

/// Suffix of the configuration key that bounds a named store.
pub const MAX_ITEMS_SUFFIX: &str = "_max_items";

/// Configuration key holding the capacity of the store called `name`.
pub fn max_items_key(name: &str) -> String {
    format!("{name}{MAX_ITEMS_SUFFIX}")
}

/// Lazily populated mapping from store name to store.
///
/// A store is created the first time its name is asked for. Its capacity is
/// read from the `<name>_max_items` configuration value at that moment and
/// never re-read; names without a configured capacity get unbounded stores.
pub struct StoreRegistry<T> {
    capacities: HashMap<String, usize>,
    stores: DashMap<String, Arc<IndexedStore<T>>>,
}

impl<T: Clone> StoreRegistry<T> {
    /// Create a registry from a `{"<name>_max_items": N}` mapping.
    pub fn new(capacities: HashMap<String, usize>) -> Self {
        Self {
            capacities,
            stores: DashMap::new(),
        }
    }

    /// A registry whose stores are all unbounded.
    pub fn unbounded() -> Self {
        Self::new(HashMap::new())
    }

    /// Get the store called `name`, creating it on first access.
    pub fn store_for(&self, name: &str) -> Arc<IndexedStore<T>> {
        if let Some(store) = self.stores.get(name) {
            return Arc::clone(store.value());
        }

        let store = self.stores.entry(name.to_string()).or_insert_with(|| {
            let max_items = self.capacities.get(&max_items_key(name)).copied();
            debug!(store = %name, max_items = ?max_items, "creating store");
            Arc::new(IndexedStore::new(max_items))
        });
        Arc::clone(store.value())
    }

    /// Forget the store called `name` and everything in it.
    pub fn drop(&self, name: &str) -> Option<Arc<IndexedStore<T>>> {
        self.stores.remove(name).map(|(_, store)| store)
    }

    /// Every store created so far, sorted by name.
    pub fn all_stores(&self) -> Vec<(String, Arc<IndexedStore<T>>)> {
        let mut stores: Vec<_> = self
            .stores
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        stores.sort_by(|a, b| a.0.cmp(&b.0));
        stores
    }

    /// Whether a store called `name` has been created.
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }
}

impl<T: Clone> Default for StoreRegistry<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Snowflake;

    #[test]
    fn test_store_for_is_create_or_get() {
        let registry: StoreRegistry<u64> = StoreRegistry::unbounded();
        assert!(!registry.contains("guilds"));

        let first = registry.store_for("guilds");
        first.insert(&[], Snowflake(1), 1);
        let second = registry.store_for("guilds");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_configured_capacity_takes_effect() {
        let registry: StoreRegistry<u64> =
            StoreRegistry::new(HashMap::from([(max_items_key("messages"), 2)]));

        let messages = registry.store_for("messages");
        assert_eq!(messages.max_items(), Some(2));
        assert_eq!(registry.store_for("users").max_items(), None);

        messages.insert(&[], Snowflake(1), 1);
        messages.insert(&[], Snowflake(2), 2);
        messages.insert(&[], Snowflake(3), 3);
        assert_eq!(messages.get_all(), vec![3]);
    }

    #[test]
    fn test_drop_forgets_store() {
        let registry: StoreRegistry<u64> = StoreRegistry::unbounded();
        registry.store_for("roles").insert(&[], Snowflake(1), 1);

        let dropped = registry.drop("roles").unwrap();
        assert_eq!(dropped.len(), 1);
        assert!(!registry.contains("roles"));
        assert!(registry.store_for("roles").is_empty());
        assert!(registry.drop("missing").is_none());
    }

    #[test]
    fn test_all_stores_sorted_by_name() {
        let registry: StoreRegistry<u64> = StoreRegistry::unbounded();
        registry.store_for("users");
        registry.store_for("channels");
        let names: Vec<_> = registry.all_stores().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["channels", "users"]);
    }
}
