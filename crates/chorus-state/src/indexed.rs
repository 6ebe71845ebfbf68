//! Parent-indexed entity store.
//!
//! Every entry is keyed by its own id and filed under zero or more parent
//! keys (a channel under its guild, a message under its channel and guild).
//! Lookups can address an entry by id, optionally restricted to a parent
//! scope, or by parent alone.
//!
//! A parent-only lookup (no id supplied) matches *any* entry filed under one
//! of the given parents; some events only carry the scope at the point of
//! lookup. The match is the lowest id under the first given parent that has
//! any entries.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::Snowflake;

/// Parent keys an entry is filed under.
pub type ParentSet = BTreeSet<Snowflake>;

/// A stored entity with its identity and parent scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedEntry<T> {
    pub parents: ParentSet,
    pub id: Snowflake,
    pub payload: T,
}

impl<T> ScopedEntry<T> {
    pub fn new(parents: &[Snowflake], id: Snowflake, payload: T) -> Self {
        Self {
            parents: parents.iter().copied().collect(),
            id,
            payload,
        }
    }

    /// Whether this entry falls inside `scope`.
    ///
    /// An empty scope is unrestricted.
    pub fn in_scope(&self, scope: &[Snowflake]) -> bool {
        scope.is_empty() || scope.iter().any(|p| self.parents.contains(p))
    }
}

struct Inner<T> {
    entries: HashMap<Snowflake, ScopedEntry<T>>,
    by_parent: HashMap<Snowflake, BTreeSet<Snowflake>>,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            by_parent: HashMap::new(),
        }
    }

    /// Find the id of the entry a `(parents, id)` lookup addresses.
    fn resolve(&self, parents: &[Snowflake], id: Option<Snowflake>) -> Option<Snowflake> {
        match id {
            Some(id) => self
                .entries
                .get(&id)
                .filter(|entry| entry.in_scope(parents))
                .map(|entry| entry.id),
            None => parents.iter().find_map(|parent| {
                self.by_parent
                    .get(parent)
                    .and_then(|ids| ids.first().copied())
            }),
        }
    }

    fn link(&mut self, entry: &ScopedEntry<T>) {
        for parent in &entry.parents {
            self.by_parent.entry(*parent).or_default().insert(entry.id);
        }
    }

    fn unlink(&mut self, entry: &ScopedEntry<T>) {
        for parent in &entry.parents {
            if let Some(ids) = self.by_parent.get_mut(parent) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }
    }

    fn remove(&mut self, id: Snowflake) -> Option<ScopedEntry<T>> {
        let entry = self.entries.remove(&id)?;
        self.unlink(&entry);
        Some(entry)
    }

    /// Ids filed under any of `parents`, ascending and deduplicated.
    fn ids_under(&self, parents: &[Snowflake]) -> BTreeSet<Snowflake> {
        parents
            .iter()
            .filter_map(|parent| self.by_parent.get(parent))
            .flatten()
            .copied()
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_parent.clear();
    }
}

/// A single collection of scoped entities.
///
/// Operations never fail for missing keys; absence is `None`. All access
/// goes through one lock per store.
pub struct IndexedStore<T> {
    max_items: Option<usize>,
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> IndexedStore<T> {
    /// Create a store, optionally bounded to `max_items` entries.
    pub fn new(max_items: Option<usize>) -> Self {
        Self {
            max_items,
            inner: RwLock::new(Inner::new()),
        }
    }

    /// An unbounded store.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// The configured capacity, if any.
    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up one entity.
    ///
    /// With an id, returns that entity if it is filed under one of `parents`
    /// (or if `parents` is empty). Without an id, returns an arbitrary
    /// entity filed under one of `parents`.
    pub fn get_one(&self, parents: &[Snowflake], id: Option<Snowflake>) -> Option<T> {
        let inner = self.inner.read();
        let id = inner.resolve(parents, id)?;
        inner.entries.get(&id).map(|entry| entry.payload.clone())
    }

    /// Look up an entity by id alone, returning the parents it is filed under.
    pub fn get_without_parents(&self, id: Snowflake) -> Option<(ParentSet, T)> {
        self.inner
            .read()
            .entries
            .get(&id)
            .map(|entry| (entry.parents.clone(), entry.payload.clone()))
    }

    /// Store an entity, replacing any entry with the same id.
    pub fn insert(&self, parents: &[Snowflake], id: Snowflake, payload: T) {
        self.save(parents, id, payload);
    }

    /// Upsert an entity.
    ///
    /// Returns the previous payload when an entry with this id existed in
    /// scope, `None` when the entry is new. The stored parent set is
    /// replaced by `parents` either way.
    ///
    /// Creating an entry in a store that already holds `max_items` entries
    /// first empties the whole store: nothing survives the flush.
    pub fn save(&self, parents: &[Snowflake], id: Snowflake, payload: T) -> Option<T> {
        let entry = ScopedEntry::new(parents, id, payload);
        let mut inner = self.inner.write();

        let previous = inner.remove(id);
        if previous.is_none()
            && let Some(max_items) = self.max_items
            && inner.entries.len() >= max_items
        {
            debug!(
                max_items,
                evicted = inner.entries.len(),
                "store at capacity, flushing all entries"
            );
            inner.clear();
        }

        inner.link(&entry);
        inner.entries.insert(id, entry);
        trace!(id = %id, replaced = previous.is_some(), "store: entry saved");

        previous
            .filter(|prev| prev.in_scope(parents))
            .map(|prev| prev.payload)
    }

    /// Remove one entity and return it.
    ///
    /// Addresses the entry exactly like [`get_one`](Self::get_one), so a
    /// parent-only discard removes whichever entry that lookup would return.
    pub fn discard(&self, parents: &[Snowflake], id: Option<Snowflake>) -> Option<T> {
        let mut inner = self.inner.write();
        let id = inner.resolve(parents, id)?;
        inner.remove(id).map(|entry| entry.payload)
    }

    /// Snapshot of every stored entity, in no particular order.
    pub fn get_all(&self) -> Vec<T> {
        self.inner
            .read()
            .entries
            .values()
            .map(|entry| entry.payload.clone())
            .collect()
    }

    /// Snapshot of every entity filed under any of `parents`, ordered by id.
    pub fn get_all_parent(&self, parents: &[Snowflake]) -> Vec<T> {
        let inner = self.inner.read();
        inner
            .ids_under(parents)
            .into_iter()
            .filter_map(|id| inner.entries.get(&id))
            .map(|entry| entry.payload.clone())
            .collect()
    }

    pub fn delete_all(&self) {
        self.inner.write().clear();
    }

    /// Remove every entity filed under any of `parents`. Returns how many went.
    pub fn delete_all_parent(&self, parents: &[Snowflake]) -> usize {
        let mut inner = self.inner.write();
        let ids = inner.ids_under(parents);
        ids.into_iter()
            .filter(|id| inner.remove(*id).is_some())
            .count()
    }
}

impl<T: Clone> Default for IndexedStore<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
