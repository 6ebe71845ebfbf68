//! Cache settings consumed by the state layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::registry::max_items_key;
use crate::strategy::{IndexedStateStore, StateStore, WeakStateStore};
use crate::weak::EvictionOrder;
use crate::{MEMBERS, MESSAGES, SyncError};

/// Default capacity of the message store.
pub const DEFAULT_MAX_MESSAGES: usize = 1_000;

/// Default capacity of the member store.
pub const DEFAULT_MAX_MEMBERS: usize = 10_000;

/// Default period between weak-cache maintenance passes.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

/// Which store implementation backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStrategy {
    /// Parent-indexed stores with full-flush eviction on insert.
    #[default]
    Indexed,
    /// Bounded caches with secondary keys, trimmed by periodic maintenance.
    Weak,
}

impl std::str::FromStr for StoreStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "indexed" => Ok(Self::Indexed),
            "weak" => Ok(Self::Weak),
            other => Err(format!(
                "unknown store strategy '{}', expected indexed or weak",
                other
            )),
        }
    }
}

/// Settings fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Capacity of the `messages` store.
    pub max_messages: usize,
    /// Capacity of the `members` store.
    pub max_members: usize,
    pub strategy: StoreStrategy,
    /// Eviction side for the weak strategy.
    pub eviction_order: EvictionOrder,
    pub maintenance_interval_secs: u64,
    /// Extra per-store capacities, keyed by store name.
    pub capacities: HashMap<String, usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_members: DEFAULT_MAX_MEMBERS,
            strategy: StoreStrategy::default(),
            eviction_order: EvictionOrder::default(),
            maintenance_interval_secs: DEFAULT_MAINTENANCE_INTERVAL_SECS,
            capacities: HashMap::new(),
        }
    }
}

impl CacheSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    ///
    /// A zero `maintenance_interval_secs` is rejected.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let settings: Self = serde_json::from_str(json)?;
        if settings.maintenance_interval_secs == 0 {
            return Err(SyncError::Settings(serde::de::Error::custom(
                "maintenance_interval_secs must be at least 1",
            )));
        }
        Ok(settings)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// The `{"<name>_max_items": N}` mapping the store registries consume.
    ///
    /// `max_messages` and `max_members` take precedence over entries for the
    /// same stores in `capacities`.
    pub fn store_capacities(&self) -> HashMap<String, usize> {
        let mut capacities: HashMap<String, usize> = self
            .capacities
            .iter()
            .map(|(name, max_items)| (max_items_key(name), *max_items))
            .collect();
        capacities.insert(max_items_key(MESSAGES), self.max_messages);
        capacities.insert(max_items_key(MEMBERS), self.max_members);
        capacities
    }

    /// Build the configured store strategy.
    pub fn build_store(&self) -> Arc<dyn StateStore> {
        match self.strategy {
            StoreStrategy::Indexed => Arc::new(IndexedStateStore::new(self.store_capacities())),
            StoreStrategy::Weak => Arc::new(WeakStateStore::new(
                &self.store_capacities(),
                self.eviction_order,
            )),
        }
    }
}
