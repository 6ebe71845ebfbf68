//! Client-side entity cache and gateway event synchronizer for Chorus.
//!
//! Gateway events arrive as `(event type, JSON payload)` pairs. The
//! synchronizer decodes them, keeps a local copy of guilds, channels,
//! members, roles, emojis, messages and users up to date, and emits one
//! normalized fact per event, carrying the previous value of updated entities.
//!
//! ## Features
//!
//! - **Indexed store**: Parent-indexed entity store with full-flush eviction
//! - **Weak cache**: Bounded cache with secondary keys and periodic maintenance
//! - **Strategies**: Either store family behind one [`StateStore`] trait
//! - **Sync**: [`EventSynchronizer`] applying events and publishing [`Fact`]s
//! - **Maintenance**: Timer task driving weak-cache eviction

pub mod commands;
pub mod config;
pub mod dispatch;
mod error;
pub mod event;
pub mod indexed;
pub mod maintenance;
pub mod registry;
pub mod strategy;
pub mod sync;
mod types;
pub mod weak;

pub use commands::{ApplicationCommand, CommandReconciler, CommandSync};
pub use config::{CacheSettings, StoreStrategy};
pub use dispatch::{BroadcastDispatcher, Dispatcher, Fact, FactArg, PendingMatchers};
pub use error::SyncError;
pub use event::GatewayEvent;
pub use indexed::{IndexedStore, ParentSet, ScopedEntry};
pub use maintenance::{MIN_MAINTENANCE_PERIOD, run_cycle, spawn_maintenance};
pub use registry::StoreRegistry;
pub use strategy::{IndexedStateStore, StateStore, WeakStateStore};
pub use sync::{EventSynchronizer, EventSynchronizerBuilder};
pub use types::*;
pub use weak::{
    BoundedWeakCache, EvictionOrder, MaintenancePhase, MaintenanceReport, WeakCacheRegistry,
};
