//! Outbound boundary: normalized facts and their delivery.
//!
//! After every store mutation the synchronizer hands a [`Fact`] to a
//! [`Dispatcher`] together with the pending one-shot matchers. It never waits
//! for or inspects the result of publication.

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::trace;

use crate::{Entity, Snowflake};

/// Broadcast channel capacity for facts.
/// Sized for a guild-create burst on a large guild without lagging listeners.
pub const FACT_CHANNEL_CAPACITY: usize = 4096;

/// One argument of a fact.
#[derive(Debug, Clone, PartialEq)]
pub enum FactArg {
    /// A reconstructed domain object.
    Entity(Entity),
    /// A bare identifier, for entities that were never cached.
    Id(Snowflake),
    /// No previous value was cached.
    Absent,
    /// An ordered sequence, e.g. the results of a bulk delete.
    List(Vec<FactArg>),
}

impl FactArg {
    /// The "before" argument of an update fact.
    pub fn previous(entity: Option<Entity>) -> Self {
        entity.map_or(FactArg::Absent, FactArg::Entity)
    }

    /// The cached entity if there was one, otherwise its bare id.
    pub fn entity_or_id(entity: Option<Entity>, id: Snowflake) -> Self {
        entity.map_or(FactArg::Id(id), FactArg::Entity)
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            FactArg::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

impl From<Entity> for FactArg {
    fn from(entity: Entity) -> Self {
        FactArg::Entity(entity)
    }
}

/// A normalized `(event name, arguments)` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub name: &'static str,
    pub args: Vec<FactArg>,
}

impl Fact {
    pub fn new(name: &'static str, args: Vec<FactArg>) -> Self {
        Self { name, args }
    }
}

/// Predicate a pending matcher applies to candidate facts.
pub type FactPredicate = Box<dyn Fn(&Fact) -> bool + Send + Sync>;

/// A one-shot waiter for the next fact with a given name.
pub struct Matcher {
    event: String,
    predicate: FactPredicate,
    tx: oneshot::Sender<Fact>,
}

/// Matchers waiting for a fact.
#[derive(Default)]
pub struct PendingMatchers {
    matchers: Mutex<Vec<Matcher>>,
}

impl PendingMatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next `event` fact accepted by `predicate`.
    pub fn register(
        &self,
        event: impl Into<String>,
        predicate: impl Fn(&Fact) -> bool + Send + Sync + 'static,
    ) -> oneshot::Receiver<Fact> {
        let (tx, rx) = oneshot::channel();
        self.matchers.lock().push(Matcher {
            event: event.into(),
            predicate: Box::new(predicate),
            tx,
        });
        rx
    }

    /// Hand `fact` to every matcher it satisfies and drop those matchers,
    /// along with any whose receiver has gone away. Returns how many fired.
    pub fn resolve(&self, fact: &Fact) -> usize {
        let mut matchers = self.matchers.lock();
        let mut fired = 0;
        let mut waiting = Vec::with_capacity(matchers.len());

        for matcher in matchers.drain(..) {
            if matcher.tx.is_closed() {
                continue;
            }
            if matcher.event == fact.name && (matcher.predicate)(fact) {
                if matcher.tx.send(fact.clone()).is_ok() {
                    fired += 1;
                }
                continue;
            }
            waiting.push(matcher);
        }

        *matchers = waiting;
        fired
    }

    pub fn len(&self) -> usize {
        self.matchers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives facts from the synchronizer.
pub trait Dispatcher: Send + Sync {
    fn publish(&self, fact: Fact, pending: &PendingMatchers);
}

/// Default dispatcher: resolves matchers, then fans the fact out to every
/// subscriber over a broadcast channel.
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<Fact>,
}

impl BroadcastDispatcher {
    pub fn new() -> Self {
        Self::with_capacity(FACT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Fact> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for BroadcastDispatcher {
    fn publish(&self, fact: Fact, pending: &PendingMatchers) {
        let fired = pending.resolve(&fact);
        if fired > 0 {
            trace!(fact = fact.name, fired, "resolved pending matchers");
        }
        if self.tx.send(fact).is_err() {
            trace!("no subscribers for fact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(name: &'static str, id: u64) -> Fact {
        Fact::new(name, vec![FactArg::Id(Snowflake(id))])
    }

    #[tokio::test]
    async fn test_matcher_fires_once_on_match() {
        let pending = PendingMatchers::new();
        let rx = pending.register("message_delete", |f: &Fact| {
            f.args.first() == Some(&FactArg::Id(Snowflake(2)))
        });

        assert_eq!(pending.resolve(&fact("message_delete", 1)), 0);
        assert_eq!(pending.resolve(&fact("channel_delete", 2)), 0);
        assert_eq!(pending.len(), 1);

        assert_eq!(pending.resolve(&fact("message_delete", 2)), 1);
        assert!(pending.is_empty());
        assert_eq!(rx.await.unwrap(), fact("message_delete", 2));
    }

    #[test]
    fn test_abandoned_matchers_are_dropped() {
        let pending = PendingMatchers::new();
        drop(pending.register("ready", |_: &Fact| true));
        assert_eq!(pending.resolve(&fact("ready", 1)), 0);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_dispatcher_fans_out() {
        let dispatcher = BroadcastDispatcher::new();
        let pending = PendingMatchers::new();
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();

        dispatcher.publish(fact("guild_join", 1), &pending);

        assert_eq!(first.recv().await.unwrap(), fact("guild_join", 1));
        assert_eq!(second.recv().await.unwrap(), fact("guild_join", 1));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_fine() {
        let dispatcher = BroadcastDispatcher::new();
        dispatcher.publish(fact("guild_join", 1), &PendingMatchers::new());
    }

    #[test]
    fn test_fact_arg_helpers() {
        assert_eq!(FactArg::previous(None), FactArg::Absent);
        assert_eq!(FactArg::entity_or_id(None, Snowflake(4)), FactArg::Id(Snowflake(4)));
    }
}
