//! Event synchronizer: applies gateway events to the stores and emits facts.
//!
//! For every inbound event the synchronizer:
//! 1. Decodes the payload into a [`GatewayEvent`] (unknown types are ignored)
//! 2. Builds the domain objects the event carries
//! 3. Mutates the matching stores, capturing previous values for updates
//! 4. Publishes one normalized [`Fact`]
//!
//! A malformed event is logged and dropped without touching the stores.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::commands::CommandReconciler;
use crate::config::{CacheSettings, StoreStrategy};
use crate::dispatch::{BroadcastDispatcher, Dispatcher, Fact, FactArg, PendingMatchers};
use crate::event::{
    GatewayEvent, GuildCreate, GuildEmojis, GuildRole, GuildRoleDelete, GuildUser,
    MessageDelete, MessageDeleteBulk, MessageUpdate, Ready, UnavailableGuild,
};
use crate::maintenance::spawn_maintenance;
use crate::strategy::StateStore;
use crate::{
    CHANNELS, Channel, EMOJIS, Entity, GUILD_SCOPED_STORES, GUILDS, Guild, MEMBERS, MESSAGES,
    Member, Message, ROLES, SCHEDULED_EVENTS, STAGE_INSTANCES, ScheduledEvent, Snowflake,
    StageInstance, SyncError, USERS, User,
};

/// Applies gateway events to a [`StateStore`] and publishes the resulting facts.
pub struct EventSynchronizer {
    store: Arc<dyn StateStore>,
    dispatcher: Arc<dyn Dispatcher>,
    pending: PendingMatchers,
    commands: Option<CommandReconciler>,
    /// Claimed by the first READY before it awaits anything.
    handshake_started: AtomicBool,
    /// Set once the first READY has been processed; never cleared.
    ready: AtomicBool,
    /// Guilds announced by READY that have not arrived yet.
    awaiting_guilds: RwLock<HashSet<Snowflake>>,
}

impl EventSynchronizer {
    pub fn new(store: Arc<dyn StateStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            pending: PendingMatchers::new(),
            commands: None,
            handshake_started: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            awaiting_guilds: RwLock::new(HashSet::new()),
        }
    }

    /// Reconcile commands against the remote on the first READY.
    pub fn with_commands(mut self, commands: CommandReconciler) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Whether the first READY has been processed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    /// Wait for the next `event` fact accepted by `predicate`.
    pub fn wait_for(
        &self,
        event: impl Into<String>,
        predicate: impl Fn(&Fact) -> bool + Send + Sync + 'static,
    ) -> oneshot::Receiver<Fact> {
        self.pending.register(event, predicate)
    }

    /// Inbound boundary. Never fails: bad events are logged and dropped.
    pub async fn process_event(&self, event_type: &str, payload: Value) {
        let event = match GatewayEvent::decode(event_type, payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(event_type = %event_type, "ignoring unhandled event type");
                return;
            }
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "dropping malformed event");
                return;
            }
        };

        match self.synchronize(event).await {
            Ok(Some(fact)) => {
                trace!(event_type = %event_type, fact = fact.name, "publishing fact");
                self.dispatcher.publish(fact, &self.pending);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(event_type = %event_type, error = %e, "failed to synchronize event");
            }
        }
    }

    /// Apply one decoded event and return the fact it produces, if any.
    ///
    /// Every handler builds its domain objects before touching a store, so an
    /// `Err` leaves the cache as it was.
    pub async fn synchronize(&self, event: GatewayEvent) -> Result<Option<Fact>, SyncError> {
        let fact = match event {
            GatewayEvent::Ready(ready) => return self.on_ready(ready).await,
            GatewayEvent::GuildCreate(create) => self.on_guild_create(create),
            GatewayEvent::GuildUpdate(guild) => self.on_guild_update(guild),
            GatewayEvent::GuildDelete(guild) => self.on_guild_delete(guild),
            GatewayEvent::ChannelCreate(channel) => self.on_channel_create("channel_create", channel),
            GatewayEvent::ChannelUpdate(channel) => self.on_channel_update("channel_update", channel),
            GatewayEvent::ChannelDelete(channel) => self.on_channel_delete("channel_delete", channel),
            GatewayEvent::ThreadCreate(channel) => self.on_channel_create("thread_create", channel),
            GatewayEvent::ThreadUpdate(channel) => self.on_channel_update("thread_update", channel),
            GatewayEvent::ThreadDelete(channel) => self.on_channel_delete("thread_delete", channel),
            GatewayEvent::MemberAdd(member) => self.on_member_add(member)?,
            GatewayEvent::MemberUpdate(member) => self.on_member_update(member)?,
            GatewayEvent::MemberRemove(removed) => self.on_member_remove(removed),
            GatewayEvent::BanAdd(ban) => self.on_ban_add(ban),
            GatewayEvent::BanRemove(ban) => self.on_ban_remove(ban),
            GatewayEvent::RoleCreate(role) => self.on_role_create(role),
            GatewayEvent::RoleUpdate(role) => self.on_role_update(role),
            GatewayEvent::RoleDelete(role) => self.on_role_delete(role),
            GatewayEvent::EmojisUpdate(emojis) => self.on_emojis_update(emojis),
            GatewayEvent::MessageCreate(message) => self.on_message_create(message),
            GatewayEvent::MessageUpdate(update) => self.on_message_update(update)?,
            GatewayEvent::MessageDelete(deleted) => self.on_message_delete(deleted),
            GatewayEvent::MessageDeleteBulk(bulk) => self.on_message_delete_bulk(bulk),
            GatewayEvent::StageInstanceCreate(stage) => self.on_stage_create(stage),
            GatewayEvent::StageInstanceUpdate(stage) => self.on_stage_update(stage),
            GatewayEvent::StageInstanceDelete(stage) => self.on_stage_delete(stage),
            GatewayEvent::ScheduledEventCreate(event) => self.on_scheduled_event_create(event),
            GatewayEvent::ScheduledEventUpdate(event) => self.on_scheduled_event_update(event),
            GatewayEvent::ScheduledEventDelete(event) => self.on_scheduled_event_delete(event),
            GatewayEvent::UserUpdate(user) => self.on_user_update(user),
        };
        Ok(Some(fact))
    }

    // =========================================================================
    // Session
    // =========================================================================

    async fn on_ready(&self, ready: Ready) -> Result<Option<Fact>, SyncError> {
        if self.handshake_started.swap(true, Ordering::SeqCst) {
            debug!("duplicate READY ignored");
            return Ok(None);
        }

        let user = ready.user;
        self.store
            .insert(USERS, &[], user.id, Entity::User(user.clone()));

        let guild_ids: HashSet<Snowflake> = ready.guilds.iter().map(|g| g.id).collect();
        let guild_count = guild_ids.len();
        *self.awaiting_guilds.write() = guild_ids;

        if let (Some(commands), Some(application)) = (&self.commands, &ready.application) {
            match commands.reconcile(application.id).await {
                Ok(removed) => {
                    debug!(removed = removed.len(), "commands reconciled");
                }
                Err(e) => {
                    warn!(error = %e, "command reconciliation failed");
                }
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(user = %user.id, guilds = guild_count, "session ready");

        Ok(Some(Fact::new("ready", vec![Entity::User(user).into()])))
    }

    // =========================================================================
    // Guilds
    // =========================================================================

    fn on_guild_create(&self, create: GuildCreate) -> Fact {
        let GuildCreate {
            guild,
            channels,
            threads,
            roles,
            members,
            emojis,
            stage_instances,
            guild_scheduled_events,
        } = create;
        let guild_id = guild.id;
        let scope = [guild_id];

        for mut channel in channels.into_iter().chain(threads) {
            channel.guild_id = Some(guild_id);
            self.store
                .insert(CHANNELS, &channel.scope(), channel.id, channel.into());
        }
        for mut role in roles {
            role.guild_id = Some(guild_id);
            self.store.insert(ROLES, &scope, role.id, role.into());
        }
        for mut member in members {
            member.guild_id = Some(guild_id);
            self.store
                .save(USERS, &[], member.id(), member.user.clone().into());
            self.store.insert(MEMBERS, &scope, member.id(), member.into());
        }
        for mut emoji in emojis {
            emoji.guild_id = Some(guild_id);
            self.store.insert(EMOJIS, &scope, emoji.id, emoji.into());
        }
        for stage in stage_instances {
            self.store
                .insert(STAGE_INSTANCES, &stage.scope(), stage.id, stage.into());
        }
        for event in guild_scheduled_events {
            self.store
                .insert(SCHEDULED_EVENTS, &event.scope(), event.id, event.into());
        }

        self.store
            .save(GUILDS, &[], guild_id, Entity::Guild(guild.clone()));

        let name = if self.awaiting_guilds.write().remove(&guild_id) {
            "guild_available"
        } else {
            "guild_join"
        };
        debug!(guild = %guild_id, fact = name, "guild cached");
        Fact::new(name, vec![Entity::Guild(guild).into()])
    }

    fn on_guild_update(&self, guild: Guild) -> Fact {
        let before = self
            .store
            .save(GUILDS, &[], guild.id, Entity::Guild(guild.clone()));
        Fact::new(
            "guild_update",
            vec![FactArg::previous(before), Entity::Guild(guild).into()],
        )
    }

    fn on_guild_delete(&self, deleted: UnavailableGuild) -> Fact {
        let guild_id = deleted.id;
        let removed = self.store.discard(GUILDS, &[], Some(guild_id));

        let name = if deleted.unavailable {
            self.awaiting_guilds.write().insert(guild_id);
            "guild_unavailable"
        } else {
            for store in GUILD_SCOPED_STORES {
                let count = self.store.delete_all_parent(store, &[guild_id]);
                trace!(guild = %guild_id, store = %store, count, "cleared guild scope");
            }
            "guild_remove"
        };
        Fact::new(name, vec![FactArg::entity_or_id(removed, guild_id)])
    }

    // =========================================================================
    // Channels and threads
    // =========================================================================

    fn on_channel_create(&self, name: &'static str, channel: Channel) -> Fact {
        self.store
            .insert(CHANNELS, &channel.scope(), channel.id, channel.clone().into());
        Fact::new(name, vec![Entity::Channel(channel).into()])
    }

    fn on_channel_update(&self, name: &'static str, channel: Channel) -> Fact {
        let before = self
            .store
            .save(CHANNELS, &channel.scope(), channel.id, channel.clone().into());
        Fact::new(
            name,
            vec![FactArg::previous(before), Entity::Channel(channel).into()],
        )
    }

    /// Removes the channel, its messages and, for a parent channel, its threads.
    fn on_channel_delete(&self, name: &'static str, channel: Channel) -> Fact {
        let removed = self
            .store
            .discard(CHANNELS, &channel.scope(), Some(channel.id));
        self.store.delete_all_parent(MESSAGES, &[channel.id]);
        self.store.delete_all_parent(CHANNELS, &[channel.id]);
        Fact::new(name, vec![FactArg::entity_or_id(removed, channel.id)])
    }

    // =========================================================================
    // Members and bans
    // =========================================================================

    fn member_guild(member: &Member, event: &'static str) -> Result<Snowflake, SyncError> {
        member.guild_id.ok_or(SyncError::MissingField {
            event,
            field: "guild_id",
        })
    }

    fn on_member_add(&self, member: Member) -> Result<Fact, SyncError> {
        let guild_id = Self::member_guild(&member, "GUILD_MEMBER_ADD")?;
        self.store
            .save(USERS, &[], member.id(), member.user.clone().into());
        self.store
            .insert(MEMBERS, &[guild_id], member.id(), member.clone().into());
        Ok(Fact::new("member_join", vec![Entity::Member(member).into()]))
    }

    fn on_member_update(&self, member: Member) -> Result<Fact, SyncError> {
        let guild_id = Self::member_guild(&member, "GUILD_MEMBER_UPDATE")?;
        self.store
            .save(USERS, &[], member.id(), member.user.clone().into());
        let before = self
            .store
            .save(MEMBERS, &[guild_id], member.id(), member.clone().into());
        Ok(Fact::new(
            "member_update",
            vec![FactArg::previous(before), Entity::Member(member).into()],
        ))
    }

    fn on_member_remove(&self, removed: GuildUser) -> Fact {
        let GuildUser { guild_id, user } = removed;
        let member = self.store.discard(MEMBERS, &[guild_id], Some(user.id));
        Fact::new(
            "member_remove",
            vec![
                FactArg::Id(guild_id),
                member.unwrap_or(Entity::User(user)).into(),
            ],
        )
    }

    /// Bans carry only the guild and the user, never the member's scope chain,
    /// so the member is found by id and accepted only if filed under the guild.
    fn on_ban_add(&self, ban: GuildUser) -> Fact {
        let GuildUser { guild_id, user } = ban;
        let target = self
            .store
            .get_without_parents(MEMBERS, user.id)
            .filter(|(parents, _)| parents.contains(&guild_id))
            .map(|(_, member)| member)
            .unwrap_or(Entity::User(user));
        Fact::new("member_ban", vec![FactArg::Id(guild_id), target.into()])
    }

    fn on_ban_remove(&self, ban: GuildUser) -> Fact {
        let GuildUser { guild_id, user } = ban;
        let target = self
            .store
            .get_without_parents(USERS, user.id)
            .map(|(_, user)| user)
            .unwrap_or(Entity::User(user));
        Fact::new("member_unban", vec![FactArg::Id(guild_id), target.into()])
    }

    // =========================================================================
    // Roles and emojis
    // =========================================================================

    fn on_role_create(&self, event: GuildRole) -> Fact {
        let GuildRole { guild_id, mut role } = event;
        role.guild_id = Some(guild_id);
        self.store
            .insert(ROLES, &[guild_id], role.id, role.clone().into());
        Fact::new("role_create", vec![Entity::Role(role).into()])
    }

    fn on_role_update(&self, event: GuildRole) -> Fact {
        let GuildRole { guild_id, mut role } = event;
        role.guild_id = Some(guild_id);
        let before = self
            .store
            .save(ROLES, &[guild_id], role.id, role.clone().into());
        Fact::new(
            "role_update",
            vec![FactArg::previous(before), Entity::Role(role).into()],
        )
    }

    /// Also strips the role from every cached member of the guild.
    fn on_role_delete(&self, event: GuildRoleDelete) -> Fact {
        let GuildRoleDelete { guild_id, role_id } = event;
        let removed = self.store.discard(ROLES, &[guild_id], Some(role_id));

        for entity in self.store.get_all_parent(MEMBERS, &[guild_id]) {
            if let Entity::Member(mut member) = entity
                && member.roles.contains(&role_id)
            {
                member.roles.retain(|r| *r != role_id);
                self.store
                    .save(MEMBERS, &[guild_id], member.id(), member.into());
            }
        }

        Fact::new("role_delete", vec![FactArg::entity_or_id(removed, role_id)])
    }

    /// The payload is the guild's complete emoji list, so the scope is
    /// replaced wholesale.
    fn on_emojis_update(&self, event: GuildEmojis) -> Fact {
        let GuildEmojis { guild_id, emojis } = event;
        let before = self.store.get_all_parent(EMOJIS, &[guild_id]);
        self.store.delete_all_parent(EMOJIS, &[guild_id]);

        let mut after = Vec::with_capacity(emojis.len());
        for mut emoji in emojis {
            emoji.guild_id = Some(guild_id);
            self.store
                .insert(EMOJIS, &[guild_id], emoji.id, emoji.clone().into());
            after.push(FactArg::Entity(emoji.into()));
        }

        Fact::new(
            "emojis_update",
            vec![
                FactArg::Id(guild_id),
                FactArg::List(before.into_iter().map(FactArg::Entity).collect()),
                FactArg::List(after),
            ],
        )
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn on_message_create(&self, message: Message) -> Fact {
        self.store
            .save(USERS, &[], message.author.id, message.author.clone().into());
        self.store
            .insert(MESSAGES, &message.scope(), message.id, message.clone().into());
        Fact::new("message", vec![Entity::Message(message).into()])
    }

    fn on_message_update(&self, update: MessageUpdate) -> Result<Fact, SyncError> {
        let cached = self
            .store
            .get_one(MESSAGES, &[update.channel_id], Some(update.id));
        let after = match cached {
            Some(Entity::Message(previous)) => update.apply_to(previous),
            _ => update.into_message()?,
        };

        let before = self
            .store
            .save(MESSAGES, &after.scope(), after.id, after.clone().into());
        Ok(Fact::new(
            "message_edit",
            vec![FactArg::previous(before), Entity::Message(after).into()],
        ))
    }

    fn discard_message(&self, channel_id: Snowflake, id: Snowflake) -> FactArg {
        let removed = self.store.discard(MESSAGES, &[channel_id], Some(id));
        FactArg::entity_or_id(removed, id)
    }

    fn on_message_delete(&self, deleted: MessageDelete) -> Fact {
        Fact::new(
            "message_delete",
            vec![self.discard_message(deleted.channel_id, deleted.id)],
        )
    }

    /// One single-message delete per id, results kept in input order.
    fn on_message_delete_bulk(&self, bulk: MessageDeleteBulk) -> Fact {
        let results = bulk
            .ids
            .iter()
            .map(|id| self.discard_message(bulk.channel_id, *id))
            .collect();
        Fact::new("bulk_message_delete", vec![FactArg::List(results)])
    }

    // =========================================================================
    // Stages and scheduled events
    // =========================================================================

    fn on_stage_create(&self, stage: StageInstance) -> Fact {
        self.store
            .insert(STAGE_INSTANCES, &stage.scope(), stage.id, stage.clone().into());
        Fact::new("stage_instance_create", vec![Entity::StageInstance(stage).into()])
    }

    fn on_stage_update(&self, stage: StageInstance) -> Fact {
        let before = self
            .store
            .save(STAGE_INSTANCES, &stage.scope(), stage.id, stage.clone().into());
        Fact::new(
            "stage_instance_update",
            vec![FactArg::previous(before), Entity::StageInstance(stage).into()],
        )
    }

    fn on_stage_delete(&self, stage: StageInstance) -> Fact {
        let removed = self
            .store
            .discard(STAGE_INSTANCES, &stage.scope(), Some(stage.id));
        Fact::new(
            "stage_instance_delete",
            vec![FactArg::entity_or_id(removed, stage.id)],
        )
    }

    fn on_scheduled_event_create(&self, event: ScheduledEvent) -> Fact {
        self.store
            .insert(SCHEDULED_EVENTS, &event.scope(), event.id, event.clone().into());
        Fact::new("scheduled_event_create", vec![Entity::ScheduledEvent(event).into()])
    }

    fn on_scheduled_event_update(&self, event: ScheduledEvent) -> Fact {
        let before = self
            .store
            .save(SCHEDULED_EVENTS, &event.scope(), event.id, event.clone().into());
        Fact::new(
            "scheduled_event_update",
            vec![FactArg::previous(before), Entity::ScheduledEvent(event).into()],
        )
    }

    fn on_scheduled_event_delete(&self, event: ScheduledEvent) -> Fact {
        let removed = self
            .store
            .discard(SCHEDULED_EVENTS, &event.scope(), Some(event.id));
        Fact::new(
            "scheduled_event_delete",
            vec![FactArg::entity_or_id(removed, event.id)],
        )
    }

    // =========================================================================
    // Users
    // =========================================================================

    fn on_user_update(&self, user: User) -> Fact {
        let before = self.store.save(USERS, &[], user.id, user.clone().into());
        Fact::new(
            "user_update",
            vec![FactArg::previous(before), Entity::User(user).into()],
        )
    }
}

/// Builder for an [`EventSynchronizer`] from [`CacheSettings`].
pub struct EventSynchronizerBuilder {
    settings: CacheSettings,
    store: Option<Arc<dyn StateStore>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    commands: Option<CommandReconciler>,
}

impl EventSynchronizerBuilder {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            store: None,
            dispatcher: None,
            commands: None,
        }
    }

    /// Use an existing store instead of building one from the settings.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn commands(mut self, commands: CommandReconciler) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Build the synchronizer.
    ///
    /// No maintenance task is started: weak caches grow past their
    /// capacities until the caller runs [`spawn_maintenance`] or
    /// [`crate::run_cycle`]. See [`Self::build_with_maintenance`].
    pub fn build(self) -> EventSynchronizer {
        let store = self
            .store
            .unwrap_or_else(|| self.settings.build_store());
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(BroadcastDispatcher::new()));

        let mut synchronizer = EventSynchronizer::new(store, dispatcher);
        if let Some(commands) = self.commands {
            synchronizer = synchronizer.with_commands(commands);
        }
        synchronizer
    }

    /// Build the synchronizer and, for the weak strategy, start its
    /// maintenance task at the configured interval.
    ///
    /// The task stops when `shutdown` turns true or its sender is dropped.
    /// The indexed strategy needs no maintenance and returns `None`.
    pub fn build_with_maintenance(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> (EventSynchronizer, Option<JoinHandle<()>>) {
        let strategy = self.settings.strategy;
        let interval = self.settings.maintenance_interval();
        let synchronizer = self.build();
        let maintenance = (strategy == StoreStrategy::Weak)
            .then(|| spawn_maintenance(synchronizer.store(), interval, shutdown));
        (synchronizer, maintenance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::IndexedStateStore;
    use serde_json::json;

    fn synchronizer() -> EventSynchronizer {
        EventSynchronizer::new(
            Arc::new(IndexedStateStore::default()),
            Arc::new(BroadcastDispatcher::new()),
        )
    }

    async fn apply(sync: &EventSynchronizer, event_type: &str, payload: Value) -> Option<Fact> {
        let event = GatewayEvent::decode(event_type, payload).unwrap().unwrap();
        sync.synchronize(event).await.unwrap()
    }

    #[tokio::test]
    async fn test_member_add_requires_guild() {
        let sync = synchronizer();
        let event = GatewayEvent::decode(
            "GUILD_MEMBER_ADD",
            json!({"user": {"id": "9", "username": "ferris"}}),
        )
        .unwrap()
        .unwrap();
        assert!(matches!(
            sync.synchronize(event).await,
            Err(SyncError::MissingField { field: "guild_id", .. })
        ));
        assert!(sync.store().get_all(USERS).is_empty());
    }

    #[tokio::test]
    async fn test_role_delete_strips_member_roles() {
        let sync = synchronizer();
        apply(&sync, "GUILD_ROLE_CREATE", json!({"guild_id": "1", "role": {"id": "50", "name": "mod"}})).await;
        apply(
            &sync,
            "GUILD_MEMBER_ADD",
            json!({"guild_id": "1", "user": {"id": "9", "username": "ferris"}, "roles": ["50", "51"]}),
        )
        .await;

        let fact = apply(&sync, "GUILD_ROLE_DELETE", json!({"guild_id": "1", "role_id": "50"}))
            .await
            .unwrap();
        assert_eq!(fact.name, "role_delete");
        assert!(fact.args[0].as_entity().is_some());

        let member = sync
            .store()
            .get_one(MEMBERS, &[Snowflake(1)], Some(Snowflake(9)))
            .unwrap();
        assert_eq!(member.as_member().unwrap().roles, vec![Snowflake(51)]);
    }

    #[tokio::test]
    async fn test_message_update_merges_partial_edit() {
        let sync = synchronizer();
        apply(
            &sync,
            "MESSAGE_CREATE",
            json!({"id": "7", "channel_id": "2", "author": {"id": "9", "username": "ferris"}, "content": "hi"}),
        )
        .await;

        let fact = apply(
            &sync,
            "MESSAGE_UPDATE",
            json!({"id": "7", "channel_id": "2", "content": "hello"}),
        )
        .await
        .unwrap();

        let before = fact.args[0].as_entity().unwrap().as_message().unwrap();
        let after = fact.args[1].as_entity().unwrap().as_message().unwrap();
        assert_eq!(before.content, "hi");
        assert_eq!(after.content, "hello");
        assert_eq!(after.author.username, "ferris");
    }

    #[tokio::test]
    async fn test_channel_delete_clears_messages_and_threads() {
        let sync = synchronizer();
        apply(&sync, "CHANNEL_CREATE", json!({"id": "2", "type": 0, "guild_id": "1"})).await;
        apply(
            &sync,
            "THREAD_CREATE",
            json!({"id": "3", "type": 11, "guild_id": "1", "parent_id": "2"}),
        )
        .await;
        apply(
            &sync,
            "MESSAGE_CREATE",
            json!({"id": "7", "channel_id": "2", "guild_id": "1", "author": {"id": "9", "username": "ferris"}}),
        )
        .await;

        let fact = apply(&sync, "CHANNEL_DELETE", json!({"id": "2", "type": 0, "guild_id": "1"}))
            .await
            .unwrap();
        assert_eq!(fact.name, "channel_delete");
        assert!(sync.store().get_all(CHANNELS).is_empty());
        assert!(sync.store().get_all(MESSAGES).is_empty());
    }

    #[tokio::test]
    async fn test_guild_unavailable_then_available() {
        let sync = synchronizer();
        apply(&sync, "GUILD_CREATE", json!({"id": "1", "name": "g"})).await;

        let fact = apply(&sync, "GUILD_DELETE", json!({"id": "1", "unavailable": true}))
            .await
            .unwrap();
        assert_eq!(fact.name, "guild_unavailable");

        let fact = apply(&sync, "GUILD_CREATE", json!({"id": "1", "name": "g"}))
            .await
            .unwrap();
        assert_eq!(fact.name, "guild_available");
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_starts_maintenance_for_weak_store() {
        let settings = CacheSettings {
            strategy: StoreStrategy::Weak,
            maintenance_interval_secs: 5,
            capacities: [(USERS.to_string(), 1)].into(),
            ..Default::default()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sync, handle) = EventSynchronizerBuilder::new(settings).build_with_maintenance(shutdown_rx);
        let handle = handle.unwrap();

        apply(&sync, "USER_UPDATE", json!({"id": "1", "username": "a"})).await;
        apply(&sync, "USER_UPDATE", json!({"id": "2", "username": "b"})).await;
        assert_eq!(sync.store().get_all(USERS).len(), 2);

        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        assert_eq!(sync.store().get_all(USERS).len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_indexed_store_has_no_maintenance() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_sync, handle) =
            EventSynchronizerBuilder::new(CacheSettings::default()).build_with_maintenance(shutdown_rx);
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_ban_ignores_member_of_other_guild() {
        let sync = synchronizer();
        apply(
            &sync,
            "GUILD_MEMBER_ADD",
            json!({"guild_id": "1", "user": {"id": "9", "username": "ferris"}}),
        )
        .await;

        let fact = apply(
            &sync,
            "GUILD_BAN_ADD",
            json!({"guild_id": "2", "user": {"id": "9", "username": "ferris"}}),
        )
        .await
        .unwrap();
        assert_eq!(fact.name, "member_ban");
        assert_eq!(fact.args[0], FactArg::Id(Snowflake(2)));
        assert_eq!(fact.args[1].as_entity().unwrap().kind(), "User");
    }
}
