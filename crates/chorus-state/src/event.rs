//! Inbound gateway events.
//!
//! The transport hands over `(event_type, payload)`; [`GatewayEvent::decode`]
//! turns that into a typed variant. Unknown event types decode to `None` and
//! are ignored by the synchronizer.
//!
//! # Adding an event
//!
//! 1. Define the payload struct below (or reuse an entity type).
//! 2. Add one `"EVENT_TYPE" => Variant(Payload);` line to the
//!    `define_gateway_events!` invocation.
//! 3. Handle the new variant in `EventSynchronizer::synchronize`; the match
//!    there is exhaustive, so the compiler points at the spot.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    Channel, Emoji, Guild, Member, Message, Role, ScheduledEvent, Snowflake, StageInstance,
    SyncError, User,
};

/// Generates the [`GatewayEvent`] enum and its string-keyed decoder.
macro_rules! define_gateway_events {
    ( $( $event_type:literal => $variant:ident($payload:ty) );* $(;)? ) => {
        /// A recognised inbound event with its decoded payload.
        #[derive(Debug, Clone)]
        pub enum GatewayEvent {
            $( $variant($payload), )*
        }

        impl GatewayEvent {
            /// Every event type this crate understands.
            pub const EVENT_TYPES: &'static [&'static str] = &[ $( $event_type, )* ];

            /// Decode a raw event.
            ///
            /// Returns `Ok(None)` for event types this crate does not handle.
            pub fn decode(event_type: &str, payload: Value) -> Result<Option<Self>, SyncError> {
                match event_type {
                    $(
                        $event_type => serde_json::from_value::<$payload>(payload)
                            .map(|value| Some(GatewayEvent::$variant(value)))
                            .map_err(|source| SyncError::Payload {
                                event: $event_type,
                                source,
                            }),
                    )*
                    _ => Ok(None),
                }
            }

            /// The wire name of this event.
            pub fn event_type(&self) -> &'static str {
                match self {
                    $( GatewayEvent::$variant(_) => $event_type, )*
                }
            }
        }
    };
}

define_gateway_events! {
    "READY" => Ready(Ready);
    "GUILD_CREATE" => GuildCreate(GuildCreate);
    "GUILD_UPDATE" => GuildUpdate(Guild);
    "GUILD_DELETE" => GuildDelete(UnavailableGuild);
    "CHANNEL_CREATE" => ChannelCreate(Channel);
    "CHANNEL_UPDATE" => ChannelUpdate(Channel);
    "CHANNEL_DELETE" => ChannelDelete(Channel);
    "THREAD_CREATE" => ThreadCreate(Channel);
    "THREAD_UPDATE" => ThreadUpdate(Channel);
    "THREAD_DELETE" => ThreadDelete(Channel);
    "GUILD_MEMBER_ADD" => MemberAdd(Member);
    "GUILD_MEMBER_UPDATE" => MemberUpdate(Member);
    "GUILD_MEMBER_REMOVE" => MemberRemove(GuildUser);
    "GUILD_BAN_ADD" => BanAdd(GuildUser);
    "GUILD_BAN_REMOVE" => BanRemove(GuildUser);
    "GUILD_ROLE_CREATE" => RoleCreate(GuildRole);
    "GUILD_ROLE_UPDATE" => RoleUpdate(GuildRole);
    "GUILD_ROLE_DELETE" => RoleDelete(GuildRoleDelete);
    "GUILD_EMOJIS_UPDATE" => EmojisUpdate(GuildEmojis);
    "MESSAGE_CREATE" => MessageCreate(Message);
    "MESSAGE_UPDATE" => MessageUpdate(MessageUpdate);
    "MESSAGE_DELETE" => MessageDelete(MessageDelete);
    "MESSAGE_DELETE_BULK" => MessageDeleteBulk(MessageDeleteBulk);
    "STAGE_INSTANCE_CREATE" => StageInstanceCreate(StageInstance);
    "STAGE_INSTANCE_UPDATE" => StageInstanceUpdate(StageInstance);
    "STAGE_INSTANCE_DELETE" => StageInstanceDelete(StageInstance);
    "GUILD_SCHEDULED_EVENT_CREATE" => ScheduledEventCreate(ScheduledEvent);
    "GUILD_SCHEDULED_EVENT_UPDATE" => ScheduledEventUpdate(ScheduledEvent);
    "GUILD_SCHEDULED_EVENT_DELETE" => ScheduledEventDelete(ScheduledEvent);
    "USER_UPDATE" => UserUpdate(User);
}

/// Application reference carried by READY.
#[derive(Debug, Clone, Deserialize)]
pub struct PartialApplication {
    pub id: Snowflake,
}

/// The handshake completing a session.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub application: Option<PartialApplication>,
}

/// A guild reference that may be in an outage.
#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

/// A full guild with the collections it is delivered with.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreate {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(default)]
    pub stage_instances: Vec<StageInstance>,
    #[serde(default)]
    pub guild_scheduled_events: Vec<ScheduledEvent>,
}

/// A user in the context of a guild (member removal, bans).
#[derive(Debug, Clone, Deserialize)]
pub struct GuildUser {
    pub guild_id: Snowflake,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRole {
    pub guild_id: Snowflake,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildRoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

/// The complete emoji list of a guild after a change.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildEmojis {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
}

/// A possibly partial message edit.
///
/// Only the id and channel are guaranteed; absent fields keep their cached
/// values.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageUpdate {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

impl MessageUpdate {
    /// Apply this edit on top of the cached message.
    pub fn apply_to(self, mut message: Message) -> Message {
        if let Some(author) = self.author {
            message.author = author;
        }
        if let Some(content) = self.content {
            message.content = content;
        }
        if self.edited_timestamp.is_some() {
            message.edited_timestamp = self.edited_timestamp;
        }
        if let Some(pinned) = self.pinned {
            message.pinned = pinned;
        }
        message.guild_id = self.guild_id.or(message.guild_id);
        message
    }

    /// Build a message from the edit alone, for messages that were never
    /// cached. Fails without an author.
    pub fn into_message(self) -> Result<Message, SyncError> {
        let author = self.author.ok_or(SyncError::MissingField {
            event: "MESSAGE_UPDATE",
            field: "author",
        })?;
        Ok(Message {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author,
            content: self.content.unwrap_or_default(),
            edited_timestamp: self.edited_timestamp,
            pinned: self.pinned.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeleteBulk {
    pub ids: Vec<Snowflake>,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}
