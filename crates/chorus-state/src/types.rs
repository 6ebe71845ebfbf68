//! Core types for cached gateway entities.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds between the Unix epoch and the first second of 2015,
/// the epoch snowflake timestamps are relative to.
const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// Store holding guilds.
pub const GUILDS: &str = "guilds";
/// Store holding guild channels and threads.
pub const CHANNELS: &str = "channels";
/// Store holding guild members, keyed by user id: a user in two guilds keeps
/// only the latest member record.
pub const MEMBERS: &str = "members";
/// Store holding guild roles.
pub const ROLES: &str = "roles";
/// Store holding custom guild emojis.
pub const EMOJIS: &str = "emojis";
/// Store holding messages.
pub const MESSAGES: &str = "messages";
/// Store holding users.
pub const USERS: &str = "users";
/// Store holding live stage instances.
pub const STAGE_INSTANCES: &str = "stage_instances";
/// Store holding guild scheduled events.
pub const SCHEDULED_EVENTS: &str = "scheduled_events";

/// Stores whose entries are scoped under a guild and go away with it.
pub const GUILD_SCOPED_STORES: &[&str] = &[
    CHANNELS,
    MEMBERS,
    ROLES,
    EMOJIS,
    MESSAGES,
    STAGE_INSTANCES,
    SCHEDULED_EVENTS,
];

/// A 64-bit, time-ordered identifier.
///
/// Unique within its entity kind. On the wire it is usually a decimal
/// string, but bare integers are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// The raw integer value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// When the identified entity was created.
    pub fn created_at(self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) + SNOWFLAKE_EPOCH_MS;
        Utc.timestamp_millis_opt(ms as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl std::fmt::Display for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for Snowflake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct SnowflakeVisitor;

        impl<'de> Visitor<'de> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a snowflake as a decimal string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Snowflake(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Snowflake)
                    .map_err(|_| de::Error::custom("negative snowflake"))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse::<u64>()
                    .map(Snowflake)
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// A guild, without its nested collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
}

/// Channel types that are threads and therefore scoped under a parent channel.
const THREAD_CHANNEL_TYPES: &[u8] = &[10, 11, 12];

/// A guild channel or thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl Channel {
    /// Whether this channel is a thread.
    pub fn is_thread(&self) -> bool {
        THREAD_CHANNEL_TYPES.contains(&self.kind)
    }

    /// Parent keys: the guild, plus the parent channel for threads.
    ///
    /// Category membership is not a scope; deleting a category must not
    /// take its channels with it.
    pub fn scope(&self) -> Vec<Snowflake> {
        let mut scope: Vec<Snowflake> = self.guild_id.into_iter().collect();
        if self.is_thread()
            && let Some(parent_id) = self.parent_id
        {
            scope.push(parent_id);
        }
        scope
    }
}

/// A guild member.
///
/// Keyed by the member's user id and scoped under the guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn id(&self) -> Snowflake {
        self.user.id
    }
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permissions: Option<String>,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub managed: bool,
}

/// A custom guild emoji.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub animated: bool,
}

/// A message in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pinned: bool,
}

impl Message {
    /// Parent keys: the channel, plus the guild when there is one.
    pub fn scope(&self) -> Vec<Snowflake> {
        let mut scope = vec![self.channel_id];
        scope.extend(self.guild_id);
        scope
    }
}

/// A live stage in a stage channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInstance {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub topic: String,
    #[serde(default)]
    pub privacy_level: u8,
    #[serde(default)]
    pub guild_scheduled_event_id: Option<Snowflake>,
}

impl StageInstance {
    /// A stage is scoped under its channel, its guild and, when it was
    /// started from one, its scheduled event.
    pub fn scope(&self) -> Vec<Snowflake> {
        let mut scope = vec![self.channel_id, self.guild_id];
        scope.extend(self.guild_scheduled_event_id);
        scope
    }
}

/// A guild scheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: Snowflake,
    pub guild_id: Snowflake,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    pub name: String,
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub scheduled_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator_id: Option<Snowflake>,
}

impl ScheduledEvent {
    pub fn scope(&self) -> Vec<Snowflake> {
        let mut scope = vec![self.guild_id];
        scope.extend(self.channel_id);
        scope
    }
}

/// Generates the `Entity` union over every cached kind, with `From`
/// conversions and typed accessors.
macro_rules! define_entities {
    ( $( $variant:ident => $accessor:ident, $id:expr );* $(;)? ) => {
        /// Any entity the state layer caches.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Entity {
            $( $variant($variant), )*
        }

        impl Entity {
            /// The entity's own identifier.
            pub fn id(&self) -> Snowflake {
                match self {
                    $( Entity::$variant(value) => ($id)(value), )*
                }
            }

            /// Short name of the entity kind, for logging.
            pub fn kind(&self) -> &'static str {
                match self {
                    $( Entity::$variant(_) => stringify!($variant), )*
                }
            }

            $(
                pub fn $accessor(&self) -> Option<&$variant> {
                    match self {
                        Entity::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<$variant> for Entity {
                fn from(value: $variant) -> Self {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

define_entities! {
    Guild => as_guild, |g: &Guild| g.id;
    Channel => as_channel, |c: &Channel| c.id;
    Member => as_member, |m: &Member| m.id();
    Role => as_role, |r: &Role| r.id;
    Emoji => as_emoji, |e: &Emoji| e.id;
    Message => as_message, |m: &Message| m.id;
    User => as_user, |u: &User| u.id;
    StageInstance => as_stage_instance, |s: &StageInstance| s.id;
    ScheduledEvent => as_scheduled_event, |s: &ScheduledEvent| s.id;
}
