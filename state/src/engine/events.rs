use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::permissions::Permissions;

/// Snowflake identifiers. The creation time lives in the upper bits,
/// so ids of the same kind sort by age.
pub type GuildId = u64;
pub type ChannelId = u64;
pub type RoleId = u64;
pub type UserId = u64;
pub type MessageId = u64;
pub type EmojiId = u64;
pub type StickerId = u64;

/// A decoded gateway event, as handed over by the upstream connection.
/// Anything the tracker does not model decodes to `Unknown` and is ignored.
///
/// The tag key is `event` rather than `type`: channel payloads carry their own `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Connection (re)established. Resets the shard.
    Ready(Ready),

    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete(UnavailableGuild),

    GuildMemberAdd(Member),
    GuildMemberUpdate(Member),
    GuildMemberRemove {
        guild_id: GuildId,
        user: User,
    },

    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),

    GuildRoleCreate {
        guild_id: GuildId,
        role: Role,
    },
    GuildRoleUpdate {
        guild_id: GuildId,
        role: Role,
    },
    GuildRoleDelete {
        guild_id: GuildId,
        role_id: RoleId,
    },

    MessageCreate(Message),
    MessageUpdate(MessageUpdate),
    MessageDelete {
        id: MessageId,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
    },
    MessageDeleteBulk {
        ids: Vec<MessageId>,
        channel_id: ChannelId,
        guild_id: Option<GuildId>,
    },

    ThreadCreate(Channel),
    ThreadUpdate(Channel),
    ThreadDelete {
        id: ChannelId,
        guild_id: GuildId,
        parent_id: Option<ChannelId>,
    },
    ThreadListSync(ThreadListSync),

    PresenceUpdate(Presence),
    VoiceStateUpdate(VoiceState),

    GuildEmojisUpdate {
        guild_id: GuildId,
        emojis: Vec<Emoji>,
    },
    GuildStickersUpdate {
        guild_id: GuildId,
        stickers: Vec<Sticker>,
    },

    #[serde(other)]
    Unknown,
}

impl GatewayEvent {
    /// The guild this event belongs to, if it is guild-scoped.
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::Ready(_) | Self::Unknown => None,
            Self::GuildCreate(g) | Self::GuildUpdate(g) => Some(g.id),
            Self::GuildDelete(g) => Some(g.id),
            Self::GuildMemberAdd(m) | Self::GuildMemberUpdate(m) => m.guild_id,
            Self::GuildMemberRemove { guild_id, .. }
            | Self::GuildRoleCreate { guild_id, .. }
            | Self::GuildRoleUpdate { guild_id, .. }
            | Self::GuildRoleDelete { guild_id, .. }
            | Self::ThreadDelete { guild_id, .. }
            | Self::GuildEmojisUpdate { guild_id, .. }
            | Self::GuildStickersUpdate { guild_id, .. } => Some(*guild_id),
            Self::ChannelCreate(c)
            | Self::ChannelUpdate(c)
            | Self::ChannelDelete(c)
            | Self::ThreadCreate(c)
            | Self::ThreadUpdate(c) => c.guild_id,
            Self::MessageCreate(m) => m.guild_id,
            Self::MessageUpdate(m) => m.guild_id,
            Self::MessageDelete { guild_id, .. } | Self::MessageDeleteBulk { guild_id, .. } => {
                *guild_id
            }
            Self::ThreadListSync(s) => Some(s.guild_id),
            Self::PresenceUpdate(p) => p.guild_id,
            Self::VoiceStateUpdate(v) => v.guild_id,
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ready {
    pub session_id: String,
    pub user: User,
    /// Guild stubs for every guild on this shard, usually all unavailable.
    pub guilds: Vec<Guild>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Guild {
    pub id: GuildId,
    pub unavailable: bool,
    pub name: String,
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub splash: Option<String>,
    pub description: Option<String>,
    pub owner_id: UserId,
    pub preferred_locale: String,
    pub afk_channel_id: Option<ChannelId>,
    pub afk_timeout: u32,
    pub verification_level: u8,
    pub default_message_notifications: u8,
    pub explicit_content_filter: u8,
    pub mfa_level: u8,
    pub large: bool,
    pub member_count: u64,
    pub max_members: Option<u64>,
    pub max_presences: Option<u64>,
    pub features: Vec<String>,
    pub widget_enabled: bool,
    pub widget_channel_id: Option<ChannelId>,
    pub system_channel_id: Option<ChannelId>,
    pub vanity_url_code: Option<String>,

    pub roles: Vec<Role>,
    pub emojis: Vec<Emoji>,
    pub stickers: Vec<Sticker>,
    pub channels: Vec<Channel>,
    pub threads: Vec<Channel>,
    pub members: Vec<Member>,
    pub presences: Vec<Presence>,
    pub voice_states: Vec<VoiceState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnavailableGuild {
    pub id: GuildId,
    /// `true` for an outage, `false` when the bot left or was removed.
    pub unavailable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub discriminator: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
    pub bot: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub color: u32,
    pub hoist: bool,
    pub icon: Option<String>,
    pub position: i32,
    pub permissions: Permissions,
    pub managed: bool,
    pub mentionable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum OverwriteType {
    #[default]
    Role,
    Member,
}

impl From<u8> for OverwriteType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Member,
            _ => Self::Role,
        }
    }
}

impl From<OverwriteType> for u8 {
    fn from(v: OverwriteType) -> Self {
        match v {
            OverwriteType::Role => 0,
            OverwriteType::Member => 1,
        }
    }
}

/// Per-channel allow/deny pair for a role or a member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionOverwrite {
    /// Role id or user id depending on `kind`. The `@everyone` role id equals the guild id.
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: OverwriteType,
    pub allow: Permissions,
    pub deny: Permissions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    #[default]
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildAnnouncement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    GuildStageVoice,
    GuildDirectory,
    GuildForum,
    GuildMedia,
    Unknown(u8),
}

impl ChannelType {
    pub fn is_thread(self) -> bool {
        matches!(
            self,
            Self::AnnouncementThread | Self::PublicThread | Self::PrivateThread
        )
    }

    pub fn is_private(self) -> bool {
        matches!(self, Self::Dm | Self::GroupDm)
    }
}

impl From<u8> for ChannelType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::GuildText,
            1 => Self::Dm,
            2 => Self::GuildVoice,
            3 => Self::GroupDm,
            4 => Self::GuildCategory,
            5 => Self::GuildAnnouncement,
            10 => Self::AnnouncementThread,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            13 => Self::GuildStageVoice,
            14 => Self::GuildDirectory,
            15 => Self::GuildForum,
            16 => Self::GuildMedia,
            other => Self::Unknown(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(v: ChannelType) -> Self {
        match v {
            ChannelType::GuildText => 0,
            ChannelType::Dm => 1,
            ChannelType::GuildVoice => 2,
            ChannelType::GroupDm => 3,
            ChannelType::GuildCategory => 4,
            ChannelType::GuildAnnouncement => 5,
            ChannelType::AnnouncementThread => 10,
            ChannelType::PublicThread => 11,
            ChannelType::PrivateThread => 12,
            ChannelType::GuildStageVoice => 13,
            ChannelType::GuildDirectory => 14,
            ChannelType::GuildForum => 15,
            ChannelType::GuildMedia => 16,
            ChannelType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadMetadata {
    pub archived: bool,
    pub locked: bool,
    pub auto_archive_duration: u32,
    pub archive_timestamp: Option<DateTime<Utc>>,
    pub invitable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: ChannelId,
    pub guild_id: Option<GuildId>,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    pub name: String,
    pub topic: Option<String>,
    pub icon: Option<String>,
    pub nsfw: bool,
    pub position: i32,
    pub bitrate: u32,
    pub user_limit: u32,
    pub parent_id: Option<ChannelId>,
    pub rate_limit_per_user: u32,
    pub owner_id: Option<UserId>,
    pub flags: u64,
    pub thread_metadata: Option<ThreadMetadata>,
    pub permission_overwrites: Vec<PermissionOverwrite>,
    pub applied_tags: Vec<u64>,
    pub default_thread_rate_limit_per_user: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadListSync {
    pub guild_id: GuildId,
    /// Parents whose threads are being synced. Empty means the whole guild.
    pub channel_ids: Vec<ChannelId>,
    pub threads: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emoji {
    pub id: EmojiId,
    pub name: String,
    pub roles: Vec<RoleId>,
    pub animated: bool,
    pub managed: bool,
    pub available: bool,
    pub require_colons: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sticker {
    pub id: StickerId,
    pub name: String,
    pub description: Option<String>,
    pub tags: String,
    pub format_type: u8,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerItem {
    pub id: StickerId,
    pub name: String,
    pub format_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceState {
    pub guild_id: Option<GuildId>,
    /// `None` when the user left voice entirely.
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
    pub deaf: bool,
    pub mute: bool,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub self_stream: bool,
    pub self_video: bool,
    pub suppress: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Member {
    pub guild_id: Option<GuildId>,
    pub user: User,
    pub nick: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub roles: Vec<RoleId>,
    pub joined_at: Option<DateTime<Utc>>,
    pub premium_since: Option<DateTime<Utc>>,
    pub pending: bool,
    pub flags: u64,
    pub communication_disabled_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub url: Option<String>,
    pub details: Option<String>,
    pub state: Option<String>,
}

/// Activity type for streaming, preferred as the main activity.
pub const ACTIVITY_STREAMING: u8 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Presence {
    /// Often partial: only `id` is guaranteed.
    pub user: User,
    pub guild_id: Option<GuildId>,
    pub status: String,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub id: u64,
    pub filename: String,
    pub url: String,
    pub proxy_url: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Embed {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub color: Option<u32>,
    pub footer: Option<EmbedFooter>,
    pub image: Option<EmbedMedia>,
    pub thumbnail: Option<EmbedMedia>,
    pub author: Option<EmbedAuthor>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedFooter {
    pub text: String,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedMedia {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageReference {
    pub message_id: Option<MessageId>,
    pub channel_id: Option<ChannelId>,
    pub guild_id: Option<GuildId>,
}

/// A forwarded message carried inside another message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSnapshot {
    pub message: Option<SnapshotMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: User,
    pub member: Option<Member>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub mentions: Vec<User>,
    pub mention_roles: Vec<RoleId>,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub sticker_items: Vec<StickerItem>,
    pub message_reference: Option<MessageReference>,
    pub message_snapshots: Vec<MessageSnapshot>,
}

/// Partial message edit. Only the present fields changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageUpdate {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: Option<User>,
    pub content: Option<String>,
    pub edited_timestamp: Option<DateTime<Utc>>,
    pub mentions: Option<Vec<User>>,
    pub mention_roles: Option<Vec<RoleId>>,
    pub attachments: Option<Vec<Attachment>>,
    pub embeds: Option<Vec<Embed>>,
}
