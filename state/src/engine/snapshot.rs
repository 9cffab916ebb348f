use std::cmp::Ordering;
use std::sync::Arc;

use super::events::{
    Channel, ChannelId, ChannelType, Emoji, EmojiId, Guild, GuildId, PermissionOverwrite, Role,
    RoleId, Sticker, StickerId, ThreadMetadata, UserId, VoiceState,
};
use super::permissions::{Permissions, calculate_permissions};
use crate::error::StateError;

const CDN_URL: &str = "https://cdn.discordapp.com";

/// Core guild attributes, without any of the per-guild collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildState {
    pub id: GuildId,
    /// False while the guild is in an outage (or only known from a ready stub).
    pub available: bool,
    pub member_count: u64,
    pub owner_id: UserId,
    pub name: String,
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub splash: Option<String>,
    pub description: Option<String>,
    pub preferred_locale: String,
    pub afk_channel_id: Option<ChannelId>,
    /// Seconds before a voice user is considered AFK.
    pub afk_timeout: u32,
    pub verification_level: u8,
    /// 0 = all messages, 1 = mentions only.
    pub default_message_notifications: u8,
    pub explicit_content_filter: u8,
    pub mfa_level: u8,
    pub large: bool,
    pub max_members: Option<u64>,
    pub max_presences: Option<u64>,
    pub features: Vec<String>,
    pub widget_enabled: bool,
    pub widget_channel_id: Option<ChannelId>,
    pub system_channel_id: Option<ChannelId>,
    pub vanity_url_code: Option<String>,
}

impl GuildState {
    pub fn from_guild(guild: &Guild) -> Self {
        if guild.unavailable {
            return Self {
                id: guild.id,
                available: false,
                ..Default::default()
            };
        }

        Self {
            id: guild.id,
            available: true,
            member_count: guild.member_count,
            owner_id: guild.owner_id,
            name: guild.name.clone(),
            icon: guild.icon.clone(),
            banner: guild.banner.clone(),
            splash: guild.splash.clone(),
            description: guild.description.clone(),
            preferred_locale: guild.preferred_locale.clone(),
            afk_channel_id: guild.afk_channel_id,
            afk_timeout: guild.afk_timeout,
            verification_level: guild.verification_level,
            default_message_notifications: guild.default_message_notifications,
            explicit_content_filter: guild.explicit_content_filter,
            mfa_level: guild.mfa_level,
            large: guild.large,
            max_members: guild.max_members,
            max_presences: guild.max_presences,
            features: guild.features.clone(),
            widget_enabled: guild.widget_enabled,
            widget_channel_id: guild.widget_channel_id,
            system_channel_id: guild.system_channel_id,
            vanity_url_code: guild.vanity_url_code.clone(),
        }
    }
}

/// A cached channel or thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub id: ChannelId,
    pub guild_id: GuildId,
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

impl ChannelState {
    /// Convert a wire channel. The guild id is taken from the owning guild,
    /// since channels nested in a guild create carry none.
    pub fn from_channel(channel: &Channel, guild_id: GuildId) -> Self {
        Self {
            id: channel.id,
            guild_id,
            kind: channel.kind,
            name: channel.name.clone(),
            topic: channel.topic.clone(),
            icon: channel.icon.clone(),
            nsfw: channel.nsfw,
            position: channel.position,
            bitrate: channel.bitrate,
            user_limit: channel.user_limit,
            parent_id: channel.parent_id,
            rate_limit_per_user: channel.rate_limit_per_user,
            owner_id: channel.owner_id,
            flags: channel.flags,
            thread_metadata: channel.thread_metadata.clone(),
            permission_overwrites: channel.permission_overwrites.clone(),
            applied_tags: channel.applied_tags.clone(),
            default_thread_rate_limit_per_user: channel.default_thread_rate_limit_per_user,
        }
    }

    pub fn is_thread(&self) -> bool {
        self.kind.is_thread()
    }

    pub fn is_private(&self) -> bool {
        self.kind.is_private()
    }

    pub fn is_archived(&self) -> bool {
        self.thread_metadata.as_ref().is_some_and(|m| m.archived)
    }

    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

/// Whether role `a` sits above role `b` in the hierarchy.
/// Higher position wins; on a tie the older (lower id) role wins.
pub fn is_role_above(a: &Role, b: &Role) -> bool {
    if a.position != b.position {
        return a.position > b.position;
    }
    if a.id == b.id {
        return false;
    }
    a.id < b.id
}

pub(crate) fn sort_channels(channels: &mut [ChannelState]) {
    channels.sort_by_key(|c| c.position);
}

pub(crate) fn sort_roles(roles: &mut [Role]) {
    roles.sort_by(|a, b| {
        if is_role_above(a, b) {
            Ordering::Less
        } else if is_role_above(b, a) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    });
}

/// Immutable point-in-time view of a guild.
///
/// Every collection is an independently shared slice. Updates go through the
/// `with_*` builders, which produce a new snapshot that reallocates only the
/// replaced collection and shares the rest with `self`.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub guild: Arc<GuildState>,
    pub channels: Arc<[ChannelState]>,
    pub threads: Arc<[ChannelState]>,
    pub roles: Arc<[Role]>,
    pub emojis: Arc<[Emoji]>,
    pub stickers: Arc<[Sticker]>,
    pub voice_states: Arc<[VoiceState]>,
}

impl GuildSnapshot {
    /// A snapshot with no collections, as installed from a ready stub or a
    /// guild update for an unknown guild.
    pub fn stub(guild: GuildState) -> Self {
        Self {
            guild: Arc::new(guild),
            channels: Arc::from(Vec::new()),
            threads: Arc::from(Vec::new()),
            roles: Arc::from(Vec::new()),
            emojis: Arc::from(Vec::new()),
            stickers: Arc::from(Vec::new()),
            voice_states: Arc::from(Vec::new()),
        }
    }

    /// Build a full snapshot from a guild create payload.
    /// Archived threads are skipped.
    pub fn from_guild(guild: &Guild) -> Self {
        let mut channels: Vec<ChannelState> = guild
            .channels
            .iter()
            .map(|c| ChannelState::from_channel(c, guild.id))
            .collect();
        sort_channels(&mut channels);

        let mut roles = guild.roles.clone();
        sort_roles(&mut roles);

        let threads: Vec<ChannelState> = guild
            .threads
            .iter()
            .map(|t| ChannelState::from_channel(t, guild.id))
            .filter(|t| !t.is_archived())
            .collect();

        Self {
            guild: Arc::new(GuildState::from_guild(guild)),
            channels: channels.into(),
            threads: threads.into(),
            roles: roles.into(),
            emojis: guild.emojis.clone().into(),
            stickers: guild.stickers.clone().into(),
            voice_states: guild.voice_states.clone().into(),
        }
    }

    pub fn id(&self) -> GuildId {
        self.guild.id
    }

    // ── Copy-on-write builders ──────────────────────────────────

    pub fn with_guild(&self, guild: GuildState) -> Self {
        Self {
            guild: Arc::new(guild),
            ..self.clone()
        }
    }

    pub fn with_channels(&self, channels: Vec<ChannelState>) -> Self {
        Self {
            channels: channels.into(),
            ..self.clone()
        }
    }

    pub fn with_threads(&self, threads: Vec<ChannelState>) -> Self {
        Self {
            threads: threads.into(),
            ..self.clone()
        }
    }

    pub fn with_roles(&self, roles: Vec<Role>) -> Self {
        Self {
            roles: roles.into(),
            ..self.clone()
        }
    }

    pub fn with_emojis(&self, emojis: Vec<Emoji>) -> Self {
        Self {
            emojis: emojis.into(),
            ..self.clone()
        }
    }

    pub fn with_stickers(&self, stickers: Vec<Sticker>) -> Self {
        Self {
            stickers: stickers.into(),
            ..self.clone()
        }
    }

    pub fn with_voice_states(&self, voice_states: Vec<VoiceState>) -> Self {
        Self {
            voice_states: voice_states.into(),
            ..self.clone()
        }
    }

    // ── Lookups ─────────────────────────────────────────────────

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn thread(&self, id: ChannelId) -> Option<&ChannelState> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn channel_or_thread(&self, id: ChannelId) -> Option<&ChannelState> {
        self.channel(id).or_else(|| self.thread(id))
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn emoji(&self, id: EmojiId) -> Option<&Emoji> {
        self.emojis.iter().find(|e| e.id == id)
    }

    pub fn sticker(&self, id: StickerId) -> Option<&Sticker> {
        self.stickers.iter().find(|s| s.id == id)
    }

    pub fn voice_state(&self, user_id: UserId) -> Option<&VoiceState> {
        self.voice_states.iter().find(|v| v.user_id == user_id)
    }

    /// Threads currently cached under the given parent channel.
    pub fn threads_in(&self, parent_id: ChannelId) -> impl Iterator<Item = &ChannelState> {
        self.threads
            .iter()
            .filter(move |t| t.parent_id == Some(parent_id))
    }

    /// The channel whose overwrites govern `id`: the channel itself,
    /// or the parent for a thread.
    pub fn permission_channel(&self, id: ChannelId) -> Option<&ChannelState> {
        let channel = self.channel_or_thread(id)?;
        if channel.is_thread() {
            return channel.parent_id.and_then(|parent| self.channel(parent));
        }
        Some(channel)
    }

    /// Permissions of a member holding `roles` in the given channel.
    ///
    /// With `channel_id == None` this is the guild-scope value. If the channel
    /// cannot be resolved the guild-scope value is still computed and returned
    /// inside `StateError::ChannelNotFound`.
    pub fn member_permissions(
        &self,
        channel_id: Option<ChannelId>,
        member_id: UserId,
        roles: &[RoleId],
    ) -> Result<Permissions, StateError> {
        let channel = channel_id.and_then(|id| self.permission_channel(id));
        let overwrites = channel.map(|c| c.permission_overwrites.as_slice()).unwrap_or(&[]);

        let perms = calculate_permissions(
            self.guild.id,
            self.guild.owner_id,
            &self.roles,
            overwrites,
            member_id,
            roles,
        );

        match channel_id {
            Some(id) if channel.is_none() => Err(StateError::ChannelNotFound {
                channel_id: id,
                guild_permissions: perms,
            }),
            _ => Ok(perms),
        }
    }

    /// Icon URL, optionally with a `size` query (a power of two).
    pub fn icon_url(&self, size: Option<u32>) -> Option<String> {
        let icon = self.guild.icon.as_deref()?;
        Some(cdn_url("icons", self.guild.id, icon, size))
    }

    pub fn banner_url(&self, size: Option<u32>) -> Option<String> {
        let banner = self.guild.banner.as_deref()?;
        Some(cdn_url("banners", self.guild.id, banner, size))
    }
}

fn cdn_url(kind: &str, guild_id: GuildId, hash: &str, size: Option<u32>) -> String {
    let ext = if hash.starts_with("a_") { "gif" } else { "png" };
    let mut url = format!("{CDN_URL}/{kind}/{guild_id}/{hash}.{ext}");
    if let Some(size) = size {
        url.push_str(&format!("?size={size}"));
    }
    url
}
