use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::events::{GuildId, OverwriteType, PermissionOverwrite, Role, RoleId, UserId};

bitflags! {
    /// Permission bitfield for roles and channel overwrites.
    /// Bit positions match the gateway protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        // ── Guild ──
        const CREATE_INSTANT_INVITE    = 1 << 0;
        const KICK_MEMBERS             = 1 << 1;
        const BAN_MEMBERS              = 1 << 2;
        const ADMINISTRATOR            = 1 << 3;
        const MANAGE_CHANNELS          = 1 << 4;
        const MANAGE_GUILD             = 1 << 5;
        const ADD_REACTIONS            = 1 << 6;
        const VIEW_AUDIT_LOG           = 1 << 7;
        const PRIORITY_SPEAKER         = 1 << 8;
        const STREAM                   = 1 << 9;

        // ── Channel text ──
        const VIEW_CHANNEL             = 1 << 10;
        const SEND_MESSAGES            = 1 << 11;
        const SEND_TTS_MESSAGES        = 1 << 12;
        const MANAGE_MESSAGES          = 1 << 13;
        const EMBED_LINKS              = 1 << 14;
        const ATTACH_FILES             = 1 << 15;
        const READ_MESSAGE_HISTORY     = 1 << 16;
        const MENTION_EVERYONE         = 1 << 17;
        const USE_EXTERNAL_EMOJIS      = 1 << 18;
        const VIEW_GUILD_INSIGHTS      = 1 << 19;

        // ── Voice ──
        const CONNECT                  = 1 << 20;
        const SPEAK                    = 1 << 21;
        const MUTE_MEMBERS             = 1 << 22;
        const DEAFEN_MEMBERS           = 1 << 23;
        const MOVE_MEMBERS             = 1 << 24;
        const USE_VAD                  = 1 << 25;

        // ── Membership & management ──
        const CHANGE_NICKNAME          = 1 << 26;
        const MANAGE_NICKNAMES         = 1 << 27;
        const MANAGE_ROLES             = 1 << 28;
        const MANAGE_WEBHOOKS          = 1 << 29;
        const MANAGE_GUILD_EXPRESSIONS = 1 << 30;
        const USE_APPLICATION_COMMANDS = 1 << 31;
        const REQUEST_TO_SPEAK         = 1 << 32;
        const MANAGE_EVENTS            = 1 << 33;

        // ── Threads ──
        const MANAGE_THREADS           = 1 << 34;
        const CREATE_PUBLIC_THREADS    = 1 << 35;
        const CREATE_PRIVATE_THREADS   = 1 << 36;
        const USE_EXTERNAL_STICKERS    = 1 << 37;
        const SEND_MESSAGES_IN_THREADS = 1 << 38;
        const USE_EMBEDDED_ACTIVITIES  = 1 << 39;
        const MODERATE_MEMBERS         = 1 << 40;
    }
}

/// Guild-scope permissions that a channel overwrite can never grant or revoke.
/// The gateway does not validate overwrite bits, so they are masked here.
pub const CHANNEL_PERMS_MASK: Permissions = Permissions::all().difference(
    Permissions::ADMINISTRATOR
        .union(Permissions::MANAGE_GUILD)
        .union(Permissions::CHANGE_NICKNAME)
        .union(Permissions::MANAGE_ROLES)
        .union(Permissions::KICK_MEMBERS)
        .union(Permissions::BAN_MEMBERS),
);

impl Default for Permissions {
    fn default() -> Self {
        Self::empty()
    }
}

// Overwrites and roles carry raw integers on the wire; unknown bits are dropped.
impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Permissions::from_bits_truncate(bits))
    }
}

/// Compute a member's full permissions in a channel.
///
/// `overwrites` should be the channel's overwrites; for threads pass the
/// parent channel's. An empty slice yields guild-scope permissions.
pub fn calculate_permissions(
    guild_id: GuildId,
    owner_id: UserId,
    guild_roles: &[Role],
    overwrites: &[PermissionOverwrite],
    member_id: UserId,
    member_roles: &[RoleId],
) -> Permissions {
    let perms =
        calculate_base_permissions(guild_id, owner_id, guild_roles, member_id, member_roles);
    apply_channel_permissions(perms, guild_id, overwrites, member_id, member_roles)
}

/// Guild-scope permissions, excluding channel overwrites.
///
/// Algorithm:
///   1. Guild owner gets all permissions unconditionally.
///   2. Start with the `@everyone` role (its id equals the guild id).
///   3. OR in every role the member holds.
///   4. If ADMINISTRATOR is set, return all permissions.
pub fn calculate_base_permissions(
    guild_id: GuildId,
    owner_id: UserId,
    guild_roles: &[Role],
    member_id: UserId,
    member_roles: &[RoleId],
) -> Permissions {
    if owner_id == member_id {
        return Permissions::all();
    }

    let mut perms = Permissions::empty();
    if let Some(everyone) = guild_roles.iter().find(|r| r.id == guild_id) {
        perms |= everyone.permissions;
    }

    for role in guild_roles {
        if member_roles.contains(&role.id) {
            perms |= role.permissions;
        }
    }

    // Administrator bypasses channel overwrites
    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    perms
}

/// Apply channel overwrites on top of guild-scope permissions.
///
/// Order: `@everyone` overwrite, then the union of matching role overwrites
/// (deny first, then allow), then the member overwrite, which wins.
pub fn apply_channel_permissions(
    perms: Permissions,
    guild_id: GuildId,
    overwrites: &[PermissionOverwrite],
    member_id: UserId,
    member_roles: &[RoleId],
) -> Permissions {
    if overwrites.is_empty() {
        return perms;
    }

    // Owner or administrator, overwrites don't apply
    if perms == Permissions::all() {
        return perms;
    }

    let mut perms = perms;

    if let Some(everyone) = overwrites.iter().find(|ov| ov.id == guild_id) {
        perms &= !(everyone.deny & CHANNEL_PERMS_MASK);
        perms |= everyone.allow & CHANNEL_PERMS_MASK;
    }

    let mut role_allow = Permissions::empty();
    let mut role_deny = Permissions::empty();
    for ov in overwrites {
        if ov.kind == OverwriteType::Role && member_roles.contains(&ov.id) {
            role_deny |= ov.deny & CHANNEL_PERMS_MASK;
            role_allow |= ov.allow & CHANNEL_PERMS_MASK;
        }
    }
    perms &= !role_deny;
    perms |= role_allow;

    if let Some(member) = overwrites
        .iter()
        .find(|ov| ov.kind == OverwriteType::Member && ov.id == member_id)
    {
        perms &= !(member.deny & CHANNEL_PERMS_MASK);
        perms |= member.allow & CHANNEL_PERMS_MASK;
    }

    perms
}

/// Whether the given permissions allow viewing a channel. Administrators always can.
pub fn can_view(perms: Permissions) -> bool {
    perms.contains(Permissions::ADMINISTRATOR) || perms.contains(Permissions::VIEW_CHANNEL)
}
