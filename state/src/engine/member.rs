use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::{ACTIVITY_STREAMING, Activity, GuildId, Member, Presence, RoleId, User, UserId};

/// Guild-specific half of a member record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberFields {
    pub roles: Vec<RoleId>,
    pub nick: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub premium_since: Option<DateTime<Utc>>,
    pub pending: bool,
    pub flags: u64,
    pub communication_disabled_until: Option<DateTime<Utc>>,
}

impl From<&Member> for MemberFields {
    fn from(m: &Member) -> Self {
        Self {
            roles: m.roles.clone(),
            nick: m.nick.clone(),
            avatar: m.avatar.clone(),
            banner: m.banner.clone(),
            joined_at: m.joined_at,
            premium_since: m.premium_since,
            pending: m.pending,
            flags: m.flags,
            communication_disabled_until: m.communication_disabled_until,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    NotSet,
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

impl PresenceStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "idle" => Self::Idle,
            "dnd" => Self::Dnd,
            "invisible" => Self::Invisible,
            "offline" => Self::Offline,
            _ => Self::NotSet,
        }
    }

    /// Online, idle and do-not-disturb count as connected.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Online | Self::Idle | Self::Dnd)
    }
}

/// The one activity kept per presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightGame {
    pub name: String,
    pub kind: u8,
    pub url: Option<String>,
    pub details: Option<String>,
    pub state: Option<String>,
}

impl From<&Activity> for LightGame {
    fn from(a: &Activity) -> Self {
        Self {
            name: a.name.clone(),
            kind: a.kind,
            url: a.url.clone(),
            details: a.details.clone(),
            state: a.state.clone(),
        }
    }
}

/// Presence half of a member record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceFields {
    pub status: PresenceStatus,
    pub game: Option<LightGame>,
}

impl From<&Presence> for PresenceFields {
    fn from(p: &Presence) -> Self {
        // A stream wins over whatever is listed first.
        let main = p
            .activities
            .iter()
            .find(|a| a.kind == ACTIVITY_STREAMING)
            .or_else(|| p.activities.first());

        Self {
            status: PresenceStatus::parse(&p.status),
            game: main.map(LightGame::from),
        }
    }
}

/// A cached guild member. Either half may be missing: a member can be known
/// only through a presence, or only through a member event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberState {
    pub guild_id: GuildId,
    pub user: User,
    pub member: Option<MemberFields>,
    pub presence: Option<PresenceFields>,
}

impl MemberState {
    pub fn from_member(m: &Member, guild_id: GuildId) -> Self {
        Self {
            guild_id,
            user: m.user.clone(),
            member: Some(MemberFields::from(m)),
            presence: None,
        }
    }

    pub fn from_presence(p: &Presence, guild_id: GuildId) -> Self {
        Self {
            guild_id,
            user: p.user.clone(),
            member: None,
            presence: Some(PresenceFields::from(p)),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Held roles, empty when only the presence half is known.
    pub fn roles(&self) -> &[RoleId] {
        self.member.as_ref().map(|m| m.roles.as_slice()).unwrap_or(&[])
    }

    pub fn status(&self) -> PresenceStatus {
        self.presence.as_ref().map(|p| p.status).unwrap_or_default()
    }

    /// Nickname, then global name, then username.
    pub fn display_name(&self) -> &str {
        if let Some(nick) = self.member.as_ref().and_then(|m| m.nick.as_deref()) {
            return nick;
        }
        self.user.global_name.as_deref().unwrap_or(&self.user.username)
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.user.id)
    }
}
