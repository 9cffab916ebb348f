use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use super::events::{
    Channel, ChannelId, GatewayEvent, Guild, GuildId, Member, Message, MessageUpdate, Presence,
    Ready, Role, RoleId, ThreadListSync, UnavailableGuild, UserId, VoiceState,
};
use super::member::MemberState;
use super::message::MessageState;
use super::messages::MessageStore;
use super::permissions::{apply_channel_permissions, calculate_base_permissions, can_view};
use super::snapshot::{ChannelState, GuildSnapshot, GuildState, sort_channels, sort_roles};

/// Shard owning a guild. The guild id's creation timestamp lives above bit 22.
pub fn shard_for_guild(guild_id: GuildId, total_shards: usize) -> usize {
    ((guild_id >> 22) % total_shards as u64) as usize
}

/// A member record plus the time it was last touched by an event.
#[derive(Debug, Clone)]
pub(crate) struct TrackedMember {
    pub last_updated: DateTime<Utc>,
    pub state: Arc<MemberState>,
}

impl TrackedMember {
    fn new(state: MemberState) -> Self {
        Self {
            last_updated: Utc::now(),
            state: Arc::new(state),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub guilds: usize,
    pub members: usize,
    pub messages: usize,
}

/// Everything one shard tracks. Only ever touched under the shard lock.
#[derive(Debug, Default)]
pub(crate) struct ShardState {
    pub shard_id: usize,
    pub bot_member_id: Option<UserId>,
    pub guilds: HashMap<GuildId, Arc<GuildSnapshot>>,
    pub members: HashMap<GuildId, HashMap<UserId, TrackedMember>>,
    pub messages: MessageStore,
}

impl ShardState {
    pub fn new(shard_id: usize, bot_member_id: Option<UserId>) -> Self {
        Self {
            shard_id,
            bot_member_id,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        self.guilds.clear();
        self.members.clear();
        self.messages.clear();
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            guilds: self.guilds.len(),
            members: self.members.values().map(HashMap::len).sum(),
            messages: self.messages.len(),
        }
    }

    pub fn apply(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Ready(ready) => self.handle_ready(ready),

            GatewayEvent::GuildCreate(guild) => self.handle_guild_create(guild),
            GatewayEvent::GuildUpdate(guild) => self.handle_guild_update(guild),
            GatewayEvent::GuildDelete(guild) => self.handle_guild_delete(guild),

            GatewayEvent::GuildMemberAdd(member) => self.handle_member_add(member),
            GatewayEvent::GuildMemberUpdate(member) => self.handle_member_update(member),
            GatewayEvent::GuildMemberRemove { guild_id, user } => {
                self.handle_member_remove(*guild_id, user.id)
            }

            GatewayEvent::ChannelCreate(channel) => {
                self.upsert_channel(channel);
            }
            GatewayEvent::ChannelUpdate(channel) => self.handle_channel_update(channel),
            GatewayEvent::ChannelDelete(channel) => self.handle_channel_delete(channel),

            GatewayEvent::GuildRoleCreate { guild_id, role } => {
                self.upsert_role(*guild_id, role);
            }
            GatewayEvent::GuildRoleUpdate { guild_id, role } => {
                self.handle_role_update(*guild_id, role)
            }
            GatewayEvent::GuildRoleDelete { guild_id, role_id } => {
                self.handle_role_delete(*guild_id, *role_id)
            }

            GatewayEvent::MessageCreate(msg) => self.handle_message_create(msg),
            GatewayEvent::MessageUpdate(update) => self.handle_message_update(update),
            GatewayEvent::MessageDelete { id, guild_id, .. } => {
                if guild_id.is_some() {
                    self.messages.mark_deleted(*id);
                }
            }
            GatewayEvent::MessageDeleteBulk { ids, guild_id, .. } => {
                if guild_id.is_some() {
                    for id in ids {
                        self.messages.mark_deleted(*id);
                    }
                }
            }

            GatewayEvent::ThreadCreate(thread) | GatewayEvent::ThreadUpdate(thread) => {
                self.handle_thread_upsert(thread)
            }
            GatewayEvent::ThreadDelete { id, guild_id, .. } => self.remove_thread(*guild_id, *id),
            GatewayEvent::ThreadListSync(sync) => self.handle_thread_list_sync(sync),

            GatewayEvent::PresenceUpdate(presence) => self.handle_presence_update(presence),
            GatewayEvent::VoiceStateUpdate(vs) => self.handle_voice_state_update(vs),

            GatewayEvent::GuildEmojisUpdate { guild_id, emojis } => {
                self.update_guild(*guild_id, |gs| gs.with_emojis(emojis.clone()));
            }
            GatewayEvent::GuildStickersUpdate { guild_id, stickers } => {
                self.update_guild(*guild_id, |gs| gs.with_stickers(stickers.clone()));
            }

            GatewayEvent::Unknown => {}
        }
    }

    /// Swap in a derived snapshot. Returns the new one, or `None` for an
    /// untracked guild.
    fn update_guild(
        &mut self,
        guild_id: GuildId,
        f: impl FnOnce(&GuildSnapshot) -> GuildSnapshot,
    ) -> Option<Arc<GuildSnapshot>> {
        let current = self.guilds.get_mut(&guild_id)?;
        let next = Arc::new(f(current));
        *current = Arc::clone(&next);
        Some(next)
    }

    fn is_tracked(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    // ── Guilds ──────────────────────────────────────────────────

    fn handle_ready(&mut self, ready: &Ready) {
        self.reset();
        for guild in &ready.guilds {
            let stub = GuildSnapshot::stub(GuildState::from_guild(guild));
            self.guilds.insert(guild.id, Arc::new(stub));
        }
        debug!(shard = self.shard_id, guilds = ready.guilds.len(), "Shard reset");
    }

    fn handle_guild_create(&mut self, guild: &Guild) {
        self.guilds
            .insert(guild.id, Arc::new(GuildSnapshot::from_guild(guild)));

        // Presences here carry partial users; only those with a member entry are loaded.
        let presences: HashMap<UserId, &Presence> =
            guild.presences.iter().map(|p| (p.user.id, p)).collect();

        for member in &guild.members {
            if let Some(presence) = presences.get(&member.user.id) {
                self.merge_presence(MemberState::from_presence(presence, guild.id), true);
            }
            self.upsert_member(MemberState::from_member(member, guild.id), false);
        }

        debug!(
            shard = self.shard_id,
            guild_id = guild.id,
            members = guild.members.len(),
            "Guild created"
        );
    }

    fn handle_guild_update(&mut self, guild: &Guild) {
        let mut state = GuildState::from_guild(guild);
        let next = match self.guilds.get(&guild.id) {
            Some(existing) => {
                state.member_count = existing.guild.member_count;
                existing.with_guild(state)
            }
            None => GuildSnapshot::stub(state),
        };
        self.guilds.insert(guild.id, Arc::new(next));
    }

    fn handle_guild_delete(&mut self, guild: &UnavailableGuild) {
        if guild.unavailable {
            self.update_guild(guild.id, |gs| {
                let mut state = GuildState::clone(&gs.guild);
                state.available = false;
                gs.with_guild(state)
            });
            return;
        }

        let messages = self.messages.remove_guild(guild.id);
        self.members.remove(&guild.id);
        self.guilds.remove(&guild.id);
        debug!(shard = self.shard_id, guild_id = guild.id, messages, "Guild removed");
    }

    // ── Channels ────────────────────────────────────────────────

    fn upsert_channel(&mut self, channel: &Channel) -> Option<Arc<GuildSnapshot>> {
        let guild_id = channel.guild_id?;
        let state = ChannelState::from_channel(channel, guild_id);
        self.update_guild(guild_id, |gs| {
            let mut channels = gs.channels.to_vec();
            match channels.iter_mut().find(|c| c.id == state.id) {
                Some(slot) => *slot = state,
                None => channels.push(state),
            }
            sort_channels(&mut channels);
            gs.with_channels(channels)
        })
    }

    fn handle_channel_update(&mut self, channel: &Channel) {
        if let Some(gs) = self.upsert_channel(channel) {
            self.update_channel_threads_access(gs.id(), channel.id);
        }
    }

    fn handle_channel_delete(&mut self, channel: &Channel) {
        let Some(guild_id) = channel.guild_id else {
            return;
        };
        self.messages.remove_channel(guild_id, channel.id);

        let Some(gs) = self.guilds.get(&guild_id).cloned() else {
            return;
        };

        let orphaned: Vec<ChannelId> = gs.threads_in(channel.id).map(|t| t.id).collect();
        if gs.channel(channel.id).is_none() && orphaned.is_empty() {
            return;
        }

        let channels = gs
            .channels
            .iter()
            .filter(|c| c.id != channel.id)
            .cloned()
            .collect();
        let mut next = gs.with_channels(channels);

        if !orphaned.is_empty() {
            for thread_id in &orphaned {
                self.messages.remove_channel(guild_id, *thread_id);
            }
            let threads = gs
                .threads
                .iter()
                .filter(|t| t.parent_id != Some(channel.id))
                .cloned()
                .collect();
            next = next.with_threads(threads);
        }

        self.guilds.insert(guild_id, Arc::new(next));
    }

    // ── Roles ───────────────────────────────────────────────────

    fn upsert_role(&mut self, guild_id: GuildId, role: &Role) -> Option<Arc<GuildSnapshot>> {
        self.update_guild(guild_id, |gs| {
            let mut roles = gs.roles.to_vec();
            match roles.iter_mut().find(|r| r.id == role.id) {
                Some(slot) => *slot = role.clone(),
                None => roles.push(role.clone()),
            }
            sort_roles(&mut roles);
            gs.with_roles(roles)
        })
    }

    fn handle_role_update(&mut self, guild_id: GuildId, role: &Role) {
        if self.upsert_role(guild_id, role).is_some() && self.bot_holds_role(guild_id, role.id) {
            self.update_all_threads_access(guild_id);
        }
    }

    fn handle_role_delete(&mut self, guild_id: GuildId, role_id: RoleId) {
        let Some(gs) = self.guilds.get(&guild_id) else {
            return;
        };
        if gs.role(role_id).is_none() {
            return;
        }

        let roles = gs.roles.iter().filter(|r| r.id != role_id).cloned().collect();
        let next = Arc::new(gs.with_roles(roles));
        self.guilds.insert(guild_id, next);

        if self.bot_holds_role(guild_id, role_id) {
            self.update_all_threads_access(guild_id);
        }
    }

    // ── Members ─────────────────────────────────────────────────

    fn handle_member_add(&mut self, member: &Member) {
        let Some(guild_id) = member.guild_id else {
            return;
        };
        if !self.is_tracked(guild_id) {
            return;
        }

        let known = self
            .members
            .get(&guild_id)
            .and_then(|m| m.get(&member.user.id))
            .is_some_and(|t| t.state.member.is_some());

        if !known {
            self.update_guild(guild_id, |gs| {
                let mut state = GuildState::clone(&gs.guild);
                state.member_count += 1;
                gs.with_guild(state)
            });
        }

        self.upsert_member(MemberState::from_member(member, guild_id), true);
    }

    fn handle_member_update(&mut self, member: &Member) {
        let Some(guild_id) = member.guild_id else {
            return;
        };
        if self.is_tracked(guild_id) {
            self.upsert_member(MemberState::from_member(member, guild_id), true);
        }
    }

    fn handle_member_remove(&mut self, guild_id: GuildId, user_id: UserId) {
        let updated = self.update_guild(guild_id, |gs| {
            let mut state = GuildState::clone(&gs.guild);
            state.member_count = state.member_count.saturating_sub(1);
            gs.with_guild(state)
        });
        if updated.is_none() {
            return;
        }

        if let Some(members) = self.members.get_mut(&guild_id) {
            members.remove(&user_id);
        }
    }

    /// Install the member half of a record, keeping any known presence.
    /// When the bot lost a role (or its member half is new) the thread
    /// cache is re-checked.
    fn upsert_member(&mut self, mut ms: MemberState, check_threads: bool) {
        let guild_id = ms.guild_id;
        let user_id = ms.user.id;
        let is_bot = self.bot_member_id == Some(user_id);

        let members = self.members.entry(guild_id).or_default();
        let access_may_shrink = match members.get(&user_id) {
            Some(previous) => {
                ms.presence = previous.state.presence.clone();
                is_bot
                    && match &previous.state.member {
                        None => true,
                        Some(old) => old.roles.iter().any(|r| !ms.roles().contains(r)),
                    }
            }
            None => is_bot,
        };
        members.insert(user_id, TrackedMember::new(ms));

        if check_threads && access_may_shrink {
            self.update_all_threads_access(guild_id);
        }
    }

    fn handle_presence_update(&mut self, presence: &Presence) {
        let Some(guild_id) = presence.guild_id else {
            return;
        };
        if self.is_tracked(guild_id) {
            self.merge_presence(MemberState::from_presence(presence, guild_id), false);
        }
    }

    /// Install the presence half of a record, keeping the member half. A new
    /// record needs a full user unless `trust_user` is set.
    fn merge_presence(&mut self, mut ms: MemberState, trust_user: bool) {
        let members = self.members.entry(ms.guild_id).or_default();
        match members.get(&ms.user.id) {
            Some(previous) => {
                ms.member = previous.state.member.clone();
                if ms.user.username.is_empty() {
                    ms.user = previous.state.user.clone();
                }
            }
            None if !trust_user && ms.user.username.is_empty() => return,
            None => {}
        }
        members.insert(ms.user.id, TrackedMember::new(ms));
    }

    pub fn set_member(&mut self, ms: MemberState) {
        self.members
            .entry(ms.guild_id)
            .or_default()
            .insert(ms.user.id, TrackedMember::new(ms));
    }

    // ── Messages ────────────────────────────────────────────────

    fn handle_message_create(&mut self, msg: &Message) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        if self.is_tracked(guild_id) {
            self.messages.insert(MessageState::from_message(msg, guild_id));
        }
    }

    fn handle_message_update(&mut self, update: &MessageUpdate) {
        if update.guild_id.is_none() {
            return;
        }
        self.messages.modify(update.id, |m| m.apply_update(update));
    }

    // ── Voice ───────────────────────────────────────────────────

    fn handle_voice_state_update(&mut self, vs: &VoiceState) {
        let Some(guild_id) = vs.guild_id else {
            return;
        };
        let Some(gs) = self.guilds.get(&guild_id) else {
            return;
        };

        let existing = gs.voice_states.iter().position(|v| v.user_id == vs.user_id);
        let mut states = gs.voice_states.to_vec();
        match (existing, vs.channel_id) {
            (Some(i), None) => {
                states.remove(i);
            }
            (Some(i), Some(_)) => states[i] = vs.clone(),
            (None, Some(_)) => states.push(vs.clone()),
            (None, None) => return,
        }

        let next = Arc::new(gs.with_voice_states(states));
        self.guilds.insert(guild_id, next);
    }

    // ── Threads ─────────────────────────────────────────────────

    fn handle_thread_upsert(&mut self, channel: &Channel) {
        let Some(guild_id) = channel.guild_id else {
            return;
        };

        let thread = ChannelState::from_channel(channel, guild_id);
        if thread.is_archived() {
            self.remove_thread(guild_id, thread.id);
            return;
        }

        let parent_id = thread.parent_id;
        let installed = self.update_guild(guild_id, |gs| {
            let mut threads = gs.threads.to_vec();
            match threads.iter_mut().find(|t| t.id == thread.id) {
                Some(slot) => *slot = thread,
                None => threads.push(thread),
            }
            gs.with_threads(threads)
        });

        if installed.is_some()
            && let Some(parent_id) = parent_id
        {
            self.update_channel_threads_access(guild_id, parent_id);
        }
    }

    fn remove_thread(&mut self, guild_id: GuildId, thread_id: ChannelId) {
        self.messages.remove_channel(guild_id, thread_id);

        let Some(gs) = self.guilds.get(&guild_id) else {
            return;
        };
        if gs.thread(thread_id).is_none() {
            return;
        }

        let threads = gs
            .threads
            .iter()
            .filter(|t| t.id != thread_id)
            .cloned()
            .collect();
        let next = Arc::new(gs.with_threads(threads));
        self.guilds.insert(guild_id, next);
    }

    /// Replace the threads of the synced parents with exactly the synced set.
    /// An empty parent list covers the whole guild.
    fn handle_thread_list_sync(&mut self, sync: &ThreadListSync) {
        let Some(gs) = self.guilds.get(&sync.guild_id).cloned() else {
            return;
        };

        let covered = |t: &ChannelState| {
            sync.channel_ids.is_empty()
                || t.parent_id.is_some_and(|p| sync.channel_ids.contains(&p))
        };

        let mut seen = HashSet::new();
        let fresh: Vec<ChannelState> = sync
            .threads
            .iter()
            .map(|c| ChannelState::from_channel(c, sync.guild_id))
            .filter(|t| !t.is_archived() && seen.insert(t.id))
            .collect();

        let mut threads: Vec<ChannelState> = Vec::with_capacity(gs.threads.len() + fresh.len());
        for old in gs.threads.iter() {
            if !covered(old) && !seen.contains(&old.id) {
                threads.push(old.clone());
            } else if !seen.contains(&old.id) {
                self.messages.remove_channel(sync.guild_id, old.id);
            }
        }
        threads.extend(fresh);

        self.guilds
            .insert(sync.guild_id, Arc::new(gs.with_threads(threads)));
        self.update_all_threads_access(sync.guild_id);
    }

    // ── Thread access cascade ───────────────────────────────────

    fn bot_membership(&self, guild_id: GuildId) -> Option<(UserId, Vec<RoleId>)> {
        let bot = self.bot_member_id?;
        let tracked = self.members.get(&guild_id)?.get(&bot)?;
        let fields = tracked.state.member.as_ref()?;
        Some((bot, fields.roles.clone()))
    }

    /// Every member implicitly holds `@everyone`, whose id is the guild id.
    fn bot_holds_role(&self, guild_id: GuildId, role_id: RoleId) -> bool {
        self.bot_membership(guild_id)
            .is_some_and(|(_, roles)| role_id == guild_id || roles.contains(&role_id))
    }

    /// Drop every cached thread whose parent the bot can no longer view
    /// (or which has no cached parent at all).
    fn update_all_threads_access(&mut self, guild_id: GuildId) {
        let Some((bot, roles)) = self.bot_membership(guild_id) else {
            return;
        };
        let Some(gs) = self.guilds.get(&guild_id).cloned() else {
            return;
        };

        let base =
            calculate_base_permissions(gs.id(), gs.guild.owner_id, &gs.roles, bot, &roles);

        let mut visible: HashMap<Option<ChannelId>, bool> = HashMap::new();
        for thread in gs.threads.iter() {
            visible.entry(thread.parent_id).or_insert_with(|| {
                thread
                    .parent_id
                    .and_then(|p| gs.channel(p))
                    .is_some_and(|parent| {
                        can_view(apply_channel_permissions(
                            base,
                            gs.id(),
                            &parent.permission_overwrites,
                            bot,
                            &roles,
                        ))
                    })
            });
        }

        if visible.values().all(|v| *v) {
            return;
        }
        self.drop_threads(&gs, |t| !visible[&t.parent_id]);
    }

    /// Re-check one channel after it changed.
    fn update_channel_threads_access(&mut self, guild_id: GuildId, channel_id: ChannelId) {
        let Some(gs) = self.guilds.get(&guild_id).cloned() else {
            return;
        };
        if gs.threads_in(channel_id).next().is_none() {
            return;
        }
        let Some((bot, roles)) = self.bot_membership(guild_id) else {
            return;
        };
        let Some(channel) = gs.channel(channel_id) else {
            return;
        };

        let base =
            calculate_base_permissions(gs.id(), gs.guild.owner_id, &gs.roles, bot, &roles);
        let perms =
            apply_channel_permissions(base, gs.id(), &channel.permission_overwrites, bot, &roles);
        if can_view(perms) {
            return;
        }
        self.drop_threads(&gs, |t| t.parent_id == Some(channel_id));
    }

    fn drop_threads(&mut self, gs: &GuildSnapshot, should_drop: impl Fn(&ChannelState) -> bool) {
        let (dropped, kept): (Vec<ChannelState>, Vec<ChannelState>) =
            gs.threads.iter().cloned().partition(|t| should_drop(t));

        for thread in &dropped {
            self.messages.remove_channel(gs.id(), thread.id);
        }
        debug!(
            shard = self.shard_id,
            guild_id = gs.id(),
            dropped = dropped.len(),
            "Dropped threads the bot can no longer view"
        );
        self.guilds.insert(gs.id(), Arc::new(gs.with_threads(kept)));
    }
}

/// One logical shard: its state behind a single reader/writer lock.
#[derive(Debug)]
pub struct Shard {
    id: usize,
    state: RwLock<ShardState>,
}

impl Shard {
    pub fn new(id: usize, bot_member_id: Option<UserId>) -> Self {
        Self {
            id,
            state: RwLock::new(ShardState::new(id, bot_member_id)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle_event(&self, event: &GatewayEvent) {
        self.state.write().apply(event);
    }

    pub fn stats(&self) -> ShardStats {
        self.state.read().stats()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ShardState> {
        self.state.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ShardState> {
        self.state.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{
        ChannelType, OverwriteType, PermissionOverwrite, ThreadMetadata, User,
    };
    use crate::engine::permissions::Permissions;

    const GUILD: GuildId = 1;
    const CHANNEL: ChannelId = 10;
    const ROLE: RoleId = 100;
    const BOT: UserId = 1000;
    const THREAD: ChannelId = 10000;

    fn user(id: UserId) -> User {
        User {
            id,
            username: format!("user{id}"),
            ..Default::default()
        }
    }

    fn member(id: UserId, roles: Vec<RoleId>) -> Member {
        Member {
            guild_id: Some(GUILD),
            user: user(id),
            roles,
            ..Default::default()
        }
    }

    fn thread(id: ChannelId, parent: ChannelId) -> Channel {
        Channel {
            id,
            guild_id: Some(GUILD),
            kind: ChannelType::PublicThread,
            parent_id: Some(parent),
            thread_metadata: Some(ThreadMetadata::default()),
            ..Default::default()
        }
    }

    fn guild() -> Guild {
        Guild {
            id: GUILD,
            name: "guild".into(),
            member_count: 1,
            roles: vec![
                Role {
                    id: GUILD,
                    ..Default::default()
                },
                Role {
                    id: ROLE,
                    permissions: Permissions::VIEW_CHANNEL,
                    ..Default::default()
                },
            ],
            channels: vec![Channel {
                id: CHANNEL,
                guild_id: Some(GUILD),
                ..Default::default()
            }],
            threads: vec![thread(THREAD, CHANNEL)],
            members: vec![member(BOT, vec![ROLE])],
            ..Default::default()
        }
    }

    fn shard() -> ShardState {
        let mut state = ShardState::new(0, Some(BOT));
        state.apply(&GatewayEvent::GuildCreate(guild()));
        state
    }

    fn snapshot(state: &ShardState) -> Arc<GuildSnapshot> {
        Arc::clone(&state.guilds[&GUILD])
    }

    #[test]
    fn test_shard_for_guild() {
        assert_eq!(shard_for_guild(0, 4), 0);
        assert_eq!(shard_for_guild(5 << 22, 4), 1);
        assert_eq!(shard_for_guild((5 << 22) | 0x3f_ffff, 4), 1);
        assert_eq!(shard_for_guild(41771983423143937, 1), 0);
    }

    #[test]
    fn test_member_counting() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildMemberAdd(member(2, vec![])));
        assert_eq!(snapshot(&state).guild.member_count, 2);

        // Redelivered add is an update.
        state.apply(&GatewayEvent::GuildMemberAdd(member(2, vec![])));
        assert_eq!(snapshot(&state).guild.member_count, 2);

        for _ in 0..3 {
            state.apply(&GatewayEvent::GuildMemberRemove {
                guild_id: GUILD,
                user: user(2),
            });
        }
        assert_eq!(snapshot(&state).guild.member_count, 0);
        assert!(!state.members[&GUILD].contains_key(&2));
    }

    #[test]
    fn test_presence_keeps_member_half() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildMemberAdd(member(2, vec![ROLE])));
        state.apply(&GatewayEvent::PresenceUpdate(Presence {
            user: User {
                id: 2,
                ..Default::default()
            },
            guild_id: Some(GUILD),
            status: "online".into(),
            activities: vec![],
        }));

        let tracked = &state.members[&GUILD][&2];
        assert_eq!(tracked.state.roles(), &[ROLE]);
        assert_eq!(tracked.state.user.username, "user2");
        assert!(tracked.state.presence.is_some());

        // And the other way around.
        state.apply(&GatewayEvent::GuildMemberUpdate(member(2, vec![])));
        let tracked = &state.members[&GUILD][&2];
        assert!(tracked.state.roles().is_empty());
        assert!(tracked.state.presence.is_some());
    }

    #[test]
    fn test_presence_for_unknown_user_needs_username() {
        let mut state = shard();
        state.apply(&GatewayEvent::PresenceUpdate(Presence {
            user: User {
                id: 3,
                ..Default::default()
            },
            guild_id: Some(GUILD),
            status: "online".into(),
            activities: vec![],
        }));
        assert!(!state.members[&GUILD].contains_key(&3));

        state.apply(&GatewayEvent::PresenceUpdate(Presence {
            user: user(3),
            guild_id: Some(GUILD),
            status: "online".into(),
            activities: vec![],
        }));
        let tracked = &state.members[&GUILD][&3];
        assert!(tracked.state.member.is_none());
    }

    #[test]
    fn test_guild_create_loads_matching_presences_only() {
        let mut g = guild();
        g.presences = vec![
            Presence {
                user: User {
                    id: BOT,
                    ..Default::default()
                },
                status: "online".into(),
                ..Default::default()
            },
            Presence {
                user: User {
                    id: 77,
                    ..Default::default()
                },
                status: "online".into(),
                ..Default::default()
            },
        ];
        let mut state = ShardState::new(0, Some(BOT));
        state.apply(&GatewayEvent::GuildCreate(g));

        let members = &state.members[&GUILD];
        assert_eq!(members.len(), 1);
        assert!(members[&BOT].state.presence.is_some());
        assert!(members[&BOT].state.member.is_some());
    }

    #[test]
    fn test_channel_update_drops_threads() {
        let mut state = shard();
        assert!(snapshot(&state).thread(THREAD).is_some());

        state.apply(&GatewayEvent::ChannelUpdate(Channel {
            id: CHANNEL,
            guild_id: Some(GUILD),
            permission_overwrites: vec![PermissionOverwrite {
                id: ROLE,
                kind: OverwriteType::Role,
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
            }],
            ..Default::default()
        }));
        assert!(snapshot(&state).thread(THREAD).is_none());
    }

    #[test]
    fn test_role_update_drops_threads() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildRoleUpdate {
            guild_id: GUILD,
            role: Role {
                id: ROLE,
                ..Default::default()
            },
        });
        assert!(snapshot(&state).threads.is_empty());
    }

    #[test]
    fn test_unrelated_role_update_keeps_threads() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildRoleCreate {
            guild_id: GUILD,
            role: Role {
                id: 200,
                position: 3,
                ..Default::default()
            },
        });
        state.apply(&GatewayEvent::GuildRoleUpdate {
            guild_id: GUILD,
            role: Role {
                id: 200,
                position: 4,
                ..Default::default()
            },
        });
        let gs = snapshot(&state);
        assert_eq!(gs.threads.len(), 1);
        assert_eq!(gs.roles[0].id, 200);
        assert_eq!(gs.roles.len(), 3);
    }

    #[test]
    fn test_bot_losing_role_drops_threads() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildMemberUpdate(member(BOT, vec![])));
        assert!(snapshot(&state).threads.is_empty());
    }

    #[test]
    fn test_everyone_role_update_drops_threads() {
        let mut g = guild();
        g.roles = vec![Role {
            id: GUILD,
            permissions: Permissions::VIEW_CHANNEL,
            ..Default::default()
        }];
        g.members = vec![member(BOT, vec![])];
        let mut state = ShardState::new(0, Some(BOT));
        state.apply(&GatewayEvent::GuildCreate(g));
        assert!(snapshot(&state).thread(THREAD).is_some());

        state.apply(&GatewayEvent::GuildRoleUpdate {
            guild_id: GUILD,
            role: Role {
                id: GUILD,
                ..Default::default()
            },
        });
        assert!(snapshot(&state).thread(THREAD).is_none());
    }

    #[test]
    fn test_thread_in_hidden_parent_is_not_cached() {
        let mut state = shard();
        state.apply(&GatewayEvent::ChannelCreate(Channel {
            id: 20,
            guild_id: Some(GUILD),
            permission_overwrites: vec![PermissionOverwrite {
                id: BOT,
                kind: OverwriteType::Member,
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
            }],
            ..Default::default()
        }));

        state.apply(&GatewayEvent::ThreadCreate(thread(20001, 20)));
        assert!(snapshot(&state).thread(20001).is_none());

        state.apply(&GatewayEvent::ThreadListSync(ThreadListSync {
            guild_id: GUILD,
            channel_ids: vec![],
            threads: vec![thread(20002, 20), thread(10002, CHANNEL)],
        }));
        let gs = snapshot(&state);
        assert!(gs.thread(20002).is_none());
        assert!(gs.thread(10002).is_some());
    }

    #[test]
    fn test_role_delete() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildRoleDelete {
            guild_id: GUILD,
            role_id: ROLE,
        });
        let gs = snapshot(&state);
        assert!(gs.role(ROLE).is_none());
        assert!(gs.threads.is_empty());
    }

    #[test]
    fn test_channel_delete_cascades() {
        let mut state = shard();
        for (id, channel_id) in [(1, CHANNEL), (2, THREAD)] {
            state.apply(&GatewayEvent::MessageCreate(Message {
                id,
                channel_id,
                guild_id: Some(GUILD),
                ..Default::default()
            }));
        }
        assert_eq!(state.messages.len(), 2);

        state.apply(&GatewayEvent::ChannelDelete(Channel {
            id: CHANNEL,
            guild_id: Some(GUILD),
            ..Default::default()
        }));
        let gs = snapshot(&state);
        assert!(gs.channels.is_empty());
        assert!(gs.threads.is_empty());
        assert!(state.messages.is_empty());
        assert_eq!(state.messages.guild_len(GUILD), 0);
    }

    #[test]
    fn test_archived_thread_is_removed() {
        let mut state = shard();
        let mut archived = thread(THREAD, CHANNEL);
        archived.thread_metadata = Some(ThreadMetadata {
            archived: true,
            ..Default::default()
        });
        state.apply(&GatewayEvent::ThreadUpdate(archived.clone()));
        assert!(snapshot(&state).threads.is_empty());

        // Creating an archived thread does not cache it either.
        state.apply(&GatewayEvent::ThreadCreate(archived));
        assert!(snapshot(&state).threads.is_empty());
    }

    #[test]
    fn test_thread_list_sync_replaces_synced_parents() {
        let mut state = shard();
        state.apply(&GatewayEvent::ChannelCreate(Channel {
            id: 20,
            guild_id: Some(GUILD),
            ..Default::default()
        }));
        state.apply(&GatewayEvent::ThreadCreate(thread(20001, 20)));
        state.apply(&GatewayEvent::ThreadCreate(thread(10001, CHANNEL)));

        state.apply(&GatewayEvent::ThreadListSync(ThreadListSync {
            guild_id: GUILD,
            channel_ids: vec![CHANNEL],
            threads: vec![
                thread(10002, CHANNEL),
                thread(10002, CHANNEL),
                thread(THREAD, CHANNEL),
            ],
        }));

        let gs = snapshot(&state);
        let mut ids: Vec<_> = gs.threads.iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec![THREAD, 10002, 20001]);

        state.apply(&GatewayEvent::ThreadListSync(ThreadListSync {
            guild_id: GUILD,
            channel_ids: vec![],
            threads: vec![thread(20002, 20)],
        }));
        let ids: Vec<_> = snapshot(&state).threads.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![20002]);
    }

    #[test]
    fn test_voice_states() {
        let mut state = shard();
        let join = VoiceState {
            guild_id: Some(GUILD),
            channel_id: Some(CHANNEL),
            user_id: 2,
            ..Default::default()
        };
        state.apply(&GatewayEvent::VoiceStateUpdate(join.clone()));
        assert_eq!(snapshot(&state).voice_states.len(), 1);

        state.apply(&GatewayEvent::VoiceStateUpdate(VoiceState {
            self_mute: true,
            ..join.clone()
        }));
        let gs = snapshot(&state);
        assert_eq!(gs.voice_states.len(), 1);
        assert!(gs.voice_state(2).unwrap().self_mute);

        state.apply(&GatewayEvent::VoiceStateUpdate(VoiceState {
            channel_id: None,
            ..join
        }));
        assert!(snapshot(&state).voice_states.is_empty());
    }

    #[test]
    fn test_guild_delete() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildDelete(UnavailableGuild {
            id: GUILD,
            unavailable: true,
        }));
        let gs = snapshot(&state);
        assert!(!gs.guild.available);
        assert_eq!(gs.channels.len(), 1);

        state.apply(&GatewayEvent::GuildDelete(UnavailableGuild {
            id: GUILD,
            unavailable: false,
        }));
        assert!(state.guilds.is_empty());
        assert!(state.members.is_empty());
    }

    #[test]
    fn test_guild_update_keeps_member_count() {
        let mut state = shard();
        state.apply(&GatewayEvent::GuildMemberAdd(member(2, vec![])));

        let mut updated = guild();
        updated.name = "renamed".into();
        updated.member_count = 0;
        state.apply(&GatewayEvent::GuildUpdate(updated));

        let gs = snapshot(&state);
        assert_eq!(gs.guild.name, "renamed");
        assert_eq!(gs.guild.member_count, 2);
        assert_eq!(gs.channels.len(), 1);
    }

    #[test]
    fn test_ready_resets() {
        let mut state = shard();
        state.apply(&GatewayEvent::Ready(Ready {
            guilds: vec![Guild {
                id: 5,
                unavailable: true,
                ..Default::default()
            }],
            ..Default::default()
        }));
        assert!(!state.guilds.contains_key(&GUILD));
        assert!(state.members.is_empty());
        assert!(!state.guilds[&5].guild.available);
    }

    #[test]
    fn test_message_update_for_uncached_is_ignored() {
        let mut state = shard();
        state.apply(&GatewayEvent::MessageUpdate(MessageUpdate {
            id: 9,
            channel_id: CHANNEL,
            guild_id: Some(GUILD),
            content: Some("edit".into()),
            ..Default::default()
        }));
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_dm_messages_are_ignored() {
        let mut state = shard();
        state.apply(&GatewayEvent::MessageCreate(Message {
            id: 1,
            channel_id: 99,
            ..Default::default()
        }));
        assert!(state.messages.is_empty());
    }
}
