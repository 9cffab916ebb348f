use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::events::{ChannelId, GatewayEvent, GuildId, RoleId, UserId};
use super::gc::{MessageLimits, spawn_gc_tasks};
use super::member::MemberState;
use super::message::{MessageState, MessagesQuery};
use super::permissions::Permissions;
use super::shard::{Shard, ShardStats, shard_for_guild};
use super::snapshot::GuildSnapshot;
use crate::error::StateError;

/// Computes message limits for one guild. Called once per GC sweep, outside
/// any shard lock.
pub type MessageLimitsFn = Arc<dyn Fn(GuildId) -> MessageLimits + Send + Sync>;

/// Runtime settings for the tracker.
#[derive(Clone, Default)]
pub struct TrackerConfig {
    pub channel_message_len: Option<usize>,
    pub channel_message_age: Option<Duration>,
    /// Overrides the two static limits above when set.
    pub channel_message_limits: Option<MessageLimitsFn>,
    pub remove_offline_members_after: Option<Duration>,
    /// The bot's own user id. Never evicted, and drives the thread cache.
    pub bot_member_id: Option<UserId>,
}

impl TrackerConfig {
    pub fn message_limits(&self, guild_id: GuildId) -> MessageLimits {
        match &self.channel_message_limits {
            Some(f) => f(guild_id),
            None => MessageLimits {
                max_len: self.channel_message_len,
                max_age: self.channel_message_age,
            },
        }
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("channel_message_len", &self.channel_message_len)
            .field("channel_message_age", &self.channel_message_age)
            .field(
                "channel_message_limits",
                &self.channel_message_limits.as_ref().map(|_| "<fn>"),
            )
            .field(
                "remove_offline_members_after",
                &self.remove_offline_members_after,
            )
            .field("bot_member_id", &self.bot_member_id)
            .finish()
    }
}

/// Permissions resolved through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPermissions {
    pub permissions: Permissions,
    /// False when a channel was asked for but is not cached. `permissions`
    /// is then the guild-scope value.
    pub channel_found: bool,
}

impl From<Result<Permissions, StateError>> for ResolvedPermissions {
    fn from(result: Result<Permissions, StateError>) -> Self {
        match result {
            Ok(permissions) => Self {
                permissions,
                channel_found: true,
            },
            Err(err) => Self {
                permissions: err.guild_permissions().unwrap_or_default(),
                channel_found: false,
            },
        }
    }
}

/// Sharded in-memory view of every guild the bot is connected to.
///
/// Events go in through [`handle_event`](Self::handle_event) on the shard
/// they arrived on. Reads locate the owning shard from the guild id, clone
/// an `Arc` under that shard's read lock, and return it; nothing handed out
/// is ever mutated afterwards.
#[derive(Debug)]
pub struct InMemoryTracker {
    config: TrackerConfig,
    shards: Vec<Shard>,
}

impl InMemoryTracker {
    /// # Panics
    /// When `total_shards` is zero.
    pub fn new(config: TrackerConfig, total_shards: usize) -> Self {
        assert!(total_shards > 0, "tracker needs at least one shard");
        let shards = (0..total_shards)
            .map(|id| Shard::new(id, config.bot_member_id))
            .collect();
        Self { config, shards }
    }

    pub fn total_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// # Panics
    /// When `shard_id` is out of range.
    pub fn shard(&self, shard_id: usize) -> &Shard {
        match self.shards.get(shard_id) {
            Some(shard) => shard,
            None => panic!(
                "shard id {shard_id} out of range (total shards: {})",
                self.shards.len()
            ),
        }
    }

    fn guild_shard(&self, guild_id: GuildId) -> &Shard {
        &self.shards[shard_for_guild(guild_id, self.shards.len())]
    }

    /// The shard that owns the event's guild, or `None` for events that are
    /// not guild-scoped.
    pub fn owning_shard(&self, event: &GatewayEvent) -> Option<usize> {
        event
            .guild_id()
            .map(|guild_id| shard_for_guild(guild_id, self.shards.len()))
    }

    pub fn handle_event(&self, shard_id: usize, event: &GatewayEvent) {
        self.shard(shard_id).handle_event(event);
    }

    /// Start one GC task per shard, each sweeping one guild per `interval`.
    pub fn run_gc_loop(self: &Arc<Self>, interval: Duration) -> Vec<JoinHandle<()>> {
        spawn_gc_tasks(Arc::clone(self), interval)
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn get_guild(&self, guild_id: GuildId) -> Option<Arc<GuildSnapshot>> {
        self.guild_shard(guild_id).read().guilds.get(&guild_id).cloned()
    }

    pub fn get_member(&self, guild_id: GuildId, user_id: UserId) -> Option<Arc<MemberState>> {
        let state = self.guild_shard(guild_id).read();
        state
            .members
            .get(&guild_id)?
            .get(&user_id)
            .map(|tracked| Arc::clone(&tracked.state))
    }

    pub fn get_shard_guilds(&self, shard_id: usize) -> Vec<Arc<GuildSnapshot>> {
        self.shard(shard_id).read().guilds.values().cloned().collect()
    }

    /// Call `f` once with every cached member of the guild. The shard lock is
    /// released before `f` runs. Not called when there are no members.
    pub fn iterate_members(&self, guild_id: GuildId, f: impl FnOnce(&[Arc<MemberState>])) {
        let batch: Vec<Arc<MemberState>> = {
            let state = self.guild_shard(guild_id).read();
            match state.members.get(&guild_id) {
                Some(members) => members.values().map(|t| Arc::clone(&t.state)).collect(),
                None => return,
            }
        };

        if !batch.is_empty() {
            f(&batch);
        }
    }

    /// Message history, newest first. `channel_id == None` reads the
    /// guild-wide history.
    pub fn get_messages(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        query: &MessagesQuery,
    ) -> Vec<Arc<MessageState>> {
        self.get_messages_into(guild_id, channel_id, query, Vec::new())
    }

    /// Like [`get_messages`](Self::get_messages), reusing `buf`.
    pub fn get_messages_into(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        query: &MessagesQuery,
        buf: Vec<Arc<MessageState>>,
    ) -> Vec<Arc<MessageState>> {
        self.guild_shard(guild_id)
            .read()
            .messages
            .query_into(guild_id, channel_id, query, buf)
    }

    /// Permissions of a cached member. `None` when the guild or the member is
    /// not cached.
    pub fn get_member_permissions(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        member_id: UserId,
    ) -> Option<ResolvedPermissions> {
        let (gs, member) = {
            let state = self.guild_shard(guild_id).read();
            let gs = state.guilds.get(&guild_id).cloned()?;
            let member = Arc::clone(&state.members.get(&guild_id)?.get(&member_id)?.state);
            (gs, member)
        };

        Some(
            gs.member_permissions(channel_id, member_id, member.roles())
                .into(),
        )
    }

    /// Permissions for an arbitrary member id and role set. `None` when the
    /// guild is not cached.
    pub fn get_role_permissions(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        member_id: UserId,
        roles: &[RoleId],
    ) -> Option<ResolvedPermissions> {
        let gs = self.get_guild(guild_id)?;
        Some(gs.member_permissions(channel_id, member_id, roles).into())
    }

    pub fn shard_stats(&self, shard_id: usize) -> ShardStats {
        self.shard(shard_id).stats()
    }

    // ── Admin ───────────────────────────────────────────────────

    /// Install a snapshot directly, replacing any cached one.
    pub fn set_guild(&self, snapshot: GuildSnapshot) {
        let guild_id = snapshot.id();
        self.guild_shard(guild_id)
            .write()
            .guilds
            .insert(guild_id, Arc::new(snapshot));
    }

    /// Install a member record directly, replacing any cached one.
    pub fn set_member(&self, member: MemberState) {
        self.guild_shard(member.guild_id).write().set_member(member);
    }

    /// Forget everything a shard holds.
    pub fn del_shard(&self, shard_id: usize) {
        self.shard(shard_id).write().reset();
    }
}
