//! Per-shard garbage collection.
//!
//! Each shard runs its own loop. A tick sweeps exactly one guild, taken from a
//! round-robin queue that is refilled from the shard's guild ids whenever it
//! runs dry, so every guild is visited once per `guilds × interval`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::GuildId;
use super::shard::{Shard, ShardState};
use super::tracker::{InMemoryTracker, TrackerConfig};

/// Message retention for one guild. `None` disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageLimits {
    pub max_len: Option<usize>,
    pub max_age: Option<Duration>,
}

impl MessageLimits {
    pub fn is_unbounded(&self) -> bool {
        self.max_len.is_none() && self.max_age.is_none()
    }
}

/// What one guild sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub guild_id: GuildId,
    pub messages_by_len: usize,
    pub messages_by_age: usize,
    pub stale_guild_entries: usize,
    pub members: usize,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
}

impl ShardState {
    pub(crate) fn sweep_guild(
        &mut self,
        guild_id: GuildId,
        now: DateTime<Utc>,
        limits: MessageLimits,
        remove_offline_after: Option<Duration>,
    ) -> SweepResult {
        let mut result = SweepResult {
            guild_id,
            ..Default::default()
        };

        if !limits.is_unbounded() {
            let older_than = limits.max_age.and_then(|age| cutoff(now, age));
            for channel_id in self.messages.guild_channels(guild_id) {
                let trimmed = self
                    .messages
                    .trim_channel(channel_id, limits.max_len, older_than);
                result.messages_by_len += trimmed.by_len;
                result.messages_by_age += trimmed.by_age;
            }
            result.stale_guild_entries = self.messages.reconcile_guild(guild_id);
        }

        if let Some(max_age) = remove_offline_after {
            result.members = self.sweep_members(guild_id, now, max_age);
        }

        result
    }

    /// Evict members not touched for `max_age` unless they are connected.
    /// The bot's own record always stays.
    fn sweep_members(&mut self, guild_id: GuildId, now: DateTime<Utc>, max_age: Duration) -> usize {
        let Some(cutoff) = cutoff(now, max_age) else {
            return 0;
        };
        let Some(members) = self.members.get_mut(&guild_id) else {
            return 0;
        };

        let bot = self.bot_member_id;
        let before = members.len();
        members.retain(|user_id, tracked| {
            Some(*user_id) == bot
                || tracked.last_updated > cutoff
                || tracked.state.status().is_connected()
        });
        before - members.len()
    }
}

impl Shard {
    /// Sweep the next guild in `queue`.
    ///
    /// The per-guild limits callback runs between the two lock acquisitions;
    /// a guild deleted in between is skipped.
    pub fn gc_tick(
        &self,
        conf: &TrackerConfig,
        now: DateTime<Utc>,
        queue: &mut VecDeque<GuildId>,
    ) -> Option<SweepResult> {
        let guild_id = {
            let state = self.read();
            if queue.is_empty() {
                queue.extend(state.guilds.keys().copied());
            }
            loop {
                let next = queue.pop_front()?;
                if state.guilds.contains_key(&next) {
                    break next;
                }
            }
        };

        let limits = conf.message_limits(guild_id);

        let mut state = self.write();
        if !state.guilds.contains_key(&guild_id) {
            return None;
        }
        let result = state.sweep_guild(guild_id, now, limits, conf.remove_offline_members_after);
        drop(state);

        debug!(
            shard = self.id(),
            guild_id,
            by_len = result.messages_by_len,
            by_age = result.messages_by_age,
            stale = result.stale_guild_entries,
            members = result.members,
            "GC sweep"
        );
        Some(result)
    }
}

/// Spawn one GC task per shard. The tasks run until aborted or the runtime
/// shuts down.
pub fn spawn_gc_tasks(tracker: Arc<InMemoryTracker>, interval: Duration) -> Vec<JoinHandle<()>> {
    (0..tracker.total_shards())
        .map(|shard_id| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                let mut queue = VecDeque::new();

                loop {
                    ticker.tick().await;
                    tracker
                        .shard(shard_id)
                        .gc_tick(tracker.config(), Utc::now(), &mut queue);
                }
            })
        })
        .collect()
}
