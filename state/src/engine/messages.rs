use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::events::{ChannelId, GuildId, MessageId};
use super::message::{MessageState, MessagesQuery};

#[derive(Debug, Default)]
struct GuildLog {
    ids: VecDeque<MessageId>,
    channels: HashSet<ChannelId>,
}

/// Message history for one shard.
///
/// Values live once in `by_id`. Each channel keeps its ids oldest to newest,
/// and each guild keeps the interleaved ids of all its channels. The channel
/// lists own their entries: removing an id from a channel list removes the
/// value, and the guild list is reconciled afterwards by dropping ids whose
/// value is gone.
#[derive(Debug, Default)]
pub struct MessageStore {
    by_id: HashMap<MessageId, Arc<MessageState>>,
    channels: HashMap<ChannelId, VecDeque<MessageId>>,
    guilds: HashMap<GuildId, GuildLog>,
}

/// Counts removed by one trim of a channel list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrimResult {
    pub by_len: usize,
    pub by_age: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn channel_len(&self, channel_id: ChannelId) -> usize {
        self.channels.get(&channel_id).map_or(0, VecDeque::len)
    }

    pub fn guild_len(&self, guild_id: GuildId) -> usize {
        self.guilds.get(&guild_id).map_or(0, |log| log.ids.len())
    }

    pub fn get(&self, id: MessageId) -> Option<Arc<MessageState>> {
        self.by_id.get(&id).cloned()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.channels.clear();
        self.guilds.clear();
    }

    /// Store a new message. A message id already present only has its value
    /// replaced, so a redelivered create is never listed twice. If the
    /// redelivery names another channel the id moves to that channel's list.
    pub fn insert(&mut self, msg: MessageState) {
        let (id, guild_id, channel_id) = (msg.id, msg.guild_id, msg.channel_id);
        let Some(previous) = self.by_id.insert(id, Arc::new(msg)) else {
            self.channels.entry(channel_id).or_default().push_back(id);
            let log = self.guilds.entry(guild_id).or_default();
            log.ids.push_back(id);
            log.channels.insert(channel_id);
            return;
        };

        if previous.channel_id != channel_id {
            self.unlist_from_channel(previous.channel_id, id);
            self.channels.entry(channel_id).or_default().push_back(id);
        }
        if previous.guild_id != guild_id {
            if let Some(log) = self.guilds.get_mut(&previous.guild_id) {
                log.ids.retain(|i| *i != id);
            }
            self.guilds.entry(guild_id).or_default().ids.push_back(id);
        }
        if previous.channel_id != channel_id || previous.guild_id != guild_id {
            self.reconcile_guild(previous.guild_id);
            self.guilds
                .entry(guild_id)
                .or_default()
                .channels
                .insert(channel_id);
        }
    }

    fn unlist_from_channel(&mut self, channel_id: ChannelId, id: MessageId) {
        let Some(list) = self.channels.get_mut(&channel_id) else {
            return;
        };
        list.retain(|i| *i != id);
        if list.is_empty() {
            self.channels.remove(&channel_id);
        }
    }

    /// Replace a stored message with an edited copy. Returns false when the
    /// message is not cached.
    pub fn modify(&mut self, id: MessageId, f: impl FnOnce(&mut MessageState)) -> bool {
        let Some(current) = self.by_id.get_mut(&id) else {
            return false;
        };
        let mut next = MessageState::clone(current);
        f(&mut next);
        *current = Arc::new(next);
        true
    }

    pub fn mark_deleted(&mut self, id: MessageId) -> bool {
        self.modify(id, |m| m.deleted = true)
    }

    /// Drop a channel's list and every message in it.
    pub fn remove_channel(&mut self, guild_id: GuildId, channel_id: ChannelId) -> usize {
        let Some(ids) = self.channels.remove(&channel_id) else {
            return 0;
        };
        for id in &ids {
            self.by_id.remove(id);
        }
        if let Some(log) = self.guilds.get_mut(&guild_id) {
            log.channels.remove(&channel_id);
        }
        self.reconcile_guild(guild_id);
        ids.len()
    }

    /// Drop every list belonging to a guild.
    pub fn remove_guild(&mut self, guild_id: GuildId) -> usize {
        let Some(log) = self.guilds.remove(&guild_id) else {
            return 0;
        };
        for channel_id in &log.channels {
            self.channels.remove(channel_id);
        }
        let mut removed = 0;
        for id in &log.ids {
            if self.by_id.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Channels and threads of a guild that currently hold a list.
    pub fn guild_channels(&self, guild_id: GuildId) -> Vec<ChannelId> {
        self.guilds
            .get(&guild_id)
            .map(|log| log.channels.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Apply the length and age limits to one channel list.
    ///
    /// The length limit drops the oldest entries unconditionally. The age limit
    /// is checked against the oldest remaining entry; when that one is stale the
    /// whole list is filtered in one pass, also dropping ids whose value is gone.
    pub fn trim_channel(
        &mut self,
        channel_id: ChannelId,
        max_len: Option<usize>,
        older_than: Option<DateTime<Utc>>,
    ) -> TrimResult {
        let mut result = TrimResult::default();
        let Some(list) = self.channels.get_mut(&channel_id) else {
            return result;
        };

        if let Some(max_len) = max_len
            && list.len() > max_len
        {
            let overflow = list.len() - max_len;
            for id in list.drain(..overflow) {
                self.by_id.remove(&id);
            }
            result.by_len = overflow;
        }

        if let Some(cutoff) = older_than {
            let oldest_stale = list
                .front()
                .and_then(|id| self.by_id.get(id))
                .is_none_or(|m| m.created_at < cutoff);

            if oldest_stale && !list.is_empty() {
                let by_id = &mut self.by_id;
                let before = list.len();
                list.retain(|id| match by_id.get(id).map(|m| m.created_at >= cutoff) {
                    Some(true) => true,
                    Some(false) => {
                        by_id.remove(id);
                        false
                    }
                    None => false,
                });
                result.by_age = before - list.len();
            }
        }

        if list.is_empty() {
            self.channels.remove(&channel_id);
        }
        result
    }

    /// Drop ids from the guild list whose value no longer exists.
    pub fn reconcile_guild(&mut self, guild_id: GuildId) -> usize {
        let Some(log) = self.guilds.get_mut(&guild_id) else {
            return 0;
        };
        let before = log.ids.len();
        log.ids.retain(|id| self.by_id.contains_key(id));
        log.channels.retain(|c| self.channels.contains_key(c));
        before - log.ids.len()
    }

    /// Read history newest first into `buf`, reusing its allocation.
    ///
    /// `channel_id == None` reads the guild-wide list. Ids at or above
    /// `before` are skipped; the walk stops at the first id at or below
    /// `after`.
    pub fn query_into(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        query: &MessagesQuery,
        mut buf: Vec<Arc<MessageState>>,
    ) -> Vec<Arc<MessageState>> {
        buf.clear();

        let list = match channel_id {
            Some(channel_id) => self.channels.get(&channel_id),
            None => self.guilds.get(&guild_id).map(|log| &log.ids),
        };
        let Some(list) = list else {
            return buf;
        };

        if query.limit > 0 && buf.capacity() < query.limit {
            buf.reserve(query.limit.min(list.len()));
        }

        for id in list.iter().rev() {
            let Some(msg) = self.by_id.get(id) else {
                continue;
            };
            if let Some(before) = query.before
                && msg.id >= before
            {
                continue;
            }
            if let Some(after) = query.after
                && msg.id <= after
            {
                break;
            }
            if msg.deleted && !query.include_deleted {
                continue;
            }

            buf.push(Arc::clone(msg));
            if query.limit > 0 && buf.len() >= query.limit {
                break;
            }
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(id: MessageId, channel_id: ChannelId, created_at: DateTime<Utc>) -> MessageState {
        MessageState {
            id,
            guild_id: 1,
            channel_id,
            content: format!("message {id}"),
            created_at,
            ..Default::default()
        }
    }

    fn ids(msgs: &[Arc<MessageState>]) -> Vec<MessageId> {
        msgs.iter().map(|m| m.id).collect()
    }

    fn filled(n: u64) -> MessageStore {
        let mut store = MessageStore::new();
        let now = Utc::now();
        for id in 1..=n {
            store.insert(msg(id, 10, now));
        }
        store
    }

    // ── Insertion ───────────────────────────────────────────────

    #[test]
    fn test_duplicate_insert_replaces_value() {
        let mut store = filled(2);
        let mut replacement = msg(2, 10, Utc::now());
        replacement.content = "replaced".into();
        store.insert(replacement);

        assert_eq!(store.len(), 2);
        assert_eq!(store.channel_len(10), 2);
        assert_eq!(store.guild_len(1), 2);
        assert_eq!(store.get(2).unwrap().content, "replaced");
    }

    #[test]
    fn test_redelivery_in_another_channel_moves_the_id() {
        let mut store = filled(2);
        store.insert(msg(2, 20, Utc::now()));

        assert_eq!(store.len(), 2);
        assert_eq!(store.channel_len(10), 1);
        assert_eq!(store.channel_len(20), 1);
        assert_eq!(store.guild_len(1), 2);

        let q = MessagesQuery::latest(0);
        assert_eq!(ids(&store.query_into(1, Some(20), &q, Vec::new())), vec![2]);
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![1]);

        let mut channels = store.guild_channels(1);
        channels.sort();
        assert_eq!(channels, vec![10, 20]);

        // Moving the last message out drops the old list.
        store.insert(msg(1, 20, Utc::now()));
        assert_eq!(store.channel_len(10), 0);
        assert_eq!(store.guild_channels(1), vec![20]);
    }

    #[test]
    fn test_modify_is_visible_from_both_lists() {
        let mut store = filled(3);
        let old = store.get(2).unwrap();
        assert!(store.mark_deleted(2));
        assert!(!store.mark_deleted(99));

        assert!(!old.deleted);
        let all = MessagesQuery {
            include_deleted: true,
            ..Default::default()
        };
        let by_channel = store.query_into(1, Some(10), &all, Vec::new());
        let by_guild = store.query_into(1, None, &all, Vec::new());
        assert!(by_channel.iter().any(|m| m.id == 2 && m.deleted));
        assert!(by_guild.iter().any(|m| m.id == 2 && m.deleted));
    }

    // ── Queries ─────────────────────────────────────────────────

    #[test]
    fn test_query_boundaries() {
        let store = filled(10);

        let q = MessagesQuery {
            before: Some(8),
            after: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![7, 6, 5, 4]);

        let q = MessagesQuery {
            before: Some(8),
            limit: 2,
            ..Default::default()
        };
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![7, 6]);

        let q = MessagesQuery::latest(0);
        assert_eq!(store.query_into(1, None, &q, Vec::new()).len(), 10);
    }

    #[test]
    fn test_query_skips_deleted() {
        let mut store = filled(4);
        store.mark_deleted(3);

        let q = MessagesQuery::latest(2);
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![4, 2]);

        let q = MessagesQuery {
            limit: 2,
            include_deleted: true,
            ..Default::default()
        };
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![4, 3]);
    }

    #[test]
    fn test_query_reuses_buffer() {
        let store = filled(3);
        let buf = Vec::with_capacity(16);
        let ptr = buf.as_ptr();
        let out = store.query_into(1, Some(10), &MessagesQuery::latest(0), buf);
        assert_eq!(out.len(), 3);
        assert_eq!(out.as_ptr(), ptr);

        let out = store.query_into(1, Some(99), &MessagesQuery::latest(0), out);
        assert!(out.is_empty());
    }

    // ── Trimming ────────────────────────────────────────────────

    #[test]
    fn test_trim_by_len_keeps_newest() {
        let mut store = filled(5);
        let result = store.trim_channel(10, Some(2), None);
        assert_eq!(result.by_len, 3);
        store.reconcile_guild(1);

        let q = MessagesQuery::latest(0);
        assert_eq!(ids(&store.query_into(1, Some(10), &q, Vec::new())), vec![5, 4]);
        assert_eq!(ids(&store.query_into(1, None, &q, Vec::new())), vec![5, 4]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_trim_by_age() {
        let mut store = MessageStore::new();
        let now = Utc::now();
        store.insert(msg(1, 10, now - Duration::hours(3)));
        store.insert(msg(2, 10, now - Duration::hours(2)));
        store.insert(msg(3, 10, now));

        let result = store.trim_channel(10, None, Some(now - Duration::hours(1)));
        assert_eq!(result.by_age, 2);
        assert_eq!(store.channel_len(10), 1);
        assert!(store.get(3).is_some());

        // Oldest is fresh: nothing to scan.
        let result = store.trim_channel(10, None, Some(now - Duration::hours(1)));
        assert_eq!(result, TrimResult::default());
    }

    #[test]
    fn test_trim_removes_empty_list() {
        let mut store = filled(2);
        store.trim_channel(10, Some(0), None);
        assert_eq!(store.channel_len(10), 0);
        assert_eq!(store.reconcile_guild(1), 2);
        assert!(store.guild_channels(1).is_empty());
    }

    // ── Removal ─────────────────────────────────────────────────

    #[test]
    fn test_remove_channel_reconciles_guild() {
        let mut store = filled(2);
        store.insert(msg(3, 20, Utc::now()));

        assert_eq!(store.remove_channel(1, 10), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.guild_len(1), 1);
        assert_eq!(store.guild_channels(1), vec![20]);
    }

    #[test]
    fn test_remove_guild() {
        let mut store = filled(2);
        store.insert(msg(3, 20, Utc::now()));

        assert_eq!(store.remove_guild(1), 3);
        assert!(store.is_empty());
        assert_eq!(store.channel_len(20), 0);
        assert_eq!(store.remove_guild(1), 0);
    }
}
