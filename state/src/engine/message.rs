use chrono::{DateTime, Utc};

use super::events::{
    Attachment, ChannelId, Embed, GuildId, Message, MessageId, MessageReference, MessageSnapshot,
    MessageUpdate, RoleId, StickerItem, User,
};

/// A cached message. Deleting only sets `deleted`; the content stays
/// readable until the message ages out of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageState {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author: User,
    /// Author's roles at the time the message was sent.
    pub member_roles: Vec<RoleId>,
    pub content: String,
    pub message_reference: Option<MessageReference>,
    pub message_snapshots: Vec<MessageSnapshot>,
    pub embeds: Vec<Embed>,
    pub mentions: Vec<User>,
    pub mention_roles: Vec<RoleId>,
    pub attachments: Vec<Attachment>,
    pub stickers: Vec<StickerItem>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl MessageState {
    pub fn from_message(m: &Message, guild_id: GuildId) -> Self {
        Self {
            id: m.id,
            guild_id,
            channel_id: m.channel_id,
            author: m.author.clone(),
            member_roles: m.member.as_ref().map(|mm| mm.roles.clone()).unwrap_or_default(),
            content: m.content.clone(),
            message_reference: m.message_reference.clone(),
            message_snapshots: m.message_snapshots.clone(),
            embeds: m.embeds.clone(),
            mentions: m.mentions.clone(),
            mention_roles: m.mention_roles.clone(),
            attachments: m.attachments.clone(),
            stickers: m.sticker_items.clone(),
            created_at: m.timestamp,
            edited_at: m.edited_timestamp,
            deleted: false,
        }
    }

    /// Apply a partial edit. Empty content is treated as absent, since
    /// embed-only updates arrive with an empty string.
    pub fn apply_update(&mut self, update: &MessageUpdate) {
        if let Some(content) = &update.content
            && !content.is_empty()
        {
            self.content = content.clone();
        }
        if let Some(mentions) = &update.mentions {
            self.mentions = mentions.clone();
        }
        if let Some(embeds) = &update.embeds {
            self.embeds = embeds.clone();
        }
        if let Some(attachments) = &update.attachments {
            self.attachments = attachments.clone();
        }
        if let Some(author) = &update.author {
            self.author = author.clone();
        }
        if let Some(roles) = &update.mention_roles {
            self.mention_roles = roles.clone();
        }
        if update.edited_timestamp.is_some() {
            self.edited_at = update.edited_timestamp;
        }
    }

    /// Own content first, then the content of every forwarded message.
    pub fn contents(&self) -> Vec<&str> {
        let mut out = vec![self.content.as_str()];
        out.extend(
            self.message_snapshots
                .iter()
                .filter_map(|s| s.message.as_ref())
                .map(|m| m.content.as_str())
                .filter(|c| !c.is_empty()),
        );
        out
    }

    pub fn all_embeds(&self) -> Vec<&Embed> {
        let forwarded = self
            .message_snapshots
            .iter()
            .filter_map(|s| s.message.as_ref())
            .flat_map(|m| m.embeds.iter());
        self.embeds.iter().chain(forwarded).collect()
    }

    pub fn all_attachments(&self) -> Vec<&Attachment> {
        let forwarded = self
            .message_snapshots
            .iter()
            .filter_map(|s| s.message.as_ref())
            .flat_map(|m| m.attachments.iter());
        self.attachments.iter().chain(forwarded).collect()
    }

    /// Content with `<@id>` and `<@!id>` mentions of mentioned users
    /// rewritten to `@username`.
    pub fn content_with_mentions_replaced(&self) -> String {
        let mut content = self.content.clone();
        for user in &self.mentions {
            let name = format!("@{}", user.username);
            content = content
                .replace(&format!("<@{}>", user.id), &name)
                .replace(&format!("<@!{}>", user.id), &name);
        }
        content
    }
}

/// Filter for message history reads. Results are newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessagesQuery {
    /// Only messages with a smaller id.
    pub before: Option<MessageId>,
    /// Only messages with a larger id.
    pub after: Option<MessageId>,
    /// Maximum results, 0 for no limit.
    pub limit: usize,
    pub include_deleted: bool,
}

impl MessagesQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::SnapshotMessage;

    fn user(id: u64, name: &str) -> User {
        User {
            id,
            username: name.into(),
            ..Default::default()
        }
    }

    fn forwarded(content: &str, embeds: usize) -> MessageSnapshot {
        MessageSnapshot {
            message: Some(SnapshotMessage {
                content: content.into(),
                embeds: vec![Embed::default(); embeds],
                attachments: vec![Attachment::default()],
            }),
        }
    }

    #[test]
    fn test_forwarded_contents() {
        let ms = MessageState {
            content: "own".into(),
            embeds: vec![Embed::default()],
            message_snapshots: vec![
                forwarded("forwarded", 2),
                forwarded("", 0),
                MessageSnapshot { message: None },
            ],
            ..Default::default()
        };

        assert_eq!(ms.contents(), vec!["own", "forwarded"]);
        assert_eq!(ms.all_embeds().len(), 3);
        assert_eq!(ms.all_attachments().len(), 2);
    }

    #[test]
    fn test_mentions_replaced() {
        let ms = MessageState {
            content: "hi <@5> and <@!6>, not <@7>".into(),
            mentions: vec![user(5, "alice"), user(6, "bob")],
            ..Default::default()
        };
        assert_eq!(
            ms.content_with_mentions_replaced(),
            "hi @alice and @bob, not <@7>"
        );
    }

    #[test]
    fn test_partial_update() {
        let msg = Message {
            id: 1,
            channel_id: 10,
            content: "before".into(),
            mentions: vec![user(5, "alice")],
            ..Default::default()
        };
        let mut ms = MessageState::from_message(&msg, 1);

        ms.apply_update(&MessageUpdate {
            id: 1,
            content: Some(String::new()),
            embeds: Some(vec![Embed::default()]),
            ..Default::default()
        });
        assert_eq!(ms.content, "before");
        assert_eq!(ms.embeds.len(), 1);
        assert_eq!(ms.mentions.len(), 1);

        let edited = Utc::now();
        ms.apply_update(&MessageUpdate {
            id: 1,
            content: Some("after".into()),
            edited_timestamp: Some(edited),
            mentions: Some(vec![]),
            ..Default::default()
        });
        assert_eq!(ms.content, "after");
        assert_eq!(ms.edited_at, Some(edited));
        assert!(ms.mentions.is_empty());
    }

    #[test]
    fn test_member_roles_snapshot() {
        let msg = Message {
            id: 1,
            member: Some(crate::engine::events::Member {
                roles: vec![100],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(MessageState::from_message(&msg, 1).member_roles, vec![100]);
    }
}
