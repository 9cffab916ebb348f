use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::events::ChannelId;
use crate::engine::permissions::Permissions;

/// Errors surfaced by the tracker and its configuration.
#[derive(Debug, Error)]
pub enum StateError {
    /// The channel could not be resolved. `guild_permissions` holds the
    /// guild-scope value computed without any overwrites.
    #[error("channel not found: {channel_id}")]
    ChannelNotFound {
        channel_id: ChannelId,
        guild_permissions: Permissions,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl StateError {
    /// Best-effort permissions carried by a channel lookup failure.
    pub fn guild_permissions(&self) -> Option<Permissions> {
        match self {
            Self::ChannelNotFound {
                guild_permissions, ..
            } => Some(*guild_permissions),
            _ => None,
        }
    }
}
