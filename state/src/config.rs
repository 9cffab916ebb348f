use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::engine::tracker::TrackerConfig;
use crate::error::StateError;

/// Top-level tracker configuration, loaded from guild-state.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StateConfig {
    pub tracker: TrackerSection,
    pub messages: MessagesSection,
    pub members: MembersSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub total_shards: usize,
    /// The bot's own user id. Its member record is never evicted and its
    /// permissions decide which threads stay cached.
    pub bot_member_id: Option<u64>,
    pub gc_interval_ms: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            total_shards: 1,
            bot_member_id: None,
            gc_interval_ms: 1000,
        }
    }
}

/// Per-channel message retention. 0 disables a limit.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MessagesSection {
    pub max_len: usize,
    pub max_age_secs: u64,
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            max_len: 100,
            max_age_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct MembersSection {
    /// Evict offline members not updated for this long. 0 keeps them forever.
    pub remove_offline_after_secs: u64,
}

impl StateConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| StateError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| StateError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `STATE_*` overrides. Values that fail to parse are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("STATE_TOTAL_SHARDS")
            && let Ok(n) = v.parse()
        {
            self.tracker.total_shards = n;
        }
        if let Some(v) = var("STATE_BOT_MEMBER_ID")
            && let Ok(id) = v.parse()
        {
            self.tracker.bot_member_id = Some(id);
        }
        if let Some(v) = var("STATE_GC_INTERVAL_MS")
            && let Ok(ms) = v.parse()
        {
            self.tracker.gc_interval_ms = ms;
        }
        if let Some(v) = var("STATE_MESSAGE_MAX_LEN")
            && let Ok(len) = v.parse()
        {
            self.messages.max_len = len;
        }
        if let Some(v) = var("STATE_MESSAGE_MAX_AGE_SECS")
            && let Ok(secs) = v.parse()
        {
            self.messages.max_age_secs = secs;
        }
        if let Some(v) = var("STATE_REMOVE_OFFLINE_AFTER_SECS")
            && let Ok(secs) = v.parse()
        {
            self.members.remove_offline_after_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), StateError> {
        if self.tracker.total_shards == 0 {
            return Err(StateError::InvalidConfig(
                "tracker.total_shards must be at least 1".into(),
            ));
        }
        if self.tracker.gc_interval_ms == 0 {
            return Err(StateError::InvalidConfig(
                "tracker.gc_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.tracker.gc_interval_ms)
    }

    /// Convert into a TrackerConfig for the tracker.
    pub fn to_tracker_config(&self) -> TrackerConfig {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        TrackerConfig {
            channel_message_len: (self.messages.max_len > 0).then_some(self.messages.max_len),
            channel_message_age: secs(self.messages.max_age_secs),
            channel_message_limits: None,
            remove_offline_members_after: secs(self.members.remove_offline_after_secs),
            bot_member_id: self.tracker.bot_member_id,
        }
    }
}
