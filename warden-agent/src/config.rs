//! Agent settings loaded from TOML

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use warden_core::{
    agents, Category, EmojiThresholds, GroupId, UserId, DEFAULT_HIGH_SCORE,
    DEFAULT_MESSAGE_THRESHOLD, DEFAULT_TIME_NEW,
};
use warden_exchange::FloodPolicy;

/// Placeholder left in shipped config templates
const EXPUNGED: &str = "[DATA EXPUNGED]";

/// Errors from loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel shared by all agents
    pub exchange_channel_id: GroupId,
    /// Channel for operator-facing notices
    pub debug_channel_id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomSettings {
    /// Local agent name
    pub sender: String,
    pub project_name: String,
    /// Whether this instance is the backup replica
    #[serde(default)]
    pub backup: bool,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmojiSettings {
    pub ad_single: usize,
    pub ad_total: usize,
    pub many: usize,
    pub wb_single: usize,
    pub wb_total: usize,
    /// Emoji never counted by the heuristics
    pub protect: String,
}

impl Default for EmojiSettings {
    fn default() -> Self {
        let thresholds = EmojiThresholds::default();
        Self {
            ad_single: thresholds.ad_single,
            ad_total: thresholds.ad_total,
            many: thresholds.many,
            wb_single: thresholds.wb_single,
            wb_total: thresholds.wb_total,
            protect: String::new(),
        }
    }
}

impl EmojiSettings {
    pub fn thresholds(&self) -> EmojiThresholds {
        EmojiThresholds {
            ad_single: self.ad_single,
            ad_total: self.ad_total,
            many: self.many,
            wb_single: self.wb_single,
            wb_total: self.wb_total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptSettings {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    /// Apply compatibility normalization before classification
    pub normalize: bool,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self { normalize: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Undeleted messages in one group needed for nomination
    pub message_threshold: usize,
    /// Summed score at which a user is no longer trusted
    pub high_score: f64,
    /// Projects whose score must be zero for whitelisting
    pub zero_score_projects: Vec<String>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            message_threshold: DEFAULT_MESSAGE_THRESHOLD,
            high_score: DEFAULT_HIGH_SCORE,
            zero_score_projects: vec![agents::NOPORN.to_string(), agents::NOSPAM.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSettings {
    /// Active rule categories; unknown names fail deserialization
    pub categories: Vec<Category>,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            categories: Category::BASE.to_vec(),
        }
    }
}

/// Agents interested in each kind of broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Receivers {
    pub avatar: Vec<String>,
    pub white: Vec<String>,
    pub regex: Vec<String>,
    pub backup: Vec<String>,
    pub hide: Vec<String>,
}

impl Default for Receivers {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            avatar: names(&[agents::NOSPAM]),
            white: names(&[
                agents::CAPTCHA,
                agents::LANG,
                agents::LONG,
                agents::NOFLOOD,
                agents::NOPORN,
                agents::NOSPAM,
                agents::RECHECK,
                agents::WARN,
            ]),
            regex: names(&[agents::REGEX]),
            backup: names(&[agents::BACKUP]),
            hide: names(&[agents::HIDE]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSettings {
    /// Seconds a join stays "new"
    pub time_new: i64,
    /// Day of month for the full reset
    pub reset_day: u32,
    /// Pause between backed-up datasets
    pub backup_pause_secs: u64,
    /// Retries after a flood wait
    pub flood_retries: u32,
}

impl Default for TimeSettings {
    fn default() -> Self {
        Self {
            time_new: DEFAULT_TIME_NEW,
            reset_day: 1,
            backup_pause_secs: 5,
            flood_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tmp_dir: PathBuf::from("tmp"),
        }
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Agent name to bot account id
    pub bots: BTreeMap<String, UserId>,
    pub channels: ChannelSettings,
    pub custom: CustomSettings,
    #[serde(default)]
    pub emoji: EmojiSettings,
    pub encrypt: EncryptSettings,
    #[serde(default)]
    pub language: LanguageSettings,
    #[serde(default)]
    pub limit: LimitSettings,
    #[serde(default)]
    pub mode: ModeSettings,
    #[serde(default)]
    pub receivers: Receivers,
    #[serde(default)]
    pub time: TimeSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl Settings {
    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let mut text = |name: &str, value: &str| {
            if value.trim().is_empty() || value == EXPUNGED {
                problems.push(format!("{} must be set", name));
            }
        };
        text("custom.sender", &self.custom.sender);
        text("custom.project_name", &self.custom.project_name);
        text("custom.version", &self.custom.version);
        text("encrypt.password", &self.encrypt.password);

        if self.bots.is_empty() {
            problems.push("bots must not be empty".to_string());
        }
        for (name, id) in &self.bots {
            if *id <= 0 {
                problems.push(format!("bots.{} must be a positive id", name));
            }
        }
        if !self.bots.contains_key(&self.custom.sender) {
            problems.push(format!("bots must include the sender {}", self.custom.sender));
        }

        if self.channels.exchange_channel_id >= 0 {
            problems.push("channels.exchange_channel_id must be negative".to_string());
        }
        if self.channels.debug_channel_id >= 0 {
            problems.push("channels.debug_channel_id must be negative".to_string());
        }

        if self.limit.message_threshold == 0 {
            problems.push("limit.message_threshold must be positive".to_string());
        }
        if self.limit.high_score <= 0.0 {
            problems.push("limit.high_score must be positive".to_string());
        }

        let emoji = &self.emoji;
        if [emoji.ad_single, emoji.ad_total, emoji.many, emoji.wb_single, emoji.wb_total].contains(&0) {
            problems.push("emoji thresholds must be positive".to_string());
        }

        if self.time.time_new <= 0 {
            problems.push("time.time_new must be positive".to_string());
        }
        if !(1..=28).contains(&self.time.reset_day) {
            problems.push("time.reset_day must be between 1 and 28".to_string());
        }

        for (name, list) in [
            ("avatar", &self.receivers.avatar),
            ("white", &self.receivers.white),
            ("regex", &self.receivers.regex),
            ("backup", &self.receivers.backup),
            ("hide", &self.receivers.hide),
        ] {
            if list.iter().any(|r| r.trim().is_empty()) {
                problems.push(format!("receivers.{} contains an empty name", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn sender(&self) -> &str {
        &self.custom.sender
    }

    /// Account id of the local agent
    pub fn self_id(&self) -> Option<UserId> {
        self.bots.get(&self.custom.sender).copied()
    }

    /// Ids of every agent in the federation
    pub fn bot_ids(&self) -> HashSet<UserId> {
        self.bots.values().copied().collect()
    }

    pub fn flood_policy(&self) -> FloodPolicy {
        FloodPolicy::default().with_retries(self.time.flood_retries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[bots]
AVATAR = 100
NOSPAM = 200

[channels]
exchange_channel_id = -1001000000001
debug_channel_id = -1001000000002

[custom]
sender = "AVATAR"
project_name = "Warden"

[encrypt]
password = "hunter2"

[mode]
categories = ["ad", "ban", "bio", "con", "nm", "ada"]
"#;

    pub(crate) fn sample() -> Settings {
        Settings::from_toml(SAMPLE).unwrap()
    }

    #[test]
    fn test_sample_loads_with_defaults() {
        let settings = sample();
        assert_eq!(settings.self_id(), Some(100));
        assert_eq!(settings.bot_ids().len(), 2);
        assert_eq!(settings.limit.message_threshold, 50);
        assert_eq!(settings.limit.zero_score_projects, vec!["NOPORN", "NOSPAM"]);
        assert_eq!(settings.mode.categories.len(), 6);
        assert_eq!(settings.receivers.regex, vec!["REGEX"]);
        assert!(settings.language.normalize);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let content = SAMPLE.replace("\"ada\"", "\"porn\"");
        assert!(matches!(Settings::from_toml(&content), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_collects_problems() {
        let content = SAMPLE
            .replace("hunter2", "[DATA EXPUNGED]")
            .replace("-1001000000002", "12");

        match Settings::from_toml(&content) {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 2);
                assert!(problems.iter().any(|p| p.contains("encrypt.password")));
                assert!(problems.iter().any(|p| p.contains("debug_channel_id")));
            }
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_must_be_a_bot() {
        let content = SAMPLE.replace("AVATAR = 100", "OTHER = 100");
        assert!(matches!(Settings::from_toml(&content), Err(ConfigError::Invalid(_))));
    }
}
