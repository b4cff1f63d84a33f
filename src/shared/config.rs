//! Application configuration. API credentials, paths, and the relay rules file.

use crate::domain::{DomainError, Listener, Replacements};
use serde::Deserialize;
use std::path::Path;

/// Default capacity of the recent-event guard.
pub const DEFAULT_RECENT_CAPACITY: usize = 512;

/// Destination cap on a single message body.
pub const DEFAULT_MAX_LENGTH: usize = 2000;

/// Process settings. Read from `TG_RELAY_*` env vars and an optional file named by `TG_RELAY_CONFIG`.
#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub phone: Option<String>,
    pub data_dir: Option<String>,
    pub session_path: Option<String>,

    /// Path to the JSON document with listeners and message settings. Read from TG_RELAY_RELAY_FILE.
    #[serde(default)]
    pub relay_file: Option<String>,

    /// Capacity of the duplicate-update guard. Read from TG_RELAY_RECENT_CAPACITY.
    #[serde(default)]
    pub recent_capacity: Option<usize>,

    /// Keep a JSON mirror of relayed messages under `data_dir/messages`. Read from TG_RELAY_MIRROR.
    #[serde(default)]
    pub mirror: Option<bool>,

    /// Webhook HTTP timeout in seconds. Read from TG_RELAY_REQUEST_TIMEOUT_SECS.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("TG_RELAY"));
        if let Ok(path) = std::env::var("TG_RELAY_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn data_dir_or_default(&self) -> &str {
        self.data_dir.as_deref().unwrap_or("./data")
    }

    pub fn session_path_or_default(&self) -> &str {
        self.session_path.as_deref().unwrap_or("./session.db")
    }

    pub fn relay_file_or_default(&self) -> &str {
        self.relay_file.as_deref().unwrap_or("./relay.json")
    }

    pub fn recent_capacity_or_default(&self) -> usize {
        self.recent_capacity.unwrap_or(DEFAULT_RECENT_CAPACITY)
    }

    pub fn mirror_enabled(&self) -> bool {
        self.mirror.unwrap_or(false)
    }

    pub fn request_timeout_secs_or_default(&self) -> u64 {
        self.request_timeout_secs.unwrap_or(30)
    }
}

/// Operator document: listeners plus global message and error settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub listeners: Vec<Listener>,
    pub messages: MessageSettings,
    pub errors: ErrorSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessageSettings {
    /// Usernames or ids whose messages are never relayed.
    pub blacklist: Vec<String>,
    /// Domains whose links always keep their previews.
    #[serde(alias = "allowedEmbeds")]
    pub allowed_embeds: Vec<String>,
    pub replacements: Replacements,
    /// Whether `/command` messages are relayed when a listener doesn't say.
    pub commands: bool,
    /// Global link-preview toggle.
    pub embeds: bool,
    #[serde(alias = "maxLength")]
    pub max_length: usize,
    pub attachments: AttachmentSettings,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            blacklist: Vec::new(),
            allowed_embeds: Vec::new(),
            replacements: Replacements::new(),
            commands: true,
            embeds: false,
            max_length: DEFAULT_MAX_LENGTH,
            attachments: AttachmentSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttachmentSettings {
    /// Mime types that are never downloaded.
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorSettings {
    pub catch: bool,
    pub webhook: Option<String>,
}

impl Default for ErrorSettings {
    fn default() -> Self {
        Self {
            catch: true,
            webhook: None,
        }
    }
}

impl RelayConfig {
    /// Read and validate the relay document.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DomainError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DomainError> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| DomainError::Config(format!("parse relay config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject listeners that can never deliver and patterns that don't compile.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.messages.max_length == 0 {
            return Err(DomainError::Config("messages.max_length must be > 0".into()));
        }
        for (index, listener) in self.listeners.iter().enumerate() {
            let label = listener.label(index);
            if listener.webhook.is_none() && listener.channels.is_empty() {
                return Err(DomainError::Config(format!(
                    "listener '{}' has neither a webhook nor channels",
                    label
                )));
            }
            if let Some(channel) = listener.channels.iter().find(|c| c.webhook.is_empty()) {
                return Err(DomainError::Config(format!(
                    "listener '{}' channel '{}' has an empty webhook",
                    label,
                    channel.name.as_deref().unwrap_or("main")
                )));
            }
            for pattern in &listener.remove {
                crate::usecases::renderer::compile_remove_pattern(pattern)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document_with_defaults() {
        let cfg = RelayConfig::from_json(
            r#"{"listeners": [{"name": "news", "group": -1001, "webhook": "https://hook"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.listeners.len(), 1);
        assert!(cfg.messages.commands);
        assert!(!cfg.messages.embeds);
        assert_eq!(cfg.messages.max_length, DEFAULT_MAX_LENGTH);
        assert!(cfg.errors.catch);
        assert!(cfg.errors.webhook.is_none());
    }

    #[test]
    fn parses_message_settings() {
        let cfg = RelayConfig::from_json(
            r#"{
                "messages": {
                    "blacklist": ["spammer"],
                    "allowed_embeds": ["youtube.com"],
                    "replacements": {"foo": "bar"},
                    "commands": false,
                    "attachments": {"ignore": ["video/webm"]}
                },
                "errors": {"catch": true, "webhook": "https://errors"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.messages.blacklist, vec!["spammer"]);
        assert!(!cfg.messages.commands);
        assert_eq!(cfg.messages.attachments.ignore, vec!["video/webm"]);
        assert_eq!(cfg.errors.webhook.as_deref(), Some("https://errors"));
    }

    #[test]
    fn honours_camel_case_listener_gates() {
        let cfg = RelayConfig::from_json(
            r#"{"listeners": [{
                "group": -1,
                "webhook": "https://h",
                "blacklistedUsers": ["bob"],
                "whitelistOnly": true,
                "whitelist": [5]
            }]}"#,
        )
        .unwrap();
        let listener = &cfg.listeners[0];
        assert_eq!(listener.blacklisted_users, vec!["bob"]);
        assert!(listener.whitelist_only);
        assert_eq!(listener.whitelist, vec![5]);
    }

    #[test]
    fn rejects_misspelled_keys() {
        let err = RelayConfig::from_json(
            r#"{"listeners": [{"group": -1, "webhook": "https://h", "blacklistUsers": ["bob"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Config(msg) if msg.contains("blacklistUsers")));

        let err = RelayConfig::from_json(r#"{"messages": {"comands": false}}"#).unwrap_err();
        assert!(matches!(err, DomainError::Config(msg) if msg.contains("comands")));

        let err = RelayConfig::from_json(r#"{"listener": []}"#).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn rejects_listener_without_destination() {
        let err = RelayConfig::from_json(r#"{"listeners": [{"name": "lost", "group": 1}]}"#)
            .unwrap_err();
        assert!(matches!(err, DomainError::Config(msg) if msg.contains("lost")));
    }

    #[test]
    fn accepts_forum_listener_with_channels_only() {
        let cfg = RelayConfig::from_json(
            r#"{"listeners": [{
                "group": -100,
                "forum": true,
                "channels": [{"name": "news", "webhook": "https://news"}, {"main": true, "webhook": "https://main"}]
            }]}"#,
        )
        .unwrap();
        assert_eq!(cfg.listeners[0].channels.len(), 2);
        assert!(cfg.listeners[0].channels[1].main);
    }

    #[test]
    fn app_config_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.data_dir_or_default(), "./data");
        assert_eq!(cfg.relay_file_or_default(), "./relay.json");
        assert_eq!(cfg.recent_capacity_or_default(), DEFAULT_RECENT_CAPACITY);
        assert!(!cfg.mirror_enabled());
    }
}
