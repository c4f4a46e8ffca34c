use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::diff::UnchangedEdits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggerConfig {
    /// Only these chats are logged. Empty means every chat.
    #[serde(default)]
    pub enabled_chats: Vec<i64>,
    /// Never logged, even if also enabled
    #[serde(default)]
    pub disabled_chats: Vec<i64>,
    #[serde(default)]
    pub save_media: bool,
    #[serde(default = "default_media_directory")]
    pub media_directory: PathBuf,
    /// Write lines to per-chat files instead of stdout
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    #[serde(default = "default_color")]
    pub color: bool,
    #[serde(default)]
    pub unchanged_edits: UnchangedEdits,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

fn default_media_directory() -> PathBuf {
    PathBuf::from("media")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_color() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("telegram-logger.db")
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled_chats: Vec::new(),
            disabled_chats: Vec::new(),
            save_media: false,
            media_directory: default_media_directory(),
            log_to_file: false,
            log_directory: default_log_directory(),
            color: default_color(),
            unchanged_edits: UnchangedEdits::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl LoggerConfig {
    /// Whether events from `chat_id` are logged. Disabled always wins.
    pub fn is_chat_enabled(&self, chat_id: i64) -> bool {
        (self.enabled_chats.is_empty() || self.enabled_chats.contains(&chat_id))
            && !self.disabled_chats.contains(&chat_id)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)?;

        for dir in [
            config
                .logger
                .save_media
                .then_some(&config.logger.media_directory),
            config
                .logger
                .log_to_file
                .then_some(&config.logger.log_directory),
        ]
        .into_iter()
        .flatten()
        {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        for chat_id in &config.logger.disabled_chats {
            if config.logger.enabled_chats.contains(chat_id) {
                warn!(
                    "Chat {} is both enabled and disabled; it will not be logged",
                    chat_id
                );
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert!(config.logger.enabled_chats.is_empty());
        assert!(!config.logger.save_media);
        assert!(!config.logger.log_to_file);
        assert!(config.logger.color);
        assert_eq!(config.logger.unchanged_edits, UnchangedEdits::Record);
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("telegram-logger.db")
        );
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [telegram]
            bot_token = "t"

            [logger]
            enabled_chats = [10, -100200]
            disabled_chats = [30]
            save_media = true
            media_directory = "/srv/media"
            log_to_file = true
            log_directory = "/srv/logs"
            color = false
            unchanged_edits = "skip"

            [storage]
            database_path = "/srv/events.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.logger.enabled_chats, vec![10, -100200]);
        assert_eq!(config.logger.disabled_chats, vec![30]);
        assert!(config.logger.save_media);
        assert_eq!(config.logger.media_directory, PathBuf::from("/srv/media"));
        assert_eq!(config.logger.unchanged_edits, UnchangedEdits::Skip);
        assert!(!config.logger.color);
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("/srv/events.db")
        );
    }

    #[test]
    fn test_missing_telegram_section_is_error() {
        assert!(Config::parse("[logger]\nsave_media = true\n").is_err());
    }

    #[test]
    fn test_empty_lists_enable_everything() {
        let logger = LoggerConfig::default();
        assert!(logger.is_chat_enabled(10));
        assert!(logger.is_chat_enabled(-100123));
    }

    #[test]
    fn test_enabled_list_restricts() {
        let logger = LoggerConfig {
            enabled_chats: vec![10],
            ..Default::default()
        };
        assert!(logger.is_chat_enabled(10));
        assert!(!logger.is_chat_enabled(11));
    }

    #[test]
    fn test_disabled_wins_over_enabled() {
        let logger = LoggerConfig {
            enabled_chats: vec![10],
            disabled_chats: vec![10],
            ..Default::default()
        };
        assert!(!logger.is_chat_enabled(10));
    }

    #[test]
    fn test_load_creates_configured_directories() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                "[telegram]\nbot_token = \"t\"\n\n[logger]\nsave_media = true\nmedia_directory = {:?}\n",
                media.display().to_string()
            ),
        )
        .unwrap();

        Config::load(&config_path).unwrap();
        assert!(media.is_dir());
    }
}
