use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

/// Env var consulted when the config file leaves the token empty.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Telegram user IDs with full access. The first one receives job errors.
    admins: Vec<u64>,
    qbittorrent: QbittorrentConfig,
    #[serde(default)]
    notifications: NotificationsFile,
    /// Directory for state files and logs. Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
    #[serde(default = "default_poll_secs")]
    completed_poll_secs: u64,
    #[serde(default = "default_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Deserialize, Default)]
struct NotificationsFile {
    /// Chat receiving "torrent completed" messages. Unset = no notifications.
    completed_torrents: Option<i64>,
    /// Torrents carrying this tag are not announced.
    no_notification_tag: Option<String>,
}

/// Web UI address and credentials of the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct QbittorrentConfig {
    pub url: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub secret: String,
}

fn default_poll_secs() -> u64 {
    120
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone)]
pub struct Notifications {
    pub completed_torrents: Option<ChatId>,
    /// Stored lowercased.
    pub no_notification_tag: Option<String>,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub admins: Vec<UserId>,
    pub qbittorrent: QbittorrentConfig,
    pub notifications: Notifications,
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub completed_poll_interval: Duration,
    pub request_timeout: Duration,
    /// Log what the completed job would send instead of sending it.
    pub dry_run: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let token = if file.telegram_bot_token.is_empty() {
            env(TOKEN_ENV).unwrap_or_default()
        } else {
            file.telegram_bot_token
        };

        if token.is_empty() {
            return Err(ConfigError::Validation(format!(
                "telegram_bot_token is required (or set {TOKEN_ENV})"
            )));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        if file.admins.is_empty() {
            return Err(ConfigError::Validation("admins must contain at least one user ID".into()));
        }

        let url = file.qbittorrent.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "qbittorrent.url must start with http:// or https:// (got '{url}')"
            )));
        }

        if file.completed_poll_secs < 10 {
            return Err(ConfigError::Validation("completed_poll_secs must be at least 10".into()));
        }

        let no_notification_tag = file
            .notifications
            .no_notification_tag
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        Ok(Self {
            telegram_bot_token: token,
            admins: file.admins.into_iter().map(UserId).collect(),
            qbittorrent: QbittorrentConfig {
                url: url.to_string(),
                login: file.qbittorrent.login,
                secret: file.qbittorrent.secret,
            },
            notifications: Notifications {
                completed_torrents: file.notifications.completed_torrents.map(ChatId),
                no_notification_tag,
            },
            data_dir: file.data_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            log_chat_id: file.log_chat_id.map(ChatId),
            completed_poll_interval: Duration::from_secs(file.completed_poll_secs),
            request_timeout: Duration::from_secs(file.request_timeout_secs.max(1)),
            dry_run: file.dry_run,
        })
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    /// Admin that receives job failures.
    pub fn primary_admin(&self) -> Option<UserId> {
        self.admins.first().copied()
    }

    pub fn permissions_path(&self) -> PathBuf {
        self.data_dir.join("permissions.json")
    }

    pub fn completed_path(&self) -> PathBuf {
        self.data_dir.join("completed.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
