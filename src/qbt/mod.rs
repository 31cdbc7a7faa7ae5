//! qBittorrent daemon access.

pub mod client;
pub mod torrent;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub use client::{AltLimit, AltSpeed, QbtClient, TransferInfo};
pub use torrent::Torrent;

use crate::config::QbittorrentConfig;

/// Errors from the daemon or from reaching it.
#[derive(Debug)]
pub enum QbtError {
    /// The daemon could not be reached.
    Offline(String),
    /// Login refused.
    Auth(String),
    /// The daemon answered with a failure.
    Api(String),
    /// The endpoint does not exist on this daemon version.
    NotFound(String),
    /// Transport error other than a refused connection.
    Http(String),
    /// Unexpected response body.
    Parse(String),
}

impl QbtError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_connect() {
            QbtError::Offline(e.to_string())
        } else {
            QbtError::Http(e.to_string())
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, QbtError::Offline(_))
    }
}

impl fmt::Display for QbtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QbtError::Offline(e) => write!(f, "cannot connect to qbittorrent ({e})"),
            QbtError::Auth(e) => write!(f, "qbittorrent login failed: {e}"),
            QbtError::Api(e) => write!(f, "qbittorrent error: {e}"),
            QbtError::NotFound(path) => write!(f, "qbittorrent endpoint not found: {path}"),
            QbtError::Http(e) => write!(f, "HTTP error: {e}"),
            QbtError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for QbtError {}

/// Status filter accepted by `/api/v2/torrents/info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentFilter {
    All,
    Downloading,
    Completed,
    Paused,
    Active,
    Inactive,
    Resumed,
    Stalled,
    Errored,
}

impl TorrentFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentFilter::All => "all",
            TorrentFilter::Downloading => "downloading",
            TorrentFilter::Completed => "completed",
            TorrentFilter::Paused => "paused",
            TorrentFilter::Active => "active",
            TorrentFilter::Inactive => "inactive",
            TorrentFilter::Resumed => "resumed",
            TorrentFilter::Stalled => "stalled",
            TorrentFilter::Errored => "errored",
        }
    }
}

impl FromStr for TorrentFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let filter = match s.trim_start_matches('/').to_lowercase().as_str() {
            "all" => TorrentFilter::All,
            "downloading" => TorrentFilter::Downloading,
            "completed" => TorrentFilter::Completed,
            "paused" => TorrentFilter::Paused,
            "active" => TorrentFilter::Active,
            "inactive" => TorrentFilter::Inactive,
            "resumed" => TorrentFilter::Resumed,
            "stalled" => TorrentFilter::Stalled,
            "errored" => TorrentFilter::Errored,
            other => return Err(format!("unknown filter '{other}'")),
        };
        Ok(filter)
    }
}

/// The daemon as seen by the rest of the bot: either a logged-in client or
/// the reason it could not be reached at startup.
pub enum Qbt {
    Online(QbtClient),
    Offline { url: String, reason: String },
}

impl Qbt {
    /// Connect and log in. An unreachable daemon yields `Offline` so the bot
    /// can still serve commands that do not need it; a refused login is an
    /// error.
    pub async fn connect(config: &QbittorrentConfig, timeout: Duration) -> Result<Self, QbtError> {
        match QbtClient::connect(&config.url, &config.login, &config.secret, timeout).await {
            Ok(client) => Ok(Qbt::Online(client)),
            Err(QbtError::Offline(reason)) => {
                error!("Exception while connecting to qbittorrent: {reason}");
                Ok(Qbt::Offline { url: config.url.clone(), reason })
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Qbt::Online(_))
    }

    /// The client, or `QbtError::Offline` when the daemon was unreachable.
    pub fn online(&self) -> Result<&QbtClient, QbtError> {
        match self {
            Qbt::Online(client) => Ok(client),
            Qbt::Offline { url, reason } => {
                info!("Offline client used ({url})");
                Err(QbtError::Offline(format!("{url}: {reason}")))
            }
        }
    }
}
