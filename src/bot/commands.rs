//! Slash commands and the permission level each one needs.

use serde_json::Value;
use teloxide::utils::command::BotCommands;

use crate::qbt::TorrentFilter;
use crate::storage::Permission;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "<b>Commands</b>:")]
pub enum Command {
    #[command(description = "show this message")]
    Start,
    #[command(description = "show this message")]
    Help,
    #[command(description = "show all torrents")]
    All,
    #[command(description = "show completed torrents")]
    Completed,
    #[command(description = "show downloading torrents")]
    Downloading,
    #[command(description = "show paused torrents")]
    Paused,
    #[command(description = "show active torrents")]
    Active,
    #[command(description = "show inactive torrents")]
    Inactive,
    #[command(description = "filter torrents by substring", aliases = ["f"])]
    Filter(String),
    #[command(description = "pause all torrents")]
    PauseAll,
    #[command(description = "resume all torrents")]
    ResumeAll,
    #[command(description = "enable alternative speed limits", aliases = ["slow"])]
    AltOn,
    #[command(description = "disable alternative speed limits", aliases = ["fast"])]
    AltOff,
    #[command(description = "change the alternative max download speed (kb/s)")]
    AltDown(String),
    #[command(description = "change the alternative max upload speed (kb/s)")]
    AltUp(String),
    #[command(description = "current speed, session totals and speed limits", aliases = ["ti", "speed"])]
    TransferInfo,
    #[command(description = "see qBittorrent's preferences", aliases = ["s"])]
    Settings,
    #[command(description = "change a qBittorrent preference: /set [key] [value]")]
    Set(String),
    #[command(description = "free space in the download path")]
    FreeSpace,
    #[command(description = "qBittorrent and bot version")]
    Version,
    #[command(description = "see how permissions are configured", aliases = ["p"])]
    Permissions,
    #[command(description = "change a permission: /pset [key] [true/false/1/0]")]
    Pset(String),
    #[command(description = "reset permissions to their defaults")]
    PReset,
}

impl Command {
    pub fn permission(&self) -> Permission {
        match self {
            Command::Start
            | Command::Help
            | Command::All
            | Command::Completed
            | Command::Downloading
            | Command::Paused
            | Command::Active
            | Command::Inactive
            | Command::Filter(_)
            | Command::TransferInfo
            | Command::Version => Permission::Read,
            Command::PauseAll
            | Command::ResumeAll
            | Command::AltOn
            | Command::AltOff
            | Command::AltDown(_)
            | Command::AltUp(_) => Permission::Edit,
            Command::Settings
            | Command::Set(_)
            | Command::FreeSpace
            | Command::Permissions
            | Command::Pset(_)
            | Command::PReset => Permission::Admin,
        }
    }

    /// Status filter for the list commands.
    pub fn list_filter(&self) -> Option<TorrentFilter> {
        match self {
            Command::All => Some(TorrentFilter::All),
            Command::Completed => Some(TorrentFilter::Completed),
            Command::Downloading => Some(TorrentFilter::Downloading),
            Command::Paused => Some(TorrentFilter::Paused),
            Command::Active => Some(TorrentFilter::Active),
            Command::Inactive => Some(TorrentFilter::Inactive),
            _ => None,
        }
    }
}

/// Split `/pset` arguments into a key and a boolean.
pub fn parse_pset(args: &str) -> Result<(String, bool), String> {
    const USAGE: &str = "Usage: /pset <code>[permission key] [true/false/1/0]</code>";

    let mut parts = args.split_whitespace();
    let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
        return Err(USAGE.to_string());
    };

    let value = match value.to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => return Err(format!("Wrong value passed. {USAGE}")),
    };
    Ok((key.to_lowercase(), value))
}

/// Split `/set` arguments into a preference key and its value. The value is
/// read as JSON when it parses (numbers, booleans), as a string otherwise.
pub fn parse_set(args: &str) -> Result<(String, Value), String> {
    let Some((key, value)) = args.trim().split_once(char::is_whitespace) else {
        return Err("Usage: /set <code>[setting] [value]</code>".to_string());
    };

    let value = value.trim();
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_lowercase(), value))
}

/// Parse a kb/s argument for `/altdown` and `/altup`.
pub fn parse_kbs(args: &str) -> Result<u32, String> {
    let args = args.trim();
    if args.is_empty() || !args.chars().all(|c| c.is_ascii_digit()) {
        return Err("Please pass the alternative speed limit in kb/s, as an integer".to_string());
    }
    args.parse().map_err(|_| "Speed limit too large".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let parse = |text: &str| Command::parse(text, "qbtbot").unwrap();
        assert_eq!(parse("/completed"), Command::Completed);
        assert_eq!(parse("/f ubuntu iso"), Command::Filter("ubuntu iso".into()));
        assert_eq!(parse("/filter@qbtbot debian"), Command::Filter("debian".into()));
        assert_eq!(parse("/pauseall"), Command::PauseAll);
        assert_eq!(parse("/altdown 100"), Command::AltDown("100".into()));
        assert_eq!(parse("/p"), Command::Permissions);
        assert_eq!(parse("/preset"), Command::PReset);
        assert_eq!(parse("/ti"), Command::TransferInfo);
        assert_eq!(parse("/s"), Command::Settings);
        assert_eq!(parse("/set max_ratio 2"), Command::Set("max_ratio 2".into()));
        assert!(Command::parse("/nope", "qbtbot").is_err());
    }

    #[test]
    fn test_permission_levels() {
        assert_eq!(Command::All.permission(), Permission::Read);
        assert_eq!(Command::AltOn.permission(), Permission::Edit);
        assert_eq!(Command::Pset(String::new()).permission(), Permission::Admin);
    }

    #[test]
    fn test_list_filter() {
        assert_eq!(Command::Paused.list_filter(), Some(TorrentFilter::Paused));
        assert_eq!(Command::Help.list_filter(), None);
    }

    #[test]
    fn test_parse_pset() {
        assert_eq!(parse_pset("free_write 1").unwrap(), ("free_write".into(), true));
        assert_eq!(parse_pset("ADMINS_ONLY False").unwrap(), ("admins_only".into(), false));
        assert!(parse_pset("free_write").unwrap_err().starts_with("Usage"));
        assert!(parse_pset("free_write maybe").unwrap_err().starts_with("Wrong value"));
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(parse_set("Max_Ratio 1.5").unwrap(), ("max_ratio".into(), serde_json::json!(1.5)));
        assert_eq!(parse_set("dht false").unwrap(), ("dht".into(), Value::Bool(false)));
        assert_eq!(
            parse_set("save_path /data/new dir").unwrap(),
            ("save_path".into(), Value::String("/data/new dir".into()))
        );
        assert!(parse_set("dht").is_err());
    }

    #[test]
    fn test_parse_kbs() {
        assert_eq!(parse_kbs(" 200 ").unwrap(), 200);
        assert!(parse_kbs("").is_err());
        assert!(parse_kbs("-5").is_err());
        assert!(parse_kbs("99999999999").is_err());
    }
}
