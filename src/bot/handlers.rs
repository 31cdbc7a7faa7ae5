//! Update handlers: permission gate, commands, torrent links and buttons.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{Document, MessageId, User};
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use super::commands::{Command, parse_kbs, parse_pset, parse_set};
use super::keyboards::{Action, actions_markup, confirm_delete_markup, magnet_hash, parse_callback};
use super::{BotError, SendError};
use crate::BotState;
use crate::format::{escape_html, human_readable, split_text};
use crate::qbt::{AltLimit, AltSpeed, TransferInfo};
use crate::storage::{Access, Flag, Permission};

static MAGNET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^magnet:\?").expect("valid regex"));

static TORRENT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://.*(jackett|\.torren|/torrent)").expect("valid regex"));

/// `+tag1, tag2` or `-tag` sent in reply to a torrent card.
static TAGS_EDIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([+-])\s*(.+)$").expect("valid regex"));

static CARD_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhash: ([0-9a-f]{40})\b").expect("valid regex"));

/// Dispatcher tree: commands first, then uploaded files, then plain text
/// (links and tag edits), then buttons.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.document().is_some())
                .endpoint(handle_document),
        )
        .branch(Update::filter_message().endpoint(handle_text))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

fn denial_text(access: Access) -> Option<String> {
    match access {
        Access::Granted => None,
        Access::AdminsOnly => Some("You can't use this bot".to_string()),
        Access::Disabled(p) => Some(format!("\"{}\" permission disabled for non-admin users", p.as_str())),
    }
}

/// `Some(text)` when `user` may not run something of level `required`.
async fn check_access(state: &BotState, user: Option<&User>, required: Permission) -> Option<String> {
    let Some(user) = user else {
        return Some("You can't use this bot".to_string());
    };

    let is_admin = state.config.is_admin(user.id);
    let access = state.permissions.lock().await.check(required, is_admin);
    if access != Access::Granted {
        info!("Unauthorized use ({}) by {} ({})", required.as_str(), user.first_name, user.id);
    }
    denial_text(access)
}

fn limit_text(limit: Option<i64>) -> String {
    limit.map(|b| format!("{}/s", human_readable(b))).unwrap_or_else(|| "none".into())
}

fn transfer_text(info: &TransferInfo, alt: &AltSpeed) -> String {
    format!(
        "<b>Current speed</b>\n▲ {}/s\n▼ {}/s\n\n\
         <b>Alternative speed limits</b>\n• alt speed: {}\n▲ {}\n▼ {}\n\n\
         <b>Data uploaded/downloaded during this session</b>\n▲ {}\n▼ {}\n\
         • this session's share ratio: {:.2}",
        human_readable(info.up_info_speed),
        human_readable(info.dl_info_speed),
        if alt.enabled { "on" } else { "off" },
        limit_text(alt.up_limit),
        limit_text(alt.dl_limit),
        human_readable(info.up_info_data),
        human_readable(info.dl_info_data),
        info.session_ratio(),
    )
}

async fn reply(state: &BotState, msg: &Message, text: &str) -> Result<MessageId, BotError> {
    Ok(state.telegram.send_message(msg.chat.id, text, Some(msg.id), None).await?)
}

/// Report a failed handler back to the chat instead of dropping it.
async fn report_error(state: &BotState, chat_id: ChatId, err: &BotError) {
    let text = match err {
        BotError::Usage(hint) => hint.clone(),
        other => {
            warn!("Error while running handler: {other}");
            format!(
                "An error occurred while processing the message: <code>{}</code>",
                escape_html(&other.to_string())
            )
        }
    };
    state.telegram.send_message(chat_id, &text, None, None).await.ok();
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let user = msg.from.as_ref();
    info!(
        "/{:?} from {}",
        cmd,
        user.map(|u| u.first_name.as_str()).unwrap_or("unknown")
    );

    if let Some(denied) = check_access(&state, user, cmd.permission()).await {
        reply(&state, &msg, &denied).await.ok();
        return Ok(());
    }

    if let Err(e) = run_command(&state, &msg, cmd).await {
        report_error(&state, msg.chat.id, &e).await;
    }
    Ok(())
}

async fn run_command(state: &BotState, msg: &Message, cmd: Command) -> Result<(), BotError> {
    if let Some(filter) = cmd.list_filter() {
        let torrents = state.qbt.online()?.torrents(filter).await?;
        info!("qBittorrent returned {} {} torrents", torrents.len(), filter.as_str());

        if torrents.is_empty() {
            reply(state, msg, &format!("There is no torrent to be listed for <i>{}</i>", filter.as_str())).await?;
            return Ok(());
        }

        let lines: Vec<String> = torrents.iter().map(|t| t.line()).collect();
        for chunk in split_text(&lines) {
            reply(state, msg, &chunk).await?;
        }
        return Ok(());
    }

    match cmd {
        Command::Start | Command::Help => {
            reply(state, msg, &Command::descriptions().to_string()).await?;
        }
        Command::Filter(query) => {
            let query = query.trim();
            if query.is_empty() {
                return Err(BotError::Usage("Please provide a search term".into()));
            }

            let torrents = state.qbt.online()?.search(query).await?;
            if torrents.is_empty() {
                reply(state, msg, &format!("No results for \"{}\"", escape_html(query))).await?;
                return Ok(());
            }

            let lines: Vec<String> = torrents.iter().map(|t| t.line()).collect();
            for chunk in split_text(&lines) {
                reply(state, msg, &chunk).await?;
            }
        }
        Command::PauseAll => {
            state.qbt.online()?.pause_all().await?;
            reply(state, msg, "Paused all torrents").await?;
        }
        Command::ResumeAll => {
            state.qbt.online()?.resume_all().await?;
            reply(state, msg, "Resumed all torrents").await?;
        }
        Command::AltOn | Command::AltOff => {
            let enable = cmd == Command::AltOn;
            let qbt = state.qbt.online()?;
            let changed = qbt.set_alt_speed(enable).await?;
            let alt = qbt.alt_speed().await?;

            let text = format!(
                "Alternative speed limits {}{} (down: {}, up: {})",
                if alt.enabled { "enabled" } else { "disabled" },
                if changed { "" } else { " (unchanged)" },
                limit_text(alt.dl_limit),
                limit_text(alt.up_limit),
            );
            reply(state, msg, &text).await?;
        }
        Command::AltDown(ref args) | Command::AltUp(ref args) => {
            let key = if matches!(cmd, Command::AltDown(_)) { AltLimit::Download } else { AltLimit::Upload };
            let kbs = parse_kbs(args).map_err(BotError::Usage)?;

            state.qbt.online()?.set_alt_limit(key, kbs).await?;
            reply(state, msg, &format!("<code>{}</code> set to {} kb/s", key.as_str(), kbs)).await?;
        }
        Command::TransferInfo => {
            let qbt = state.qbt.online()?;
            let info = qbt.transfer_info().await?;
            let alt = qbt.alt_speed().await?;
            reply(state, msg, &transfer_text(&info, &alt)).await?;
        }
        Command::Settings => {
            let prefs = state.qbt.online()?.preferences().await?;
            let mut lines: Vec<String> = prefs
                .iter()
                .map(|(k, v)| format!("{}: <code>{}</code>", k, escape_html(&v.to_string())))
                .collect();
            lines.sort();
            for chunk in split_text(&lines) {
                reply(state, msg, &chunk).await?;
            }
        }
        Command::Set(args) => {
            let (key, value) = parse_set(&args).map_err(BotError::Usage)?;
            state.qbt.online()?.set_preference(&key, value.clone()).await?;
            info!("Preference {} set to {}", key, value);
            let text = format!(
                "<b>Setting changed</b>:\n\n<code>{}</code>: <code>{}</code>",
                escape_html(&key),
                escape_html(&value.to_string())
            );
            reply(state, msg, &text).await?;
        }
        Command::FreeSpace => {
            let qbt = state.qbt.online()?;
            let free = qbt.free_space().await?;
            let save_path = qbt.default_save_path().await?;
            let text = format!(
                "<code>{}</code> free, save path: <code>{}</code>",
                human_readable(free),
                escape_html(save_path.trim())
            );
            reply(state, msg, &text).await?;
        }
        Command::Version => {
            let qbt_version = state.qbt.online()?.version().await?;
            let text = format!(
                "qBittorrent <code>{}</code>, bot <code>{}</code>",
                escape_html(qbt_version.trim()),
                env!("CARGO_PKG_VERSION")
            );
            reply(state, msg, &text).await?;
        }
        Command::Permissions => {
            let table = state.permissions.lock().await.to_string();
            reply(state, msg, &format!("<code>{}</code>", escape_html(&table))).await?;
        }
        Command::Pset(args) => {
            let (key, value) = parse_pset(&args).map_err(BotError::Usage)?;
            let Ok(flag) = key.parse::<Flag>() else {
                reply(state, msg, "Wrong key. Use /permissions to see the current permissions config").await?;
                return Ok(());
            };

            let table = {
                let mut perms = state.permissions.lock().await;
                perms.set_flag(flag, value)?;
                perms.to_string()
            };
            info!("Permission {} set to {}", flag.as_str(), value);
            reply(state, msg, &format!("<b>New config</b>:\n\n<code>{}</code>", escape_html(&table))).await?;
        }
        Command::PReset => {
            let table = {
                let mut perms = state.permissions.lock().await;
                perms.reset()?;
                perms.to_string()
            };
            info!("Permissions reset to defaults");
            reply(state, msg, &format!("<b>New config</b>:\n\n<code>{}</code>", escape_html(&table))).await?;
        }
        Command::All
        | Command::Completed
        | Command::Downloading
        | Command::Paused
        | Command::Active
        | Command::Inactive => {}
    }

    Ok(())
}

/// Magnet links and torrent URLs sent as plain text.
async fn handle_text(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text().map(str::trim) else {
        return Ok(());
    };

    if let Some(caps) = TAGS_EDIT.captures(text)
        && let Some(replied) = msg.reply_to_message().and_then(|m| m.text())
        && let Some(hash) = CARD_HASH.captures(replied)
    {
        let add = &caps[1] == "+";
        let tags = parse_tags(&caps[2]);
        let hash = hash[1].to_lowercase();
        let user = msg.from.as_ref();
        info!("Tags edit ({}) from {}", &caps[1], user.map(|u| u.first_name.as_str()).unwrap_or("unknown"));

        if let Some(denied) = check_access(&state, user, Permission::Edit).await {
            reply(&state, &msg, &denied).await.ok();
            return Ok(());
        }
        if let Err(e) = edit_tags(&state, &msg, &hash, &tags, add).await {
            report_error(&state, msg.chat.id, &e).await;
        }
        return Ok(());
    }

    let is_magnet = MAGNET.is_match(text);
    if !is_magnet && !TORRENT_URL.is_match(text) {
        return Ok(());
    }

    let user = msg.from.as_ref();
    info!(
        "{} from {}",
        if is_magnet { "Magnet link" } else { "Torrent url" },
        user.map(|u| u.first_name.as_str()).unwrap_or("unknown")
    );

    if let Some(denied) = check_access(&state, user, Permission::Write).await {
        reply(&state, &msg, &denied).await.ok();
        return Ok(());
    }

    if let Err(e) = add_link(&state, &msg, text, is_magnet).await {
        report_error(&state, msg.chat.id, &e).await;
    }
    Ok(())
}

async fn add_link(state: &BotState, msg: &Message, link: &str, is_magnet: bool) -> Result<(), BotError> {
    state.qbt.online()?.add_urls(link).await?;

    if !is_magnet {
        reply(state, msg, "Torrent url added").await?;
        return Ok(());
    }

    let keyboard = magnet_hash(link).map(|hash| {
        info!("Torrent hash from magnet: {}", hash);
        actions_markup(&hash)
    });
    state
        .telegram
        .send_message(msg.chat.id, "Magnet added", Some(msg.id), keyboard)
        .await?;
    Ok(())
}

const TORRENT_MIME: &str = "application/x-bittorrent";

/// Telegram clients sometimes send `.torrent` files as a generic binary, so
/// the extension is accepted too.
fn is_torrent_document(mime: Option<&str>, file_name: Option<&str>) -> bool {
    mime == Some(TORRENT_MIME) || file_name.is_some_and(|n| n.to_lowercase().ends_with(".torrent"))
}

/// `.torrent` files sent as documents.
async fn handle_document(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let user = msg.from.as_ref();
    info!("Document from {}", user.map(|u| u.first_name.as_str()).unwrap_or("unknown"));

    if let Some(denied) = check_access(&state, user, Permission::Write).await {
        reply(&state, &msg, &denied).await.ok();
        return Ok(());
    }

    let mime = doc.mime_type.as_ref().map(|m| m.essence_str());
    if !is_torrent_document(mime, doc.file_name.as_deref()) {
        reply(&state, &msg, "Please send me a <code>.torrent</code> file").await.ok();
        return Ok(());
    }

    if let Err(e) = add_file(&state, &msg, doc).await {
        report_error(&state, msg.chat.id, &e).await;
    }
    Ok(())
}

async fn add_file(state: &BotState, msg: &Message, doc: &Document) -> Result<(), BotError> {
    let qbt = state.qbt.online()?;
    let data = state.telegram.download(&doc.file.id).await?;
    let file_name = doc.file_name.as_deref().unwrap_or("upload.torrent");

    qbt.add_torrent_file(file_name, data).await?;
    info!("Torrent file {} added", file_name);
    reply(state, msg, "Torrent added").await?;
    Ok(())
}

fn parse_tags(list: &str) -> Vec<String> {
    list.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from).collect()
}

async fn edit_tags(state: &BotState, msg: &Message, hash: &str, tags: &[String], add: bool) -> Result<(), BotError> {
    if tags.is_empty() {
        return Err(BotError::Usage("Pass a comma-separated list of tags".into()));
    }

    let qbt = state.qbt.online()?;
    let torrent = qbt.torrent(hash).await?;
    let hashes = [hash];
    let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
    if add {
        qbt.add_tags(&hashes, &tag_refs).await?;
    } else {
        qbt.remove_tags(&hashes, &tag_refs).await?;
    }

    let text = format!(
        "Tags {} <b>{}</b>: <code>{}</code>",
        if add { "added to" } else { "removed from" },
        escape_html(&torrent.name),
        escape_html(&tags.join(", "))
    );
    reply(state, msg, &text).await?;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let Some((action, hash)) = query.data.as_deref().and_then(parse_callback) else {
        state.telegram.answer_callback(&query, None).await.ok();
        return Ok(());
    };
    info!("Callback {:?} for {} from {}", action, hash, query.from.first_name);

    if let Some(denied) = check_access(&state, Some(&query.from), action.permission()).await {
        state.telegram.answer_callback(&query, Some(&denied)).await.ok();
        return Ok(());
    }

    let toast = match run_action(&state, &query, action, hash).await {
        Ok(toast) => toast,
        Err(BotError::Telegram(SendError::NotModified)) => "Nothing to refresh".to_string(),
        Err(e) => {
            warn!("Callback {:?} failed: {e}", action);
            e.to_string()
        }
    };

    state.telegram.answer_callback(&query, Some(&toast)).await.ok();
    Ok(())
}

fn delete_prompt(name: &str) -> String {
    format!(
        "Are you sure you want to delete <code>{}</code>, <b>with all the connected files included</b>?",
        escape_html(name)
    )
}

async fn run_action(state: &BotState, query: &CallbackQuery, action: Action, hash: &str) -> Result<String, BotError> {
    let qbt = state.qbt.online()?;
    let hashes = [hash];

    let toast = match action {
        Action::Refresh => "Refreshed",
        Action::Pause => {
            qbt.pause(&hashes).await?;
            "Paused"
        }
        Action::Resume => {
            qbt.resume(&hashes).await?;
            "Resumed"
        }
        Action::ForceStart => {
            let torrent = qbt.torrent(hash).await?;
            qbt.set_force_start(&hashes, !torrent.force_start).await?;
            if torrent.force_start { "Force start disabled" } else { "Force start enabled" }
        }
        Action::TopPriority => {
            qbt.top_priority(&hashes).await?;
            "Moved to top of the queue"
        }
        Action::Recheck => {
            qbt.recheck(&hashes).await?;
            "Recheck started"
        }
        Action::Delete => {
            let torrent = qbt.torrent(hash).await?;
            if let Some(message) = query.regular_message() {
                state
                    .telegram
                    .edit_message(message.chat.id, message.id, &delete_prompt(&torrent.name), Some(confirm_delete_markup(hash)))
                    .await?;
            }
            return Ok("Confirmation needed".to_string());
        }
        Action::ConfirmDelete => {
            let torrent = qbt.torrent(hash).await?;
            qbt.delete(&hashes, true).await?;
            info!("Deleted {} with its files", torrent.hash);
            if let Some(message) = query.regular_message() {
                let text = format!("<code>{}</code> deleted (with files)", escape_html(&torrent.name));
                state.telegram.edit_message(message.chat.id, message.id, &text, None).await?;
            }
            return Ok("Deleted".to_string());
        }
    };

    if let Some(message) = query.regular_message() {
        let torrent = qbt.torrent(hash).await?;
        state
            .telegram
            .edit_message(message.chat.id, message.id, &torrent.card(), Some(actions_markup(hash)))
            .await?;
    }
    Ok(toast.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_patterns() {
        assert!(MAGNET.is_match("magnet:?xt=urn:btih:abc"));
        assert!(MAGNET.is_match("MAGNET:?xt=urn:btih:abc"));
        assert!(!MAGNET.is_match("see magnet:?xt"));

        assert!(TORRENT_URL.is_match("https://tracker.example/download/123.torrent"));
        assert!(TORRENT_URL.is_match("http://jackett:9117/dl/abc"));
        assert!(!TORRENT_URL.is_match("https://example.com/page"));
    }

    #[test]
    fn test_tags_edit_patterns() {
        let caps = TAGS_EDIT.captures("+ movies, 4k").unwrap();
        assert_eq!(&caps[1], "+");
        assert_eq!(parse_tags(&caps[2]), vec!["movies", "4k"]);
        assert!(TAGS_EDIT.captures("movies").is_none());
        assert!(parse_tags(" , ").is_empty());

        let card = "• <code>x</code>\n  <b>hash</b>: <code>0123456789ABCDEF0123456789abcdef01234567</code>";
        // the replied text arrives without the html markup
        let plain = card.replace("<b>", "").replace("</b>", "").replace("<code>", "").replace("</code>", "");
        assert_eq!(&CARD_HASH.captures(&plain).unwrap()[1], "0123456789ABCDEF0123456789abcdef01234567");
    }

    #[test]
    fn test_transfer_text() {
        let info: TransferInfo = serde_json::from_str(
            r#"{"dl_info_speed": 2048, "up_info_speed": 0, "dl_info_data": 400, "up_info_data": 100}"#,
        )
        .unwrap();
        let alt = AltSpeed { enabled: true, dl_limit: Some(4096), up_limit: None };

        let text = transfer_text(&info, &alt);
        assert!(text.contains("▼ 2.00 kb/s"));
        assert!(text.contains("• alt speed: on\n▲ none\n▼ 4.00 kb/s"));
        assert!(text.ends_with("share ratio: 0.25"));
    }

    #[test]
    fn test_is_torrent_document() {
        assert!(is_torrent_document(Some("application/x-bittorrent"), None));
        assert!(is_torrent_document(Some("application/octet-stream"), Some("Ubuntu.TORRENT")));
        assert!(!is_torrent_document(Some("application/pdf"), Some("notes.pdf")));
        assert!(!is_torrent_document(None, None));
    }

    #[test]
    fn test_delete_prompt_escapes_name() {
        assert_eq!(
            delete_prompt("a <b>"),
            "Are you sure you want to delete <code>a &lt;b&gt;</code>, <b>with all the connected files included</b>?"
        );
    }

    #[test]
    fn test_denial_text() {
        assert_eq!(denial_text(Access::Granted), None);
        assert_eq!(denial_text(Access::AdminsOnly).as_deref(), Some("You can't use this bot"));
        assert_eq!(
            denial_text(Access::Disabled(Permission::Write)).as_deref(),
            Some("\"write\" permission disabled for non-admin users")
        );
    }
}
