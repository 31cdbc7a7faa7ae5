//! Inline keyboards and their callback payloads.

use std::sync::LazyLock;

use regex::Regex;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::storage::Permission;

static MAGNET_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)magnet:\?xt=urn:btih:([a-z0-9]+)").expect("valid regex"));

static INFO_HASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("valid regex"));

/// What a torrent button asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Refresh,
    Pause,
    Resume,
    ForceStart,
    TopPriority,
    Recheck,
    /// Ask before deleting.
    Delete,
    /// Delete together with the downloaded files.
    ConfirmDelete,
}

impl Action {
    const ALL: [Action; 8] = [
        Action::Refresh,
        Action::Pause,
        Action::Resume,
        Action::ForceStart,
        Action::TopPriority,
        Action::Recheck,
        Action::Delete,
        Action::ConfirmDelete,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Action::Refresh => "refresh",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::ForceStart => "forcestart",
            Action::TopPriority => "priority",
            Action::Recheck => "recheck",
            Action::Delete => "delete",
            Action::ConfirmDelete => "confirmdelete",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Action::Refresh => "refresh",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::ForceStart => "force start",
            Action::TopPriority => "max priority",
            Action::Recheck => "recheck",
            Action::Delete => "delete",
            Action::ConfirmDelete => "yes, delete with files",
        }
    }

    /// Level needed to press the button. Refreshing only reads.
    pub fn permission(&self) -> Permission {
        match self {
            Action::Refresh => Permission::Read,
            _ => Permission::Edit,
        }
    }
}

/// Callback data `<action>:<hash>`.
pub fn callback_data(action: Action, hash: &str) -> String {
    format!("{}:{}", action.as_str(), hash)
}

pub fn parse_callback(data: &str) -> Option<(Action, &str)> {
    let (name, hash) = data.split_once(':')?;
    let action = Action::ALL.into_iter().find(|a| a.as_str() == name)?;
    INFO_HASH.is_match(hash).then_some((action, hash))
}

/// Buttons shown under a single torrent.
pub fn actions_markup(hash: &str) -> InlineKeyboardMarkup {
    let button = |a: Action| InlineKeyboardButton::callback(a.label(), callback_data(a, hash));

    InlineKeyboardMarkup::new(vec![
        vec![button(Action::Resume), button(Action::Pause), button(Action::Refresh)],
        vec![button(Action::ForceStart), button(Action::TopPriority), button(Action::Recheck)],
        vec![button(Action::Delete)],
    ])
}

/// Second step of a delete. "no" goes back to the torrent card.
pub fn confirm_delete_markup(hash: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("no, go back", callback_data(Action::Refresh, hash)),
        InlineKeyboardButton::callback(Action::ConfirmDelete.label(), callback_data(Action::ConfirmDelete, hash)),
    ]])
}

/// Info-hash of a magnet link, lowercased, when it is a hex v1 hash.
pub fn magnet_hash(link: &str) -> Option<String> {
    let hash = MAGNET_HASH.captures(link)?.get(1)?.as_str().to_lowercase();
    INFO_HASH.is_match(&hash).then_some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_callback_roundtrip() {
        for action in Action::ALL {
            let data = callback_data(action, HASH);
            // Telegram caps callback data at 64 bytes
            assert!(data.len() <= 64);
            assert_eq!(parse_callback(&data), Some((action, HASH)));
        }
    }

    #[test]
    fn test_parse_callback_rejects_garbage() {
        assert_eq!(parse_callback("pause"), None);
        assert_eq!(parse_callback("explode:0123"), None);
        assert_eq!(parse_callback("pause:not-a-hash"), None);
    }

    #[test]
    fn test_magnet_hash() {
        let link = format!("magnet:?xt=urn:btih:{}&dn=ubuntu", HASH.to_uppercase());
        assert_eq!(magnet_hash(&link).as_deref(), Some(HASH));
        // base32 hashes cannot be matched against the api
        assert_eq!(magnet_hash("magnet:?xt=urn:btih:ABCDEFGHIJKLMNOPQRSTUVWXYZ234567"), None);
        assert_eq!(magnet_hash("https://example.com/file.torrent"), None);
    }

    #[test]
    fn test_confirm_delete_markup() {
        let kb = confirm_delete_markup(HASH);
        assert_eq!(kb.inline_keyboard.len(), 1);

        let payloads: Vec<_> = kb.inline_keyboard[0]
            .iter()
            .map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => parse_callback(data),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![Some((Action::Refresh, HASH)), Some((Action::ConfirmDelete, HASH))]);
    }

    #[test]
    fn test_action_permissions() {
        assert_eq!(Action::Refresh.permission(), Permission::Read);
        assert_eq!(Action::Pause.permission(), Permission::Edit);
        assert_eq!(Action::Delete.permission(), Permission::Edit);
        assert_eq!(Action::ConfirmDelete.permission(), Permission::Edit);
    }

    #[test]
    fn test_actions_markup_rows() {
        let kb = actions_markup(HASH);
        assert_eq!(kb.inline_keyboard.len(), 3);
        assert_eq!(kb.inline_keyboard[0].len(), 3);
    }
}
