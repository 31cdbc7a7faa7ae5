//! Telegram side of the bot: commands, callbacks and message delivery.

pub mod commands;
pub mod handlers;
pub mod keyboards;
pub mod telegram;

use std::fmt;

pub use commands::Command;
pub use handlers::schema;
pub use telegram::{SendError, TelegramClient};

use crate::qbt::QbtError;
use crate::storage::StoreError;

/// Anything a handler or job can fail with. Shown to the user as text.
#[derive(Debug)]
pub enum BotError {
    Qbt(QbtError),
    Store(StoreError),
    Telegram(SendError),
    /// Bad arguments; the text is the usage hint.
    Usage(String),
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotError::Qbt(e) => write!(f, "{e}"),
            BotError::Store(e) => write!(f, "{e}"),
            BotError::Telegram(e) => write!(f, "{e}"),
            BotError::Usage(hint) => write!(f, "{hint}"),
        }
    }
}

impl std::error::Error for BotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BotError::Qbt(e) => Some(e),
            BotError::Store(e) => Some(e),
            BotError::Telegram(e) => Some(e),
            BotError::Usage(_) => None,
        }
    }
}

impl From<QbtError> for BotError {
    fn from(e: QbtError) -> Self {
        BotError::Qbt(e)
    }
}

impl From<StoreError> for BotError {
    fn from(e: StoreError) -> Self {
        BotError::Store(e)
    }
}

impl From<SendError> for BotError {
    fn from(e: SendError) -> Self {
        BotError::Telegram(e)
    }
}
