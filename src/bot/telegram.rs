//! Telegram client using teloxide.

use std::fmt;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardMarkup, MessageId, ParseMode, ReplyParameters};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

/// Errors from the Bot API, with the harmless "message is not modified"
/// split out so callers can ignore it.
#[derive(Debug)]
pub enum SendError {
    NotModified,
    Api(String),
}

impl From<RequestError> for SendError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Api(ApiError::MessageNotModified) => SendError::NotModified,
            other => SendError::Api(other.to_string()),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NotModified => write!(f, "message is not modified"),
            SendError::Api(e) => write!(f, "Telegram error: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send an HTML message without link previews.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, SendError> {
        let mut request = self
            .bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview());

        if let Some(msg_id) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(msg_id));
        }
        if let Some(kb) = keyboard {
            request = request.reply_markup(kb);
        }

        request.await.map(|msg| msg.id).map_err(|e| {
            let err = SendError::from(e);
            warn!("Failed to send: {err}");
            err
        })
    }

    /// Send without a notification sound, used for background reports.
    pub async fn send_silent(&self, chat_id: ChatId, text: &str) -> Result<MessageId, SendError> {
        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview())
            .disable_notification(true)
            .await
            .map(|msg| msg.id)
            .map_err(|e| {
                let err = SendError::from(e);
                warn!("Failed to send: {err}");
                err
            })
    }

    /// Replace the text (and keyboard) of an existing message.
    pub async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), SendError> {
        let mut request = self
            .bot
            .edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .link_preview_options(no_preview());

        if let Some(kb) = keyboard {
            request = request.reply_markup(kb);
        }

        match request.await.map_err(SendError::from) {
            Ok(_) => Ok(()),
            Err(SendError::NotModified) => {
                debug!("Edit of msg {} in chat {} was a no-op", message_id, chat_id);
                Err(SendError::NotModified)
            }
            Err(e) => {
                warn!("Failed to edit message: {e}");
                Err(e)
            }
        }
    }

    /// Download a file the user sent, by file id.
    pub async fn download(&self, file_id: &FileId) -> Result<Vec<u8>, SendError> {
        let file = self.bot.get_file(file_id.clone()).await.map_err(|e| {
            let err = SendError::from(e);
            warn!("Failed to get file info: {err}");
            err
        })?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| SendError::Api(format!("failed to download file: {e}")))?;

        info!("📥 Downloaded file ({} bytes)", data.len());
        Ok(data)
    }

    /// Answer a callback query, optionally with a toast text.
    pub async fn answer_callback(&self, query: &CallbackQuery, text: Option<&str>) -> Result<(), SendError> {
        let mut request = self.bot.answer_callback_query(query.id.clone());
        if let Some(text) = text {
            request = request.text(text);
        }

        request.await.map(|_| ()).map_err(|e| {
            let err = SendError::from(e);
            warn!("Failed to answer callback: {err}");
            err
        })
    }
}

fn no_preview() -> teloxide::types::LinkPreviewOptions {
    teloxide::types::LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_modified_is_distinguished() {
        let err = SendError::from(RequestError::Api(ApiError::MessageNotModified));
        assert!(matches!(err, SendError::NotModified));

        let err = SendError::from(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, SendError::Api(_)));
    }
}
