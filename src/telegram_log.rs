//! tracing layer that forwards warnings and errors to a Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Lines collected within this window go out as one message.
const BATCH_WINDOW: Duration = Duration::from_secs(3);

/// Flush early once this many lines are waiting.
const MAX_BATCH_LINES: usize = 50;

/// Leave room under Telegram's limit for the joined newlines.
const MAX_TEXT: usize = 4000;

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramLogLayer {
    /// Must be called inside the tokio runtime: it spawns the sender task.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut batch = Batch::default();
            // set when the first line of a batch arrives, not moved by later lines
            let mut deadline = Instant::now();

            loop {
                let line = if batch.is_empty() {
                    rx.recv().await
                } else {
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(line) => line,
                        Err(_) => {
                            flush(&bot, chat_id, &mut batch).await;
                            continue;
                        }
                    }
                };

                let Some(line) = line else {
                    flush(&bot, chat_id, &mut batch).await;
                    break;
                };

                if batch.is_empty() {
                    deadline = Instant::now() + BATCH_WINDOW;
                } else if !batch.fits(&line) {
                    flush(&bot, chat_id, &mut batch).await;
                    deadline = Instant::now() + BATCH_WINDOW;
                }
                batch.push(line);

                if batch.is_full() {
                    flush(&bot, chat_id, &mut batch).await;
                }
            }
        });

        Self { tx }
    }
}

/// Lines waiting to be sent, with their joined length.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
    chars: usize,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether `line` can join without pushing the message past the limit.
    fn fits(&self, line: &str) -> bool {
        self.chars + 1 + line.chars().count() <= MAX_TEXT
    }

    fn push(&mut self, line: String) {
        if !self.lines.is_empty() {
            self.chars += 1;
        }
        self.chars += line.chars().count();
        self.lines.push(line);
    }

    fn is_full(&self) -> bool {
        self.lines.len() >= MAX_BATCH_LINES || self.chars >= MAX_TEXT
    }

    fn take(&mut self) -> String {
        self.chars = 0;
        std::mem::take(&mut self.lines).join("\n")
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_TEXT {
        let cut: String = text.chars().take(MAX_TEXT).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Batch) {
    if batch.is_empty() {
        return;
    }
    // a single oversized line is still cut
    let text = truncate(&batch.take());

    // logging from here would loop back into this layer
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn render(self, level: Level, target: &str) -> String {
        let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
        let mut line = format!("{prefix} [{target}] {}", self.message);
        if !self.fields.is_empty() {
            line.push_str(&format!(" ({})", self.fields.join(", ")));
        }
        line
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let level = *meta.level();
        if level > Level::WARN {
            return;
        }
        // teloxide failures reaching Telegram would be reported through Telegram
        if meta.target().starts_with("teloxide") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(visitor.render(level, meta.target())).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let visitor = MessageVisitor {
            message: "job failed".into(),
            fields: vec!["hash = \"abc\"".into()],
        };
        assert_eq!(
            visitor.render(Level::ERROR, "qbtbot::jobs"),
            "❌ [qbtbot::jobs] job failed (hash = \"abc\")"
        );
    }

    #[test]
    fn test_batch_caps() {
        let mut batch = Batch::default();
        for i in 0..MAX_BATCH_LINES - 1 {
            batch.push(format!("line {i}"));
            assert!(!batch.is_full());
        }
        batch.push("last".into());
        assert!(batch.is_full());

        let text = batch.take();
        assert!(batch.is_empty());
        assert_eq!(text.lines().count(), MAX_BATCH_LINES);
        assert!(text.ends_with("\nlast"));
    }

    #[test]
    fn test_batch_respects_text_limit() {
        let mut batch = Batch::default();
        batch.push("x".repeat(3000));
        assert!(batch.fits(&"y".repeat(999)));
        assert!(!batch.fits(&"y".repeat(1000)));

        batch.push("y".repeat(999));
        assert_eq!(batch.chars, MAX_TEXT);
        assert!(batch.is_full());
    }

    #[test]
    fn test_truncate() {
        let long = "x".repeat(5000);
        let out = truncate(&long);
        assert_eq!(out.chars().count(), MAX_TEXT + 3);
        assert_eq!(truncate("short"), "short");
    }
}
