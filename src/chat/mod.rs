pub mod telegram;

pub use telegram::TelegramTransport;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Inline keyboard, row by row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Text {
        chat: ChatId,
        text: String,
    },
    Callback {
        chat: ChatId,
        message_id: MessageId,
        callback_id: String,
        data: String,
    },
}

/// Outbound side of the chat platform. Message text is HTML.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat: ChatId, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageId>;
    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;
    async fn edit_keyboard(&self, chat: ChatId, message_id: MessageId, keyboard: Option<&Keyboard>) -> Result<()>;
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

/// Fire-and-forget delivery of text to an operator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, chat: ChatId, text: &str);
}

#[async_trait]
impl<T: ChatTransport> NotificationSink for T {
    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.send_message(chat, text, None).await {
            warn!("Failed to notify chat {}: {:#}", chat, e);
        }
    }
}
