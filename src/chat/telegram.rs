use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::chat::{ChatEvent, ChatId, ChatTransport, Keyboard, MessageId};

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: ChatRef,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    id: ChatId,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    data: Option<String>,
    message: Option<CallbackMessage>,
}

#[derive(Debug, Deserialize)]
struct CallbackMessage {
    message_id: MessageId,
    chat: ChatRef,
}

fn markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.text, "callback_data": b.data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn into_event(update: Update) -> Option<ChatEvent> {
    if let Some(cb) = update.callback_query {
        let msg = cb.message?;
        return Some(ChatEvent::Callback {
            chat: msg.chat.id,
            message_id: msg.message_id,
            callback_id: cb.id,
            data: cb.data.unwrap_or_default(),
        });
    }
    let msg = update.message?;
    Some(ChatEvent::Text {
        chat: msg.chat.id,
        text: msg.text?,
    })
}

/// Bot API client over plain HTTPS.
pub struct TelegramTransport {
    client: Client,
    base: String,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", API_BASE, token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let resp: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;

        if !resp.ok {
            bail!(
                "Telegram {} error: {}",
                method,
                resp.description.unwrap_or_default()
            );
        }
        resp.result
            .with_context(|| format!("Telegram {} returned no result", method))
    }

    /// Long-poll for updates after `offset`, advancing it past what was read.
    pub async fn poll(&self, offset: &mut i64) -> Result<Vec<ChatEvent>> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                json!({
                    "offset": *offset,
                    "timeout": LONG_POLL_SECS,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;

        let mut events = Vec::with_capacity(updates.len());
        for update in updates {
            *offset = (*offset).max(update.update_id + 1);
            if let Some(event) = into_event(update) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn ignore_unmodified(result: Result<Value>) -> Result<()> {
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("message is not modified") => {
                debug!("Telegram edit skipped: content unchanged");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, chat: ChatId, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageId> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = markup(kb);
        }
        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = markup(kb);
        }
        Self::ignore_unmodified(self.call("editMessageText", body).await)
    }

    async fn edit_keyboard(&self, chat: ChatId, message_id: MessageId, keyboard: Option<&Keyboard>) -> Result<()> {
        let reply_markup = keyboard
            .map(markup)
            .unwrap_or_else(|| json!({ "inline_keyboard": [] }));
        let body = json!({
            "chat_id": chat,
            "message_id": message_id,
            "reply_markup": reply_markup,
        });
        Self::ignore_unmodified(self.call("editMessageReplyMarkup", body).await)
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(t) = text {
            body["text"] = json!(t);
        }
        self.call::<Value>("answerCallbackQuery", body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Button;

    #[test]
    fn keyboard_markup_shape() {
        let kb = Keyboard::new(vec![vec![Button::new("Edit", "edit|s1")]]);
        let v = markup(&kb);
        assert_eq!(v["inline_keyboard"][0][0]["callback_data"], "edit|s1");
    }

    #[test]
    fn updates_become_events() {
        let raw = r#"[
            {"update_id": 10, "message": {"chat": {"id": 5}, "text": "101.5"}},
            {"update_id": 11, "callback_query": {"id": "cb1", "data": "conf|s1",
                "message": {"message_id": 77, "chat": {"id": 5}}}},
            {"update_id": 12, "message": {"chat": {"id": 5}}}
        ]"#;
        let updates: Vec<Update> = serde_json::from_str(raw).unwrap();
        let events: Vec<ChatEvent> = updates.into_iter().filter_map(into_event).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ChatEvent::Callback {
                chat: 5,
                message_id: 77,
                callback_id: "cb1".into(),
                data: "conf|s1".into(),
            }
        );
    }
}
