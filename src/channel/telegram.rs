//! Telegram Bot API channel over plain HTTPS

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{Button, ChatChannel, ChatUpdate, OutgoingMessage};
use crate::actions::Action;
use crate::config::TelegramConfig;
use crate::error::{BridgeError, Result};

/// Pause before polling again after a failed `getUpdates`
const POLL_BACKOFF: Duration = Duration::from_secs(5);

pub struct TelegramChannel {
    client: reqwest::Client,
    /// `<api_base>/bot<token>`
    endpoint: String,
    owner_id: i64,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let poll_timeout = Duration::from_secs(config.poll_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            owner_id: config.owner_id,
            poll_timeout,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{method}", self.endpoint))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(BridgeError::Channel(format!(
                "{method} failed: {}",
                response.description.unwrap_or_default()
            )));
        }
        response
            .result
            .ok_or_else(|| BridgeError::Channel(format!("{method} returned no result")))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout.as_secs(),
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// Long-poll for updates and forward the owner's ones to the control loop.
    /// Returns when the loop has gone away.
    pub async fn poll_updates(&self, tx: mpsc::UnboundedSender<Action>) {
        let mut offset = 0;
        let mut disconnected = false;

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    if !disconnected {
                        disconnected = true;
                        tracing::warn!("telegram connection lost: {e}");
                    }
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };
            if disconnected {
                disconnected = false;
                tracing::info!("telegram connection restored");
            }

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(chat_update) = to_chat_update(update, self.owner_id) else {
                    continue;
                };
                if tx.send(Action::Chat(chat_update)).is_err() {
                    return;
                }
            }
        }
    }
}

/// Keep only the owner's messages and button presses
fn to_chat_update(update: Update, owner_id: i64) -> Option<ChatUpdate> {
    if let Some(query) = update.callback_query {
        if query.from.id != owner_id {
            tracing::debug!(user_id = query.from.id, "callback from non-owner ignored");
            return None;
        }
        let message = query.message?;
        return Some(ChatUpdate::Callback {
            id: query.id,
            data: query.data?,
            chat_id: message.chat.id,
            message_id: message.message_id,
        });
    }

    let message = update.message?;
    let from = message.from.as_ref().map(|u| u.id).unwrap_or_default();
    if from != owner_id {
        tracing::info!(user_id = from, "message from unauthorized user ignored");
        return None;
    }
    let text = message.text?;

    if text == "/start" || text.starts_with("/start ") {
        return Some(ChatUpdate::Start {
            chat_id: message.chat.id,
        });
    }

    Some(ChatUpdate::Text {
        chat_id: message.chat.id,
        message_id: message.message_id,
        text,
        reply_to: message.reply_to_message.map(|m| m.message_id),
    })
}

fn inline_keyboard(buttons: &[Vec<Button>]) -> Value {
    let rows: Vec<Vec<Value>> = buttons
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({"text": b.text, "callback_data": b.callback_data}))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

fn send_message_body(chat_id: i64, message: &OutgoingMessage) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": message.text,
    });
    if let Some(placeholder) = &message.force_reply {
        body["reply_markup"] = json!({
            "force_reply": true,
            "input_field_placeholder": placeholder,
        });
    } else if !message.buttons.is_empty() {
        body["reply_markup"] = inline_keyboard(&message.buttons);
    }
    if let Some(reply_to) = message.reply_to {
        body["reply_to_message_id"] = json!(reply_to);
    }
    body
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<i64> {
        let sent: SentMessage = self
            .call("sendMessage", send_message_body(chat_id, &message))
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        // Result is the edited message or `true`; neither is needed
        self.call::<Value>(
            "editMessageText",
            json!({"chat_id": chat_id, "message_id": message_id, "text": text}),
        )
        .await
        .map(|_| ())
    }

    async fn edit_buttons(
        &self,
        chat_id: i64,
        message_id: i64,
        buttons: Vec<Vec<Button>>,
    ) -> Result<()> {
        self.call::<Value>(
            "editMessageReplyMarkup",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "reply_markup": inline_keyboard(&buttons),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({"callback_query_id": callback_id});
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<Value>("answerCallbackQuery", body)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: i64 = 42;

    fn update(value: Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_owner_reply_becomes_text_update() {
        let raw = update(json!({
            "update_id": 7,
            "message": {
                "message_id": 11,
                "chat": {"id": 5},
                "from": {"id": OWNER},
                "text": "run the linter",
                "reply_to_message": {"message_id": 10, "chat": {"id": 5}}
            }
        }));

        assert_eq!(
            to_chat_update(raw, OWNER),
            Some(ChatUpdate::Text {
                chat_id: 5,
                message_id: 11,
                text: "run the linter".to_string(),
                reply_to: Some(10),
            })
        );
    }

    #[test]
    fn test_start_and_strangers() {
        let start = update(json!({
            "update_id": 1,
            "message": {"message_id": 1, "chat": {"id": 5}, "from": {"id": OWNER}, "text": "/start"}
        }));
        assert_eq!(to_chat_update(start, OWNER), Some(ChatUpdate::Start { chat_id: 5 }));

        let stranger = update(json!({
            "update_id": 2,
            "message": {"message_id": 2, "chat": {"id": 9}, "from": {"id": 1}, "text": "/start"}
        }));
        assert_eq!(to_chat_update(stranger, OWNER), None);
    }

    #[test]
    fn test_callback_query() {
        let raw = update(json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": OWNER},
                "data": "perm:a:1",
                "message": {"message_id": 20, "chat": {"id": 5}}
            }
        }));

        assert_eq!(
            to_chat_update(raw, OWNER),
            Some(ChatUpdate::Callback {
                id: "cb-1".to_string(),
                data: "perm:a:1".to_string(),
                chat_id: 5,
                message_id: 20,
            })
        );
    }

    #[test]
    fn test_send_body_prefers_force_reply() {
        let message = OutgoingMessage::text("Reply to api")
            .with_buttons(vec![vec![Button::new("x", "y")]])
            .with_force_reply("api")
            .reply_to(3);
        let body = send_message_body(5, &message);

        assert_eq!(body["reply_markup"]["force_reply"], true);
        assert_eq!(body["reply_to_message_id"], 3);

        let body = send_message_body(5, &OutgoingMessage::text("hi").with_buttons(vec![vec![
            Button::new("Allow", "perm:a:1"),
        ]]));
        assert_eq!(body["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "perm:a:1");
    }
}
