//! Chat channel the bridge talks to the human through

mod telegram;

pub use telegram::TelegramChannel;

use async_trait::async_trait;

use crate::error::Result;

/// Inline button carrying opaque callback data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Outbound chat message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    /// Rows of inline buttons
    pub buttons: Vec<Vec<Button>>,
    /// Ask the client to open a reply box, with this placeholder
    pub force_reply: Option<String>,
    pub reply_to: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn with_force_reply(mut self, placeholder: impl Into<String>) -> Self {
        self.force_reply = Some(placeholder.into());
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Inbound event from the owner's chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    /// `/start`: bind this chat
    Start { chat_id: i64 },
    /// An inline button was pressed
    Callback {
        id: String,
        data: String,
        chat_id: i64,
        message_id: i64,
    },
    /// A text message, possibly answering a force-reply prompt
    Text {
        chat_id: i64,
        message_id: i64,
        text: String,
        reply_to: Option<i64>,
    },
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Send a message, returning its id
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> Result<i64>;

    /// Replace a message's text, dropping its buttons
    async fn edit_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;

    async fn edit_buttons(&self, chat_id: i64, message_id: i64, buttons: Vec<Vec<Button>>)
        -> Result<()>;

    /// Acknowledge a button press, optionally with a toast
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
