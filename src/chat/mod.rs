// src/chat/mod.rs
//! Operator chat: Telegram transport, message rendering and the command
//! dispatcher.

pub mod callback;
pub mod dialog;
pub mod dispatcher;
pub mod render;
pub mod telegram;
pub mod types;

use crate::error::ChatError;
use types::OutgoingMessage;

pub use dispatcher::Dispatcher;
pub use telegram::TelegramApi;

/// Outbound half of the chat service.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Returns the id of the sent message.
    async fn send(&self, msg: &OutgoingMessage) -> Result<i64, ChatError>;

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError>;

    /// Stop the button spinner on the operator's client.
    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError>;
}

/// Send plain text, logging instead of failing. For notices where nobody is
/// left to handle the error.
pub async fn send_notice(chat: &dyn ChatApi, chat_id: i64, text: &str) {
    if let Err(e) = chat.send(&OutgoingMessage::text(chat_id, text)).await {
        tracing::warn!(target: "chat", error = %e, "failed to send notice");
    }
}
