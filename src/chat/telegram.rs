// src/chat/telegram.rs
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::types::{OutgoingMessage, Update};
use super::ChatApi;
use crate::error::ChatError;
use crate::shutdown;

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Envelope every Bot API method answers with, including on HTTP 4xx.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramApi {
    http: reqwest::Client,
    base: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(base: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", base.trim_end_matches('/'), token),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> Result<T, ChatError> {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?
            .json()
            .await?;
        if resp.ok {
            return resp.result.ok_or_else(|| ChatError::Api {
                description: format!("{method}: ok without result"),
            });
        }
        let description = resp.description.unwrap_or_default();
        if description.to_ascii_lowercase().contains("message is too long") {
            Err(ChatError::MessageTooLong)
        } else {
            Err(ChatError::Api { description })
        }
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChatError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": LONG_POLL_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
            Duration::from_secs(LONG_POLL_SECS + 10),
        )
        .await
    }
}

#[async_trait::async_trait]
impl ChatApi for TelegramApi {
    async fn send(&self, msg: &OutgoingMessage) -> Result<i64, ChatError> {
        let sent: SentMessage = self
            .call("sendMessage", msg, Duration::from_secs(15))
            .await?;
        Ok(sent.message_id)
    }

    async fn delete(&self, chat_id: i64, message_id: i64) -> Result<(), ChatError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
                Duration::from_secs(15),
            )
            .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), ChatError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &json!({ "callback_query_id": callback_id }),
                Duration::from_secs(15),
            )
            .await?;
        Ok(())
    }
}

/// Pull updates into `tx` until shutdown or until the receiver goes away.
///
/// An in-flight long poll is abandoned on shutdown; since its offset was
/// never confirmed, Telegram redelivers those updates on the next start.
pub fn spawn_update_stream(
    api: Arc<TelegramApi>,
    tx: mpsc::UnboundedSender<Update>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut offset = 0i64;
        loop {
            let batch = tokio::select! {
                _ = shutdown::requested(&mut shutdown_rx) => break,
                r = api.get_updates(offset) => r,
            };
            match batch {
                Ok(updates) => {
                    for u in updates {
                        offset = offset.max(u.update_id + 1);
                        if tx.send(u).is_err() {
                            tracing::info!(target: "chat", "update consumer gone, stopping");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "chat", error = %e, "getUpdates failed");
                    tokio::select! {
                        _ = shutdown::requested(&mut shutdown_rx) => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!(target: "chat", "update stream stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_decodes() {
        let r: ApiResponse<SentMessage> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: message is too long"}"#,
        )
        .unwrap();
        assert!(!r.ok);
        assert!(r.result.is_none());
        assert!(r.description.unwrap().contains("message is too long"));
    }

    #[test]
    fn base_url_embeds_token() {
        let api = TelegramApi::with_base_url("http://localhost:1/", "123:abc").unwrap();
        assert_eq!(api.base, "http://localhost:1/bot123:abc");
    }
}
