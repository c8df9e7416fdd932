use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::notify::{Audience, Notifier};

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    channel_post: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

/// One readable inbound message, flattened from whichever update shape
/// carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
}

impl Update {
    /// Channel posts and direct messages are handled alike; photo posts
    /// carry their signal text in the caption.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let raw = self.message.or(self.channel_post)?;
        let text = raw.text.or(raw.caption)?;
        Some(InboundMessage {
            chat_id: raw.chat.id,
            message_id: raw.message_id,
            text,
        })
    }
}

pub struct TelegramClient {
    client: Client,
    token: String,
    channel_id: i64,
    owner_id: i64,
}

impl TelegramClient {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            token: cfg.telegram_bot_token.clone(),
            channel_id: cfg.telegram_channel_id,
            owner_id: cfg.owner_user_id,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    /// Long-polls for updates after `offset`. Returns an empty list when
    /// the poll window passes quietly.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let resp = self
            .client
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
            ])
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .send()
            .await
            .context("getUpdates request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {}: {}", status, body);
        }

        let envelope: ApiResponse<Vec<Update>> = resp
            .json()
            .await
            .context("failed to parse getUpdates response")?;
        if !envelope.ok {
            anyhow::bail!(
                "getUpdates rejected: {}",
                envelope.description.unwrap_or_default()
            );
        }
        Ok(envelope.result.unwrap_or_default())
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.url("sendMessage"))
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("sendMessage request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {}: {}", status, body);
        }

        let envelope: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .context("failed to parse sendMessage response")?;
        if !envelope.ok {
            anyhow::bail!(
                "sendMessage rejected: {}",
                envelope.description.unwrap_or_default()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn notify(&self, audience: Audience, text: &str) {
        let chat_id = match audience {
            Audience::Channel => self.channel_id,
            Audience::Owner => self.owner_id,
        };
        if chat_id == 0 {
            debug!("no chat configured for {audience:?}, dropping notification");
            return;
        }
        if let Err(err) = self.send_message(chat_id, text).await {
            warn!("notification to {audience:?} failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_is_used_directly() {
        let update: Update = serde_json::from_str(
            r#"{"update_id": 7, "message": {"message_id": 42, "chat": {"id": -100123}, "text": "hello"}}"#,
        )
        .unwrap();
        let inbound = update.into_inbound().unwrap();
        assert_eq!(inbound.chat_id, -100123);
        assert_eq!(inbound.message_id, 42);
        assert_eq!(inbound.text, "hello");
    }

    #[test]
    fn channel_posts_fall_back_to_caption() {
        let update: Update = serde_json::from_str(
            r#"{"update_id": 8, "channel_post": {"message_id": 43, "chat": {"id": -100123}, "caption": "STRIKT signal"}}"#,
        )
        .unwrap();
        let inbound = update.into_inbound().unwrap();
        assert_eq!(inbound.text, "STRIKT signal");
    }

    #[test]
    fn updates_without_readable_text_are_dropped() {
        let no_text: Update = serde_json::from_str(
            r#"{"update_id": 9, "message": {"message_id": 44, "chat": {"id": 5}}}"#,
        )
        .unwrap();
        assert!(no_text.into_inbound().is_none());

        let unrelated: Update = serde_json::from_str(r#"{"update_id": 10}"#).unwrap();
        assert!(unrelated.into_inbound().is_none());
    }
}
