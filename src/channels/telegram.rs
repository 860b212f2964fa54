use super::{truncate_for_platform, ChannelAdapter, DeliveryTarget, Platform};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

/// Telegram's hard cap for message text.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram adapter over the Bot API. Delivery is keyed by chat id alone.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
    /// Base URL for the Telegram Bot API. Defaults to `https://api.telegram.org`.
    /// Override for local Bot API servers or testing.
    api_base: String,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    /// Override the Telegram Bot API base URL.
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Send with Markdown, falling back to plain text when Telegram rejects
    /// the markup (unbalanced entities in worker output are common).
    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<Option<String>> {
        let text = truncate_for_platform(text, TELEGRAM_MAX_MESSAGE_LENGTH);

        let markdown = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;

        if markdown.status().is_success() {
            return Ok(extract_message_id(&markdown.json().await?));
        }

        let md_status = markdown.status();
        tracing::debug!("Telegram sendMessage with Markdown failed ({md_status}); retrying plain");

        let plain = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        if !plain.status().is_success() {
            let status = plain.status();
            let err = plain.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed (markdown {md_status}; plain {status}): {err}");
        }

        Ok(extract_message_id(&plain.json().await?))
    }
}

fn extract_message_id(body: &serde_json::Value) -> Option<String> {
    body.get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string())
}

/// Telegram message ids are numeric. A non-numeric id is a caller bug; never
/// let it degrade into targeting message 0.
fn numeric_message_id(message_id: &str) -> anyhow::Result<i64> {
    message_id
        .parse()
        .with_context(|| format!("non-numeric Telegram message id: {message_id}"))
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn send_followup(
        &self,
        target: &DeliveryTarget,
        text: &str,
    ) -> anyhow::Result<Option<String>> {
        self.send_text(&target.conversation_id, text).await
    }

    async fn edit_message(
        &self,
        target: &DeliveryTarget,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&json!({
                "chat_id": target.conversation_id,
                "message_id": numeric_message_id(message_id)?,
                "text": truncate_for_platform(text, TELEGRAM_MAX_MESSAGE_LENGTH),
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram editMessageText failed ({status}): {err}");
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        target: &DeliveryTarget,
        message_id: &str,
    ) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.api_url("deleteMessage"))
            .json(&json!({
                "chat_id": target.conversation_id,
                "message_id": numeric_message_id(message_id)?,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram deleteMessage failed ({status}): {body}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> DeliveryTarget {
        DeliveryTarget {
            platform: Platform::Telegram,
            conversation_id: "555".into(),
            interaction_token: None,
        }
    }

    #[test]
    fn api_url_embeds_token_and_method() {
        let ch = TelegramChannel::new("abc:def".into());
        assert_eq!(
            ch.api_url("sendMessage"),
            "https://api.telegram.org/botabc:def/sendMessage"
        );
    }

    #[tokio::test]
    async fn send_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .and(body_partial_json(serde_json::json!({"chat_id": "555"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"ok": true, "result": {"message_id": 42}}),
            ))
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into()).with_api_base(server.uri());
        let id = ch.send_followup(&target(), "hello").await.unwrap();
        assert_eq!(id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn markdown_rejection_falls_back_to_plain() {
        let server = MockServer::start().await;
        // Reject the Markdown attempt...
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .and(body_partial_json(serde_json::json!({"parse_mode": "Markdown"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                serde_json::json!({"ok": false, "description": "can't parse entities"}),
            ))
            .mount(&server)
            .await;
        // ...accept the plain retry.
        Mock::given(method("POST"))
            .and(path("/botT/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"ok": true, "result": {"message_id": 7}}),
            ))
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into()).with_api_base(server.uri());
        let id = ch.send_followup(&target(), "_broken markdown").await.unwrap();
        assert_eq!(id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn non_numeric_message_id_is_an_error_before_any_request() {
        // No mocks mounted: a request reaching the server would surface as a
        // wiremock 404 failure message, not the parse error asserted here.
        let server = MockServer::start().await;
        let ch = TelegramChannel::new("T".into()).with_api_base(server.uri());

        let err = ch.delete_message(&target(), "msg-abc").await.unwrap_err();
        assert!(err.to_string().contains("non-numeric Telegram message id"));

        let err = ch
            .edit_message(&target(), "msg-abc", "updated")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-numeric Telegram message id"));
    }

    #[tokio::test]
    async fn delete_failure_is_an_error_for_the_caller_to_log() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/deleteMessage"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let ch = TelegramChannel::new("T".into()).with_api_base(server.uri());
        assert!(ch.delete_message(&target(), "42").await.is_err());
    }
}
