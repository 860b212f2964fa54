use super::{truncate_for_platform, ChannelAdapter, DeliveryTarget, Platform};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

/// Discord's length cap for interaction follow-up messages.
const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// Discord adapter — delivers through interaction follow-up webhooks, so no
/// bot token is needed: the interaction token carried in the delivery target
/// is the credential, valid for roughly fifteen minutes after the deferral.
pub struct DiscordChannel {
    application_id: String,
    client: reqwest::Client,
    /// Base URL for the Discord API. Override for testing.
    api_base: String,
}

impl DiscordChannel {
    pub fn new(application_id: String) -> Self {
        Self {
            application_id,
            client: reqwest::Client::new(),
            api_base: "https://discord.com/api/v10".to_string(),
        }
    }

    /// Override the Discord API base URL. Useful for testing.
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn webhook_url(&self, interaction_token: &str) -> String {
        format!(
            "{}/webhooks/{}/{interaction_token}",
            self.api_base, self.application_id
        )
    }

    fn interaction_token<'a>(target: &'a DeliveryTarget) -> anyhow::Result<&'a str> {
        target
            .interaction_token
            .as_deref()
            .context("Discord delivery target has no interaction token")
    }
}

#[async_trait]
impl ChannelAdapter for DiscordChannel {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn send_followup(
        &self,
        target: &DeliveryTarget,
        text: &str,
    ) -> anyhow::Result<Option<String>> {
        let token = Self::interaction_token(target)?;
        let url = format!("{}?wait=true", self.webhook_url(token));
        let body = json!({ "content": truncate_for_platform(text, DISCORD_MAX_MESSAGE_LENGTH) });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Discord follow-up failed ({status}): {err}");
        }

        let message: serde_json::Value = resp.json().await?;
        Ok(message
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_owned))
    }

    async fn edit_message(
        &self,
        target: &DeliveryTarget,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        let token = Self::interaction_token(target)?;
        let url = format!("{}/messages/{message_id}", self.webhook_url(token));
        let body = json!({ "content": truncate_for_platform(text, DISCORD_MAX_MESSAGE_LENGTH) });

        let resp = self.client.patch(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("Discord edit failed ({status}): {err}");
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        target: &DeliveryTarget,
        message_id: &str,
    ) -> anyhow::Result<()> {
        let token = Self::interaction_token(target)?;
        let url = format!("{}/messages/{message_id}", self.webhook_url(token));

        let resp = self.client.delete(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Discord delete failed ({status})");
        }
        Ok(())
    }
}
