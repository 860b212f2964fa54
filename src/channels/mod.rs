//! Chat platform adapters.
//!
//! Both platforms get the same intake/dispatch control flow; everything
//! platform-specific hides behind `ChannelAdapter`: sending a follow-up
//! message to a deferred conversation, and editing or deleting a message
//! we previously sent.

pub mod discord;
pub mod telegram;

pub use discord::DiscordChannel;
pub use telegram::TelegramChannel;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Discord,
    Telegram,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Telegram => "telegram",
        }
    }
}

/// Where a follow-up message goes. For Discord the interaction token is the
/// delivery credential (webhook follow-ups); for Telegram the chat id alone
/// is enough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub platform: Platform,
    pub conversation_id: String,
    pub interaction_token: Option<String>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Post a follow-up into the deferred conversation. Returns the platform
    /// message id when the API reports one.
    async fn send_followup(
        &self,
        target: &DeliveryTarget,
        text: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Replace the text of a message we sent earlier.
    async fn edit_message(
        &self,
        target: &DeliveryTarget,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<()>;

    /// Remove a message we sent earlier.
    async fn delete_message(&self, target: &DeliveryTarget, message_id: &str)
        -> anyhow::Result<()>;
}

/// Cut a message at the platform's length cap, on a char boundary, with an
/// ellipsis marker when truncation happened.
pub(crate) fn truncate_for_platform(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_owned();
    }
    let mut end = max_len.saturating_sub(1);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_for_platform("hello", 2000), "hello");
    }

    #[test]
    fn long_text_is_cut_with_marker() {
        let text = "a".repeat(2100);
        let cut = truncate_for_platform(&text, 2000);
        assert!(cut.len() <= 2000 + '…'.len_utf8());
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "🦀".repeat(600); // 4 bytes each
        let cut = truncate_for_platform(&text, 2000);
        assert!(std::str::from_utf8(cut.as_bytes()).is_ok());
    }
}
