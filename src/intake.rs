//! Command intake: one generic pipeline behind both platforms.
//!
//! The platform webhook handler has already emitted the deferred
//! acknowledgment by the time `handle_command` runs, so everything here is
//! post-deferral: any failure must surface as a follow-up message in the
//! conversation rather than vanish into a log line. The handler side stays
//! free of network waits; this side does all of them.

use crate::channels::{ChannelAdapter, DeliveryTarget};
use crate::config::Config;
use crate::pagination::{NextPage, PaginationStore};
use crate::payment::{GateOutcome, PaymentChallenge, PaymentGate};
use crate::registry::{mint_token, pending_entry, Clock, PendingRegistry};
use crate::sanitize::sanitize;
use crate::worker::{RequestParams, WorkerResult};
use std::sync::Arc;

/// A parsed, not-yet-validated chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Summarise { lookback_minutes: Option<u32> },
    SearchEvents { topic: String, location: Option<String> },
    More,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("That doesn't look like a number of minutes. Try `/summarise 60`.")]
    BadLookback,
    #[error("Tell me what to search for, e.g. `/search_events on ai in london`.")]
    MissingTopic,
}

/// Parse a Telegram-style text command. `None` means the text is not a
/// command this bot owns (plain chatter, someone else's slash command).
pub fn parse_command(text: &str) -> Option<Result<Command, ValidationError>> {
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    // Group chats suffix commands with @botname.
    let base = command.split('@').next().unwrap_or(command);

    match base {
        "/summarise" | "/summarize" => {
            let lookback = match parts.next() {
                Some(raw) => match raw.parse::<u32>() {
                    Ok(minutes) => Some(minutes),
                    Err(_) => return Some(Err(ValidationError::BadLookback)),
                },
                None => None,
            };
            Some(Ok(Command::Summarise {
                lookback_minutes: lookback,
            }))
        }
        "/search_events" => {
            let rest: Vec<&str> = parts.collect();
            // Accept `/search_events on <topic> in <location>` and the
            // shorter `/search_events <topic>`.
            let rest = if rest.first() == Some(&"on") {
                &rest[1..]
            } else {
                &rest[..]
            };
            if rest.is_empty() {
                return Some(Err(ValidationError::MissingTopic));
            }
            let (topic_words, location_words) = match rest.iter().position(|w| *w == "in") {
                Some(pos) if pos > 0 && pos < rest.len() - 1 => (&rest[..pos], Some(&rest[pos + 1..])),
                _ => (&rest[..], None),
            };
            let topic = topic_words.join(" ");
            if topic.is_empty() {
                return Some(Err(ValidationError::MissingTopic));
            }
            Some(Ok(Command::SearchEvents {
                topic,
                location: location_words.map(|w| w.join(" ")),
            }))
        }
        "/more" => Some(Ok(Command::More)),
        _ => None,
    }
}

pub struct Intake {
    config: Arc<Config>,
    registry: Arc<PendingRegistry>,
    pagination: Arc<PaginationStore>,
    gate: Arc<PaymentGate>,
    clock: Arc<dyn Clock>,
}

impl Intake {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<PendingRegistry>,
        pagination: Arc<PaginationStore>,
        gate: Arc<PaymentGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            pagination,
            gate,
            clock,
        }
    }

    /// Resolve normalized request parameters from a command, applying the
    /// configured lookback clamp.
    pub fn normalize(&self, command: &Command) -> Option<RequestParams> {
        match command {
            Command::Summarise { lookback_minutes } => Some(RequestParams::Summarise {
                lookback_minutes: self.config.clamp_lookback(
                    lookback_minutes.unwrap_or(self.config.limits.lookback_default_minutes),
                ),
            }),
            Command::SearchEvents { topic, location } => Some(RequestParams::SearchEvents {
                topic: topic.clone(),
                location: location.clone(),
            }),
            Command::More => None,
        }
    }

    /// Run a command whose deferred acknowledgment already went out.
    pub async fn handle_command(
        &self,
        adapter: &dyn ChannelAdapter,
        target: DeliveryTarget,
        command: Command,
    ) {
        if command == Command::More {
            self.handle_more(adapter, &target).await;
            return;
        }

        // Non-`More` commands always normalize.
        let Some(params) = self.normalize(&command) else {
            return;
        };

        if let Err(e) = self.gate_and_prompt(adapter, &target, params).await {
            tracing::error!(
                platform = target.platform.as_str(),
                conversation = %target.conversation_id,
                "intake failed after deferral: {e}"
            );
            self.followup_best_effort(
                adapter,
                &target,
                "Something went wrong setting up your request. Please try again.",
            )
            .await;
        }
    }

    async fn gate_and_prompt(
        &self,
        adapter: &dyn ChannelAdapter,
        target: &DeliveryTarget,
        params: RequestParams,
    ) -> anyhow::Result<()> {
        let token = mint_token(&target.conversation_id);
        let resource = self
            .config
            .paid_resource_url(&token, &params.to_query());

        match self.gate.invoke(&params, &resource, None).await? {
            GateOutcome::Challenge(challenge) => {
                let entry = pending_entry(
                    &*self.clock,
                    target.clone(),
                    params,
                    self.config.pending_ttl(),
                );
                self.registry.put(&token, entry)?;

                let prompt = payment_prompt(&challenge, self.config.limits.pending_ttl_secs);
                let message_id = adapter.send_followup(target, &prompt).await?;
                if let Some(id) = message_id {
                    self.registry.set_prompt_message(&token, &id);
                }
                tracing::info!(token = %token, "payment prompt sent, pending entry stored");
                Ok(())
            }
            // The gate only produces a result when a proof was attached, and
            // intake never attaches one.
            GateOutcome::Result { result, .. } => {
                tracing::error!(
                    conversation = %target.conversation_id,
                    "payment gate produced a result for a proofless invocation"
                );
                self.send_result_inline(adapter, target, &result).await
            }
        }
    }

    /// Send a worker result straight into the conversation, skipping the
    /// prompt/registry cycle.
    async fn send_result_inline(
        &self,
        adapter: &dyn ChannelAdapter,
        target: &DeliveryTarget,
        result: &WorkerResult,
    ) -> anyhow::Result<()> {
        let text = sanitize(&result_preview(result));
        adapter.send_followup(target, &text).await?;
        Ok(())
    }

    async fn handle_more(&self, adapter: &dyn ChannelAdapter, target: &DeliveryTarget) {
        let page = self
            .pagination
            .advance(&target.conversation_id, self.config.limits.page_size);

        let text = match page {
            None => "No active search to page through. Run /search_events first.".to_owned(),
            Some(NextPage::Exhausted) => {
                "You've seen all the events for this search. Start a new one with /search_events."
                    .to_owned()
            }
            Some(NextPage::Page { items, remaining }) => {
                let mut text = items.join("\n");
                if remaining > 0 {
                    text.push_str(&format!("\n\nSend /more for {remaining} more."));
                }
                text
            }
        };

        self.followup_best_effort(adapter, target, &text).await;
    }

    /// Deliver a validation error through the follow-up channel when the
    /// deferral has already been acknowledged.
    pub async fn report_validation_error(
        &self,
        adapter: &dyn ChannelAdapter,
        target: &DeliveryTarget,
        error: &ValidationError,
    ) {
        self.followup_best_effort(adapter, target, &error.to_string())
            .await;
    }

    async fn followup_best_effort(
        &self,
        adapter: &dyn ChannelAdapter,
        target: &DeliveryTarget,
        text: &str,
    ) {
        if let Err(e) = adapter.send_followup(target, text).await {
            tracing::warn!(
                platform = target.platform.as_str(),
                conversation = %target.conversation_id,
                "follow-up send failed: {e}"
            );
        }
    }
}

fn result_preview(result: &WorkerResult) -> String {
    match result {
        WorkerResult::Summary { text } => text.clone(),
        WorkerResult::Events { formatted } => formatted.join("\n"),
    }
}

/// The user-facing payment prompt. The resource URL embeds the correlation
/// token and the request parameters.
fn payment_prompt(challenge: &PaymentChallenge, ttl_secs: u64) -> String {
    format!(
        "💸 Payment required for your {}.\n\
         Amount: {} ({} on {})\n\
         Pay here: {}\n\
         This link expires in {} minutes.",
        challenge.description,
        challenge.max_amount_required,
        challenge.asset,
        challenge.network,
        challenge.resource,
        ttl_secs / 60,
    )
}
