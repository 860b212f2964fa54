//! Callback dispatcher: turns a (token, worker result) pair into exactly one
//! chat delivery.
//!
//! `deliver` consumes the pending entry first, so a replayed or forged token
//! is a no-op before any platform call happens. The platform post runs under
//! a hard budget; a failure schedules one detached retry and the caller gets
//! its Ack regardless — a delivery fault must never read as a payment fault.

use crate::channels::{ChannelAdapter, Platform};
use crate::config::Config;
use crate::pagination::{materialized_entry, PaginationStore};
use crate::registry::{Clock, PendingEntry, PendingRegistry};
use crate::sanitize::sanitize;
use crate::worker::{RequestParams, WorkerResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Entry consumed; delivery is done or delegated to the retry task.
    Ack,
    /// Unknown, expired, or already-consumed token. Nothing happened.
    NotFound,
}

pub struct Dispatcher {
    config: Arc<Config>,
    registry: Arc<PendingRegistry>,
    pagination: Arc<PaginationStore>,
    adapters: HashMap<Platform, Arc<dyn ChannelAdapter>>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<PendingRegistry>,
        pagination: Arc<PaginationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            pagination,
            adapters: HashMap::new(),
            clock,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    /// Deliver a worker result to whichever conversation minted `token`.
    pub async fn deliver(&self, token: &str, result: &WorkerResult) -> Delivery {
        let Ok(entry) = self.registry.take(token) else {
            tracing::info!(token = %token, "callback for unknown token dropped");
            return Delivery::NotFound;
        };

        let Some(adapter) = self.adapters.get(&entry.target.platform) else {
            // Payment already happened; all we can do is log loudly.
            tracing::error!(
                platform = entry.target.platform.as_str(),
                "no adapter registered for platform, delivery dropped"
            );
            return Delivery::Ack;
        };

        let text = sanitize(&format_result(&entry, result, self.config.limits.page_size));
        self.post_with_retry(Arc::clone(adapter), &entry, text).await;
        self.cleanup_prompt(Arc::clone(adapter), &entry);
        self.materialize_pagination(&entry, result);

        Delivery::Ack
    }

    /// One budgeted attempt now; on failure, exactly one detached retry
    /// after a pause. Never blocks the caller past the first budget.
    async fn post_with_retry(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        entry: &PendingEntry,
        text: String,
    ) {
        let budget = self.config.delivery_budget();
        match timeout(budget, adapter.send_followup(&entry.target, &text)).await {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => tracing::warn!("delivery attempt failed: {e}, scheduling one retry"),
            Err(_) => tracing::warn!("delivery attempt timed out, scheduling one retry"),
        }

        let retry_delay = self.config.retry_delay();
        let target = entry.target.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry_delay).await;
            match timeout(budget, adapter.send_followup(&target, &text)).await {
                Ok(Ok(_)) => tracing::info!("delivery retry succeeded"),
                Ok(Err(e)) => tracing::warn!("delivery retry failed, giving up: {e}"),
                Err(_) => tracing::warn!("delivery retry timed out, giving up"),
            }
        });
    }

    /// The payment prompt has served its purpose; remove it. Failures here
    /// are cosmetic and log-only.
    fn cleanup_prompt(&self, adapter: Arc<dyn ChannelAdapter>, entry: &PendingEntry) {
        let Some(message_id) = entry.prompt_message_id.clone() else {
            return;
        };
        let target = entry.target.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.delete_message(&target, &message_id).await {
                tracing::debug!("prompt cleanup failed (ignored): {e}");
            }
        });
    }

    /// A delivered search materializes its full result set for `/more`.
    fn materialize_pagination(&self, entry: &PendingEntry, result: &WorkerResult) {
        let (RequestParams::SearchEvents { topic, location }, WorkerResult::Events { formatted }) =
            (&entry.params, result)
        else {
            return;
        };

        let page_size = self.config.limits.page_size;
        self.pagination.replace(
            &entry.target.conversation_id,
            materialized_entry(
                &*self.clock,
                formatted.clone(),
                topic.clone(),
                location.clone(),
                page_size,
                self.config.pagination_ttl(),
            ),
        );
    }
}

/// Render the delivery text. Search results show only the first page; the
/// rest waits behind `/more`.
fn format_result(entry: &PendingEntry, result: &WorkerResult, page_size: usize) -> String {
    match (result, &entry.params) {
        (WorkerResult::Summary { text }, _) => text.clone(),
        (WorkerResult::Events { formatted }, RequestParams::SearchEvents { topic, location }) => {
            let heading = match location {
                Some(location) => format!("Events on {topic} in {location}:"),
                None => format!("Events on {topic}:"),
            };
            let shown = formatted.len().min(page_size);
            let mut text = heading;
            for item in &formatted[..shown] {
                text.push('\n');
                text.push_str(item);
            }
            let remaining = formatted.len() - shown;
            if remaining > 0 {
                text.push_str(&format!("\n\nSend /more for {remaining} more."));
            }
            text
        }
        (WorkerResult::Events { formatted }, _) => formatted.join("\n"),
    }
}
