//! The payment-gated worker: an opaque content generator behind a trait.
//!
//! The gate only needs a result-producing entrypoint; what "summarise" or
//! "search events" actually do lives in a separate service reached over
//! HTTP. Tests substitute the trait with canned outputs.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Normalized parameters extracted by command intake. These travel inside
/// the pending entry and, query-encoded, inside the payment resource URL so
/// the paid request is self-describing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParams {
    Summarise { lookback_minutes: u32 },
    SearchEvents { topic: String, location: Option<String> },
}

impl RequestParams {
    /// Query-string form embedded in the payment resource URL.
    pub fn to_query(&self) -> String {
        match self {
            Self::Summarise { lookback_minutes } => {
                format!("op=summarise&minutes={lookback_minutes}")
            }
            Self::SearchEvents { topic, location } => {
                let mut query = format!("op=search_events&topic={}", urlencoding::encode(topic));
                if let Some(location) = location {
                    query.push_str(&format!("&location={}", urlencoding::encode(location)));
                }
                query
            }
        }
    }

    /// Short human-readable description used in prompts and challenges.
    pub fn describe(&self) -> String {
        match self {
            Self::Summarise { lookback_minutes } => {
                format!("chat summary of the last {lookback_minutes} minutes")
            }
            Self::SearchEvents { topic, location } => match location {
                Some(location) => format!("event search: {topic} in {location}"),
                None => format!("event search: {topic}"),
            },
        }
    }
}

/// What the worker produced. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResult {
    Summary { text: String },
    Events { formatted: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker rejected the request. Surfaced to the payer unsettled.
    #[error("worker rejected request: {0}")]
    Client(String),
    /// The worker was unreachable or failed mid-request.
    #[error("worker failed: {0}")]
    Upstream(String),
}

#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, params: &RequestParams) -> Result<WorkerResult, WorkerError>;
}

/// HTTP client for the worker service.
pub struct HttpWorker {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWorker {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn request_body(params: &RequestParams) -> serde_json::Value {
        match params {
            RequestParams::Summarise { lookback_minutes } => json!({
                "op": "summarise",
                "lookback_minutes": lookback_minutes,
            }),
            RequestParams::SearchEvents { topic, location } => json!({
                "op": "search_events",
                "topic": topic,
                "location": location,
            }),
        }
    }
}

#[async_trait]
impl Worker for HttpWorker {
    async fn invoke(&self, params: &RequestParams) -> Result<WorkerResult, WorkerError> {
        let url = format!("{}/invoke", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&Self::request_body(params))
            .send()
            .await
            .map_err(|e| WorkerError::Upstream(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| WorkerError::Upstream(format!("bad worker response: {e}")))?;

        if status.is_client_error() {
            let reason = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unspecified")
                .to_owned();
            return Err(WorkerError::Client(reason));
        }
        if !status.is_success() {
            return Err(WorkerError::Upstream(format!("worker returned {status}")));
        }

        if let Some(text) = body.get("summary").and_then(|s| s.as_str()) {
            return Ok(WorkerResult::Summary {
                text: text.to_owned(),
            });
        }
        if let Some(events) = body.get("events").and_then(|e| e.as_array()) {
            let formatted = events
                .iter()
                .filter_map(|e| e.as_str().map(str::to_owned))
                .collect();
            return Ok(WorkerResult::Events { formatted });
        }

        Err(WorkerError::Upstream(
            "worker response carries neither summary nor events".into(),
        ))
    }
}
