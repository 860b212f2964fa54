//! Axum HTTP gateway.
//!
//! Four inbound surfaces: the Discord interactions webhook, the Telegram
//! update webhook, the x402-gated `/paid/{token}` resource, and the
//! `/callback` payment-event report. The webhook handlers own the deferred
//! acknowledgment and therefore never await a network call — all real work
//! is spawned and supervised.

use crate::channels::{ChannelAdapter, DeliveryTarget, DiscordChannel, Platform, TelegramChannel};
use crate::config::Config;
use crate::dispatch::{Delivery, Dispatcher};
use crate::intake::{parse_command, Command, Intake};
use crate::pagination::PaginationStore;
use crate::payment::{
    encode_payment_response, GateError, GateOutcome, HttpFacilitator, PaymentGate,
};
use crate::reaper::spawn_reaper;
use crate::registry::{Clock, PendingRegistry, SystemClock};
use crate::security::{constant_time_eq, verify_signature};
use crate::worker::{HttpWorker, RequestParams, WorkerResult};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — webhook payloads are small.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s) — covers the facilitator and worker round trips
/// behind `/paid/{token}`; the webhook handlers answer in microseconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<PendingRegistry>,
    pub pagination: Arc<PaginationStore>,
    pub gate: Arc<PaymentGate>,
    pub dispatcher: Arc<Dispatcher>,
    pub intake: Arc<Intake>,
    pub discord: Arc<dyn ChannelAdapter>,
    pub telegram: Arc<dyn ChannelAdapter>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/interactions/discord", post(handle_discord_interaction))
        .route("/webhook/telegram", post(handle_telegram_webhook))
        .route("/paid/{token}", get(handle_paid).post(handle_paid))
        .route("/callback", post(handle_callback))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Wire up the production state and serve until ctrl-c.
pub async fn run_gateway(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let registry = Arc::new(PendingRegistry::new(Arc::clone(&clock)));
    let pagination = Arc::new(PaginationStore::new(Arc::clone(&clock)));

    let facilitator = Arc::new(HttpFacilitator::new(config.payment.facilitator_url.clone()));
    let worker = Arc::new(HttpWorker::new(
        config.worker.url.clone(),
        Duration::from_secs(config.worker.timeout_secs),
    ));
    let gate = Arc::new(PaymentGate::new(
        config.payment.clone(),
        facilitator,
        worker,
    ));

    let discord: Arc<dyn ChannelAdapter> =
        Arc::new(DiscordChannel::new(config.discord.application_id.clone()));
    let telegram: Arc<dyn ChannelAdapter> =
        Arc::new(TelegramChannel::new(config.telegram.bot_token.clone()));

    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&pagination),
            Arc::clone(&clock),
        )
        .with_adapter(Arc::clone(&discord))
        .with_adapter(Arc::clone(&telegram)),
    );
    let intake = Arc::new(Intake::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&pagination),
        Arc::clone(&gate),
        Arc::clone(&clock),
    ));

    spawn_reaper(
        Arc::clone(&registry),
        Arc::clone(&pagination),
        Arc::clone(&clock),
        config.reaper_interval(),
    );

    if config.telegram.webhook_secret.is_empty() {
        tracing::warn!("telegram webhook secret not configured; updates are accepted unchecked");
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("gateway listening on {addr}");

    let state = AppState {
        config,
        registry,
        pagination,
        gate,
        dispatcher,
        intake,
        discord,
        telegram,
    };

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════
// HANDLERS
// ══════════════════════════════════════════════════════════════════════════

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /interactions/discord
///
/// Discord's three-second response contract is satisfied by the HTTP
/// response itself: PONG for pings, a type-5 deferral for commands. No
/// network call happens before the response is decided.
async fn handle_discord_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_str(&headers, "X-Signature-Ed25519");
    let timestamp = header_str(&headers, "X-Signature-Timestamp");
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return (StatusCode::UNAUTHORIZED, "missing signature headers").into_response();
    };

    if !verify_signature(&state.config.discord.public_key, &body, signature, timestamp) {
        tracing::warn!("discord interaction with bad signature rejected");
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }

    let Ok(interaction) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed interaction").into_response();
    };

    match interaction.get("type").and_then(serde_json::Value::as_u64) {
        // PING
        Some(1) => Json(serde_json::json!({ "type": 1 })).into_response(),
        // APPLICATION_COMMAND
        Some(2) => {
            let command = match discord_command(&interaction) {
                Ok(command) => command,
                // Pre-deferral: a visible inline error, never a dangling deferral.
                Err(message) => return discord_inline_reply(&message),
            };

            let target = DeliveryTarget {
                platform: Platform::Discord,
                conversation_id: interaction
                    .get("channel_id")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                interaction_token: interaction
                    .get("token")
                    .and_then(|t| t.as_str())
                    .map(str::to_owned),
            };

            let intake = Arc::clone(&state.intake);
            let adapter = Arc::clone(&state.discord);
            tokio::spawn(async move {
                intake.handle_command(&*adapter, target, command).await;
            });

            // DEFERRED_CHANNEL_MESSAGE_WITH_SOURCE
            Json(serde_json::json!({ "type": 5 })).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, "unsupported interaction type").into_response(),
    }
}

/// Extract a command from a Discord slash-command payload.
fn discord_command(interaction: &serde_json::Value) -> Result<Command, String> {
    let data = interaction.get("data").unwrap_or(&serde_json::Value::Null);
    let name = data.get("name").and_then(|n| n.as_str()).unwrap_or("");

    let option = |key: &str| -> Option<&serde_json::Value> {
        data.get("options")?
            .as_array()?
            .iter()
            .find(|o| o.get("name").and_then(|n| n.as_str()) == Some(key))?
            .get("value")
    };

    match name {
        "summarise" | "summarize" => Ok(Command::Summarise {
            lookback_minutes: option("minutes")
                .and_then(serde_json::Value::as_u64)
                .and_then(|m| u32::try_from(m).ok()),
        }),
        "search_events" => {
            let topic = option("topic")
                .and_then(|t| t.as_str())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| "Tell me what to search for with the topic option.".to_owned())?;
            Ok(Command::SearchEvents {
                topic: topic.to_owned(),
                location: option("location")
                    .and_then(|l| l.as_str())
                    .map(str::to_owned),
            })
        }
        "more" => Ok(Command::More),
        other => Err(format!("Unknown command: /{other}")),
    }
}

/// Immediate (non-deferred) ephemeral reply. Flag 64 = EPHEMERAL.
fn discord_inline_reply(message: &str) -> Response {
    Json(serde_json::json!({
        "type": 4,
        "data": { "content": message, "flags": 64 },
    }))
    .into_response()
}

/// POST /webhook/telegram
///
/// Telegram's contract is simply a fast 200; that response is the deferred
/// acknowledgment, and everything else runs spawned.
async fn handle_telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<serde_json::Value>,
) -> Response {
    let secret = &state.config.telegram.webhook_secret;
    if !secret.is_empty() {
        let presented = header_str(&headers, "X-Telegram-Bot-Api-Secret-Token").unwrap_or("");
        if !constant_time_eq(presented, secret) {
            tracing::warn!("telegram update with bad secret token rejected");
            return (StatusCode::UNAUTHORIZED, "bad secret token").into_response();
        }
    }

    let message = update.get("message").unwrap_or(&serde_json::Value::Null);
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64);
    let text = message.get("text").and_then(|t| t.as_str());

    let (Some(chat_id), Some(text)) = (chat_id, text) else {
        // Not a text message; nothing for us.
        return Json(serde_json::json!({ "ok": true })).into_response();
    };

    let target = DeliveryTarget {
        platform: Platform::Telegram,
        conversation_id: chat_id.to_string(),
        interaction_token: None,
    };

    match parse_command(text) {
        None => {}
        Some(Ok(command)) => {
            let intake = Arc::clone(&state.intake);
            let adapter = Arc::clone(&state.telegram);
            tokio::spawn(async move {
                intake.handle_command(&*adapter, target, command).await;
            });
        }
        Some(Err(validation)) => {
            let intake = Arc::clone(&state.intake);
            let adapter = Arc::clone(&state.telegram);
            tokio::spawn(async move {
                intake
                    .report_validation_error(&*adapter, &target, &validation)
                    .await;
            });
        }
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}

#[derive(Debug, Deserialize)]
struct PaidQuery {
    op: String,
    minutes: Option<u32>,
    topic: Option<String>,
    location: Option<String>,
}

/// GET|POST /paid/{token}
///
/// The x402-gated resource named in the payment prompt. Without an
/// `X-PAYMENT` header this returns the 402 challenge; with a verified proof
/// it runs the worker, hands the result to the dispatcher for chat
/// delivery, and returns the result to the payer as well.
async fn handle_paid(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<PaidQuery>,
    headers: HeaderMap,
) -> Response {
    let params = match paid_params(&state.config, &query) {
        Ok(params) => params,
        Err(message) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": message })),
            )
                .into_response()
        }
    };

    let resource = state.config.paid_resource_url(&token, &params.to_query());
    let payment_header = header_str(&headers, "X-PAYMENT");

    match state.gate.invoke(&params, &resource, payment_header).await {
        Ok(GateOutcome::Challenge(challenge)) => payment_required(
            "X-PAYMENT header is required",
            Some(challenge),
        ),
        Ok(GateOutcome::Result { result, receipt }) => {
            // Chat delivery is the dispatcher's problem from here; the
            // paying client gets its result either way.
            let dispatcher = Arc::clone(&state.dispatcher);
            let delivered_result = result.clone();
            let delivered_token = token.clone();
            tokio::spawn(async move {
                if dispatcher.deliver(&delivered_token, &delivered_result).await
                    == Delivery::NotFound
                {
                    tracing::warn!(token = %delivered_token, "paid result arrived after expiry");
                }
            });

            let mut response = Json(paid_body(&result)).into_response();
            if let Some(receipt) = receipt {
                let encoded = encode_payment_response(&receipt, &state.config.payment.network);
                if let Ok(value) = encoded.parse() {
                    response.headers_mut().insert("X-PAYMENT-RESPONSE", value);
                }
            }
            response
        }
        Err(GateError::InvalidPaymentHeader { challenge }) => {
            payment_required("invalid_payment_header", Some(*challenge))
        }
        Err(GateError::RequirementsMismatch) => payment_required("requirements_mismatch", None),
        Err(GateError::VerificationFailed(reason)) => payment_required(&reason, None),
        Err(GateError::Facilitator(e)) => {
            tracing::error!("facilitator failure on paid request: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": "payment facilitator unavailable" })),
            )
                .into_response()
        }
        Err(GateError::Worker(e)) => {
            tracing::error!("worker failure on paid request: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn paid_params(config: &Config, query: &PaidQuery) -> Result<RequestParams, String> {
    match query.op.as_str() {
        "summarise" => Ok(RequestParams::Summarise {
            lookback_minutes: config.clamp_lookback(
                query
                    .minutes
                    .unwrap_or(config.limits.lookback_default_minutes),
            ),
        }),
        "search_events" => {
            let topic = query
                .topic
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| "topic is required".to_owned())?;
            Ok(RequestParams::SearchEvents {
                topic: topic.to_owned(),
                location: query.location.clone(),
            })
        }
        other => Err(format!("unknown op: {other}")),
    }
}

fn paid_body(result: &WorkerResult) -> serde_json::Value {
    match result {
        WorkerResult::Summary { text } => {
            serde_json::json!({ "success": true, "summary": text })
        }
        WorkerResult::Events { formatted } => {
            serde_json::json!({ "success": true, "events": formatted })
        }
    }
}

fn payment_required(error: &str, challenge: Option<crate::payment::PaymentChallenge>) -> Response {
    let mut body = serde_json::json!({
        "x402Version": 1,
        "error": error,
    });
    if let Some(challenge) = challenge {
        body["accepts"] = serde_json::json!([challenge]);
    }
    (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    token: String,
    result: CallbackResult,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CallbackResult {
    Summary { text: String },
    Events { items: Vec<String> },
}

impl From<CallbackResult> for WorkerResult {
    fn from(result: CallbackResult) -> Self {
        match result {
            CallbackResult::Summary { text } => WorkerResult::Summary { text },
            CallbackResult::Events { items } => WorkerResult::Events { formatted: items },
        }
    }
}

/// POST /callback — payment-event report from an external worker: deliver
/// this result to whoever minted the token.
async fn handle_callback(
    State(state): State<AppState>,
    Json(request): Json<CallbackRequest>,
) -> Response {
    let result = WorkerResult::from(request.result);
    match state.dispatcher.deliver(&request.token, &result).await {
        Delivery::Ack => Json(serde_json::json!({ "success": true })).into_response(),
        Delivery::NotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "unknown or expired token",
                "status": 404,
            })),
        )
            .into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
