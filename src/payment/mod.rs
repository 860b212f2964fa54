//! The payment gate: fronts the worker with an x402 challenge/verify/settle
//! cycle.
//!
//! The gate is stateless per call. A request without proof gets a challenge;
//! a request with a verified proof gets the worker's output. Settlement runs
//! after the worker succeeds and is deliberately best-effort: verification
//! already established the payment is good, so a settlement-layer fault must
//! never deny a paying user their result.

pub mod facilitator;

pub use facilitator::{Facilitator, HttpFacilitator, SettleOutcome, VerifyOutcome};

use crate::config::PaymentConfig;
use crate::worker::{RequestParams, Worker, WorkerError, WorkerResult};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One x402 payment requirement, built fresh per request from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    pub scheme: String,
    pub network: String,
    pub resource: String,
    pub description: String,
    pub pay_to: String,
    pub max_amount_required: String,
    pub asset: String,
    pub max_timeout_seconds: u64,
}

pub fn challenge_for(
    config: &PaymentConfig,
    resource: String,
    description: String,
) -> PaymentChallenge {
    PaymentChallenge {
        scheme: config.scheme.clone(),
        network: config.network.clone(),
        resource,
        description,
        pay_to: config.pay_to.clone(),
        max_amount_required: config.amount.clone(),
        asset: config.asset.clone(),
        max_timeout_seconds: config.max_timeout_seconds,
    }
}

/// Decoded `X-PAYMENT` header: base64 over a JSON envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u64,
    pub scheme: String,
    pub network: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Header present but undecodable. Carries a fresh challenge so the
    /// payer can retry.
    #[error("invalid_payment_header")]
    InvalidPaymentHeader { challenge: Box<PaymentChallenge> },
    /// Proof decodes but disagrees with the requirement we would accept.
    #[error("requirements_mismatch")]
    RequirementsMismatch,
    /// Facilitator looked at the proof and said no.
    #[error("payment verification failed: {0}")]
    VerificationFailed(String),
    /// Facilitator itself unreachable or broken.
    #[error("facilitator error: {0}")]
    Facilitator(String),
    /// The worker failed after verification. Returned unsettled.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Successful gate outcomes.
#[derive(Debug)]
pub enum GateOutcome {
    /// No proof attached: here is what paying would look like.
    Challenge(PaymentChallenge),
    /// Paid and produced. `receipt` present only when settlement succeeded.
    Result {
        result: WorkerResult,
        receipt: Option<String>,
    },
}

pub fn decode_payment_header(header: &str) -> Option<PaymentProof> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(header.trim())
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Encode the settlement receipt for the `X-PAYMENT-RESPONSE` header.
pub fn encode_payment_response(receipt: &str, network: &str) -> String {
    let body = serde_json::json!({
        "success": true,
        "transaction": receipt,
        "network": network,
    });
    base64::engine::general_purpose::STANDARD.encode(body.to_string())
}

pub struct PaymentGate {
    config: PaymentConfig,
    facilitator: Arc<dyn Facilitator>,
    worker: Arc<dyn Worker>,
}

impl PaymentGate {
    pub fn new(
        config: PaymentConfig,
        facilitator: Arc<dyn Facilitator>,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self {
            config,
            facilitator,
            worker,
        }
    }

    pub fn challenge(&self, params: &RequestParams, resource: &str) -> PaymentChallenge {
        challenge_for(&self.config, resource.to_owned(), params.describe())
    }

    /// Run one gate cycle. See the module docs for the state machine.
    pub async fn invoke(
        &self,
        params: &RequestParams,
        resource: &str,
        payment_header: Option<&str>,
    ) -> Result<GateOutcome, GateError> {
        let requirement = self.challenge(params, resource);

        let Some(header) = payment_header else {
            return Ok(GateOutcome::Challenge(requirement));
        };

        let Some(proof) = decode_payment_header(header) else {
            return Err(GateError::InvalidPaymentHeader {
                challenge: Box::new(requirement),
            });
        };

        if proof.scheme != requirement.scheme || proof.network != requirement.network {
            return Err(GateError::RequirementsMismatch);
        }

        let verdict = self
            .facilitator
            .verify(&proof, &requirement)
            .await
            .map_err(|e| GateError::Facilitator(e.to_string()))?;
        if !verdict.is_valid {
            let reason = verdict
                .invalid_reason
                .unwrap_or_else(|| "unspecified".to_owned());
            return Err(GateError::VerificationFailed(reason));
        }

        // Worker failure after verification is returned unsettled: the
        // facilitator never sees a settle call for work that didn't happen.
        let result = self.worker.invoke(params).await?;

        let receipt = match self.facilitator.settle(&proof, &requirement).await {
            Ok(outcome) if outcome.success => outcome.receipt,
            Ok(outcome) => {
                tracing::warn!(
                    "payment settlement declined (receipt withheld): {:?}",
                    outcome.receipt
                );
                None
            }
            Err(e) => {
                tracing::warn!("payment settlement failed, returning result anyway: {e}");
                None
            }
        };

        Ok(GateOutcome::Result { result, receipt })
    }
}
