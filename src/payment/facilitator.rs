use super::{PaymentChallenge, PaymentProof};
use async_trait::async_trait;
use serde_json::json;

/// Verification verdict from the facilitator.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub payer: Option<String>,
}

/// Settlement outcome. `receipt` is the on-chain transaction reference when
/// settlement went through.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub success: bool,
    pub receipt: Option<String>,
}

/// Third-party payment service that checks and settles proofs on our behalf.
/// Deduplication of replayed proofs is its job, not ours.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentChallenge,
    ) -> anyhow::Result<VerifyOutcome>;

    async fn settle(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentChallenge,
    ) -> anyhow::Result<SettleOutcome>;
}

/// HTTP client for an x402 facilitator.
pub struct HttpFacilitator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFacilitator {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(proof: &PaymentProof, requirement: &PaymentChallenge) -> serde_json::Value {
        json!({
            "x402Version": 1,
            "paymentPayload": proof,
            "paymentRequirements": requirement,
        })
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentChallenge,
    ) -> anyhow::Result<VerifyOutcome> {
        let url = format!("{}/verify", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Self::request_body(proof, requirement))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("facilitator verify failed ({status}): {err}");
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(VerifyOutcome {
            is_valid: body
                .get("isValid")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            invalid_reason: body
                .get("invalidReason")
                .and_then(|r| r.as_str())
                .map(str::to_owned),
            payer: body
                .get("payer")
                .and_then(|p| p.as_str())
                .map(str::to_owned),
        })
    }

    async fn settle(
        &self,
        proof: &PaymentProof,
        requirement: &PaymentChallenge,
    ) -> anyhow::Result<SettleOutcome> {
        let url = format!("{}/settle", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Self::request_body(proof, requirement))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            anyhow::bail!("facilitator settle failed ({status}): {err}");
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(SettleOutcome {
            success: body
                .get("success")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            receipt: body
                .get("transaction")
                .or_else(|| body.get("txHash"))
                .and_then(|t| t.as_str())
                .map(str::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentConfig;
    use crate::payment::challenge_for;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proof() -> PaymentProof {
        PaymentProof {
            x402_version: 1,
            scheme: "exact".into(),
            network: "base-sepolia".into(),
            payload: serde_json::json!({"signature": "0xsig"}),
        }
    }

    fn requirement() -> PaymentChallenge {
        challenge_for(
            &PaymentConfig::default(),
            "http://localhost/paid/tok".into(),
            "a summary".into(),
        )
    }

    #[tokio::test]
    async fn verify_parses_valid_verdict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(serde_json::json!({"x402Version": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": true, "payer": "0xpayer"}),
            ))
            .mount(&server)
            .await;

        let fac = HttpFacilitator::new(server.uri());
        let outcome = fac.verify(&proof(), &requirement()).await.unwrap();
        assert!(outcome.is_valid);
        assert_eq!(outcome.payer.as_deref(), Some("0xpayer"));
    }

    #[tokio::test]
    async fn verify_parses_invalid_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"isValid": false, "invalidReason": "insufficient_funds"}),
            ))
            .mount(&server)
            .await;

        let fac = HttpFacilitator::new(server.uri());
        let outcome = fac.verify(&proof(), &requirement()).await.unwrap();
        assert!(!outcome.is_valid);
        assert_eq!(outcome.invalid_reason.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn settle_extracts_transaction_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"success": true, "transaction": "0xdeadbeef"}),
            ))
            .mount(&server)
            .await;

        let fac = HttpFacilitator::new(server.uri());
        let outcome = fac.settle(&proof(), &requirement()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.receipt.as_deref(), Some("0xdeadbeef"));
    }

    #[tokio::test]
    async fn facilitator_5xx_is_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fac = HttpFacilitator::new(server.uri());
        assert!(fac.verify(&proof(), &requirement()).await.is_err());
    }
}
