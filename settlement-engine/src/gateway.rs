//! Payment gateway adapter
//!
//! Issues checkout tokens, verifies inbound notifications and polls the
//! processor's status endpoint. Raw processor vocabulary is mapped into the
//! closed [`PaymentOutcome`] set here; nothing downstream ever sees the wire
//! strings. Network calls use a bounded timeout and a small fixed-count retry
//! with backoff, after which the caller gets a gateway error and no state has
//! changed.

use crate::{error::EngineError, EngineResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for the gateway adapter
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Processor API base URL
    pub base_url: String,
    /// Shared secret used for notification signatures
    pub server_key: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Initial backoff between retries, doubled per attempt
    pub retry_backoff_ms: u64,
    /// Checkout token validity window in seconds
    pub token_ttl_secs: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sandbox.payments.example".to_string(),
            server_key: String::new(),
            request_timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 250,
            token_ttl_secs: 86_400, // 24 hours
        }
    }
}

/// Closed set of processor outcomes handed to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    /// Funds collected from the payer
    Captured,
    /// Awaiting payer action or fraud review
    Pending,
    /// Rejected by the processor or fraud screen
    Denied,
    /// Checkout window elapsed without payment
    Expired,
    /// Cancelled before capture
    Cancelled,
}

/// Opaque credential the client UI uses to complete payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutToken {
    pub token: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Normalized view of one order's authoritative payment status
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub outcome: PaymentOutcome,
}

/// Asynchronous notification body delivered by the processor
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    pub gross_amount: String,
    pub status_code: String,
    pub signature_key: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
}

/// Map raw processor vocabulary into the closed outcome set
///
/// Unknown vocabulary is a gateway error, never a guess.
pub fn map_outcome(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> EngineResult<PaymentOutcome> {
    match transaction_status {
        "capture" => match fraud_status.unwrap_or("accept") {
            "accept" => Ok(PaymentOutcome::Captured),
            "challenge" => Ok(PaymentOutcome::Pending),
            "deny" => Ok(PaymentOutcome::Denied),
            other => Err(EngineError::gateway(format!(
                "unrecognized fraud status '{other}'"
            ))),
        },
        "settlement" => Ok(PaymentOutcome::Captured),
        "pending" | "authorize" => Ok(PaymentOutcome::Pending),
        "deny" => Ok(PaymentOutcome::Denied),
        "expire" => Ok(PaymentOutcome::Expired),
        "cancel" => Ok(PaymentOutcome::Cancelled),
        other => Err(EngineError::gateway(format!(
            "unrecognized transaction status '{other}'"
        ))),
    }
}

/// Recomputes and checks the one-way signature over inbound notifications
pub struct NotificationVerifier {
    server_key: String,
}

impl NotificationVerifier {
    pub fn new<S: Into<String>>(server_key: S) -> Self {
        Self {
            server_key: server_key.into(),
        }
    }

    /// Signature over `order_id + status_code + gross_amount + server_key`
    pub fn signature_for(&self, order_id: &str, status_code: &str, gross_amount: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Verify a notification and normalize it into a status snapshot
    ///
    /// A mismatch causes no state change; the full detail stays in the
    /// server log while the sender only ever sees a generic rejection.
    pub fn verify(&self, notification: &PaymentNotification) -> EngineResult<StatusSnapshot> {
        let expected = self.signature_for(
            &notification.order_id,
            &notification.status_code,
            &notification.gross_amount,
        );

        if expected != notification.signature_key {
            warn!(
                order_id = %notification.order_id,
                status_code = %notification.status_code,
                "notification signature mismatch"
            );
            return Err(EngineError::signature(notification.order_id.as_str()));
        }

        let outcome = map_outcome(
            &notification.transaction_status,
            notification.fraud_status.as_deref(),
        )?;

        Ok(StatusSnapshot {
            order_id: notification.order_id.clone(),
            transaction_id: notification
                .transaction_id
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            outcome,
        })
    }
}

/// Outbound interface to the payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Request a checkout token for an order
    async fn create_checkout(
        &self,
        order_id: &str,
        gross_amount: i64,
        description: &str,
    ) -> EngineResult<CheckoutToken>;

    /// Poll the authoritative status for an order; idempotent
    async fn transaction_status(&self, order_id: &str) -> EngineResult<StatusSnapshot>;
}

#[derive(Debug, Serialize)]
struct CheckoutPayload<'a> {
    order_id: &'a str,
    gross_amount: i64,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    token: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    order_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    transaction_status: String,
    #[serde(default)]
    fraud_status: Option<String>,
}

/// reqwest-backed processor client
pub struct HttpProcessor {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpProcessor {
    pub fn new(config: GatewayConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::gateway(format!("failed to build http client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Run `attempt` up to `1 + max_retries` times with doubling backoff
    async fn with_retries<T, F, Fut>(&self, operation: &str, attempt: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut delay = Duration::from_millis(self.config.retry_backoff_ms);
        let mut tries = 0u32;

        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if tries < self.config.max_retries => {
                    warn!(operation, tries, "gateway call failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    tries += 1;
                }
                Err(err) => {
                    error!(operation, tries, "gateway call exhausted retries: {err}");
                    return Err(err);
                }
            }
        }
    }

    async fn post_checkout(
        &self,
        order_id: &str,
        gross_amount: i64,
        description: &str,
    ) -> EngineResult<CheckoutResponse> {
        let url = format!("{}/v1/checkout", self.config.base_url);
        let payload = CheckoutPayload {
            order_id,
            gross_amount,
            description,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::gateway(format!("checkout request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::gateway(format!(
                "checkout returned {status}: {body}"
            )));
        }

        response
            .json::<CheckoutResponse>()
            .await
            .map_err(|e| EngineError::gateway(format!("malformed checkout response: {e}")))
    }

    async fn get_status(&self, order_id: &str) -> EngineResult<StatusResponse> {
        let url = format!("{}/transactions/{}/status", self.config.base_url, order_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::gateway(format!("status request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::gateway(format!(
                "status poll returned {status}: {body}"
            )));
        }

        response
            .json::<StatusResponse>()
            .await
            .map_err(|e| EngineError::gateway(format!("malformed status response: {e}")))
    }
}

#[async_trait]
impl PaymentProcessor for HttpProcessor {
    async fn create_checkout(
        &self,
        order_id: &str,
        gross_amount: i64,
        description: &str,
    ) -> EngineResult<CheckoutToken> {
        let response = self
            .with_retries("create_checkout", || {
                self.post_checkout(order_id, gross_amount, description)
            })
            .await?;

        info!(order_id, gross_amount, "issued checkout token");

        Ok(CheckoutToken {
            token: response.token,
            redirect_url: response.redirect_url,
            expires_at: Utc::now() + ChronoDuration::seconds(self.config.token_ttl_secs),
        })
    }

    async fn transaction_status(&self, order_id: &str) -> EngineResult<StatusSnapshot> {
        let response = self
            .with_retries("transaction_status", || self.get_status(order_id))
            .await?;

        let outcome = map_outcome(
            &response.transaction_status,
            response.fraud_status.as_deref(),
        )?;

        Ok(StatusSnapshot {
            order_id: response.order_id,
            transaction_id: response.transaction_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(signature_key: String) -> PaymentNotification {
        PaymentNotification {
            order_id: "GIG-42".to_string(),
            transaction_id: Some("txn-7".to_string()),
            transaction_status: "settlement".to_string(),
            fraud_status: None,
            gross_amount: "1000000".to_string(),
            status_code: "200".to_string(),
            signature_key,
            payment_type: Some("bank_transfer".to_string()),
            transaction_time: None,
        }
    }

    #[test]
    fn signature_matches_reference_digest() {
        let verifier = NotificationVerifier::new("secret");
        let mut hasher = Sha512::new();
        hasher.update(b"GIG-42");
        hasher.update(b"200");
        hasher.update(b"1000000");
        hasher.update(b"secret");
        let expected: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        assert_eq!(verifier.signature_for("GIG-42", "200", "1000000"), expected);
    }

    #[test]
    fn valid_notification_becomes_snapshot() {
        let verifier = NotificationVerifier::new("secret");
        let signature = verifier.signature_for("GIG-42", "200", "1000000");

        let snapshot = verifier.verify(&notification(signature)).expect("valid");
        assert_eq!(snapshot.outcome, PaymentOutcome::Captured);
        assert_eq!(snapshot.transaction_id.as_deref(), Some("txn-7"));
    }

    #[test]
    fn tampered_notification_is_rejected() {
        let verifier = NotificationVerifier::new("secret");
        let signature = verifier.signature_for("GIG-42", "200", "999"); // wrong amount

        let err = verifier.verify(&notification(signature)).unwrap_err();
        assert!(matches!(err, EngineError::Signature(_)));
    }

    #[test]
    fn outcome_mapping_is_closed() {
        assert_eq!(map_outcome("capture", Some("accept")).unwrap(), PaymentOutcome::Captured);
        assert_eq!(map_outcome("capture", Some("challenge")).unwrap(), PaymentOutcome::Pending);
        assert_eq!(map_outcome("capture", Some("deny")).unwrap(), PaymentOutcome::Denied);
        assert_eq!(map_outcome("settlement", None).unwrap(), PaymentOutcome::Captured);
        assert_eq!(map_outcome("pending", None).unwrap(), PaymentOutcome::Pending);
        assert_eq!(map_outcome("deny", None).unwrap(), PaymentOutcome::Denied);
        assert_eq!(map_outcome("expire", None).unwrap(), PaymentOutcome::Expired);
        assert_eq!(map_outcome("cancel", None).unwrap(), PaymentOutcome::Cancelled);

        assert!(matches!(
            map_outcome("refund", None).unwrap_err(),
            EngineError::Gateway(_)
        ));
        assert!(matches!(
            map_outcome("capture", Some("unknown")).unwrap_err(),
            EngineError::Gateway(_)
        ));
    }
}
