/// Payment webhook handling
///
/// The payment provider delivers events at least once, possibly duplicated
/// and out of order. Each event carries a unique id, which is used both as
/// the purchase record key and as the ledger idempotency key.
///
/// # Processing
///
/// 1. Verify the HMAC-SHA256 signature of the raw body
/// 2. Parse and validate the event
/// 3. Already recorded → `Duplicate`
/// 4. `completed` → grant credits, then record the purchase (`Applied`)
/// 5. `pending` / `failed` → record only (`Recorded`)
/// 6. `refunded` → claw back under `ClawbackPolicy::Capped`, then record
///
/// Granting before recording means a crash between the two leaves no
/// purchase row, so the redelivered event is processed again and the grant
/// replays as a no-op.
///
/// # Signature Header
///
/// ```text
/// X-Retouch-Signature: sha256=<hex hmac of the raw body>
/// ```

use crate::error::{CoreError, CoreResult};
use crate::ledger::CreditLedger;
use crate::models::purchase::{NewPurchase, PurchaseStatus};
use crate::store::Store;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "X-Retouch-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Most credits a single payment event may grant
pub const MAX_CREDITS_PER_EVENT: i32 = 1_000_000;

/// Payment event as delivered by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PaymentEvent {
    #[validate(length(min = 1, max = 255))]
    pub event_id: String,

    pub user_id: Uuid,

    #[validate(range(min = 0, max = 1_000_000))]
    pub credits_granted: i32,

    /// Minor currency units
    #[validate(range(min = 0))]
    pub amount_paid: i64,

    pub status: PurchaseStatus,
}

/// What processing an event did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The balance changed
    Applied,

    /// Recorded without a balance change
    Recorded,

    /// Event id seen before; nothing changed
    Duplicate,
}

/// What a refunded purchase does to the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClawbackPolicy {
    /// Refunds are recorded only
    Never,

    /// Refunded credits are removed, never below zero
    Capped,
}

impl fmt::Display for ClawbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClawbackPolicy::Never => f.write_str("never"),
            ClawbackPolicy::Capped => f.write_str("capped"),
        }
    }
}

impl FromStr for ClawbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(ClawbackPolicy::Never),
            "capped" => Ok(ClawbackPolicy::Capped),
            other => Err(format!("unknown clawback policy '{}'", other)),
        }
    }
}

/// Verifies that a webhook body came from the payment provider
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> bool;
}

/// HMAC-SHA256 verifier over the raw body
pub struct HmacSignatureVerifier {
    secret: Vec<u8>,
}

impl HmacSignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Computes the header value for `payload`
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Some(encoded) = signature.trim().strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        let Ok(expected) = hex::decode(encoded) else {
            return false;
        };

        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Applies payment events to the credit ledger
#[derive(Clone)]
pub struct PaymentWebhookHandler {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    verifier: Arc<dyn SignatureVerifier>,
    clawback: ClawbackPolicy,
}

impl PaymentWebhookHandler {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: CreditLedger,
        verifier: Arc<dyn SignatureVerifier>,
        clawback: ClawbackPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            verifier,
            clawback,
        }
    }

    /// Verifies, parses and processes a raw webhook delivery
    ///
    /// # Errors
    ///
    /// - `InvalidSignature` if the signature is missing or wrong
    /// - `Validation` if the body is not a well-formed event
    pub async fn handle_event(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> CoreResult<WebhookOutcome> {
        let verified = signature.is_some_and(|sig| self.verifier.verify(payload, sig));
        if !verified {
            warn!(present = signature.is_some(), "Rejected webhook with invalid signature");
            return Err(CoreError::InvalidSignature);
        }

        let event: PaymentEvent = serde_json::from_slice(payload)
            .map_err(|e| CoreError::Validation(format!("malformed payment event: {}", e)))?;
        event
            .validate()
            .map_err(|e| CoreError::Validation(format!("invalid payment event: {}", e)))?;

        self.process(event).await
    }

    /// Applies a verified event exactly once
    pub async fn process(&self, event: PaymentEvent) -> CoreResult<WebhookOutcome> {
        if self.store.find_purchase(&event.event_id).await?.is_some() {
            debug!(event_id = %event.event_id, "Duplicate payment event");
            return Ok(WebhookOutcome::Duplicate);
        }

        // Unknown users are rejected before anything is written
        self.ledger.balance(event.user_id).await?;

        let changed = match event.status {
            PurchaseStatus::Completed if event.credits_granted > 0 => {
                self.ledger
                    .grant(event.user_id, event.credits_granted, &event.event_id)
                    .await?
                    .applied
            }
            PurchaseStatus::Refunded
                if self.clawback == ClawbackPolicy::Capped && event.credits_granted > 0 =>
            {
                self.ledger
                    .claw_back(event.user_id, event.credits_granted, &event.event_id)
                    .await?
                    .applied
            }
            _ => false,
        };

        let (purchase, inserted) = self
            .store
            .record_purchase(NewPurchase {
                user_id: event.user_id,
                provider_event_id: event.event_id.clone(),
                credits_granted: event.credits_granted,
                amount_paid: event.amount_paid,
                status: event.status,
            })
            .await?;

        if !inserted && !changed {
            debug!(event_id = %event.event_id, "Payment event recorded concurrently");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = if changed {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::Recorded
        };

        info!(
            event_id = %purchase.provider_event_id,
            user_id = %purchase.user_id,
            status = purchase.status.as_str(),
            credits = purchase.credits_granted,
            outcome = ?outcome,
            "Processed payment event"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let verifier = HmacSignatureVerifier::new("whsec_test_secret_that_is_long_enough");
        let body = br#"{"event_id":"evt_1"}"#;

        let signature = verifier.sign(body);
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), 7 + 64);

        assert!(verifier.verify(body, &signature));
        assert!(!verifier.verify(b"tampered", &signature));
        assert!(!verifier.verify(body, "sha256=zz"));
        assert!(!verifier.verify(body, signature.trim_start_matches("sha256=")));

        let other = HmacSignatureVerifier::new("another_secret_entirely_different!");
        assert!(!other.verify(body, &signature));
    }

    #[test]
    fn test_event_validation() {
        let mut event = PaymentEvent {
            event_id: "evt_1".to_string(),
            user_id: Uuid::new_v4(),
            credits_granted: 10,
            amount_paid: 999,
            status: PurchaseStatus::Completed,
        };
        assert!(event.validate().is_ok());

        event.event_id = String::new();
        assert!(event.validate().is_err());

        event.event_id = "evt_1".to_string();
        event.credits_granted = -1;
        assert!(event.validate().is_err());

        event.credits_granted = MAX_CREDITS_PER_EVENT;
        assert!(event.validate().is_ok());

        event.credits_granted = MAX_CREDITS_PER_EVENT + 1;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_clawback_policy_parse() {
        assert_eq!("never".parse::<ClawbackPolicy>(), Ok(ClawbackPolicy::Never));
        assert_eq!("CAPPED".parse::<ClawbackPolicy>(), Ok(ClawbackPolicy::Capped));
        assert!("always".parse::<ClawbackPolicy>().is_err());
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&WebhookOutcome::Duplicate).unwrap(),
            "\"duplicate\""
        );
    }
}
