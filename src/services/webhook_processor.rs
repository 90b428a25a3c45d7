use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::credential_repository::CredentialStore;
use crate::database::error::DatabaseError;
use crate::database::transaction_repository::{
    TransactionLedger, TransactionPatch, TransactionRecord, TransactionStatus,
    PENDING_PAYMENT_ID_PREFIX,
};
use crate::payments::types::{
    from_epoch_millis, MerchantCredential, WebhookEnvelope, WebhookEventType,
};
use crate::payments::utils::verify_hmac_sha256_hex;

pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Unknown merchant: {0}")]
    UnknownMerchant(String),
    #[error("Transaction not found for payment {0}")]
    TransactionNotFound(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DatabaseError> for WebhookProcessorError {
    fn from(err: DatabaseError) -> Self {
        WebhookProcessorError::DatabaseError(err.to_string())
    }
}

/// What a dispatched event did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Replay, or a transition the ledger does not allow.
    Unchanged,
    /// Event type or result the ledger does not track.
    Ignored,
}

/// HMAC-SHA256 over the raw body with the merchant's webhook secret.
/// Always `false` when no secret is configured.
pub fn verify_signature(
    raw_payload: &[u8],
    signature_header: &str,
    credential: &MerchantCredential,
) -> bool {
    match credential.webhook_secret.as_ref() {
        Some(secret) if !secret.expose_secret().is_empty() => {
            verify_hmac_sha256_hex(raw_payload, secret.expose_secret(), signature_header)
        }
        _ => false,
    }
}

pub struct WebhookProcessor {
    credentials: Arc<dyn CredentialStore>,
    ledger: Arc<dyn TransactionLedger>,
    default_merchant_id: Option<String>,
}

impl WebhookProcessor {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn TransactionLedger>,
        default_merchant_id: Option<String>,
    ) -> Self {
        Self {
            credentials,
            ledger,
            default_merchant_id,
        }
    }

    /// Verifies the signature against the owning merchant's secret, then
    /// dispatches. Nothing is written unless the signature checks out.
    pub async fn process_webhook(
        &self,
        raw_payload: &[u8],
        signature: Option<&str>,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(raw_payload)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        let merchant_id = envelope
            .merchant_id
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.default_merchant_id.clone())
            .ok_or_else(|| WebhookProcessorError::UnknownMerchant("<none>".to_string()))?;

        let credential = self
            .credentials
            .load_credential(&merchant_id)
            .await?
            .ok_or_else(|| WebhookProcessorError::UnknownMerchant(merchant_id.clone()))?;

        let signature = signature.ok_or(WebhookProcessorError::InvalidSignature)?;
        if !verify_signature(raw_payload, signature, &credential) {
            error!(merchant_id = %merchant_id, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event_type = WebhookEventType::parse(&envelope.event_type);
        self.dispatch(&event_type, &envelope.data).await
    }

    pub async fn dispatch(
        &self,
        event_type: &WebhookEventType,
        data: &JsonValue,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        match event_type {
            WebhookEventType::PaymentUpdated => self.handle_payment_updated(data).await,
            WebhookEventType::RefundCreated => self.handle_refund_created(data).await,
            WebhookEventType::Unknown(name) => {
                info!(event_type = %name, "Ignoring unhandled webhook event");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    async fn handle_payment_updated(
        &self,
        data: &JsonValue,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        let payment_id = payment_id(data)?;
        let result = str_field(data, "result")
            .or_else(|| str_field(data, "status"))
            .unwrap_or_default()
            .to_uppercase();

        let target = match result.as_str() {
            "APPROVED" | "SUCCESS" | "PAID" | "CAPTURED" => TransactionStatus::Completed,
            "DECLINED" | "FAIL" | "FAILED" => TransactionStatus::Failed,
            other => {
                info!(
                    payment_id = %payment_id,
                    result = %other,
                    "Ignoring payment update with untracked result"
                );
                return Ok(DispatchOutcome::Ignored);
            }
        };

        let (record, matched_by_order) = self.find_payment_record(data, &payment_id).await?;
        let mut patch = TransactionPatch::status(target);
        if matched_by_order {
            patch = patch.with_remote_payment_id(payment_id.clone());
        }
        if target == TransactionStatus::Failed {
            patch = patch.with_error(format!("gateway reported {}", result));
        }
        self.apply(&record, target, patch).await
    }

    async fn handle_refund_created(
        &self,
        data: &JsonValue,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        let payment_id = payment_id(data)?;
        let record = self.find_record(&payment_id).await?;

        let amount = data
            .get("amount")
            .and_then(JsonValue::as_i64)
            .unwrap_or(record.amount);
        let refunded_at = data
            .get("createdTime")
            .and_then(JsonValue::as_i64)
            .and_then(from_epoch_millis)
            .unwrap_or_else(Utc::now);

        let patch = TransactionPatch::status(TransactionStatus::Refunded)
            .with_refund(amount, refunded_at);
        self.apply(&record, TransactionStatus::Refunded, patch).await
    }

    async fn find_record(
        &self,
        payment_id: &str,
    ) -> Result<TransactionRecord, WebhookProcessorError> {
        self.ledger
            .find_transaction_by_remote_id(payment_id)
            .await?
            .ok_or_else(|| WebhookProcessorError::TransactionNotFound(payment_id.to_string()))
    }

    /// A capture that never reached its terminal update still carries the
    /// placeholder payment id, so its record is found through the order.
    async fn find_payment_record(
        &self,
        data: &JsonValue,
        payment_id: &str,
    ) -> Result<(TransactionRecord, bool), WebhookProcessorError> {
        if let Some(record) = self.ledger.find_transaction_by_remote_id(payment_id).await? {
            return Ok((record, false));
        }

        let order_id = str_field(data, "orderId")
            .or_else(|| data.get("order").and_then(|o| str_field(o, "id")));
        if let Some(order_id) = order_id {
            let pending = self
                .ledger
                .find_transaction_by_remote_order_id(&order_id)
                .await?
                .filter(|r| {
                    r.status == TransactionStatus::Pending
                        && r.remote_payment_id.starts_with(PENDING_PAYMENT_ID_PREFIX)
                });
            if let Some(record) = pending {
                info!(
                    transaction_id = record.id,
                    order_id = %order_id,
                    payment_id = %payment_id,
                    "Resolving unfinished capture from webhook"
                );
                return Ok((record, true));
            }
        }

        Err(WebhookProcessorError::TransactionNotFound(payment_id.to_string()))
    }

    async fn apply(
        &self,
        record: &TransactionRecord,
        target: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        if record.status == target {
            info!(transaction_id = record.id, status = %target, "Webhook replay, nothing to do");
            return Ok(DispatchOutcome::Unchanged);
        }
        if !record.status.can_transition_to(target) {
            warn!(
                transaction_id = record.id,
                from = %record.status,
                to = %target,
                "Ignoring webhook requesting an illegal status transition"
            );
            return Ok(DispatchOutcome::Unchanged);
        }

        match self
            .ledger
            .update_transaction(record.id, record.status, patch)
            .await
        {
            Ok(updated) => {
                info!(
                    transaction_id = updated.id,
                    from = %record.status,
                    to = %updated.status,
                    "Transaction updated from webhook"
                );
                Ok(DispatchOutcome::Applied)
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    transaction_id = record.id,
                    "Transaction changed concurrently; webhook not applied"
                );
                Ok(DispatchOutcome::Unchanged)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn str_field(data: &JsonValue, key: &str) -> Option<String> {
    data.get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn payment_id(data: &JsonValue) -> Result<String, WebhookProcessorError> {
    str_field(data, "paymentId")
        .or_else(|| data.get("payment").and_then(|p| str_field(p, "id")))
        .or_else(|| str_field(data, "id"))
        .ok_or_else(|| WebhookProcessorError::InvalidPayload("missing payment id".to_string()))
}
