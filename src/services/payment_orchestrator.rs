//! Payment Orchestrator Service
//!
//! Drives a single capture from remote order creation through the ordered
//! capture strategies to exactly one terminal ledger update, and applies
//! refunds against captured payments.

use crate::database::transaction_repository::{
    NewTransaction, TransactionLedger, TransactionPatch, TransactionRecord, TransactionStatus,
    PENDING_PAYMENT_ID_PREFIX,
};
use crate::payments::client::{merchant_path, GatewayClient};
use crate::payments::config::LastResortConfig;
use crate::payments::error::{GatewayResult, PaymentError};
use crate::payments::strategies::{default_strategies, CaptureAttempt, CaptureStrategy, RemoteOrder};
use crate::payments::types::{
    from_epoch_millis, MerchantCredential, PaymentOutcome, PaymentRequest, PaymentResult,
    RefundResult,
};
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const MANUAL_RECONCILIATION_MESSAGE: &str =
    "gateway capture unavailable — recorded for manual reconciliation";
pub const DECLINED_MESSAGE: &str = "payment declined by gateway";
const DEFAULT_ORDER_TITLE: &str = "Pump-out service";

// ============================================================================
// Capture outcome types
// ============================================================================

#[derive(Debug, Clone)]
struct StrategyFailure {
    strategy: &'static str,
    error: PaymentError,
}

enum CaptureOutcome {
    Captured {
        strategy: &'static str,
        attempt: CaptureAttempt,
        failures: Vec<StrategyFailure>,
    },
    Exhausted {
        failures: Vec<StrategyFailure>,
    },
    /// A credential failure made further strategies pointless.
    Aborted {
        error: PaymentError,
        failures: Vec<StrategyFailure>,
    },
}

fn audit_blob(strategy: &str, response: JsonValue, failures: &[StrategyFailure]) -> JsonValue {
    let attempts: Vec<JsonValue> = failures
        .iter()
        .map(|f| json!({ "strategy": f.strategy, "error": f.error.to_string() }))
        .collect();
    json!({
        "strategy": strategy,
        "response": response,
        "attempts": attempts,
    })
}

// ============================================================================
// Pending record finalizer
// ============================================================================

/// Covers the window between creating the pending record and its terminal
/// update. A panic marks the record failed; a plain drop (cancelled future)
/// leaves it pending for reconciliation.
struct PendingTransactionGuard {
    ledger: Arc<dyn TransactionLedger>,
    transaction_id: i64,
    armed: bool,
}

impl PendingTransactionGuard {
    fn arm(ledger: Arc<dyn TransactionLedger>, transaction_id: i64) -> Self {
        Self {
            ledger,
            transaction_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingTransactionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let transaction_id = self.transaction_id;

        if !std::thread::panicking() {
            warn!(
                transaction_id = transaction_id,
                "Capture dropped before completion; transaction left pending for reconciliation"
            );
            return;
        }

        let ledger = Arc::clone(&self.ledger);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let patch = TransactionPatch::status(TransactionStatus::Failed)
                        .with_error("capture aborted unexpectedly");
                    if let Err(e) = ledger
                        .update_transaction(transaction_id, TransactionStatus::Pending, patch)
                        .await
                    {
                        error!(
                            transaction_id = transaction_id,
                            error = %e,
                            "Failed to mark aborted capture as failed"
                        );
                    }
                });
            }
            Err(_) => error!(
                transaction_id = transaction_id,
                "Capture panicked outside a runtime; transaction left pending"
            ),
        }
    }
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    gateway: Arc<GatewayClient>,
    ledger: Arc<dyn TransactionLedger>,
    strategies: Vec<Arc<dyn CaptureStrategy>>,
    last_resort: LastResortConfig,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<GatewayClient>, ledger: Arc<dyn TransactionLedger>) -> Self {
        let last_resort = gateway.config().last_resort.clone();
        Self {
            strategies: default_strategies(&last_resort),
            gateway,
            ledger,
            last_resort,
        }
    }

    /// Replaces the capture sequence; strategies run in the given order.
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn CaptureStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn TransactionLedger> {
        &self.ledger
    }

    // =========================================================================
    // Capture
    // =========================================================================

    pub async fn capture(
        &self,
        credential: &mut MerchantCredential,
        request: &PaymentRequest,
        user_id: i64,
        local_request_id: Option<i64>,
    ) -> GatewayResult<PaymentResult> {
        request.validate()?;

        let order = self
            .create_order(credential, request)
            .await
            .map_err(|e| PaymentError::OrderCreation {
                source: Box::new(e),
            })?;

        self.attach_customer(credential, &order, request).await;
        self.add_line_items(credential, &order, request).await;

        let record = self
            .ledger
            .create_transaction(NewTransaction {
                remote_payment_id: format!("{}{}", PENDING_PAYMENT_ID_PREFIX, Uuid::new_v4()),
                remote_order_id: order.id.clone(),
                local_request_id,
                user_id,
                amount: request.charge_total(),
                currency: order.currency.clone(),
                payment_method: None,
            })
            .await?;

        info!(
            transaction_id = record.id,
            order_id = %order.id,
            amount = record.amount,
            currency = %record.currency,
            "Pending transaction recorded, starting capture"
        );

        let mut guard = PendingTransactionGuard::arm(Arc::clone(&self.ledger), record.id);
        let outcome = self.run_strategies(credential, &order, request).await;
        let result = self
            .finalize(credential, &record, &order, request, outcome)
            .await;
        guard.disarm();

        result
    }

    async fn create_order(
        &self,
        credential: &mut MerchantCredential,
        request: &PaymentRequest,
    ) -> GatewayResult<RemoteOrder> {
        let currency = request.currency_code();
        let body = json!({
            "total": request.order_total(),
            "currency": currency,
            "state": "open",
            "title": request.description.as_deref().unwrap_or(DEFAULT_ORDER_TITLE),
        });
        let path = merchant_path(&credential.merchant_id, "/orders");
        let raw: JsonValue = self
            .gateway
            .call(Method::POST, &path, Some(&body), credential)
            .await?;

        let id = raw
            .get("id")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: "order response carried no id".to_string(),
            })?;

        Ok(RemoteOrder {
            id: id.to_string(),
            total: request.order_total(),
            currency,
        })
    }

    async fn attach_customer(
        &self,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) {
        let Some(customer) = request.customer.as_ref().filter(|c| !c.is_empty()) else {
            return;
        };

        let mut body = json!({
            "firstName": customer.first_name,
            "lastName": customer.last_name,
        });
        if let Some(email) = &customer.email {
            body["emailAddresses"] = json!([{ "emailAddress": email }]);
        }
        if let Some(phone) = &customer.phone {
            body["phoneNumbers"] = json!([{ "phoneNumber": phone }]);
        }

        let path = merchant_path(&credential.merchant_id, "/customers");
        let created: GatewayResult<JsonValue> = self
            .gateway
            .call(Method::POST, &path, Some(&body), credential)
            .await;
        let customer_id = match created {
            Ok(raw) => match raw.get("id").and_then(JsonValue::as_str) {
                Some(id) => id.to_string(),
                None => {
                    warn!(order_id = %order.id, "Customer response carried no id");
                    return;
                }
            },
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Failed to create customer");
                return;
            }
        };

        let link = json!({ "customers": [{ "id": customer_id }] });
        let path = merchant_path(&credential.merchant_id, &format!("/orders/{}", order.id));
        if let Err(e) = self
            .gateway
            .call::<JsonValue>(Method::POST, &path, Some(&link), credential)
            .await
        {
            warn!(order_id = %order.id, error = %e, "Failed to link customer to order");
        }
    }

    async fn add_line_items(
        &self,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) {
        let mut items = vec![json!({
            "name": request.description.as_deref().unwrap_or(DEFAULT_ORDER_TITLE),
            "price": request.amount_minor_units,
        })];
        if request.tax_amount > 0 {
            items.push(json!({ "name": "Tax", "price": request.tax_amount }));
        }

        let path = merchant_path(
            &credential.merchant_id,
            &format!("/orders/{}/line_items", order.id),
        );
        for item in &items {
            if let Err(e) = self
                .gateway
                .call::<JsonValue>(Method::POST, &path, Some(item), credential)
                .await
            {
                warn!(order_id = %order.id, error = %e, "Failed to add line item");
            }
        }
    }

    async fn run_strategies(
        &self,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) -> CaptureOutcome {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            match strategy.attempt(&self.gateway, credential, order, request).await {
                Ok(attempt) => {
                    info!(
                        order_id = %order.id,
                        strategy = name,
                        payment_id = %attempt.result.id,
                        result = ?attempt.result.result,
                        "Capture strategy answered"
                    );
                    return CaptureOutcome::Captured {
                        strategy: name,
                        attempt,
                        failures,
                    };
                }
                Err(e) => {
                    let wrapped = PaymentError::in_strategy(name, e);
                    warn!(order_id = %order.id, error = %wrapped, "Capture strategy failed");
                    failures.push(StrategyFailure {
                        strategy: name,
                        error: wrapped.clone(),
                    });
                    if wrapped.is_credential_failure() {
                        return CaptureOutcome::Aborted {
                            error: wrapped,
                            failures,
                        };
                    }
                }
            }
        }

        CaptureOutcome::Exhausted { failures }
    }

    /// The single terminal ledger update for a capture.
    async fn finalize(
        &self,
        credential: &mut MerchantCredential,
        record: &TransactionRecord,
        order: &RemoteOrder,
        request: &PaymentRequest,
        outcome: CaptureOutcome,
    ) -> GatewayResult<PaymentResult> {
        match outcome {
            CaptureOutcome::Captured {
                strategy,
                attempt,
                failures,
            } => {
                let result = attempt.result;
                let approved = result.result == PaymentOutcome::Approved;
                let base = if approved {
                    TransactionPatch::status(TransactionStatus::Completed)
                } else {
                    TransactionPatch::status(TransactionStatus::Failed).with_error(DECLINED_MESSAGE)
                };
                let patch = base
                    .with_remote_payment_id(result.id.clone())
                    .with_payment_method(Some(attempt.payment_method))
                    .with_card(result.card_last4.clone(), result.card_brand.clone())
                    .with_raw_response(audit_blob(strategy, attempt.raw, &failures));

                self.terminal_update(record, patch).await?;

                if approved {
                    info!(transaction_id = record.id, payment_id = %result.id, "Payment captured");
                    self.update_order(credential, order, json!({ "state": "locked" }))
                        .await;
                } else {
                    info!(transaction_id = record.id, payment_id = %result.id, "Payment declined");
                }
                Ok(result)
            }
            CaptureOutcome::Exhausted { failures } if self.last_resort.manual_reconciliation => {
                let manual_id = format!("manual-{}", order.id);
                let patch = TransactionPatch::status(TransactionStatus::Completed)
                    .with_remote_payment_id(manual_id.clone())
                    .with_payment_method(Some("manual".to_string()))
                    .with_error(MANUAL_RECONCILIATION_MESSAGE)
                    .with_raw_response(audit_blob(
                        "manual_reconciliation",
                        JsonValue::Null,
                        &failures,
                    ));
                self.terminal_update(record, patch).await?;

                error!(
                    transaction_id = record.id,
                    order_id = %order.id,
                    attempts = failures.len(),
                    "All capture strategies failed; recorded for manual reconciliation"
                );
                self.update_order(
                    credential,
                    order,
                    json!({ "note": MANUAL_RECONCILIATION_MESSAGE }),
                )
                .await;

                Ok(PaymentResult {
                    id: manual_id,
                    order_id: order.id.clone(),
                    amount: request.charge_total(),
                    currency: order.currency.clone(),
                    result: PaymentOutcome::Approved,
                    auth_code: None,
                    card_last4: None,
                    card_brand: None,
                    created_at: Utc::now(),
                    requires_reconciliation: true,
                })
            }
            CaptureOutcome::Exhausted { failures } => {
                let attempts: Vec<String> = failures.iter().map(|f| f.error.to_string()).collect();
                let patch = TransactionPatch::status(TransactionStatus::Failed)
                    .with_error("all capture strategies failed")
                    .with_raw_response(audit_blob("none", JsonValue::Null, &failures));
                self.terminal_update(record, patch).await?;

                error!(
                    transaction_id = record.id,
                    order_id = %order.id,
                    "All capture strategies failed"
                );
                Err(PaymentError::CaptureExhausted { attempts })
            }
            CaptureOutcome::Aborted { error, failures } => {
                let patch = TransactionPatch::status(TransactionStatus::Failed)
                    .with_error(error.to_string())
                    .with_raw_response(audit_blob("none", JsonValue::Null, &failures));
                self.terminal_update(record, patch).await?;

                error!(
                    transaction_id = record.id,
                    error = %error,
                    "Capture aborted on credential failure"
                );
                Err(error)
            }
        }
    }

    async fn terminal_update(
        &self,
        record: &TransactionRecord,
        patch: TransactionPatch,
    ) -> GatewayResult<TransactionRecord> {
        self.ledger
            .update_transaction(record.id, TransactionStatus::Pending, patch)
            .await
            .map_err(|e| {
                error!(
                    transaction_id = record.id,
                    error = %e,
                    "Failed to finalize transaction"
                );
                PaymentError::from(e)
            })
    }

    async fn update_order(
        &self,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        body: JsonValue,
    ) {
        let path = merchant_path(&credential.merchant_id, &format!("/orders/{}", order.id));
        if let Err(e) = self
            .gateway
            .call::<JsonValue>(Method::POST, &path, Some(&body), credential)
            .await
        {
            warn!(order_id = %order.id, error = %e, "Failed to update order after capture");
        }
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Refunds `amount`, or the whole payment when `None`. A payment whose
    /// local record is not `completed` is rejected before the remote call.
    pub async fn refund(
        &self,
        credential: &mut MerchantCredential,
        remote_payment_id: &str,
        amount: Option<i64>,
    ) -> GatewayResult<RefundResult> {
        if let Some(amount) = amount {
            if amount <= 0 {
                return Err(PaymentError::Validation {
                    message: "refund amount must be greater than zero".to_string(),
                    field: Some("amount".to_string()),
                });
            }
        }

        let local = self
            .ledger
            .find_transaction_by_remote_id(remote_payment_id)
            .await?;
        if let Some(record) = &local {
            if record.status != TransactionStatus::Completed {
                return Err(PaymentError::InvalidStateTransition {
                    from: record.status.to_string(),
                    to: TransactionStatus::Refunded.to_string(),
                });
            }
            if amount.map(|a| a > record.amount).unwrap_or(false) {
                return Err(PaymentError::Validation {
                    message: "refund amount exceeds the captured amount".to_string(),
                    field: Some("amount".to_string()),
                });
            }
        }

        let body = match amount {
            Some(amount) => json!({ "amount": amount }),
            None => json!({ "fullRefund": true }),
        };
        let path = merchant_path(
            &credential.merchant_id,
            &format!("/payments/{}/refunds", remote_payment_id),
        );
        let raw: JsonValue = self
            .gateway
            .call(Method::POST, &path, Some(&body), credential)
            .await
            .map_err(|e| match e {
                PaymentError::Gateway {
                    http_status,
                    body_preview,
                    ..
                } => PaymentError::Refund {
                    remote_payment_id: remote_payment_id.to_string(),
                    message: format!("HTTP {}: {}", http_status, body_preview),
                },
                other => other,
            })?;

        let refund_id = raw
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                warn!(payment_id = %remote_payment_id, "Refund response carried no id");
                format!("refund-{}", remote_payment_id)
            });
        let refunded_at = raw
            .get("createdTime")
            .and_then(JsonValue::as_i64)
            .and_then(from_epoch_millis)
            .unwrap_or_else(Utc::now);

        let Some(record) = local else {
            error!(
                payment_id = %remote_payment_id,
                refund_id = %refund_id,
                "Refund accepted remotely but no local transaction exists; needs reconciliation"
            );
            return Err(PaymentError::NotFound {
                message: format!(
                    "no local transaction for payment {} (remote refund {} succeeded)",
                    remote_payment_id, refund_id
                ),
            });
        };

        let refunded_amount = amount
            .or_else(|| raw.get("amount").and_then(JsonValue::as_i64))
            .unwrap_or(record.amount);

        self.ledger
            .update_transaction(
                record.id,
                TransactionStatus::Completed,
                TransactionPatch::status(TransactionStatus::Refunded)
                    .with_refund(refunded_amount, refunded_at),
            )
            .await?;

        info!(
            transaction_id = record.id,
            payment_id = %remote_payment_id,
            refund_id = %refund_id,
            amount = refunded_amount,
            "Payment refunded"
        );

        Ok(RefundResult {
            refund_id,
            remote_payment_id: remote_payment_id.to_string(),
            amount: refunded_amount,
            refunded_at,
        })
    }
}
