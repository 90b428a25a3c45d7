//! Ordered capture strategies. Each one is a different way of getting the
//! gateway to take money for an already-created order; the orchestrator
//! falls through them on error.

use crate::payments::client::{merchant_path, ApiSurface, GatewayClient};
use crate::payments::config::LastResortConfig;
use crate::payments::error::{GatewayResult, PaymentError};
use crate::payments::types::{
    from_epoch_millis, MerchantCredential, PaymentOutcome, PaymentRequest, PaymentResult,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const CREDIT_CARD_TENDER_KEY: &str = "com.clover.tender.credit_card";
const EXTERNAL_PAYMENT_TENDER_KEY: &str = "com.clover.tender.external_payment";

/// Remote order the capture is attached to.
#[derive(Debug, Clone)]
pub struct RemoteOrder {
    pub id: String,
    pub total: i64,
    pub currency: String,
}

/// What a strategy hands back when the gateway answered with a payment,
/// approved or declined.
#[derive(Debug, Clone)]
pub struct CaptureAttempt {
    pub result: PaymentResult,
    pub raw: JsonValue,
    pub payment_method: String,
}

#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        gateway: &GatewayClient,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) -> GatewayResult<CaptureAttempt>;
}

pub fn default_strategies(last_resort: &LastResortConfig) -> Vec<Arc<dyn CaptureStrategy>> {
    vec![
        Arc::new(DirectChargeStrategy),
        Arc::new(OrderPaymentStrategy),
        Arc::new(TenderPaymentStrategy::new(
            last_resort.fallback_tender_ids.clone(),
        )),
    ]
}

// ============================================================================
// Direct card charge
// ============================================================================

/// Charges the tokenized card against the order on the e-commerce surface.
pub struct DirectChargeStrategy;

#[async_trait]
impl CaptureStrategy for DirectChargeStrategy {
    fn name(&self) -> &'static str {
        "direct_charge"
    }

    async fn attempt(
        &self,
        gateway: &GatewayClient,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) -> GatewayResult<CaptureAttempt> {
        let mut body = json!({
            "source": request.source_token,
            "tip_amount": request.tip_amount,
        });
        if let Some(email) = request.customer.as_ref().and_then(|c| c.email.as_ref()) {
            body["email"] = json!(email);
        }

        let raw: JsonValue = gateway
            .call_on(
                ApiSurface::Ecommerce,
                Method::POST,
                &format!("/v1/orders/{}/pay", order.id),
                Some(&body),
                credential,
            )
            .await?;

        let payment_id = str_at(&raw, &["charge"])
            .or_else(|| str_at(&raw, &["id"]))
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: "charge response carried no payment id".to_string(),
            })?;

        let outcome = outcome_of(str_at(&raw, &["status"]));

        Ok(CaptureAttempt {
            result: normalize(&raw, payment_id, order, request, outcome),
            raw,
            payment_method: "card".to_string(),
        })
    }
}

// ============================================================================
// Payment recorded on the order
// ============================================================================

/// Records a payment on the order using the source token.
pub struct OrderPaymentStrategy;

#[async_trait]
impl CaptureStrategy for OrderPaymentStrategy {
    fn name(&self) -> &'static str {
        "order_payment"
    }

    async fn attempt(
        &self,
        gateway: &GatewayClient,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) -> GatewayResult<CaptureAttempt> {
        let body = json!({
            "amount": order.total,
            "tipAmount": request.tip_amount,
            "taxAmount": request.tax_amount,
            "source": request.source_token,
            "externalPaymentId": Uuid::new_v4().simple().to_string(),
            "note": request.description.clone().unwrap_or_default(),
        });

        let path = merchant_path(
            &credential.merchant_id,
            &format!("/orders/{}/payments", order.id),
        );
        let raw: JsonValue = gateway
            .call(Method::POST, &path, Some(&body), credential)
            .await?;

        payment_record_attempt(raw, order, request, "card")
    }
}

// ============================================================================
// Payment recorded against a discovered tender
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tender {
    id: String,
    #[serde(default)]
    label_key: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TenderList {
    #[serde(default)]
    elements: Vec<Tender>,
}

/// Looks up the merchant's tenders and records the payment against the best
/// match, then against any configured fallback tender ids.
pub struct TenderPaymentStrategy {
    fallback_tender_ids: Vec<String>,
}

impl TenderPaymentStrategy {
    pub fn new(fallback_tender_ids: Vec<String>) -> Self {
        Self {
            fallback_tender_ids,
        }
    }

    fn candidates(&self, tenders: &[Tender]) -> Vec<(String, String)> {
        let enabled: Vec<&Tender> = tenders
            .iter()
            .filter(|t| t.enabled.unwrap_or(true))
            .collect();

        let mut ordered: Vec<(String, String)> = Vec::new();
        let mut push = |id: &str, label: &str| {
            if !ordered.iter().any(|(existing, _)| existing == id) {
                ordered.push((id.to_string(), label.to_string()));
            }
        };

        for key in [CREDIT_CARD_TENDER_KEY, EXTERNAL_PAYMENT_TENDER_KEY] {
            for tender in enabled
                .iter()
                .filter(|t| t.label_key.as_deref() == Some(key))
            {
                push(&tender.id, tender.label.as_deref().unwrap_or(key));
            }
        }
        for tender in &enabled {
            push(&tender.id, tender.label.as_deref().unwrap_or("tender"));
        }
        for id in &self.fallback_tender_ids {
            push(id, "fallback");
        }
        ordered
    }
}

#[async_trait]
impl CaptureStrategy for TenderPaymentStrategy {
    fn name(&self) -> &'static str {
        "tender_payment"
    }

    async fn attempt(
        &self,
        gateway: &GatewayClient,
        credential: &mut MerchantCredential,
        order: &RemoteOrder,
        request: &PaymentRequest,
    ) -> GatewayResult<CaptureAttempt> {
        let tenders_path = merchant_path(&credential.merchant_id, "/tenders");
        let tenders = match gateway
            .call::<TenderList>(Method::GET, &tenders_path, None, credential)
            .await
        {
            Ok(list) => list.elements,
            Err(e) if e.is_credential_failure() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Tender list unavailable, using configured fallbacks only");
                Vec::new()
            }
        };

        let candidates = self.candidates(&tenders);
        if candidates.is_empty() {
            return Err(PaymentError::InvalidResponse {
                message: "merchant has no usable tender".to_string(),
            });
        }

        let path = merchant_path(
            &credential.merchant_id,
            &format!("/orders/{}/payments", order.id),
        );
        let mut last_error = None;
        for (tender_id, label) in candidates {
            debug!(tender_id = %tender_id, label = %label, "Recording payment against tender");
            let body = json!({
                "amount": order.total,
                "tipAmount": request.tip_amount,
                "taxAmount": request.tax_amount,
                "tender": { "id": tender_id },
                "externalPaymentId": Uuid::new_v4().simple().to_string(),
                "note": request.description.clone().unwrap_or_default(),
            });

            match gateway
                .call::<JsonValue>(Method::POST, &path, Some(&body), credential)
                .await
            {
                Ok(raw) => return payment_record_attempt(raw, order, request, &label),
                Err(e) if e.is_credential_failure() => return Err(e),
                Err(e) => {
                    warn!(tender_id = %tender_id, error = %e, "Tender payment failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PaymentError::InvalidResponse {
            message: "merchant has no usable tender".to_string(),
        }))
    }
}

// ============================================================================
// Normalization
// ============================================================================

fn payment_record_attempt(
    raw: JsonValue,
    order: &RemoteOrder,
    request: &PaymentRequest,
    payment_method: &str,
) -> GatewayResult<CaptureAttempt> {
    let payment_id = str_at(&raw, &["id"]).ok_or_else(|| PaymentError::InvalidResponse {
        message: "payment response carried no id".to_string(),
    })?;

    let outcome = outcome_of(str_at(&raw, &["result"]));

    Ok(CaptureAttempt {
        result: normalize(&raw, payment_id, order, request, outcome),
        raw,
        payment_method: payment_method.to_string(),
    })
}

/// Only an explicit approval counts. A missing or unrecognized status is
/// treated as a decline.
fn outcome_of(status: Option<String>) -> PaymentOutcome {
    match status.map(|s| s.to_uppercase()).as_deref() {
        Some("PAID" | "SUCCEEDED" | "APPROVED" | "SUCCESS" | "AUTH") => PaymentOutcome::Approved,
        _ => PaymentOutcome::Declined,
    }
}

fn normalize(
    raw: &JsonValue,
    payment_id: String,
    order: &RemoteOrder,
    request: &PaymentRequest,
    outcome: PaymentOutcome,
) -> PaymentResult {
    let created_at = raw
        .get("createdTime")
        .and_then(JsonValue::as_i64)
        .and_then(from_epoch_millis)
        .or_else(|| {
            raw.get("created")
                .and_then(JsonValue::as_i64)
                .and_then(|secs| from_epoch_millis(secs.saturating_mul(1000)))
        })
        .unwrap_or_else(Utc::now);

    PaymentResult {
        id: payment_id,
        order_id: order.id.clone(),
        amount: request.charge_total(),
        currency: order.currency.clone(),
        result: outcome,
        auth_code: str_at(raw, &["cardTransaction", "authCode"])
            .or_else(|| str_at(raw, &["auth_code"])),
        card_last4: str_at(raw, &["cardTransaction", "last4"])
            .or_else(|| str_at(raw, &["source", "last4"])),
        card_brand: str_at(raw, &["cardTransaction", "cardType"])
            .or_else(|| str_at(raw, &["source", "brand"])),
        created_at,
        requires_reconciliation: false,
    }
}

fn str_at(value: &JsonValue, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> RemoteOrder {
        RemoteOrder {
            id: "ORD1".to_string(),
            total: 5350,
            currency: "USD".to_string(),
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            amount_minor_units: 5000,
            currency: "USD".to_string(),
            source_token: "tok".to_string(),
            description: None,
            tax_amount: 350,
            tip_amount: 500,
            customer: None,
        }
    }

    fn tender(id: &str, key: Option<&str>, enabled: bool) -> Tender {
        Tender {
            id: id.to_string(),
            label_key: key.map(str::to_string),
            label: None,
            enabled: Some(enabled),
        }
    }

    #[test]
    fn tender_preference_puts_card_first_and_fallbacks_last() {
        let strategy = TenderPaymentStrategy::new(vec!["FALLBACK".to_string(), "T_CASH".to_string()]);
        let tenders = vec![
            tender("T_CASH", Some("com.clover.tender.cash"), true),
            tender("T_EXT", Some(EXTERNAL_PAYMENT_TENDER_KEY), true),
            tender("T_CARD", Some(CREDIT_CARD_TENDER_KEY), true),
            tender("T_OFF", Some(CREDIT_CARD_TENDER_KEY), false),
        ];

        let ids: Vec<String> = strategy
            .candidates(&tenders)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["T_CARD", "T_EXT", "T_CASH", "FALLBACK"]);
    }

    #[test]
    fn payment_record_result_maps_to_outcome() {
        let approved = payment_record_attempt(
            json!({"id": "P1", "result": "SUCCESS", "cardTransaction": {"last4": "4242", "cardType": "VISA", "authCode": "A1"}}),
            &order(),
            &request(),
            "card",
        )
        .unwrap();
        assert_eq!(approved.result.result, PaymentOutcome::Approved);
        assert_eq!(approved.result.card_last4.as_deref(), Some("4242"));
        assert_eq!(approved.result.auth_code.as_deref(), Some("A1"));
        assert_eq!(approved.result.amount, 5850);

        let declined =
            payment_record_attempt(json!({"id": "P2", "result": "FAIL"}), &order(), &request(), "card")
                .unwrap();
        assert_eq!(declined.result.result, PaymentOutcome::Declined);

        assert!(payment_record_attempt(json!({"result": "SUCCESS"}), &order(), &request(), "card").is_err());
    }

    #[test]
    fn missing_status_is_never_an_approval() {
        let attempt =
            payment_record_attempt(json!({"id": "P3"}), &order(), &request(), "card").unwrap();
        assert_eq!(attempt.result.result, PaymentOutcome::Declined);

        assert_eq!(outcome_of(None), PaymentOutcome::Declined);
        assert_eq!(outcome_of(Some("paid".to_string())), PaymentOutcome::Approved);
        assert_eq!(outcome_of(Some("AUTH".to_string())), PaymentOutcome::Approved);
        assert_eq!(outcome_of(Some("pending".to_string())), PaymentOutcome::Declined);
    }

    #[test]
    fn created_time_is_read_from_epoch_millis() {
        let attempt = payment_record_attempt(
            json!({"id": "P1", "createdTime": 1_700_000_000_000_i64}),
            &order(),
            &request(),
            "card",
        )
        .unwrap();
        assert_eq!(attempt.result.created_at.timestamp(), 1_700_000_000);
    }
}
