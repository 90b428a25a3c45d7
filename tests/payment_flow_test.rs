//! Capture and refund flows driven through the facade against a mocked
//! gateway.

mod common;

use async_trait::async_trait;
use common::*;
use pumpout_gateway::database::credential_repository::CredentialStore;
use pumpout_gateway::database::transaction_repository::{
    TransactionLedger, TransactionStatus, PENDING_PAYMENT_ID_PREFIX,
};
use pumpout_gateway::payments::client::GatewayClient;
use pumpout_gateway::payments::config::LastResortConfig;
use pumpout_gateway::payments::error::{GatewayResult, PaymentError};
use pumpout_gateway::payments::oauth::OAuthClient;
use pumpout_gateway::payments::strategies::{CaptureAttempt, CaptureStrategy, RemoteOrder};
use pumpout_gateway::payments::types::{
    CustomerContact, MerchantCredential, PaymentOutcome, PaymentRequest,
};
use pumpout_gateway::services::payment_orchestrator::DECLINED_MESSAGE;
use pumpout_gateway::services::webhook_processor::DispatchOutcome;
use pumpout_gateway::services::{
    PaymentGateway, PaymentOrchestrator, MANUAL_RECONCILIATION_MESSAGE,
};
use secrecy::ExposeSecret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn capture_with_healthy_gateway_is_approved_and_completed() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    mount_direct_charge(&h.server, "paid").await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, Some(77))
        .await
        .expect("capture");

    assert_eq!(result.result, PaymentOutcome::Approved);
    assert_eq!(result.id, "PAY1");
    assert_eq!(result.order_id, ORDER_ID);
    assert_eq!(result.card_last4.as_deref(), Some("4242"));
    assert!(!result.requires_reconciliation);

    let records = h.ledger.all().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.remote_payment_id, "PAY1");
    assert_eq!(record.remote_order_id, ORDER_ID);
    assert_eq!(record.local_request_id, Some(77));
    assert_eq!(record.user_id, 1);
    assert_eq!(record.amount, 5000);
    assert_eq!(record.payment_method.as_deref(), Some("card"));
    assert_eq!(record.card_brand.as_deref(), Some("VISA"));
    assert!(record.error_message.is_none());
    assert_eq!(
        record.raw_gateway_response.as_ref().expect("audit")["strategy"],
        "direct_charge"
    );
}

#[tokio::test]
async fn expired_token_is_refreshed_once_before_capture() {
    let h = Harness::start_with(expired_credential(), LastResortConfig::default()).await;
    mount_token_refresh(&h.server, "access-2").await;

    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_order_followups(&h.server).await;
    mount_direct_charge(&h.server, "paid").await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture after refresh");
    assert!(result.is_approved());

    let stored = h.stored_credential().await;
    assert_eq!(stored.access_token.expose_secret(), "access-2");
    assert_eq!(
        stored.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("refresh-2".to_string())
    );
    assert!(!stored.is_expired(chrono::Utc::now(), chrono::Duration::seconds(60)));
}

#[tokio::test]
async fn unauthorized_response_triggers_one_refresh_and_retry() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_order_followups(&h.server).await;
    mount_direct_charge(&h.server, "paid").await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture after 401 retry");
    assert!(result.is_approved());

    // The refresh response carried no new refresh token; the old one stays.
    let stored = h.stored_credential().await;
    assert_eq!(stored.access_token.expose_secret(), "access-2");
    assert_eq!(
        stored.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some(REFRESH_TOKEN.to_string())
    );
}

#[tokio::test]
async fn second_unauthorized_response_is_an_authentication_error() {
    let h = Harness::start().await;
    mount_token_refresh(&h.server, "access-2").await;

    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.server)
        .await;

    let err = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect_err("capture must fail");

    assert!(matches!(err, PaymentError::OrderCreation { .. }));
    assert!(matches!(err.root_cause(), PaymentError::Authentication { .. }));
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn failed_refresh_leaves_stored_credential_untouched() {
    let h = Harness::start_with(expired_credential(), LastResortConfig::default()).await;

    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect_err("refresh failure surfaces");

    assert!(matches!(
        err.root_cause(),
        PaymentError::TokenRefresh {
            http_status: Some(400),
            ..
        }
    ));
    let stored = h.stored_credential().await;
    assert_eq!(stored.access_token.expose_secret(), "expired-token");
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn order_creation_failure_creates_no_transaction() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&h.server)
        .await;

    let err = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect_err("order creation fails");

    match &err {
        PaymentError::OrderCreation { source } => {
            assert!(matches!(
                source.as_ref(),
                PaymentError::Gateway {
                    http_status: 500,
                    ..
                }
            ));
        }
        other => panic!("expected OrderCreation, got {:?}", other),
    }
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn invalid_request_is_rejected_before_any_remote_call() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let request = PaymentRequest {
        amount_minor_units: 0,
        ..payment_request()
    };
    let err = h
        .gateway
        .capture(&request, 1, None)
        .await
        .expect_err("zero amount");

    assert!(matches!(err, PaymentError::Validation { .. }));
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn overflowing_total_is_a_validation_error() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let request = PaymentRequest {
        amount_minor_units: i64::MAX,
        tax_amount: 1,
        ..payment_request()
    };
    let err = h
        .gateway
        .capture(&request, 1, None)
        .await
        .expect_err("total overflows");

    assert!(matches!(err, PaymentError::Validation { .. }));
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn declined_charge_is_recorded_as_failed() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    mount_direct_charge(&h.server, "declined").await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("declined is an answer, not an error");

    assert_eq!(result.result, PaymentOutcome::Declined);
    let record = &h.ledger.all().await[0];
    assert_eq!(record.status, TransactionStatus::Failed);
    assert_eq!(record.remote_payment_id, "PAY1");
    assert_eq!(record.error_message.as_deref(), Some(DECLINED_MESSAGE));
}

#[tokio::test]
async fn falls_through_to_order_payment_when_direct_charge_fails() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/orders/{}/pay", ORDER_ID)))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "not enabled" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/payments", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "PAY2",
            "result": "SUCCESS",
            "cardTransaction": { "last4": "1111", "cardType": "MC", "authCode": "A1" },
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture");

    assert_eq!(result.id, "PAY2");
    assert_eq!(result.auth_code.as_deref(), Some("A1"));

    let record = &h.ledger.all().await[0];
    assert_eq!(record.status, TransactionStatus::Completed);
    assert_eq!(record.card_last4.as_deref(), Some("1111"));
    let audit = record.raw_gateway_response.as_ref().expect("audit");
    assert_eq!(audit["strategy"], "order_payment");
    assert_eq!(audit["attempts"].as_array().map(Vec::len), Some(1));
    assert_eq!(audit["attempts"][0]["strategy"], "direct_charge");
}

#[tokio::test]
async fn tender_payment_prefers_credit_card_tender() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;

    Mock::given(method("GET"))
        .and(path(merchant_path("/tenders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "elements": [
                { "id": "T-CASH", "labelKey": "com.clover.tender.cash", "enabled": true },
                { "id": "T-CC", "labelKey": "com.clover.tender.credit_card", "label": "Credit Card", "enabled": true },
            ]
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/payments", ORDER_ID))))
        .and(body_partial_json(json!({ "tender": { "id": "T-CC" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "PAY3",
            "result": "SUCCESS",
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/payments", ORDER_ID))))
        .respond_with(ResponseTemplate::new(400))
        .mount(&h.server)
        .await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture");

    assert_eq!(result.id, "PAY3");
    let record = &h.ledger.all().await[0];
    assert_eq!(record.payment_method.as_deref(), Some("Credit Card"));
    let audit = record.raw_gateway_response.as_ref().expect("audit");
    assert_eq!(audit["strategy"], "tender_payment");
    assert_eq!(audit["attempts"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn all_strategies_failing_records_manual_reconciliation() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;

    let result = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("provisional result");

    assert!(result.requires_reconciliation);
    assert_eq!(result.id, format!("manual-{}", ORDER_ID));

    let records = h.ledger.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Completed);
    assert_eq!(
        records[0].error_message.as_deref(),
        Some(MANUAL_RECONCILIATION_MESSAGE)
    );
    assert_eq!(records[0].payment_method.as_deref(), Some("manual"));
    let audit = records[0].raw_gateway_response.as_ref().expect("audit");
    assert_eq!(audit["attempts"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn all_strategies_failing_without_last_resort_fails_the_transaction() {
    let h = Harness::start_with(valid_credential(), LastResortConfig::disabled()).await;
    mount_order_setup(&h.server).await;

    let err = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect_err("capture exhausted");

    match err {
        PaymentError::CaptureExhausted { attempts } => assert_eq!(attempts.len(), 3),
        other => panic!("expected CaptureExhausted, got {:?}", other),
    }
    let records = h.ledger.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn customer_and_tax_line_are_added_to_the_order() {
    let h = Harness::start().await;

    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .and(body_partial_json(json!({ "total": 5350, "currency": "USD" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/customers")))
        .and(body_partial_json(json!({
            "firstName": "Ada",
            "emailAddresses": [{ "emailAddress": "ada@example.com" }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "CUST1" })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/line_items", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "LI" })))
        .expect(2)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .mount(&h.server)
        .await;
    mount_direct_charge(&h.server, "paid").await;

    let request = PaymentRequest {
        tax_amount: 350,
        tip_amount: 500,
        customer: Some(CustomerContact {
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: Some("ada@example.com".to_string()),
            phone: None,
        }),
        ..payment_request()
    };
    let result = h.gateway.capture(&request, 3, None).await.expect("capture");

    assert_eq!(result.amount, 5850);
    assert_eq!(h.ledger.all().await[0].amount, 5850);
}

#[tokio::test]
async fn refund_is_applied_once_and_second_refund_is_rejected() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    mount_direct_charge(&h.server, "paid").await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/payments/PAY1/refunds")))
        .and(body_partial_json(json!({ "fullRefund": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "REF1",
            "amount": 5000,
            "createdTime": 1_700_000_000_000_i64,
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture");

    let refund = h.gateway.refund("PAY1", None).await.expect("refund");
    assert_eq!(refund.refund_id, "REF1");
    assert_eq!(refund.amount, 5000);

    let record = h
        .ledger
        .find_transaction_by_remote_id("PAY1")
        .await
        .expect("ledger")
        .expect("record");
    assert_eq!(record.status, TransactionStatus::Refunded);
    assert_eq!(record.refund_amount, Some(5000));
    assert_eq!(
        record.refunded_at.map(|t| t.timestamp_millis()),
        Some(1_700_000_000_000)
    );

    let err = h
        .gateway
        .refund("PAY1", None)
        .await
        .expect_err("second refund");
    assert!(matches!(err, PaymentError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn partial_refund_above_captured_amount_is_rejected_locally() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    mount_direct_charge(&h.server, "paid").await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/payments/PAY1/refunds")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "REF1" })))
        .expect(0)
        .mount(&h.server)
        .await;

    h.gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("capture");

    let err = h
        .gateway
        .refund("PAY1", Some(9_999))
        .await
        .expect_err("over-refund");
    assert!(matches!(err, PaymentError::Validation { .. }));
}

#[tokio::test]
async fn refund_without_local_record_succeeds_remotely_but_reports_not_found() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/payments/UNKNOWN/refunds")))
        .and(body_partial_json(json!({ "amount": 1000 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "REF9" })))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .gateway
        .refund("UNKNOWN", Some(1000))
        .await
        .expect_err("no local record");

    match err {
        PaymentError::NotFound { message } => assert!(message.contains("REF9")),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_refund_is_a_refund_error() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/payments/GONE/refunds")))
        .respond_with(ResponseTemplate::new(404).set_body_string("payment not found"))
        .mount(&h.server)
        .await;

    let err = h
        .gateway
        .refund("GONE", None)
        .await
        .expect_err("refund rejected");

    match err {
        PaymentError::Refund {
            remote_payment_id,
            message,
        } => {
            assert_eq!(remote_payment_id, "GONE");
            assert!(message.contains("404"));
        }
        other => panic!("expected Refund, got {:?}", other),
    }
}

#[tokio::test]
async fn capture_without_authorized_merchant_is_not_configured() {
    let h = Harness::start().await;
    h.credentials
        .deactivate_credential(MERCHANT_ID)
        .await
        .expect("deactivate");

    let err = h
        .gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect_err("no credential");
    assert!(matches!(err, PaymentError::NotConfigured { .. }));
}

struct PanickingStrategy;

#[async_trait]
impl CaptureStrategy for PanickingStrategy {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn attempt(
        &self,
        _gateway: &GatewayClient,
        _credential: &mut MerchantCredential,
        _order: &RemoteOrder,
        _request: &PaymentRequest,
    ) -> GatewayResult<CaptureAttempt> {
        panic!("strategy blew up");
    }
}

#[tokio::test]
async fn panicking_strategy_marks_pending_transaction_failed() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;

    let config = Arc::new(gateway_config(&h.server.uri()));
    let oauth = Arc::new(OAuthClient::new(config.clone(), h.credentials.clone()).expect("oauth"));
    let client = Arc::new(GatewayClient::new(config, oauth).expect("client"));
    let strategies: Vec<Arc<dyn CaptureStrategy>> = vec![Arc::new(PanickingStrategy)];
    let orchestrator =
        Arc::new(PaymentOrchestrator::new(client, h.ledger.clone()).with_strategies(strategies));

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut credential = valid_credential();
            orchestrator
                .capture(&mut credential, &payment_request(), 1, None)
                .await
        })
    };
    let join = task.await;
    assert!(join.expect_err("task panicked").is_panic());

    let mut status = None;
    for _ in 0..50 {
        let records = h.ledger.all().await;
        if let Some(record) = records.first() {
            if record.status != TransactionStatus::Pending {
                status = Some(record.status);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, Some(TransactionStatus::Failed));

    let record = &h.ledger.all().await[0];
    assert_eq!(
        record.error_message.as_deref(),
        Some("capture aborted unexpectedly")
    );
    assert!(h
        .ledger
        .find_transaction(record.id)
        .await
        .expect("ledger")
        .is_some());
}

#[tokio::test]
async fn cancelled_capture_stays_pending_until_a_webhook_settles_it() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/orders/{}/pay", ORDER_ID)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "charge": "PAY1", "status": "paid" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&h.server)
        .await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        h.gateway.capture(&payment_request(), 1, None),
    )
    .await;
    assert!(cancelled.is_err(), "capture should still be waiting on the charge");

    let pending = h.ledger.all().await[0].clone();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert!(pending.remote_payment_id.starts_with(PENDING_PAYMENT_ID_PREFIX));

    let body = serde_json::to_vec(&json!({
        "type": "PAYMENT_UPDATED",
        "merchantId": MERCHANT_ID,
        "data": { "paymentId": "PAY1", "orderId": ORDER_ID, "result": "APPROVED" },
    }))
    .unwrap();
    let outcome = h
        .gateway
        .verify_and_dispatch_webhook(&body, Some(&sign(&body)))
        .await
        .expect("webhook resolves the pending record");
    assert_eq!(outcome, DispatchOutcome::Applied);

    let settled = h
        .ledger
        .find_transaction(pending.id)
        .await
        .expect("ledger")
        .expect("record");
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert_eq!(settled.remote_payment_id, "PAY1");
}

fn client_for(h: &Harness, base_url: &str) -> GatewayClient {
    let config = Arc::new(gateway_config(base_url));
    let oauth = Arc::new(OAuthClient::new(config.clone(), h.credentials.clone()).expect("oauth"));
    GatewayClient::new(config, oauth).expect("client")
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    let h = Harness::start().await;
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let closed = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let client = client_for(&h, &closed);
    let mut credential = valid_credential();
    let err = client
        .call::<serde_json::Value>(
            reqwest::Method::POST,
            &merchant_path("/orders"),
            Some(&json!({ "total": 5000 })),
            &mut credential,
        )
        .await
        .expect_err("nothing is listening");

    assert!(matches!(err.root_cause(), PaymentError::Transport { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn rejected_call_is_a_gateway_error_with_bounded_preview() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .respond_with(ResponseTemplate::new(422).set_body_string("x".repeat(1_000)))
        .expect(1)
        .mount(&h.server)
        .await;

    let client = client_for(&h, &h.server.uri());
    let mut credential = valid_credential();
    let err = client
        .call::<serde_json::Value>(
            reqwest::Method::POST,
            &merchant_path("/orders"),
            Some(&json!({ "total": 5000 })),
            &mut credential,
        )
        .await
        .expect_err("gateway rejects the order");

    match err {
        PaymentError::Gateway {
            http_status,
            status_text,
            body_preview,
        } => {
            assert_eq!(http_status, 422);
            assert_eq!(status_text, "Unprocessable Entity");
            assert_eq!(body_preview.chars().count(), 400);
        }
        other => panic!("expected Gateway error, got {:?}", other),
    }
}

#[tokio::test]
async fn transport_failure_in_direct_charge_falls_through() {
    let h = Harness::start().await;
    mount_order_setup(&h.server).await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/orders/{}/pay", ORDER_ID)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "charge": "PAY1", "status": "paid" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/payments", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "PAY2",
            "result": "SUCCESS",
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut config = gateway_config(&h.server.uri());
    config.request_timeout_secs = 1;
    let gateway = PaymentGateway::new(config, h.credentials.clone(), h.ledger.clone())
        .expect("gateway");

    let result = gateway
        .capture(&payment_request(), 1, None)
        .await
        .expect("order payment answers");
    assert_eq!(result.id, "PAY2");

    let record = &h.ledger.all().await[0];
    assert_eq!(record.status, TransactionStatus::Completed);
    let audit = record.raw_gateway_response.as_ref().expect("audit");
    assert_eq!(audit["strategy"], "order_payment");
    assert_eq!(audit["attempts"][0]["strategy"], "direct_charge");
    assert!(audit["attempts"][0]["error"]
        .as_str()
        .unwrap_or_default()
        .contains("Transport error"));
}
