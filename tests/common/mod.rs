//! Shared fixtures for the integration tests: a wiremock gateway, in-memory
//! stores and a facade wired against them.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use pumpout_gateway::database::memory::{InMemoryCredentialStore, InMemoryTransactionLedger};
use pumpout_gateway::payments::config::{GatewayConfig, LastResortConfig};
use pumpout_gateway::payments::types::{
    GatewayEnvironment, MerchantCredential, PaymentRequest, Region,
};
use pumpout_gateway::payments::utils::hmac_sha256_hex;
use pumpout_gateway::services::PaymentGateway;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MERCHANT_ID: &str = "MERCHANT1";
pub const APP_ID: &str = "test-app";
pub const APP_SECRET: &str = "test-app-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ACCESS_TOKEN: &str = "access-1";
pub const REFRESH_TOKEN: &str = "refresh-1";
pub const ORDER_ID: &str = "ORDER1";

pub struct Harness {
    pub server: MockServer,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub ledger: Arc<InMemoryTransactionLedger>,
    pub gateway: PaymentGateway,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(valid_credential(), LastResortConfig::default()).await
    }

    pub async fn start_with(credential: MerchantCredential, last_resort: LastResortConfig) -> Self {
        let server = MockServer::start().await;
        let credentials = Arc::new(InMemoryCredentialStore::with_credential(credential));
        let ledger = Arc::new(InMemoryTransactionLedger::new());
        let gateway = PaymentGateway::new(
            gateway_config(&server.uri()).with_last_resort(last_resort),
            credentials.clone(),
            ledger.clone(),
        )
        .expect("gateway");

        Self {
            server,
            credentials,
            ledger,
            gateway,
        }
    }

    /// Credential currently stored for the test merchant.
    pub async fn stored_credential(&self) -> MerchantCredential {
        self.credentials
            .get(MERCHANT_ID)
            .await
            .expect("stored credential")
    }
}

pub fn gateway_config(base_url: &str) -> GatewayConfig {
    GatewayConfig::new(APP_ID, APP_SECRET, GatewayEnvironment::Sandbox, Region::Na)
        .with_base_url(base_url)
        .with_merchant(MERCHANT_ID)
}

pub fn credential(access_token: &str, expires_in_secs: i64) -> MerchantCredential {
    MerchantCredential {
        merchant_id: MERCHANT_ID.to_string(),
        app_id: APP_ID.to_string(),
        app_secret: SecretString::from(APP_SECRET),
        access_token: SecretString::from(access_token),
        refresh_token: Some(SecretString::from(REFRESH_TOKEN)),
        token_expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
        environment: GatewayEnvironment::Sandbox,
        webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
        is_active: true,
    }
}

pub fn valid_credential() -> MerchantCredential {
    credential(ACCESS_TOKEN, 3600)
}

pub fn expired_credential() -> MerchantCredential {
    credential("expired-token", -60)
}

pub fn payment_request() -> PaymentRequest {
    PaymentRequest {
        amount_minor_units: 5000,
        currency: "USD".to_string(),
        source_token: "tok_valid".to_string(),
        description: Some("Pump-out slip 14".to_string()),
        tax_amount: 0,
        tip_amount: 0,
        customer: None,
    }
}

pub fn merchant_path(suffix: &str) -> String {
    format!("/v3/merchants/{}{}", MERCHANT_ID, suffix)
}

pub fn sign(body: &[u8]) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body).expect("hmac")
}

/// Order creation, line items and order updates succeed.
pub async fn mount_order_setup(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(merchant_path("/orders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .mount(server)
        .await;

    mount_order_followups(server).await;
}

/// Line items and order updates succeed.
pub async fn mount_order_followups(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}/line_items", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "LI1" })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(merchant_path(&format!("/orders/{}", ORDER_ID))))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": ORDER_ID })))
        .mount(server)
        .await;
}

pub async fn mount_direct_charge(server: &MockServer, status: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/v1/orders/{}/pay", ORDER_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": ORDER_ID,
            "charge": "PAY1",
            "status": status,
            "source": { "last4": "4242", "brand": "VISA" },
            "created": 1_700_000_000,
        })))
        .mount(server)
        .await;
}

pub async fn mount_token_refresh(server: &MockServer, new_access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": new_access_token,
            "refresh_token": "refresh-2",
            "expires_in": 3600,
            "token_type": "bearer",
        })))
        .expect(1)
        .mount(server)
        .await;
}
