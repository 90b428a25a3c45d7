use crate::payments::error::{GatewayResult, PaymentError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEnvironment::Sandbox => "sandbox",
            GatewayEnvironment::Production => "production",
        }
    }

    /// Legacy shim for credential rows written before the environment column
    /// was populated. Production merchant ids are 13 upper-case alphanumerics.
    pub fn legacy_hint_from_merchant_id(merchant_id: &str) -> Self {
        let id = merchant_id.trim();
        let looks_production = id.len() == 13
            && id
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase());
        if looks_production {
            GatewayEnvironment::Production
        } else {
            GatewayEnvironment::Sandbox
        }
    }
}

impl std::fmt::Display for GatewayEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayEnvironment {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" => Ok(GatewayEnvironment::Sandbox),
            "production" | "prod" => Ok(GatewayEnvironment::Production),
            _ => Err(PaymentError::Configuration {
                message: format!("unsupported gateway environment: {}", value),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Region {
    #[serde(rename = "NA")]
    Na,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "LA")]
    La,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Na => "NA",
            Region::Eu => "EU",
            Region::La => "LA",
        }
    }

    /// REST base for `/v3/merchants/...` calls.
    pub fn api_base(&self, environment: GatewayEnvironment) -> &'static str {
        match (environment, self) {
            (GatewayEnvironment::Sandbox, _) => "https://apisandbox.dev.clover.com",
            (GatewayEnvironment::Production, Region::Na) => "https://api.clover.com",
            (GatewayEnvironment::Production, Region::Eu) => "https://api.eu.clover.com",
            (GatewayEnvironment::Production, Region::La) => "https://api.la.clover.com",
        }
    }

    /// Card-present/e-commerce base for `/v1/...` calls.
    pub fn ecommerce_base(&self, environment: GatewayEnvironment) -> &'static str {
        match (environment, self) {
            (GatewayEnvironment::Sandbox, _) => "https://scl-sandbox.dev.clover.com",
            (GatewayEnvironment::Production, Region::Na) => "https://scl.clover.com",
            (GatewayEnvironment::Production, Region::Eu) => "https://scl.eu.clover.com",
            (GatewayEnvironment::Production, Region::La) => "https://scl.la.clover.com",
        }
    }

    pub fn oauth_base(&self, environment: GatewayEnvironment) -> &'static str {
        match (environment, self) {
            (GatewayEnvironment::Sandbox, _) => "https://sandbox.dev.clover.com",
            (GatewayEnvironment::Production, Region::Na) => "https://www.clover.com",
            (GatewayEnvironment::Production, Region::Eu) => "https://eu.clover.com",
            (GatewayEnvironment::Production, Region::La) => "https://la.clover.com",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "NA" | "US" => Ok(Region::Na),
            "EU" => Ok(Region::Eu),
            "LA" => Ok(Region::La),
            _ => Err(PaymentError::Configuration {
                message: format!("unsupported gateway region: {}", value),
            }),
        }
    }
}

/// Per-merchant OAuth credential. Tokens stay wrapped in [`SecretString`] and
/// are never part of `Debug` output.
pub struct MerchantCredential {
    pub merchant_id: String,
    pub app_id: String,
    pub app_secret: SecretString,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub environment: GatewayEnvironment,
    pub webhook_secret: Option<SecretString>,
    pub is_active: bool,
}

impl MerchantCredential {
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.token_expires_at
            .map(|expires_at| expires_at <= now + skew)
            .unwrap_or(false)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .map(|t| !t.expose_secret().is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn bearer_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

impl Clone for MerchantCredential {
    fn clone(&self) -> Self {
        Self {
            merchant_id: self.merchant_id.clone(),
            app_id: self.app_id.clone(),
            app_secret: clone_secret(&self.app_secret),
            access_token: clone_secret(&self.access_token),
            refresh_token: self.refresh_token.as_ref().map(clone_secret),
            token_expires_at: self.token_expires_at,
            environment: self.environment,
            webhook_secret: self.webhook_secret.as_ref().map(clone_secret),
            is_active: self.is_active,
        }
    }
}

impl std::fmt::Debug for MerchantCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantCredential")
            .field("merchant_id", &self.merchant_id)
            .field("app_id", &self.app_id)
            .field("has_refresh_token", &self.has_refresh_token())
            .field("token_expires_at", &self.token_expires_at)
            .field("environment", &self.environment)
            .field("has_webhook_secret", &self.webhook_secret.is_some())
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Body of the OAuth token endpoint.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

impl TokenResponse {
    pub fn expires_in_secs(&self) -> i64 {
        self.expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS)
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("refresh_token_rotated", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Returned to the caller of the OAuth callback; never carries tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub merchant_id: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerContact {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CustomerContact {
    pub fn is_empty(&self) -> bool {
        [&self.first_name, &self.last_name, &self.email, &self.phone]
            .iter()
            .all(|v| v.as_deref().map(str::trim).unwrap_or("").is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount_minor_units: i64,
    pub currency: String,
    pub source_token: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tax_amount: i64,
    #[serde(default)]
    pub tip_amount: i64,
    #[serde(default)]
    pub customer: Option<CustomerContact>,
}

impl PaymentRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.amount_minor_units <= 0 {
            return Err(PaymentError::Validation {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount_minor_units".to_string()),
            });
        }
        if self.tax_amount < 0 || self.tip_amount < 0 {
            return Err(PaymentError::Validation {
                message: "tax and tip amounts cannot be negative".to_string(),
                field: Some(if self.tax_amount < 0 {
                    "tax_amount".to_string()
                } else {
                    "tip_amount".to_string()
                }),
            });
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation {
                message: format!("invalid currency code: {}", self.currency),
                field: Some("currency".to_string()),
            });
        }
        if self.source_token.trim().is_empty() {
            return Err(PaymentError::Validation {
                message: "payment source token is required".to_string(),
                field: Some("source_token".to_string()),
            });
        }
        if self.checked_charge_total().is_none() {
            return Err(PaymentError::Validation {
                message: "amount, tax and tip exceed the largest chargeable total".to_string(),
                field: Some("amount_minor_units".to_string()),
            });
        }
        Ok(())
    }

    pub fn checked_order_total(&self) -> Option<i64> {
        self.amount_minor_units.checked_add(self.tax_amount)
    }

    pub fn checked_charge_total(&self) -> Option<i64> {
        self.checked_order_total()?.checked_add(self.tip_amount)
    }

    /// Amount the remote order is opened for: subtotal plus tax. Saturates
    /// on requests that did not pass `validate`.
    pub fn order_total(&self) -> i64 {
        self.checked_order_total().unwrap_or(i64::MAX)
    }

    /// Everything the customer pays, tip included.
    pub fn charge_total(&self) -> i64 {
        self.checked_charge_total().unwrap_or(i64::MAX)
    }

    pub fn currency_code(&self) -> String {
        self.currency.trim().to_uppercase()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Approved,
    Declined,
}

/// Normalized result of whichever capture strategy answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub id: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub result: PaymentOutcome,
    pub auth_code: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when no gateway strategy captured the payment and it was recorded
    /// for manual reconciliation instead. Not a real charge.
    #[serde(default)]
    pub requires_reconciliation: bool,
}

impl PaymentResult {
    pub fn is_approved(&self) -> bool {
        self.result == PaymentOutcome::Approved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    pub remote_payment_id: String,
    pub amount: i64,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    PaymentUpdated,
    RefundCreated,
    Unknown(String),
}

impl WebhookEventType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "PAYMENT_UPDATED" => WebhookEventType::PaymentUpdated,
            "REFUND_CREATED" => WebhookEventType::RefundCreated,
            _ => WebhookEventType::Unknown(value.to_string()),
        }
    }
}

/// Envelope of an inbound gateway webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub data: JsonValue,
}

/// Converts a gateway epoch-milliseconds timestamp.
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
