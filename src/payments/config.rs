use crate::config::ConfigError;
use crate::payments::types::{GatewayEnvironment, Region};
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Knobs for what happens once every capture strategy has failed.
#[derive(Debug, Clone)]
pub struct LastResortConfig {
    /// Record a provisional completed payment flagged for manual
    /// reconciliation instead of failing the capture.
    pub manual_reconciliation: bool,
    /// Tender ids tried by the tender strategy when the merchant's tender
    /// list has no usable entry.
    pub fallback_tender_ids: Vec<String>,
}

impl Default for LastResortConfig {
    fn default() -> Self {
        Self {
            manual_reconciliation: true,
            fallback_tender_ids: Vec::new(),
        }
    }
}

impl LastResortConfig {
    pub fn disabled() -> Self {
        Self {
            manual_reconciliation: false,
            fallback_tender_ids: Vec::new(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let manual_reconciliation = match env::var("GATEWAY_MANUAL_RECONCILIATION") {
            Ok(value) => value.trim().parse::<bool>().map_err(|_| {
                ConfigError::InvalidValue("GATEWAY_MANUAL_RECONCILIATION".to_string())
            })?,
            Err(_) => true,
        };
        let fallback_tender_ids = env::var("GATEWAY_FALLBACK_TENDER_IDS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            manual_reconciliation,
            fallback_tender_ids,
        })
    }
}

/// Application-level gateway settings. The per-merchant tokens live in the
/// credential store, not here.
#[derive(Debug)]
pub struct GatewayConfig {
    pub app_id: String,
    pub app_secret: SecretString,
    pub environment: GatewayEnvironment,
    pub region: Region,
    /// Merchant whose credential the inbound operations bind to.
    pub merchant_id: Option<String>,
    pub api_base_url: Option<String>,
    pub oauth_base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// Signing secret from the gateway's webhook settings. Stamped onto a
    /// merchant credential at authorization when it has none of its own.
    pub webhook_secret: Option<SecretString>,
    pub last_resort: LastResortConfig,
}

impl GatewayConfig {
    pub fn new(
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        environment: GatewayEnvironment,
        region: Region,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: SecretString::from(app_secret.into()),
            environment,
            region,
            merchant_id: None,
            api_base_url: None,
            oauth_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            webhook_secret: None,
            last_resort: LastResortConfig::default(),
        }
    }

    /// Points both API surfaces and the OAuth host at one base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.api_base_url = Some(base_url.clone());
        self.oauth_base_url = Some(base_url);
        self
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_last_resort(mut self, last_resort: LastResortConfig) -> Self {
        self.last_resort = last_resort;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let app_id = required("GATEWAY_APP_ID")?;
        let app_secret = required("GATEWAY_APP_SECRET")?;

        let environment = env::var("GATEWAY_ENVIRONMENT")
            .unwrap_or_else(|_| "sandbox".to_string())
            .parse::<GatewayEnvironment>()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_ENVIRONMENT".to_string()))?;
        let region = env::var("GATEWAY_REGION")
            .unwrap_or_else(|_| "NA".to_string())
            .parse::<Region>()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_REGION".to_string()))?;

        Ok(Self {
            app_id,
            app_secret: SecretString::from(app_secret),
            environment,
            region,
            merchant_id: optional("GATEWAY_MERCHANT_ID"),
            api_base_url: optional("GATEWAY_API_BASE_URL"),
            oauth_base_url: optional("GATEWAY_OAUTH_BASE_URL"),
            request_timeout_secs: env::var("GATEWAY_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_REQUEST_TIMEOUT_SECS.to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("GATEWAY_REQUEST_TIMEOUT_SECS".to_string())
                })?,
            webhook_secret: optional("GATEWAY_WEBHOOK_SECRET").map(SecretString::from),
            last_resort: LastResortConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingVariable("GATEWAY_APP_ID".to_string()));
        }
        if self.app_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "GATEWAY_APP_SECRET".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_REQUEST_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }
        for (name, url) in [
            ("GATEWAY_API_BASE_URL", &self.api_base_url),
            ("GATEWAY_OAUTH_BASE_URL", &self.oauth_base_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidValue(format!(
                        "{} must be a valid URL",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn oauth_base(&self) -> String {
        self.oauth_base_url
            .clone()
            .unwrap_or_else(|| self.region.oauth_base(self.environment).to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Base for `/v3/merchants/...` calls in the given environment.
    pub fn api_base(&self, environment: GatewayEnvironment) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.region.api_base(environment).to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Base for `/v1/...` e-commerce calls in the given environment.
    pub fn ecommerce_base(&self, environment: GatewayEnvironment) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.region.ecommerce_base(environment).to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
