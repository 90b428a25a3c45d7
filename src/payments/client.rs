use crate::payments::config::GatewayConfig;
use crate::payments::error::{GatewayResult, PaymentError};
use crate::payments::oauth::OAuthClient;
use crate::payments::types::MerchantCredential;
use crate::payments::utils::{build_http_client, truncate_preview, BODY_PREVIEW_LIMIT};
use chrono::{Duration, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens expiring within this window are refreshed before the call.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// The gateway exposes merchant REST calls and card charges on different
/// hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSurface {
    Platform,
    Ecommerce,
}

pub fn merchant_path(merchant_id: &str, suffix: &str) -> String {
    format!("/v3/merchants/{}{}", merchant_id, suffix)
}

/// Authenticated gateway calls with one automatic refresh-and-retry on 401.
pub struct GatewayClient {
    http: Client,
    config: Arc<GatewayConfig>,
    oauth: Arc<OAuthClient>,
}

impl GatewayClient {
    pub fn new(config: Arc<GatewayConfig>, oauth: Arc<OAuthClient>) -> GatewayResult<Self> {
        let http = build_http_client(config.request_timeout())?;
        Ok(Self {
            http,
            config,
            oauth,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        credential: &mut MerchantCredential,
    ) -> GatewayResult<T> {
        self.call_on(ApiSurface::Platform, method, path, body, credential)
            .await
    }

    /// A refresh replaces `credential` in place so later calls in the same
    /// request use the new token.
    pub async fn call_on<T: DeserializeOwned>(
        &self,
        surface: ApiSurface,
        method: Method,
        path: &str,
        body: Option<&JsonValue>,
        credential: &mut MerchantCredential,
    ) -> GatewayResult<T> {
        if credential.is_expired(Utc::now(), Duration::seconds(EXPIRY_SKEW_SECS))
            && credential.has_refresh_token()
        {
            info!(
                merchant_id = %credential.merchant_id,
                "Access token expired or about to expire, refreshing before call"
            );
            *credential = self.oauth.refresh(&credential.merchant_id).await?;
        }

        let url = self.url_for(surface, path, credential);
        let (status, text) = self.send(&method, &url, body, credential).await?;

        let (status, text) = if status == StatusCode::UNAUTHORIZED {
            warn!(
                merchant_id = %credential.merchant_id,
                method = %method,
                path = %path,
                "Gateway returned 401, refreshing token and retrying once"
            );
            *credential = self.oauth.refresh(&credential.merchant_id).await?;

            let (status, text) = self.send(&method, &url, body, credential).await?;
            if status == StatusCode::UNAUTHORIZED {
                warn!(
                    merchant_id = %credential.merchant_id,
                    "Gateway rejected refreshed token"
                );
                return Err(PaymentError::Authentication {
                    merchant_id: credential.merchant_id.clone(),
                });
            }
            (status, text)
        } else {
            (status, text)
        };

        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                method = %method,
                path = %path,
                "Gateway request failed"
            );
            return Err(PaymentError::Gateway {
                http_status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body_preview: truncate_preview(&text, BODY_PREVIEW_LIMIT),
            });
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str::<T>(text).map_err(|e| PaymentError::InvalidResponse {
            message: format!("{} {}: {}", method, path, e),
        })
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&JsonValue>,
        credential: &MerchantCredential,
    ) -> GatewayResult<(StatusCode, String)> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(credential.bearer_token())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(|e| PaymentError::Transport {
            message: format!("gateway request failed: {}", e),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PaymentError::Transport {
            message: format!("failed to read gateway response: {}", e),
        })?;
        debug!(status = status.as_u16(), url = %url, "Gateway response received");
        Ok((status, text))
    }

    fn url_for(&self, surface: ApiSurface, path: &str, credential: &MerchantCredential) -> String {
        let base = match surface {
            ApiSurface::Platform => self.config.api_base(credential.environment),
            ApiSurface::Ecommerce => self.config.ecommerce_base(credential.environment),
        };
        format!("{}{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merchant_path_prefixes_version_and_merchant() {
        assert_eq!(
            merchant_path("M1", "/orders/O1/payments"),
            "/v3/merchants/M1/orders/O1/payments"
        );
        assert_eq!(merchant_path("M1", ""), "/v3/merchants/M1");
    }
}
