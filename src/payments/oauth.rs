use crate::database::credential_repository::CredentialStore;
use crate::payments::config::GatewayConfig;
use crate::payments::error::{GatewayResult, PaymentError};
use crate::payments::types::{AuthorizationGrant, MerchantCredential, TokenResponse};
use crate::payments::utils::{
    build_http_client, hmac_sha256_hex, secure_eq, truncate_preview, BODY_PREVIEW_LIMIT,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub const AUTHORIZE_PATH: &str = "/oauth/v2/authorize";
pub const TOKEN_PATH: &str = "/oauth/v2/token";

/// How long an authorization redirect stays valid.
pub const AUTHORIZATION_STATE_TTL_SECS: i64 = 300;
const AUTHORIZATION_STATE_FUTURE_SKEW_SECS: i64 = 30;

/// Opaque `state` round-tripped through the authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub merchant_id: String,
    pub redirect_uri: String,
    /// Unix seconds at which the redirect was issued.
    pub timestamp: i64,
}

impl AuthorizationState {
    pub fn new(merchant_id: &str, redirect_uri: &str, issued_at: DateTime<Utc>) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            timestamp: issued_at.timestamp(),
        }
    }

    /// `base64url(json).hex(hmac_sha256(payload))`
    pub fn encode(&self, signing_key: &str) -> GatewayResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| PaymentError::Configuration {
            message: format!("failed to serialize authorization state: {}", e),
        })?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = sign(signing_key, &payload)?;
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn decode(encoded: &str, signing_key: &str, now: DateTime<Utc>) -> GatewayResult<Self> {
        let invalid = |reason: &str| PaymentError::InvalidAuthorizationState {
            reason: reason.to_string(),
        };

        let (payload, signature) = encoded
            .trim()
            .split_once('.')
            .ok_or_else(|| invalid("malformed state"))?;

        let expected = sign(signing_key, payload)?;
        if !secure_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(invalid("signature mismatch"));
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| invalid("malformed state"))?;
        let state: AuthorizationState =
            serde_json::from_slice(&json).map_err(|_| invalid("malformed state"))?;

        let age = now.timestamp() - state.timestamp;
        if age > AUTHORIZATION_STATE_TTL_SECS {
            return Err(invalid("state expired"));
        }
        if age < -AUTHORIZATION_STATE_FUTURE_SKEW_SECS {
            return Err(invalid("state issued in the future"));
        }

        Ok(state)
    }
}

fn sign(signing_key: &str, payload: &str) -> GatewayResult<String> {
    hmac_sha256_hex(signing_key.as_bytes(), payload.as_bytes()).ok_or_else(|| {
        PaymentError::Configuration {
            message: "invalid authorization state signing key".to_string(),
        }
    })
}

/// Authorization URLs, code exchange and token refresh against the
/// gateway's OAuth endpoints.
pub struct OAuthClient {
    http: Client,
    config: Arc<GatewayConfig>,
    store: Arc<dyn CredentialStore>,
}

impl OAuthClient {
    pub fn new(config: Arc<GatewayConfig>, store: Arc<dyn CredentialStore>) -> GatewayResult<Self> {
        let http = build_http_client(config.request_timeout())?;
        Ok(Self {
            http,
            config,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn authorization_url(&self, merchant_id: &str, redirect_uri: &str) -> GatewayResult<String> {
        if self.config.app_id.trim().is_empty() {
            return Err(PaymentError::Configuration {
                message: "gateway client id is not configured".to_string(),
            });
        }

        let state = AuthorizationState::new(merchant_id, redirect_uri, Utc::now())
            .encode(self.config.app_secret.expose_secret())?;

        let mut url = Url::parse(&format!("{}{}", self.config.oauth_base(), AUTHORIZE_PATH))
            .map_err(|e| PaymentError::Configuration {
                message: format!("invalid OAuth base URL: {}", e),
            })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.app_id)
            .append_pair("merchant_id", merchant_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &state);

        Ok(url.into())
    }

    /// Single form-encoded POST; never retried since codes are single use.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        merchant_id: &str,
    ) -> GatewayResult<TokenResponse> {
        let form = [
            ("client_id", self.config.app_id.as_str()),
            ("client_secret", self.config.app_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Transport {
                message: format!("token exchange request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PaymentError::TokenExchange {
            http_status: status.as_u16(),
            body: format!("failed to read token response body: {}", e),
        })?;
        if !status.is_success() {
            warn!(
                merchant_id = %merchant_id,
                status = status.as_u16(),
                "Authorization code exchange rejected"
            );
            return Err(PaymentError::TokenExchange {
                http_status: status.as_u16(),
                body: truncate_preview(&text, BODY_PREVIEW_LIMIT),
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&text).map_err(|e| PaymentError::InvalidResponse {
                message: format!("invalid token response: {}", e),
            })?;

        info!(merchant_id = %merchant_id, "Authorization code exchanged");
        Ok(token)
    }

    /// Exchanges the stored refresh token for a new access token and persists
    /// the result in one save. On any failure the stored credential is left
    /// as it was.
    pub async fn refresh(&self, merchant_id: &str) -> GatewayResult<MerchantCredential> {
        let current = self
            .store
            .load_credential(merchant_id)
            .await?
            .ok_or_else(|| PaymentError::NotConfigured {
                merchant_id: merchant_id.to_string(),
                message: "no active credential".to_string(),
            })?;

        let refresh_token = match current.refresh_token.as_ref() {
            Some(token) if current.has_refresh_token() => token.expose_secret().to_string(),
            _ => {
                return Err(PaymentError::NotConfigured {
                    merchant_id: merchant_id.to_string(),
                    message: "no refresh token on file; re-authorization required".to_string(),
                })
            }
        };

        let client_id = if current.app_id.is_empty() {
            self.config.app_id.as_str()
        } else {
            current.app_id.as_str()
        };
        let client_secret = if current.app_secret.expose_secret().is_empty() {
            self.config.app_secret.expose_secret()
        } else {
            current.app_secret.expose_secret()
        };
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::TokenRefresh {
                merchant_id: merchant_id.to_string(),
                http_status: None,
                message: format!("token refresh request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PaymentError::TokenRefresh {
            merchant_id: merchant_id.to_string(),
            http_status: Some(status.as_u16()),
            message: format!("failed to read token response body: {}", e),
        })?;
        if !status.is_success() {
            warn!(
                merchant_id = %merchant_id,
                status = status.as_u16(),
                "Token refresh rejected"
            );
            return Err(PaymentError::TokenRefresh {
                merchant_id: merchant_id.to_string(),
                http_status: Some(status.as_u16()),
                message: truncate_preview(&text, BODY_PREVIEW_LIMIT),
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&text).map_err(|e| PaymentError::TokenRefresh {
                merchant_id: merchant_id.to_string(),
                http_status: Some(status.as_u16()),
                message: format!("invalid token response: {}", e),
            })?;

        let expires_in = token.expires_in_secs();
        let mut refreshed = current;
        refreshed.access_token = SecretString::from(token.access_token);
        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            refreshed.refresh_token = Some(SecretString::from(rotated));
        }
        refreshed.token_expires_at = Some(Utc::now() + Duration::seconds(expires_in));

        self.store.save_credential(&refreshed).await?;

        info!(
            merchant_id = %merchant_id,
            expires_in = expires_in,
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    /// Validates the round-tripped state, exchanges the code and stores the
    /// resulting credential as the merchant's active one.
    pub async fn handle_callback(&self, code: &str, state: &str) -> GatewayResult<AuthorizationGrant> {
        let state = AuthorizationState::decode(
            state,
            self.config.app_secret.expose_secret(),
            Utc::now(),
        )?;

        if code.trim().is_empty() {
            return Err(PaymentError::Validation {
                message: "authorization code is required".to_string(),
                field: Some("code".to_string()),
            });
        }

        let token = self
            .exchange_code(code, &state.redirect_uri, &state.merchant_id)
            .await?;
        let expires_in = token.expires_in_secs();

        let webhook_secret = self
            .store
            .load_credential(&state.merchant_id)
            .await?
            .and_then(|c| c.webhook_secret)
            .filter(|s| !s.expose_secret().is_empty())
            .or_else(|| {
                self.config
                    .webhook_secret
                    .as_ref()
                    .map(|s| SecretString::from(s.expose_secret().to_owned()))
            });
        if webhook_secret.is_none() {
            warn!(
                merchant_id = %state.merchant_id,
                "No webhook secret configured; gateway webhooks will be rejected"
            );
        }

        let credential = MerchantCredential {
            merchant_id: state.merchant_id.clone(),
            app_id: self.config.app_id.clone(),
            app_secret: SecretString::from(self.config.app_secret.expose_secret().to_owned()),
            access_token: SecretString::from(token.access_token),
            refresh_token: token
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            token_expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
            environment: self.config.environment,
            webhook_secret,
            is_active: true,
        };
        self.store.save_credential(&credential).await?;

        info!(
            merchant_id = %state.merchant_id,
            environment = %credential.environment,
            "Merchant authorized"
        );

        Ok(AuthorizationGrant {
            merchant_id: state.merchant_id,
            expires_in,
        })
    }

    fn token_url(&self) -> String {
        format!("{}{}", self.config.oauth_base(), TOKEN_PATH)
    }
}
