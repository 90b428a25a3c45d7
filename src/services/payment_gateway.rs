//! The inbound surface of the payment core. Binds the configured merchant's
//! credential to each call and wires the OAuth client, gateway client,
//! orchestrator and webhook processor together.

use crate::database::credential_repository::CredentialStore;
use crate::database::transaction_repository::TransactionLedger;
use crate::payments::client::GatewayClient;
use crate::payments::config::GatewayConfig;
use crate::payments::error::{GatewayResult, PaymentError};
use crate::payments::oauth::OAuthClient;
use crate::payments::types::{
    AuthorizationGrant, MerchantCredential, PaymentRequest, PaymentResult, RefundResult,
};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::{DispatchOutcome, WebhookProcessor, WebhookProcessorError};
use std::sync::Arc;
use tracing::info;

pub struct PaymentGateway {
    config: Arc<GatewayConfig>,
    credentials: Arc<dyn CredentialStore>,
    oauth: Arc<OAuthClient>,
    orchestrator: PaymentOrchestrator,
    webhooks: WebhookProcessor,
}

impl PaymentGateway {
    pub fn new(
        config: GatewayConfig,
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn TransactionLedger>,
    ) -> GatewayResult<Self> {
        let config = Arc::new(config);
        let oauth = Arc::new(OAuthClient::new(config.clone(), credentials.clone())?);
        let client = Arc::new(GatewayClient::new(config.clone(), oauth.clone())?);
        let orchestrator = PaymentOrchestrator::new(client, ledger.clone());
        let webhooks =
            WebhookProcessor::new(credentials.clone(), ledger, config.merchant_id.clone());

        Ok(Self {
            config,
            credentials,
            oauth,
            orchestrator,
            webhooks,
        })
    }

    pub fn orchestrator(&self) -> &PaymentOrchestrator {
        &self.orchestrator
    }

    pub async fn capture(
        &self,
        request: &PaymentRequest,
        user_id: i64,
        local_request_id: Option<i64>,
    ) -> GatewayResult<PaymentResult> {
        let mut credential = self.active_credential().await?;
        self.orchestrator
            .capture(&mut credential, request, user_id, local_request_id)
            .await
    }

    pub async fn refund(
        &self,
        remote_payment_id: &str,
        amount: Option<i64>,
    ) -> GatewayResult<RefundResult> {
        let mut credential = self.active_credential().await?;
        self.orchestrator
            .refund(&mut credential, remote_payment_id, amount)
            .await
    }

    pub fn get_authorization_url(
        &self,
        merchant_id: &str,
        redirect_uri: &str,
    ) -> GatewayResult<String> {
        self.oauth.authorization_url(merchant_id, redirect_uri)
    }

    pub async fn handle_oauth_callback(
        &self,
        code: &str,
        state: &str,
    ) -> GatewayResult<AuthorizationGrant> {
        self.oauth.handle_callback(code, state).await
    }

    /// Deactivates the merchant's stored credential. Returns `false` when
    /// there was nothing active to deactivate.
    pub async fn disconnect_merchant(&self, merchant_id: &str) -> GatewayResult<bool> {
        let deactivated = self.credentials.deactivate_credential(merchant_id).await?;
        if deactivated {
            info!(merchant_id = %merchant_id, "Merchant credential deactivated");
        }
        Ok(deactivated)
    }

    /// `true` when the configured merchant has an active credential.
    pub async fn is_authorized(&self) -> GatewayResult<bool> {
        match self.active_credential().await {
            Ok(_) => Ok(true),
            Err(PaymentError::NotConfigured { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn verify_and_dispatch_webhook(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<DispatchOutcome, WebhookProcessorError> {
        self.webhooks.process_webhook(raw_body, signature_header).await
    }

    /// Loaded fresh per request so a refresh saved by a concurrent request is
    /// picked up.
    async fn active_credential(&self) -> GatewayResult<MerchantCredential> {
        let merchant_id = self
            .config
            .merchant_id
            .as_deref()
            .ok_or_else(|| PaymentError::Configuration {
                message: "no gateway merchant configured".to_string(),
            })?;

        self.credentials
            .load_credential(merchant_id)
            .await?
            .ok_or_else(|| PaymentError::NotConfigured {
                merchant_id: merchant_id.to_string(),
                message: "merchant has not authorized the application".to_string(),
            })
    }
}
