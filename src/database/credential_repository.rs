use crate::database::error::DatabaseError;
use crate::payments::types::MerchantCredential;
use async_trait::async_trait;

#[cfg(feature = "database")]
use crate::payments::types::GatewayEnvironment;
#[cfg(feature = "database")]
use chrono::{DateTime, Utc};
#[cfg(feature = "database")]
use secrecy::{ExposeSecret, SecretString};
#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};
#[cfg(feature = "database")]
use tracing::warn;

/// Durable per-merchant OAuth credentials. At most one active record per
/// merchant; records are deactivated, never deleted.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_credential(
        &self,
        merchant_id: &str,
    ) -> Result<Option<MerchantCredential>, DatabaseError>;

    /// Inserts or replaces the active credential for `credential.merchant_id`
    /// in a single write.
    async fn save_credential(&self, credential: &MerchantCredential) -> Result<(), DatabaseError>;

    /// Returns `true` if an active record was deactivated.
    async fn deactivate_credential(&self, merchant_id: &str) -> Result<bool, DatabaseError>;
}

#[cfg(feature = "database")]
#[derive(FromRow)]
struct CredentialRow {
    merchant_id: String,
    app_id: String,
    app_secret: String,
    access_token: String,
    refresh_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    environment: Option<String>,
    webhook_secret: Option<String>,
    is_active: bool,
}

#[cfg(feature = "database")]
impl From<CredentialRow> for MerchantCredential {
    fn from(row: CredentialRow) -> Self {
        let environment = match row
            .environment
            .as_deref()
            .map(str::parse::<GatewayEnvironment>)
        {
            Some(Ok(environment)) => environment,
            _ => {
                let hinted = GatewayEnvironment::legacy_hint_from_merchant_id(&row.merchant_id);
                warn!(
                    merchant_id = %row.merchant_id,
                    stored = ?row.environment,
                    inferred = %hinted,
                    "Credential has no usable environment; inferred from merchant id shape"
                );
                hinted
            }
        };

        MerchantCredential {
            merchant_id: row.merchant_id,
            app_id: row.app_id,
            app_secret: SecretString::from(row.app_secret),
            access_token: SecretString::from(row.access_token),
            refresh_token: row.refresh_token.map(SecretString::from),
            token_expires_at: row.token_expires_at,
            environment,
            webhook_secret: row.webhook_secret.map(SecretString::from),
            is_active: row.is_active,
        }
    }
}

/// PostgreSQL-backed store over the `gateway_credentials` table.
#[cfg(feature = "database")]
pub struct CredentialRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl CredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl CredentialStore for CredentialRepository {
    async fn load_credential(
        &self,
        merchant_id: &str,
    ) -> Result<Option<MerchantCredential>, DatabaseError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT merchant_id, app_id, app_secret, access_token, refresh_token,
                    token_expires_at, environment, webhook_secret, is_active
             FROM gateway_credentials
             WHERE merchant_id = $1 AND is_active = TRUE",
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(MerchantCredential::from))
    }

    async fn save_credential(&self, credential: &MerchantCredential) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO gateway_credentials
             (merchant_id, app_id, app_secret, access_token, refresh_token,
              token_expires_at, environment, webhook_secret, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
             ON CONFLICT (merchant_id) WHERE is_active
             DO UPDATE SET app_id = EXCLUDED.app_id,
                           app_secret = EXCLUDED.app_secret,
                           access_token = EXCLUDED.access_token,
                           refresh_token = EXCLUDED.refresh_token,
                           token_expires_at = EXCLUDED.token_expires_at,
                           environment = EXCLUDED.environment,
                           webhook_secret = EXCLUDED.webhook_secret,
                           updated_at = NOW()",
        )
        .bind(&credential.merchant_id)
        .bind(&credential.app_id)
        .bind(credential.app_secret.expose_secret())
        .bind(credential.access_token.expose_secret())
        .bind(credential.refresh_token.as_ref().map(|t| t.expose_secret()))
        .bind(credential.token_expires_at)
        .bind(credential.environment.as_str())
        .bind(credential.webhook_secret.as_ref().map(|s| s.expose_secret()))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn deactivate_credential(&self, merchant_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE gateway_credentials
             SET is_active = FALSE, updated_at = NOW()
             WHERE merchant_id = $1 AND is_active = TRUE",
        )
        .bind(merchant_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
