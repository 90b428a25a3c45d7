use crate::database::error::{DatabaseError, DatabaseErrorKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    /// pending -> completed | failed, completed -> refunded. Nothing else.
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        matches!(
            (self, to),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
                | (TransactionStatus::Completed, TransactionStatus::Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Refunded)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(DatabaseError::new(DatabaseErrorKind::Query {
                message: format!("unknown transaction status: {}", other),
            })),
        }
    }
}

/// One local record per capture attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub remote_payment_id: String,
    pub remote_order_id: String,
    pub local_request_id: Option<i64>,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub raw_gateway_response: Option<JsonValue>,
    pub error_message: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub remote_payment_id: String,
    pub remote_order_id: String,
    pub local_request_id: Option<i64>,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub payment_method: Option<String>,
}

/// Partial update applied together with a status compare-and-set.
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub remote_payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub raw_gateway_response: Option<JsonValue>,
    pub error_message: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl TransactionPatch {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_remote_payment_id(mut self, id: impl Into<String>) -> Self {
        self.remote_payment_id = Some(id.into());
        self
    }

    pub fn with_payment_method(mut self, method: Option<String>) -> Self {
        self.payment_method = method;
        self
    }

    pub fn with_card(mut self, last4: Option<String>, brand: Option<String>) -> Self {
        self.card_last4 = last4;
        self.card_brand = brand;
        self
    }

    pub fn with_raw_response(mut self, raw: JsonValue) -> Self {
        self.raw_gateway_response = Some(raw);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_refund(mut self, amount: i64, at: DateTime<Utc>) -> Self {
        self.refund_amount = Some(amount);
        self.refunded_at = Some(at);
        self
    }

    pub fn apply_to(&self, record: &mut TransactionRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(v) = &self.remote_payment_id {
            record.remote_payment_id = v.clone();
        }
        if let Some(v) = &self.payment_method {
            record.payment_method = Some(v.clone());
        }
        if let Some(v) = &self.card_last4 {
            record.card_last4 = Some(v.clone());
        }
        if let Some(v) = &self.card_brand {
            record.card_brand = Some(v.clone());
        }
        if let Some(v) = &self.raw_gateway_response {
            record.raw_gateway_response = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            record.error_message = Some(v.clone());
        }
        if let Some(v) = self.refund_amount {
            record.refund_amount = Some(v);
        }
        if let Some(v) = self.refunded_at {
            record.refunded_at = Some(v);
        }
        record.updated_at = now;
    }
}

/// Rejects a patch whose status change is not a legal transition from
/// `expected`.
pub fn validate_patch(
    expected: TransactionStatus,
    patch: &TransactionPatch,
) -> Result<(), DatabaseError> {
    match patch.status {
        Some(to) if !expected.can_transition_to(to) => {
            Err(DatabaseError::new(DatabaseErrorKind::InvalidTransition {
                from: expected.to_string(),
                to: to.to_string(),
            }))
        }
        _ => Ok(()),
    }
}

/// Prefix of the remote payment id a record carries until a capture
/// strategy reports the real one.
pub const PENDING_PAYMENT_ID_PREFIX: &str = "pending-";

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, DatabaseError>;

    /// Applies `patch` only if the record is still in `expected_status`.
    /// Returns a `Conflict` error when another writer got there first.
    async fn update_transaction(
        &self,
        id: i64,
        expected_status: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord, DatabaseError>;

    async fn find_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, DatabaseError>;

    async fn find_transaction_by_remote_id(
        &self,
        remote_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;

    /// Most recent record bound to the remote order.
    async fn find_transaction_by_remote_order_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
}

#[cfg(feature = "database")]
#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    remote_payment_id: String,
    remote_order_id: String,
    local_request_id: Option<i64>,
    user_id: i64,
    amount: i64,
    currency: String,
    status: String,
    payment_method: Option<String>,
    card_last4: Option<String>,
    card_brand: Option<String>,
    raw_gateway_response: Option<JsonValue>,
    error_message: Option<String>,
    refund_amount: Option<i64>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[cfg(feature = "database")]
impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            id: row.id,
            remote_payment_id: row.remote_payment_id,
            remote_order_id: row.remote_order_id,
            local_request_id: row.local_request_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse()?,
            payment_method: row.payment_method,
            card_last4: row.card_last4,
            card_brand: row.card_brand,
            raw_gateway_response: row.raw_gateway_response,
            error_message: row.error_message,
            refund_amount: row.refund_amount,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(feature = "database")]
const TRANSACTION_COLUMNS: &str = "id, remote_payment_id, remote_order_id, local_request_id, \
     user_id, amount, currency, status, payment_method, card_last4, card_brand, \
     raw_gateway_response, error_message, refund_amount, refunded_at, created_at, updated_at";

/// PostgreSQL-backed ledger over the `gateway_transactions` table.
#[cfg(feature = "database")]
pub struct TransactionRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl TransactionLedger for TransactionRepository {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, DatabaseError> {
        let sql = format!(
            "INSERT INTO gateway_transactions
             (remote_payment_id, remote_order_id, local_request_id, user_id, amount,
              currency, status, payment_method)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&new.remote_payment_id)
            .bind(&new.remote_order_id)
            .bind(new.local_request_id)
            .bind(new.user_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.payment_method)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn update_transaction(
        &self,
        id: i64,
        expected_status: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord, DatabaseError> {
        validate_patch(expected_status, &patch)?;

        let sql = format!(
            "UPDATE gateway_transactions
             SET status = COALESCE($3, status),
                 remote_payment_id = COALESCE($4, remote_payment_id),
                 payment_method = COALESCE($5, payment_method),
                 card_last4 = COALESCE($6, card_last4),
                 card_brand = COALESCE($7, card_brand),
                 raw_gateway_response = COALESCE($8, raw_gateway_response),
                 error_message = COALESCE($9, error_message),
                 refund_amount = COALESCE($10, refund_amount),
                 refunded_at = COALESCE($11, refunded_at),
                 updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(expected_status.as_str())
            .bind(patch.status.map(|s| s.as_str()))
            .bind(&patch.remote_payment_id)
            .bind(&patch.payment_method)
            .bind(&patch.card_last4)
            .bind(&patch.card_brand)
            .bind(&patch.raw_gateway_response)
            .bind(&patch.error_message)
            .bind(patch.refund_amount)
            .bind(patch.refunded_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => row.try_into(),
            None => match self.find_transaction(id).await? {
                Some(_) => Err(DatabaseError::new(DatabaseErrorKind::Conflict {
                    entity: "Transaction".to_string(),
                    id: id.to_string(),
                    expected: expected_status.to_string(),
                })),
                None => Err(DatabaseError::not_found("Transaction", id)),
            },
        }
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM gateway_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_transaction_by_remote_id(
        &self,
        remote_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM gateway_transactions
             WHERE remote_payment_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(remote_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_transaction_by_remote_order_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM gateway_transactions
             WHERE remote_order_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(remote_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Refunded));

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Refunded.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Refunded));
    }

    #[test]
    fn validate_patch_rejects_illegal_status_change() {
        let err = validate_patch(
            TransactionStatus::Failed,
            &TransactionPatch::status(TransactionStatus::Completed),
        )
        .expect_err("failed -> completed must be rejected");
        assert!(matches!(err.kind, DatabaseErrorKind::InvalidTransition { .. }));

        assert!(validate_patch(
            TransactionStatus::Completed,
            &TransactionPatch::default().with_error("annotated")
        )
        .is_ok());
    }

    #[test]
    fn status_round_trips_through_its_column_value() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().ok(), Some(status));
        }
        assert!("settled".parse::<TransactionStatus>().is_err());
    }
}
