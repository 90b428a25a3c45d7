//! In-memory stores for tests and for running without PostgreSQL.

use crate::database::credential_repository::CredentialStore;
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::transaction_repository::{
    validate_patch, NewTransaction, TransactionLedger, TransactionPatch, TransactionRecord,
    TransactionStatus,
};
use crate::payments::types::MerchantCredential;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<String, MerchantCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: MerchantCredential) -> Self {
        let mut map = HashMap::new();
        map.insert(credential.merchant_id.clone(), credential);
        Self {
            credentials: RwLock::new(map),
        }
    }

    /// Reads the stored record regardless of its active flag.
    pub async fn get(&self, merchant_id: &str) -> Option<MerchantCredential> {
        self.credentials.read().await.get(merchant_id).cloned()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load_credential(
        &self,
        merchant_id: &str,
    ) -> Result<Option<MerchantCredential>, DatabaseError> {
        Ok(self
            .credentials
            .read()
            .await
            .get(merchant_id)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn save_credential(&self, credential: &MerchantCredential) -> Result<(), DatabaseError> {
        let mut saved = credential.clone();
        saved.is_active = true;
        self.credentials
            .write()
            .await
            .insert(saved.merchant_id.clone(), saved);
        Ok(())
    }

    async fn deactivate_credential(&self, merchant_id: &str) -> Result<bool, DatabaseError> {
        let mut credentials = self.credentials.write().await;
        match credentials.get_mut(merchant_id) {
            Some(credential) if credential.is_active => {
                credential.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    next_id: i64,
    records: HashMap<i64, TransactionRecord>,
}

#[derive(Default)]
pub struct InMemoryTransactionLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, ordered by id.
    pub async fn all(&self) -> Vec<TransactionRecord> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state.records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionLedger for InMemoryTransactionLedger {
    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, DatabaseError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let now = Utc::now();
        let record = TransactionRecord {
            id: state.next_id,
            remote_payment_id: new.remote_payment_id,
            remote_order_id: new.remote_order_id,
            local_request_id: new.local_request_id,
            user_id: new.user_id,
            amount: new.amount,
            currency: new.currency,
            status: TransactionStatus::Pending,
            payment_method: new.payment_method,
            card_last4: None,
            card_brand: None,
            raw_gateway_response: None,
            error_message: None,
            refund_amount: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_transaction(
        &self,
        id: i64,
        expected_status: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<TransactionRecord, DatabaseError> {
        validate_patch(expected_status, &patch)?;

        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Transaction", id))?;

        if record.status != expected_status {
            return Err(DatabaseError::new(DatabaseErrorKind::Conflict {
                entity: "Transaction".to_string(),
                id: id.to_string(),
                expected: expected_status.to_string(),
            }));
        }

        patch.apply_to(record, Utc::now());
        Ok(record.clone())
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn find_transaction_by_remote_id(
        &self,
        remote_payment_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|r| r.remote_payment_id == remote_payment_id)
            .max_by_key(|r| r.id)
            .cloned())
    }

    async fn find_transaction_by_remote_order_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|r| r.remote_order_id == remote_order_id)
            .max_by_key(|r| r.id)
            .cloned())
    }
}
