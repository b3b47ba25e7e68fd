//! In-memory record store.
//!
//! Reference implementation of the unique-insert and compare-and-set
//! semantics the core relies on. Used directly by tests; a production
//! deployment supplies a database-backed implementation with the same
//! contract (unique index on the idempotency key, conditional UPDATE on
//! payment status).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::gateway::types::{PaymentStatus, ProviderResponse};
use crate::store::error::StoreError;
use crate::store::{
    IdempotencyRecord, IdempotencyStatus, IdempotencyStore, PaymentRecord, PaymentStore,
    TransitionOutcome,
};

#[derive(Default)]
pub struct InMemoryStore {
    idempotency: RwLock<HashMap<String, IdempotencyRecord>>,
    payments: RwLock<HashMap<String, PaymentRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.idempotency.read().await.get(key).cloned())
    }

    async fn insert_unique(&self, record: IdempotencyRecord) -> Result<(), StoreError> {
        let mut map = self.idempotency.write().await;
        if map.contains_key(&record.key) {
            return Err(StoreError::unique_violation(&record.key));
        }
        map.insert(record.key.clone(), record);
        Ok(())
    }

    async fn mark_terminal(
        &self,
        key: &str,
        status: IdempotencyStatus,
        response_data: Option<JsonValue>,
    ) -> Result<bool, StoreError> {
        let mut map = self.idempotency.write().await;
        match map.get_mut(key) {
            Some(record) if record.status == IdempotencyStatus::Pending => {
                record.status = status;
                record.response_data = response_data;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.idempotency.write().await.remove(key).is_some())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.payments.read().await.get(id).cloned())
    }

    async fn insert(&self, record: PaymentRecord) -> Result<(), StoreError> {
        let mut map = self.payments.write().await;
        if map.contains_key(&record.id) {
            return Err(StoreError::unique_violation(&record.id));
        }
        map.insert(record.id.clone(), record);
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        id: &str,
        transaction_id: &str,
        provider_response: ProviderResponse,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut map = self.payments.write().await;
        let record = map
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("PaymentRecord", id))?;

        if record.status == PaymentStatus::Succeeded {
            return Ok(TransitionOutcome {
                record: record.clone(),
                transitioned: false,
            });
        }

        record.status = PaymentStatus::Succeeded;
        record.transaction_id = Some(transaction_id.to_string());
        record.provider_response = Some(provider_response);
        record.updated_at = Utc::now();
        Ok(TransitionOutcome {
            record: record.clone(),
            transitioned: true,
        })
    }

    async fn mark_failed(
        &self,
        id: &str,
        provider_response: ProviderResponse,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut map = self.payments.write().await;
        let record = map
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("PaymentRecord", id))?;

        if record.status == PaymentStatus::Succeeded {
            return Ok(TransitionOutcome {
                record: record.clone(),
                transitioned: false,
            });
        }

        record.status = PaymentStatus::Failed;
        record.provider_response = Some(provider_response);
        record.updated_at = Utc::now();
        Ok(TransitionOutcome {
            record: record.clone(),
            transitioned: true,
        })
    }
}
