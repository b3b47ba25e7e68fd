//! Record store collaborator boundary.
//!
//! The callback core never owns persistence; it expresses all cross-instance
//! coordination through these traits. Implementations must provide a unique
//! constraint on the idempotency key and conditional (compare-and-set)
//! updates on payment status. `memory::InMemoryStore` is the reference
//! implementation of those semantics.

pub mod error;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::gateway::types::{PaymentStatus, ProviderResponse};
use error::StoreError;

/// Lifecycle status of a deduplicated operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

/// One deduplicated operation, keyed by the caller-supplied key.
///
/// A given key must always hash to the same `request_hash`; a mismatch on a
/// later check is a fatal collision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    /// Opaque result snapshot replayed on duplicate delivery
    pub response_data: Option<JsonValue>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A purchase awaiting (or having received) its gateway verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub user_id: String,
    pub credit_pack_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub provider_response: Option<ProviderResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        credit_pack_id: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            credit_pack_id: credit_pack_id.into(),
            amount,
            status: PaymentStatus::Pending,
            transaction_id: None,
            provider_response: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Store for idempotency records. Requires unique-constraint semantics on
/// the key: a second concurrent insert must fail, never overwrite.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Insert a new record; `StoreError` with `UniqueViolation` kind when the
    /// key already exists.
    async fn insert_unique(&self, record: IdempotencyRecord) -> Result<(), StoreError>;

    /// Flip a `Pending` record to a terminal status. First writer wins:
    /// returns `false` when the record was already terminal or absent.
    async fn mark_terminal(
        &self,
        key: &str,
        status: IdempotencyStatus,
        response_data: Option<JsonValue>,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Store for payment records with conditional status transitions.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<PaymentRecord>, StoreError>;

    async fn insert(&self, record: PaymentRecord) -> Result<(), StoreError>;

    /// Transition to `Succeeded` only if the record is not already
    /// `Succeeded`, persisting the transaction id and provider response.
    /// Returns the record after the attempt and whether this caller won the
    /// transition.
    async fn mark_succeeded(
        &self,
        id: &str,
        transaction_id: &str,
        provider_response: ProviderResponse,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Transition to `Failed` only if the record is not already `Succeeded`.
    async fn mark_failed(
        &self,
        id: &str,
        provider_response: ProviderResponse,
    ) -> Result<TransitionOutcome, StoreError>;
}

/// Result of a conditional payment-status update.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The record as stored after the attempt
    pub record: PaymentRecord,
    /// Whether this call performed the transition (lost CAS races and
    /// short-circuits return `false`)
    pub transitioned: bool,
}
