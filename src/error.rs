//! Unified error surface for the callback core.
//!
//! Layer-specific errors (`StoreError`, `GatewayError`, `IdempotencyError`)
//! fold into `CallbackError` at the processor boundary. User-facing text is
//! derived here so technical detail never leaks to the end user.

use thiserror::Error;

use crate::services::idempotency::IdempotencyError;
use crate::store::error::StoreError;

pub type CallbackResult<T> = Result<T, CallbackError>;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Payment not found: {payment_id}")]
    PaymentNotFound { payment_id: String },

    #[error("Idempotency key collision for key {key}")]
    KeyCollision { key: String },

    #[error("Callback still processing, retry later")]
    StillProcessing,

    #[error("Operation timed out after {timeout_secs}s")]
    OperationTimeout { timeout_secs: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Processing error: {message}")]
    Processing { message: String },
}

impl CallbackError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CallbackError::InvalidSignature => false,
            CallbackError::PaymentNotFound { .. } => false,
            // Key reuse across different payloads is a client bug or an
            // attack; retrying can never succeed.
            CallbackError::KeyCollision { .. } => false,
            CallbackError::StillProcessing => true,
            CallbackError::OperationTimeout { .. } => true,
            CallbackError::Store(e) => e.is_retryable(),
            CallbackError::Processing { .. } => false,
        }
    }

    /// Message safe to surface to the end user. Collisions and store faults
    /// deliberately collapse to a generic failure.
    pub fn user_message(&self) -> String {
        match self {
            CallbackError::InvalidSignature => "Invalid callback signature".to_string(),
            CallbackError::PaymentNotFound { .. } => "Payment could not be found".to_string(),
            CallbackError::KeyCollision { .. } => {
                "Payment processing failed. Please contact support".to_string()
            }
            CallbackError::StillProcessing => {
                "Payment is still being processed. Please retry shortly".to_string()
            }
            CallbackError::OperationTimeout { .. } => {
                "Payment processing timed out. Please retry shortly".to_string()
            }
            CallbackError::Store(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            CallbackError::Processing { message } => message.clone(),
        }
    }
}

impl From<IdempotencyError> for CallbackError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::Collision { key } => CallbackError::KeyCollision { key },
            IdempotencyError::StillProcessing { .. } => CallbackError::StillProcessing,
            IdempotencyError::Timeout { timeout_secs } => {
                CallbackError::OperationTimeout { timeout_secs }
            }
            IdempotencyError::Store(e) => CallbackError::Store(e),
            IdempotencyError::ReplayedFailure { message } => {
                CallbackError::Processing { message }
            }
        }
    }
}
