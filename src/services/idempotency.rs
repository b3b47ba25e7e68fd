//! Idempotency service: at-most-once execution keyed by a caller-supplied
//! key, backed by the record store's unique-constraint semantics.
//!
//! The same logical request always canonicalizes to the same request hash;
//! a key observed with a different hash is a fatal collision (client bug or
//! attack) and is audited at Critical. Waiting on a concurrent owner is a
//! bounded loop with exponential backoff, never unbounded recursion.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audit::{AuditDetails, AuditLevel, AuditLog};
use crate::config::IdempotencyConfig;
use crate::store::error::StoreError;
use crate::store::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore};

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("idempotency key {key} reused with different parameters")]
    Collision { key: String },

    #[error("operation for key {key} still pending after {attempts} attempts")]
    StillProcessing { key: String, attempts: u32 },

    #[error("operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("operation previously failed: {message}")]
    ReplayedFailure { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a `check` against the store.
#[derive(Debug)]
pub enum CheckOutcome {
    /// No live record; the caller may create one and run the operation
    Absent,
    /// Operation already completed; replay the stored response
    Completed { response: Option<JsonValue> },
    /// Operation already failed; replay the stored failure
    Failed { response: Option<JsonValue> },
    /// Another owner is mid-flight; wait and re-check
    Pending,
}

/// Stable digest of canonicalized request parameters.
///
/// Object keys are sorted at every level so the same logical request hashes
/// identically regardless of field order on the wire.
pub fn request_hash(params: &JsonValue) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
    audit: Arc<AuditLog>,
    config: IdempotencyConfig,
}

impl IdempotencyService {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        audit: Arc<AuditLog>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            audit,
            config,
        }
    }

    /// Look up `key` and decide how the caller should proceed.
    ///
    /// Expired records are lazily deleted and treated as absent, so a key can
    /// be reused for a genuinely new request once its TTL has passed.
    pub async fn check(
        &self,
        key: &str,
        params: &JsonValue,
    ) -> Result<CheckOutcome, IdempotencyError> {
        let record = match self.store.get(key).await? {
            Some(record) => record,
            None => return Ok(CheckOutcome::Absent),
        };

        if record.is_expired(Utc::now()) {
            self.store.delete(key).await?;
            info!(key = %key, "expired idempotency record deleted");
            return Ok(CheckOutcome::Absent);
        }

        if record.request_hash != request_hash(params) {
            self.audit.log(
                AuditLevel::Critical,
                "idempotency_key_collision",
                AuditDetails {
                    payment_id: Some(record.owner_id.clone()),
                    metadata: Some(json!({ "key": key })),
                    error_message: Some(
                        "idempotency key reused with different parameters".to_string(),
                    ),
                    ..Default::default()
                },
            );
            return Err(IdempotencyError::Collision {
                key: key.to_string(),
            });
        }

        Ok(match record.status {
            IdempotencyStatus::Completed => CheckOutcome::Completed {
                response: record.response_data,
            },
            IdempotencyStatus::Failed => CheckOutcome::Failed {
                response: record.response_data,
            },
            IdempotencyStatus::Pending => CheckOutcome::Pending,
        })
    }

    /// Insert a new `Pending` record. Atomic with respect to concurrent
    /// creators under the same key; the loser sees a unique violation and
    /// falls back to the wait path.
    pub async fn create(
        &self,
        key: &str,
        params: &JsonValue,
        owner_id: &str,
    ) -> Result<(), IdempotencyError> {
        let now = Utc::now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            request_hash: request_hash(params),
            status: IdempotencyStatus::Pending,
            response_data: None,
            owner_id: owner_id.to_string(),
            created_at: now,
            expires_at: now + ChronoDuration::minutes(self.config.ttl_minutes),
        };
        self.store.insert_unique(record).await?;
        Ok(())
    }

    /// Terminal update; only the first caller wins, later callers observe
    /// the stored status via `check`.
    pub async fn complete(
        &self,
        key: &str,
        status: IdempotencyStatus,
        response_data: Option<JsonValue>,
    ) -> Result<bool, IdempotencyError> {
        Ok(self.store.mark_terminal(key, status, response_data).await?)
    }

    /// Execute `op` at most once for `(key, params)`.
    ///
    /// Completed records replay the stored response without executing `op`;
    /// failed records replay the stored failure; pending records are waited
    /// on with capped attempts and exponential backoff, after which the
    /// caller gets an explicit still-processing result.
    ///
    /// The operation runs in its own task that finalizes the record itself.
    /// The caller only waits on it for `operation_timeout_secs`; timing out
    /// abandons the wait, never the work, so half-applied side effects are
    /// impossible and the record stays `Pending` until the task settles it.
    /// A timed-out caller (or a gateway retry) then observes the settled
    /// outcome via the wait path.
    pub async fn run<F, Fut>(
        &self,
        key: &str,
        params: &JsonValue,
        owner_id: &str,
        op: F,
    ) -> Result<JsonValue, IdempotencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<JsonValue, String>> + Send + 'static,
    {
        let mut attempts: u32 = 0;
        loop {
            match self.check(key, params).await? {
                CheckOutcome::Completed { response } => {
                    info!(key = %key, "replaying completed idempotent operation");
                    return Ok(response.unwrap_or(JsonValue::Null));
                }
                CheckOutcome::Failed { response } => {
                    return Err(IdempotencyError::ReplayedFailure {
                        message: failure_message(response.as_ref()),
                    });
                }
                CheckOutcome::Absent => match self.create(key, params, owner_id).await {
                    Ok(()) => break,
                    Err(IdempotencyError::Store(e)) if e.is_unique_violation() => {
                        // Lost the creation race; wait on the winner.
                    }
                    Err(e) => return Err(e),
                },
                CheckOutcome::Pending => {}
            }

            attempts += 1;
            if attempts >= self.config.max_wait_attempts {
                warn!(key = %key, attempts, "pending idempotency record did not settle");
                return Err(IdempotencyError::StillProcessing {
                    key: key.to_string(),
                    attempts,
                });
            }
            tokio::time::sleep(self.backoff(attempts)).await;
        }

        let timeout_secs = self.config.operation_timeout_secs;
        let store = self.store.clone();
        let task_key = key.to_string();
        let fut = op();
        let handle = tokio::spawn(async move {
            match fut.await {
                Ok(response) => {
                    store
                        .mark_terminal(
                            &task_key,
                            IdempotencyStatus::Completed,
                            Some(response.clone()),
                        )
                        .await?;
                    Ok(response)
                }
                Err(message) => {
                    store
                        .mark_terminal(
                            &task_key,
                            IdempotencyStatus::Failed,
                            Some(json!({ "message": message.clone() })),
                        )
                        .await?;
                    Err(IdempotencyError::ReplayedFailure { message })
                }
            }
        });

        match tokio::time::timeout(Duration::from_secs(timeout_secs), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(key = %key, error = %join_err, "idempotent operation task aborted");
                Err(IdempotencyError::Store(StoreError::unavailable(format!(
                    "operation task aborted: {}",
                    join_err
                ))))
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_secs,
                    "operation still running at timeout; record settles in background"
                );
                Err(IdempotencyError::Timeout { timeout_secs })
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .initial_backoff_ms
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(16));
        Duration::from_millis(exp.min(self.config.max_backoff_ms))
    }
}

fn failure_message(response: Option<&JsonValue>) -> String {
    response
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("operation previously failed")
        .to_string()
}
