//! Callback processor: the entry point for gateway deliveries.
//!
//! Order is load-bearing: signature verification runs before anything else,
//! then the idempotency wrapper, then the state machine. The wrapper
//! guarantees the state-machine application (and its credit side effect)
//! executes at most once per provider transaction, no matter how many times
//! the gateway re-delivers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditDetails, AuditLevel, AuditLog};
use crate::config::GatewayConfig;
use crate::error::{CallbackError, CallbackResult};
use crate::gateway::signature::verify_signature;
use crate::gateway::taxonomy;
use crate::gateway::types::{ApplyResult, CallbackPayload, PaymentStatus, ProviderResponse};
use crate::services::idempotency::IdempotencyService;
use crate::services::lifecycle::{FailureOutcome, PaymentLifecycle, SuccessOutcome};

/// Network provenance of a callback delivery, recorded for auditing.
#[derive(Debug, Clone, Default)]
pub struct RequestProvenance {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What the transport layer returns to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackResponse {
    pub success: bool,
    pub message: String,
    pub payment_status: Option<PaymentStatus>,
}

pub struct CallbackProcessor {
    gateway_config: GatewayConfig,
    idempotency: Arc<IdempotencyService>,
    lifecycle: Arc<PaymentLifecycle>,
    audit: Arc<AuditLog>,
}

impl CallbackProcessor {
    pub fn new(
        gateway_config: GatewayConfig,
        idempotency: Arc<IdempotencyService>,
        lifecycle: Arc<PaymentLifecycle>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            gateway_config,
            idempotency,
            lifecycle,
            audit,
        }
    }

    /// Process one callback delivery end to end.
    pub async fn process_callback(
        &self,
        payload: &CallbackPayload,
        provenance: &RequestProvenance,
    ) -> CallbackResult<CallbackResponse> {
        if let Err(e) = verify_signature(payload, &self.gateway_config.webhook_secret) {
            self.audit.log(
                AuditLevel::Critical,
                "invalid_callback_signature",
                AuditDetails {
                    payment_id: Some(payload.payment_id.clone()),
                    transaction_id: Some(payload.transaction_id.clone()),
                    amount: Some(payload.amount),
                    ip_address: provenance.ip_address.clone(),
                    user_agent: provenance.user_agent.clone(),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                },
            );
            return Err(CallbackError::InvalidSignature);
        }

        payload.validate().map_err(|e| CallbackError::Processing {
            message: e.to_string(),
        })?;

        info!(
            payment_id = %payload.payment_id,
            transaction_id = %payload.transaction_id,
            result_code = %payload.result_code,
            "callback received"
        );
        self.audit.log(
            AuditLevel::Info,
            "callback_received",
            AuditDetails {
                payment_id: Some(payload.payment_id.clone()),
                transaction_id: Some(payload.transaction_id.clone()),
                amount: Some(payload.amount),
                ip_address: provenance.ip_address.clone(),
                user_agent: provenance.user_agent.clone(),
                metadata: Some(json!({ "result_code": payload.result_code })),
                ..Default::default()
            },
        );

        let key = format!("cb:{}", payload.transaction_id);
        let params = idempotency_params(payload);

        // The wrapper owns the unit of work outright so it can outlive this
        // request if the caller times out waiting on it.
        let op = {
            let lifecycle = self.lifecycle.clone();
            let audit = self.audit.clone();
            let success_code = self.gateway_config.success_code.clone();
            let payload = payload.clone();
            move || Self::apply(lifecycle, audit, success_code, payload)
        };
        let response = self
            .idempotency
            .run(&key, &params, &payload.payment_id, op)
            .await
            .map_err(CallbackError::from)?;

        let response: CallbackResponse =
            serde_json::from_value(response).map_err(|e| CallbackError::Processing {
                message: format!("stored callback response is malformed: {}", e),
            })?;

        info!(
            payment_id = %payload.payment_id,
            transaction_id = %payload.transaction_id,
            success = response.success,
            "callback processed"
        );

        Ok(response)
    }

    /// The deduplicated unit of work: route the verified result code through
    /// the state machine and snapshot the outcome for replay. Takes owned
    /// collaborators so the future it returns is detachable from the request.
    async fn apply(
        lifecycle: Arc<PaymentLifecycle>,
        audit: Arc<AuditLog>,
        success_code: String,
        payload: CallbackPayload,
    ) -> Result<JsonValue, String> {
        let result = if payload.result_code == success_code {
            lifecycle
                .apply_success(SuccessOutcome {
                    payment_id: payload.payment_id.clone(),
                    transaction_id: payload.transaction_id.clone(),
                    amount: payload.amount,
                    invoice_number: Some(format!("INV-{}", payload.transaction_id)),
                    provider_response: Some(ProviderResponse::Approved {
                        result_code: payload.result_code.clone(),
                        transaction_id: payload.transaction_id.clone(),
                        raw: None,
                    }),
                })
                .await
        } else {
            let class = taxonomy::classify(&payload.result_code);
            warn!(
                payment_id = %payload.payment_id,
                result_code = %payload.result_code,
                category = ?class.category,
                retryable = class.retryable,
                "gateway reported payment failure"
            );
            audit.log(
                AuditLevel::from(class.severity),
                "callback_declined",
                AuditDetails {
                    payment_id: Some(payload.payment_id.clone()),
                    transaction_id: Some(payload.transaction_id.clone()),
                    error_code: Some(class.code.clone()),
                    error_message: Some(class.technical_message.clone()),
                    ..Default::default()
                },
            );
            lifecycle
                .apply_failure(FailureOutcome {
                    payment_id: payload.payment_id.clone(),
                    result_code: Some(payload.result_code.clone()),
                    reason: class.technical_message.clone(),
                })
                .await
                .map(|apply| {
                    // The state machine accepted the failure; the message
                    // shown upstream is the taxonomy's user-facing text.
                    if apply.success {
                        ApplyResult {
                            success: apply.success,
                            message: taxonomy::user_message(&payload.result_code, None),
                        }
                    } else {
                        apply
                    }
                })
        };

        match result {
            Ok(apply) => {
                let status = if payload.result_code == success_code {
                    if apply.success {
                        Some(PaymentStatus::Succeeded)
                    } else {
                        None
                    }
                } else if apply.success {
                    Some(PaymentStatus::Failed)
                } else {
                    // Downgrade refused; the payment stays succeeded.
                    Some(PaymentStatus::Succeeded)
                };
                let response = CallbackResponse {
                    success: apply.success,
                    message: apply.message,
                    payment_status: status,
                };
                serde_json::to_value(&response)
                    .map_err(|e| format!("failed to snapshot callback response: {}", e))
            }
            Err(e) => Err(e.user_message()),
        }
    }
}

/// Canonical parameter set hashed for collision detection. Field order here
/// is irrelevant; the hash canonicalizes.
fn idempotency_params(payload: &CallbackPayload) -> JsonValue {
    json!({
        "payment_id": payload.payment_id,
        "transaction_id": payload.transaction_id,
        "result_code": payload.result_code,
        "amount": payload.amount.to_string(),
    })
}
