//! Payment state machine.
//!
//! Owns all transitions of a payment record. `Succeeded` is absorbing:
//! duplicate success callbacks short-circuit before the credit side effect,
//! and a failure callback can never downgrade a succeeded payment. All
//! races between concurrent appliers are settled by the store's conditional
//! updates, so the logic is safe across independent process instances.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audit::{AuditDetails, AuditLevel, AuditLog};
use crate::error::{CallbackError, CallbackResult};
use crate::gateway::types::{ApplyResult, PaymentStatus, ProviderResponse};
use crate::store::PaymentStore;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Credit ledger collaborator. Called at most once per payment by this
/// core's own guarantee.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn add_credits(&self, user_id: &str, credits: u32) -> Result<(), CollaboratorError>;
}

/// Resolves a credit pack to the number of credits it grants.
#[async_trait]
pub trait CreditPackCatalog: Send + Sync {
    async fn credits_for(&self, credit_pack_id: &str) -> Result<u32, CollaboratorError>;
}

#[async_trait]
pub trait InvoiceGenerator: Send + Sync {
    async fn create_invoice(
        &self,
        payment_id: &str,
        invoice_number: &str,
        metadata: JsonValue,
    ) -> Result<(), CollaboratorError>;
}

/// Fire-and-forget signal that dependent views should refresh.
#[async_trait]
pub trait ViewNotifier: Send + Sync {
    async fn invalidate(&self, user_id: &str);
}

/// Input to a success application.
#[derive(Debug, Clone)]
pub struct SuccessOutcome {
    pub payment_id: String,
    pub transaction_id: String,
    pub amount: Decimal,
    pub invoice_number: Option<String>,
    pub provider_response: Option<ProviderResponse>,
}

/// Input to a failure application.
#[derive(Debug, Clone)]
pub struct FailureOutcome {
    pub payment_id: String,
    pub result_code: Option<String>,
    pub reason: String,
}

pub struct PaymentLifecycle {
    payments: Arc<dyn PaymentStore>,
    ledger: Arc<dyn CreditLedger>,
    catalog: Arc<dyn CreditPackCatalog>,
    invoices: Arc<dyn InvoiceGenerator>,
    notifier: Arc<dyn ViewNotifier>,
    audit: Arc<AuditLog>,
}

impl PaymentLifecycle {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        ledger: Arc<dyn CreditLedger>,
        catalog: Arc<dyn CreditPackCatalog>,
        invoices: Arc<dyn InvoiceGenerator>,
        notifier: Arc<dyn ViewNotifier>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            payments,
            ledger,
            catalog,
            invoices,
            notifier,
            audit,
        }
    }

    /// Apply a verified success callback.
    ///
    /// Credits are issued only by the caller that wins the conditional
    /// transition to `Succeeded`; every other delivery short-circuits.
    /// Downstream credit/invoice failures are reconciliation work and never
    /// revert the payment status.
    pub async fn apply_success(&self, outcome: SuccessOutcome) -> CallbackResult<ApplyResult> {
        let record = self
            .payments
            .get(&outcome.payment_id)
            .await?
            .ok_or_else(|| CallbackError::PaymentNotFound {
                payment_id: outcome.payment_id.clone(),
            })?;

        if record.status == PaymentStatus::Succeeded {
            info!(
                payment_id = %outcome.payment_id,
                "duplicate success callback, payment already succeeded"
            );
            return Ok(ApplyResult::already_processed());
        }

        if record.amount != outcome.amount {
            warn!(
                payment_id = %outcome.payment_id,
                expected = %record.amount,
                received = %outcome.amount,
                "callback amount differs from payment record"
            );
        }

        let provider_response =
            outcome
                .provider_response
                .clone()
                .unwrap_or(ProviderResponse::Approved {
                    result_code: "0".to_string(),
                    transaction_id: outcome.transaction_id.clone(),
                    raw: None,
                });

        let transition = self
            .payments
            .mark_succeeded(
                &outcome.payment_id,
                &outcome.transaction_id,
                provider_response,
            )
            .await?;

        if !transition.transitioned {
            // Lost the race to a concurrent success applier.
            info!(
                payment_id = %outcome.payment_id,
                "concurrent delivery already marked payment succeeded"
            );
            return Ok(ApplyResult::already_processed());
        }

        let record = transition.record;
        self.audit.log(
            AuditLevel::Info,
            "payment_succeeded",
            AuditDetails {
                payment_id: Some(record.id.clone()),
                transaction_id: Some(outcome.transaction_id.clone()),
                user_id: Some(record.user_id.clone()),
                amount: Some(record.amount),
                status: Some(PaymentStatus::Succeeded.to_string()),
                ..Default::default()
            },
        );

        self.issue_credits(&record.id, &record.user_id, &record.credit_pack_id)
            .await;

        if let Some(invoice_number) = &outcome.invoice_number {
            self.create_invoice(&record.id, invoice_number, &record.user_id, record.amount)
                .await;
        }

        self.notifier.invalidate(&record.user_id).await;

        Ok(ApplyResult::ok("Payment processed successfully."))
    }

    /// Apply a verified failure callback.
    ///
    /// `Failed` is idempotent under re-entry; `Succeeded` refuses the
    /// downgrade with an explicit result rather than an error.
    pub async fn apply_failure(&self, outcome: FailureOutcome) -> CallbackResult<ApplyResult> {
        let record = self
            .payments
            .get(&outcome.payment_id)
            .await?
            .ok_or_else(|| CallbackError::PaymentNotFound {
                payment_id: outcome.payment_id.clone(),
            })?;

        match record.status {
            PaymentStatus::Succeeded => {
                warn!(
                    payment_id = %outcome.payment_id,
                    "refusing to downgrade succeeded payment to failed"
                );
                self.audit.log(
                    AuditLevel::Warning,
                    "payment_downgrade_refused",
                    AuditDetails {
                        payment_id: Some(record.id.clone()),
                        user_id: Some(record.user_id.clone()),
                        status: Some(record.status.to_string()),
                        error_message: Some(outcome.reason.clone()),
                        ..Default::default()
                    },
                );
                return Ok(ApplyResult::cannot_downgrade());
            }
            PaymentStatus::Failed => {
                info!(
                    payment_id = %outcome.payment_id,
                    "duplicate failure callback, payment already failed"
                );
                return Ok(ApplyResult::ok("Payment already marked as failed."));
            }
            PaymentStatus::Pending => {}
        }

        let transition = self
            .payments
            .mark_failed(
                &outcome.payment_id,
                ProviderResponse::Declined {
                    result_code: outcome.result_code.clone(),
                    reason: outcome.reason.clone(),
                },
            )
            .await?;

        if !transition.transitioned {
            // A concurrent success callback won; the failure must not undo it.
            return Ok(ApplyResult::cannot_downgrade());
        }

        let record = transition.record;
        self.audit.log(
            AuditLevel::Warning,
            "payment_failed",
            AuditDetails {
                payment_id: Some(record.id.clone()),
                user_id: Some(record.user_id.clone()),
                amount: Some(record.amount),
                status: Some(PaymentStatus::Failed.to_string()),
                error_code: outcome.result_code.clone(),
                error_message: Some(outcome.reason.clone()),
                ..Default::default()
            },
        );

        self.notifier.invalidate(&record.user_id).await;

        Ok(ApplyResult::ok("Payment marked as failed."))
    }

    async fn issue_credits(&self, payment_id: &str, user_id: &str, credit_pack_id: &str) {
        let credits = match self.catalog.credits_for(credit_pack_id).await {
            Ok(credits) => credits,
            Err(e) => {
                error!(
                    payment_id = %payment_id,
                    credit_pack_id = %credit_pack_id,
                    error = %e,
                    "credit pack lookup failed after successful payment"
                );
                self.audit.log(
                    AuditLevel::Error,
                    "credit_issuance_failed",
                    AuditDetails {
                        payment_id: Some(payment_id.to_string()),
                        user_id: Some(user_id.to_string()),
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    },
                );
                return;
            }
        };

        if let Err(e) = self.ledger.add_credits(user_id, credits).await {
            error!(
                payment_id = %payment_id,
                user_id = %user_id,
                credits,
                error = %e,
                "credit issuance failed after successful payment"
            );
            self.audit.log(
                AuditLevel::Error,
                "credit_issuance_failed",
                AuditDetails {
                    payment_id: Some(payment_id.to_string()),
                    user_id: Some(user_id.to_string()),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                },
            );
        }
    }

    async fn create_invoice(
        &self,
        payment_id: &str,
        invoice_number: &str,
        user_id: &str,
        amount: Decimal,
    ) {
        let metadata = json!({
            "user_id": user_id,
            "amount": amount.to_string(),
        });
        if let Err(e) = self
            .invoices
            .create_invoice(payment_id, invoice_number, metadata)
            .await
        {
            error!(
                payment_id = %payment_id,
                invoice_number = %invoice_number,
                error = %e,
                "invoice creation failed after successful payment"
            );
            self.audit.log(
                AuditLevel::Error,
                "invoice_creation_failed",
                AuditDetails {
                    payment_id: Some(payment_id.to_string()),
                    user_id: Some(user_id.to_string()),
                    error_message: Some(e.to_string()),
                    ..Default::default()
                },
            );
        }
    }
}
