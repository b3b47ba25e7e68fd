use crate::gateway::error::GatewayError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Asynchronous result delivered by the payment gateway for a previously
/// initiated purchase. The signature covers all other fields and must be
/// verified before any processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Our payment record identifier (order reference sent to the gateway)
    pub payment_id: String,
    /// Provider-side transaction identifier
    pub transaction_id: String,
    /// Numeric provider result code, as delivered
    pub result_code: String,
    pub amount: Decimal,
    /// Hex HMAC over the canonical field string
    pub signature: String,
}

impl CallbackPayload {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.payment_id.trim().is_empty() {
            return Err(GatewayError::MalformedPayload {
                message: "payment_id is required".to_string(),
                field: Some("payment_id".to_string()),
            });
        }
        if self.transaction_id.trim().is_empty() {
            return Err(GatewayError::MalformedPayload {
                message: "transaction_id is required".to_string(),
                field: Some("transaction_id".to_string()),
            });
        }
        if self.result_code.trim().is_empty() {
            return Err(GatewayError::MalformedPayload {
                message: "result_code is required".to_string(),
                field: Some("result_code".to_string()),
            });
        }
        if self.amount <= Decimal::ZERO {
            return Err(GatewayError::MalformedPayload {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        Ok(())
    }
}

/// Stored snapshot of the provider's verdict, tagged by outcome so consumers
/// cannot read fields that do not apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderResponse {
    Approved {
        result_code: String,
        transaction_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<JsonValue>,
    },
    Declined {
        result_code: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Succeeded is absorbing: no transition away from it is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" | "success" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(GatewayError::MalformedPayload {
                message: format!("unknown payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Outcome of applying a verified callback to a payment record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyResult {
    pub success: bool,
    pub message: String,
}

impl ApplyResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn already_processed() -> Self {
        Self::ok("Payment already processed.")
    }

    pub fn cannot_downgrade() -> Self {
        Self::rejected("Cannot mark succeeded payment as failed.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_response_serializes_with_outcome_tag() {
        let approved = ProviderResponse::Approved {
            result_code: "0".to_string(),
            transaction_id: "T1".to_string(),
            raw: None,
        };
        let json = serde_json::to_value(&approved).expect("serialization should succeed");
        assert_eq!(json["outcome"], "approved");
        assert_eq!(json["transaction_id"], "T1");

        let declined = ProviderResponse::Declined {
            result_code: Some("51".to_string()),
            reason: "Insufficient funds".to_string(),
        };
        let json = serde_json::to_value(&declined).expect("serialization should succeed");
        assert_eq!(json["outcome"], "declined");
        assert_eq!(json["reason"], "Insufficient funds");
    }

    #[test]
    fn callback_payload_rejects_non_positive_amount() {
        let payload = CallbackPayload {
            payment_id: "p1".to_string(),
            transaction_id: "T1".to_string(),
            result_code: "0".to_string(),
            amount: Decimal::ZERO,
            signature: "sig".to_string(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn succeeded_is_the_only_absorbing_status() {
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(!PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(
            "succeeded".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Succeeded
        );
        assert_eq!(PaymentStatus::Failed.as_str(), "failed");
        assert!("refunded".parse::<PaymentStatus>().is_err());
    }
}
