//! Provider response-code taxonomy.
//!
//! Known codes live in a static table keyed by code; control flow never
//! branches on individual codes, so new mappings are added here only.
//! Unmapped numeric codes fall back to a range heuristic: the provider's
//! decline range (1..=99) and its system-fault range (800..=899) are both
//! retryable; anything else is treated as a non-retryable system error.
//!
//! Pure lookups; safe to call concurrently without synchronization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    Success,
    CardDeclined,
    SystemError,
    ValidationError,
    AuthenticationError,
    ConfigurationError,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Classification of a single provider result code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseClass {
    pub code: String,
    pub category: ResponseCategory,
    pub severity: Severity,
    pub user_message: String,
    pub technical_message: String,
    pub retryable: bool,
}

fn entry(
    code: &str,
    category: ResponseCategory,
    severity: Severity,
    user_message: &str,
    technical_message: &str,
    retryable: bool,
) -> (String, ResponseClass) {
    (
        code.to_string(),
        ResponseClass {
            code: code.to_string(),
            category,
            severity,
            user_message: user_message.to_string(),
            technical_message: technical_message.to_string(),
            retryable,
        },
    )
}

static KNOWN_CODES: LazyLock<HashMap<String, ResponseClass>> = LazyLock::new(|| {
    use ResponseCategory::*;
    use Severity::*;

    HashMap::from([
        entry("0", Success, Info, "Payment approved.", "Approved", false),
        // Card declines: the user can usually retry with another instrument.
        entry(
            "5",
            CardDeclined,
            Warning,
            "Your card was declined. Please try a different card.",
            "Do not honor",
            true,
        ),
        entry(
            "41",
            CardDeclined,
            Warning,
            "Your card was declined. Please contact your bank.",
            "Lost card, pick up",
            true,
        ),
        entry(
            "43",
            CardDeclined,
            Warning,
            "Your card was declined. Please contact your bank.",
            "Stolen card, pick up",
            true,
        ),
        entry(
            "51",
            CardDeclined,
            Warning,
            "Insufficient funds. Please try a different card.",
            "Insufficient funds",
            true,
        ),
        entry(
            "54",
            CardDeclined,
            Warning,
            "Your card has expired. Please use a different card.",
            "Expired card",
            true,
        ),
        entry(
            "55",
            CardDeclined,
            Warning,
            "Incorrect PIN. Please try again.",
            "Incorrect PIN",
            true,
        ),
        entry(
            "57",
            CardDeclined,
            Warning,
            "This transaction is not permitted on your card.",
            "Transaction not permitted to cardholder",
            true,
        ),
        entry(
            "58",
            CardDeclined,
            Warning,
            "This transaction is not permitted. Please try a different card.",
            "Transaction not permitted at terminal",
            true,
        ),
        entry(
            "61",
            CardDeclined,
            Warning,
            "This payment exceeds your card limit.",
            "Exceeds withdrawal amount limit",
            true,
        ),
        entry(
            "62",
            CardDeclined,
            Warning,
            "Your card was declined. Please contact your bank.",
            "Restricted card",
            true,
        ),
        entry(
            "65",
            CardDeclined,
            Warning,
            "Your card has reached its activity limit.",
            "Exceeds withdrawal frequency limit",
            true,
        ),
        entry(
            "75",
            CardDeclined,
            Warning,
            "Too many incorrect PIN attempts. Please contact your bank.",
            "Allowable PIN tries exceeded",
            true,
        ),
        // Format and validation problems: retryable only after correction.
        entry(
            "12",
            ValidationError,
            Warning,
            "The payment request was invalid. Please try again.",
            "Invalid transaction",
            false,
        ),
        entry(
            "13",
            ValidationError,
            Warning,
            "The payment amount was invalid.",
            "Invalid amount",
            false,
        ),
        entry(
            "14",
            ValidationError,
            Warning,
            "The card number is invalid. Please check and try again.",
            "Invalid card number",
            false,
        ),
        entry(
            "30",
            ValidationError,
            Warning,
            "The payment request was malformed.",
            "Format error",
            false,
        ),
        // Issuer / provider faults: transient, retry later.
        entry(
            "91",
            SystemError,
            Error,
            "The payment service is temporarily unavailable. Please try again.",
            "Issuer or switch inoperative",
            true,
        ),
        entry(
            "96",
            SystemError,
            Error,
            "The payment service is temporarily unavailable. Please try again.",
            "System malfunction",
            true,
        ),
        entry(
            "801",
            SystemError,
            Error,
            "The payment service timed out. Please try again.",
            "Gateway timeout communicating with acquirer",
            true,
        ),
        entry(
            "811",
            SystemError,
            Error,
            "The payment service is temporarily unavailable. Please try again.",
            "Acquirer host unavailable",
            true,
        ),
        // Security and credential failures: operator-facing, alert rather
        // than surface to the end user.
        entry(
            "63",
            AuthenticationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "Security violation",
            false,
        ),
        entry(
            "98",
            AuthenticationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "MAC verification failure",
            false,
        ),
        // Terminal / merchant configuration: non-retryable until an operator
        // fixes the setup.
        entry(
            "901",
            ConfigurationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "Invalid terminal identifier",
            false,
        ),
        entry(
            "902",
            ConfigurationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "Merchant not configured for this transaction type",
            false,
        ),
        entry(
            "903",
            ConfigurationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "Invalid merchant credentials",
            false,
        ),
        entry(
            "909",
            ConfigurationError,
            Critical,
            "Payment could not be processed. Please contact support.",
            "Gateway configuration fault",
            false,
        ),
    ])
});

/// Classify a provider result code.
///
/// Exact-match lookup first; unmapped numeric codes fall back to the range
/// heuristic; everything else is a non-retryable system error.
pub fn classify(code: &str) -> ResponseClass {
    let code = code.trim();
    if let Some(class) = KNOWN_CODES.get(code) {
        return class.clone();
    }

    match code.parse::<i64>() {
        Ok(n) if (1..=99).contains(&n) => ResponseClass {
            code: code.to_string(),
            category: ResponseCategory::CardDeclined,
            severity: Severity::Error,
            user_message: "Your card was declined. Please try a different card.".to_string(),
            technical_message: format!("Unmapped decline-range code {}", code),
            retryable: true,
        },
        Ok(n) if (800..=899).contains(&n) => ResponseClass {
            code: code.to_string(),
            category: ResponseCategory::SystemError,
            severity: Severity::Error,
            user_message: "The payment service is temporarily unavailable. Please try again."
                .to_string(),
            technical_message: format!("Unmapped system-fault-range code {}", code),
            retryable: true,
        },
        _ => ResponseClass {
            code: code.to_string(),
            category: ResponseCategory::SystemError,
            severity: Severity::Error,
            user_message: "Payment could not be processed. Please contact support.".to_string(),
            technical_message: format!("Unknown provider code {}", code),
            retryable: false,
        },
    }
}

/// User-facing message for a code, preferring an explicit override when the
/// caller supplies one (e.g. a gateway-provided display message).
pub fn user_message(code: &str, override_message: Option<&str>) -> String {
    match override_message {
        Some(msg) if !msg.trim().is_empty() => msg.trim().to_string(),
        _ => classify(code).user_message,
    }
}

pub fn is_retryable(code: &str) -> bool {
    classify(code).retryable
}

pub fn severity(code: &str) -> Severity {
    classify(code).severity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_code_classifies_as_success() {
        let class = classify("0");
        assert_eq!(class.category, ResponseCategory::Success);
        assert_eq!(class.severity, Severity::Info);
        assert!(!class.retryable);
    }

    #[test]
    fn insufficient_funds_is_a_retryable_decline() {
        let class = classify("51");
        assert_eq!(class.category, ResponseCategory::CardDeclined);
        assert!(class.retryable);
    }

    #[test]
    fn terminal_configuration_fault_is_critical_and_final() {
        let class = classify("901");
        assert_eq!(class.category, ResponseCategory::ConfigurationError);
        assert_eq!(class.severity, Severity::Critical);
        assert!(!class.retryable);
    }

    #[test]
    fn out_of_range_code_is_a_final_system_error() {
        let class = classify("12345");
        assert_eq!(class.category, ResponseCategory::SystemError);
        assert!(!class.retryable);
    }

    #[test]
    fn unmapped_decline_range_code_uses_the_heuristic() {
        let class = classify("77");
        assert_eq!(class.category, ResponseCategory::CardDeclined);
        assert_eq!(class.severity, Severity::Error);
        assert!(class.retryable);
    }

    #[test]
    fn unmapped_system_range_code_is_retryable() {
        let class = classify("850");
        assert_eq!(class.category, ResponseCategory::SystemError);
        assert!(class.retryable);
    }

    #[test]
    fn non_numeric_code_is_a_final_system_error() {
        let class = classify("XYZ");
        assert_eq!(class.category, ResponseCategory::SystemError);
        assert!(!class.retryable);
    }

    #[test]
    fn user_message_prefers_caller_override() {
        assert_eq!(
            user_message("51", Some("Custom decline text")),
            "Custom decline text"
        );
        assert_eq!(
            user_message("51", Some("   ")),
            classify("51").user_message
        );
        assert_eq!(user_message("51", None), classify("51").user_message);
    }

    #[test]
    fn helper_views_agree_with_classify() {
        assert!(is_retryable("91"));
        assert!(!is_retryable("901"));
        assert_eq!(severity("63"), Severity::Critical);
        assert_eq!(severity("0"), Severity::Info);
    }
}
