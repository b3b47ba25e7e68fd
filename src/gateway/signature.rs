//! Callback signature verification.
//!
//! The gateway signs the canonical field string with HMAC-SHA512 and sends
//! the hex digest alongside the payload. Verification runs before any other
//! processing and uses a constant-time comparison.

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::gateway::error::GatewayError;
use crate::gateway::types::CallbackPayload;

type HmacSha512 = Hmac<Sha512>;

/// Canonical string the gateway signs: `payment_id|transaction_id|result_code|amount`.
pub fn signing_payload(payload: &CallbackPayload) -> String {
    format!(
        "{}|{}|{}|{}",
        payload.payment_id, payload.transaction_id, payload.result_code, payload.amount
    )
}

/// Compute the hex signature for a payload. Used by tests and by gateways
/// under our control in integration environments.
pub fn sign_payload(payload: &CallbackPayload, secret: &str) -> Result<String, GatewayError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).map_err(|_| {
        GatewayError::SignatureMismatch {
            message: "invalid signing key".to_string(),
        }
    })?;
    mac.update(signing_payload(payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify the payload's signature against the shared secret.
pub fn verify_signature(payload: &CallbackPayload, secret: &str) -> Result<(), GatewayError> {
    if payload.signature.trim().is_empty() {
        return Err(GatewayError::MissingSignature);
    }

    let expected = sign_payload(payload, secret)?;
    if secure_eq(expected.as_bytes(), payload.signature.trim().as_bytes()) {
        Ok(())
    } else {
        Err(GatewayError::SignatureMismatch {
            message: "digest does not match payload".to_string(),
        })
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
