//! Gateway-facing types: the callback payload, signature verification, and
//! the provider response-code taxonomy.

pub mod error;
pub mod signature;
pub mod taxonomy;
pub mod types;

pub use error::{GatewayError, GatewayResult};
pub use types::{ApplyResult, CallbackPayload, PaymentStatus, ProviderResponse};
