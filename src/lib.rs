//! Idempotent payment-callback processing core.
//!
//! Receives a payment gateway's asynchronous callback for a previously
//! initiated purchase, verifies its authenticity, classifies the provider
//! result code, and applies the outcome to a payment record and the user's
//! credit balance exactly once, even under duplicate or concurrent delivery.
//!
//! The record store, credit ledger, invoice generator, view notifier, audit
//! sink and alert hook are external collaborators consumed through traits;
//! this crate carries the correctness invariants.

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod services;
pub mod store;

pub use config::CoreConfig;
pub use error::{CallbackError, CallbackResult};
pub use services::processor::{CallbackProcessor, CallbackResponse, RequestProvenance};
