pub mod idempotency;
pub mod lifecycle;
pub mod processor;
