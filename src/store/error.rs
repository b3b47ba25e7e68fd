use thiserror::Error;

/// Record-store error, shaped so callers can branch on the violated
/// constraint without knowing the backing store.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum StoreErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated for key: {key}")]
    UniqueViolation { key: String },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    pub fn new(kind: StoreErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn unique_violation(key: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::UniqueViolation { key: key.into() })
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable {
            message: message.into(),
        })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, StoreErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Unavailable { .. })
    }
}
