use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Callback signature verification failed: {message}")]
    SignatureMismatch { message: String },

    #[error("Callback signature is missing")]
    MissingSignature,

    #[error("Malformed callback payload: {message}")]
    MalformedPayload {
        message: String,
        field: Option<String>,
    },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::SignatureMismatch { .. } => false,
            GatewayError::MissingSignature => false,
            GatewayError::MalformedPayload { .. } => false,
        }
    }
}
