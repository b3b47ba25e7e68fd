//! Application configuration module
//! Handles environment variable loading, configuration validation, and core settings

use std::env;

/// Top-level configuration for the callback core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub gateway: GatewayConfig,
    pub idempotency: IdempotencyConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// Payment gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Shared secret used to verify callback signatures
    pub webhook_secret: String,
    /// Provider result code that denotes an approved payment
    pub success_code: String,
}

/// Idempotency service configuration
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Record time-to-live in minutes
    pub ttl_minutes: i64,
    /// Maximum attempts while waiting on a pending record
    pub max_wait_attempts: u32,
    /// Initial backoff between wait attempts, in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub max_backoff_ms: u64,
    /// Request-scoped timeout around the wrapped operation, in seconds
    pub operation_timeout_secs: u64,
}

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Ring buffer capacity (entries); oldest entries are evicted
    pub buffer_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

impl CoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(CoreConfig {
            gateway: GatewayConfig::from_env()?,
            idempotency: IdempotencyConfig::from_env()?,
            audit: AuditConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        self.idempotency.validate()?;
        self.audit.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                .map_err(|_| ConfigError::MissingVariable("GATEWAY_WEBHOOK_SECRET".to_string()))?,
            success_code: env::var("GATEWAY_SUCCESS_CODE").unwrap_or_else(|_| "0".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.is_empty() {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_WEBHOOK_SECRET cannot be empty".to_string(),
            ));
        }

        if self.success_code.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_SUCCESS_CODE cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(IdempotencyConfig {
            ttl_minutes: env::var("IDEMPOTENCY_TTL_MINUTES")
                .unwrap_or_else(|_| "1440".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IDEMPOTENCY_TTL_MINUTES".to_string()))?,
            max_wait_attempts: env::var("IDEMPOTENCY_MAX_WAIT_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("IDEMPOTENCY_MAX_WAIT_ATTEMPTS".to_string())
                })?,
            initial_backoff_ms: env::var("IDEMPOTENCY_INITIAL_BACKOFF_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("IDEMPOTENCY_INITIAL_BACKOFF_MS".to_string())
                })?,
            max_backoff_ms: env::var("IDEMPOTENCY_MAX_BACKOFF_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IDEMPOTENCY_MAX_BACKOFF_MS".to_string()))?,
            operation_timeout_secs: env::var("IDEMPOTENCY_OPERATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("IDEMPOTENCY_OPERATION_TIMEOUT_SECS".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_TTL_MINUTES must be positive".to_string(),
            ));
        }

        if self.max_wait_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_MAX_WAIT_ATTEMPTS cannot be 0".to_string(),
            ));
        }

        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_INITIAL_BACKOFF_MS cannot be 0".to_string(),
            ));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_MAX_BACKOFF_MS must be >= IDEMPOTENCY_INITIAL_BACKOFF_MS".to_string(),
            ));
        }

        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "IDEMPOTENCY_OPERATION_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuditConfig {
            buffer_capacity: env::var("AUDIT_BUFFER_CAPACITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("AUDIT_BUFFER_CAPACITY".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "AUDIT_BUFFER_CAPACITY cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_validation() {
        let config = GatewayConfig {
            webhook_secret: "whsec_test".to_string(),
            success_code: "0".to_string(),
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let config = GatewayConfig {
            webhook_secret: "".to_string(),
            success_code: "0".to_string(),
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_ceiling_must_cover_initial() {
        let config = IdempotencyConfig {
            ttl_minutes: 1440,
            max_wait_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 100, // ceiling below initial
            operation_timeout_secs: 30,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_wait_attempts_is_rejected() {
        let config = IdempotencyConfig {
            ttl_minutes: 1440,
            max_wait_attempts: 0,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            operation_timeout_secs: 30,
        };

        assert!(config.validate().is_err());
    }
}
