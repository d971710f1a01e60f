use thiserror::Error;

/// Errors produced by the protection layer.
#[derive(Error, Debug)]
pub enum ProtectionError {
    /// Configuration loading or parsing errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid values supplied through the management surface
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Redis connection establishment errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The remote store could not be reached within the deadline
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Attempt to blacklist a key that is whitelisted
    #[error("Cannot blacklist whitelisted key: {0}")]
    ConflictWhitelisted(String),

    /// Malformed or empty client key
    #[error("Invalid client key: {0:?}")]
    InvalidKey(String),

    /// I/O errors (listener binding, log file creation)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtectionError {
    /// Stable token surfaced in management API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ProtectionError::Config(_) => "CONFIG_ERROR",
            ProtectionError::InvalidValue(_) => "INVALID_VALUE",
            ProtectionError::Redis(_) | ProtectionError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ProtectionError::ConflictWhitelisted(_) => "CONFLICT_WHITELISTED",
            ProtectionError::InvalidKey(_) => "INVALID_KEY",
            ProtectionError::Io(_) => "IO_ERROR",
            ProtectionError::Internal(_) => "INTERNAL",
        }
    }
}

/// Result type for protection layer operations.
pub type ProtectionResult<T> = Result<T, ProtectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_carries_key_and_code() {
        let err = ProtectionError::ConflictWhitelisted("198.51.100.9".into());
        assert_eq!(err.code(), "CONFLICT_WHITELISTED");
        assert!(err.to_string().contains("198.51.100.9"));
    }

    #[test]
    fn store_errors_share_a_code() {
        let err = ProtectionError::StoreUnavailable("timeout after 5s".into());
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }
}
