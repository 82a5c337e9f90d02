//! Error types for authentication and authorization operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Authentication provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Cache service required for state storage")]
    CacheRequired,

    #[error("Role {0} already exists")]
    RoleAlreadyExists(String),

    #[error("Role {0} not found")]
    RoleNotFound(String),

    #[error("Cannot create system role")]
    SystemRoleCreate,

    #[error("Cannot update system role")]
    SystemRoleUpdate,

    #[error("Cannot delete system role")]
    SystemRoleDelete,

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Missing customer context")]
    MissingCustomerContext,

    #[error("Secret {0} not found")]
    SecretNotFound(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::NetworkError(format!("request timed out: {}", err))
        } else {
            AuthError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        AuthError::InvalidUrl(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for AuthError {
    fn from(err: config::ConfigError) -> Self {
        AuthError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_error_messages() {
        assert_eq!(
            AuthError::RoleAlreadyExists("custom:ops".into()).to_string(),
            "Role custom:ops already exists"
        );
        assert_eq!(AuthError::RoleNotFound("x".into()).to_string(), "Role x not found");
        assert_eq!(AuthError::SystemRoleCreate.to_string(), "Cannot create system role");
        assert_eq!(AuthError::SystemRoleUpdate.to_string(), "Cannot update system role");
        assert_eq!(AuthError::SystemRoleDelete.to_string(), "Cannot delete system role");
    }

    #[test]
    fn test_cache_required_message() {
        assert_eq!(
            AuthError::CacheRequired.to_string(),
            "Cache service required for state storage"
        );
    }
}
