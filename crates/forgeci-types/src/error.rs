use thiserror::Error;

/// Errors from validating value types at construction.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid secret name '{0}': must match [A-Z][A-Z0-9_]*")]
    SecretName(String),
}

/// Errors related to secret operations.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{0}' not found in scope")]
    NotFound(String),

    #[error("encryption error")]
    EncryptionError,

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors from repository operations (used by trait definitions in forgeci-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::SecretName("api-key".to_string());
        assert!(err.to_string().contains("api-key"));
    }

    #[test]
    fn test_secret_error_display() {
        let err = SecretError::NotFound("DEPLOY_TOKEN".to_string());
        assert_eq!(err.to_string(), "secret 'DEPLOY_TOKEN' not found in scope");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
