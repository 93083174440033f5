//! Error types for the retrieval system.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the retrieval system.
#[derive(Error, Debug)]
pub enum RagError {
    /// An optional storage capability (vector search) is not provisioned.
    #[error("Capability unavailable: {capability}")]
    CapabilityUnavailable { capability: String },

    /// A retrieval strategy exceeded its time budget.
    #[error("Strategy {source_name} timed out after {elapsed_ms}ms")]
    StrategyTimeout { source_name: String, elapsed_ms: u64 },

    /// A retrieval strategy returned an error.
    #[error("Strategy {source_name} failed: {message}")]
    StrategyFailure { source_name: String, message: String },

    /// Every retrieval strategy failed or timed out.
    #[error("All retrieval strategies failed: {}", failures.join("; "))]
    AllStrategiesFailed { failures: Vec<String> },

    /// Entity referenced by a dependency or cross-reference request does not exist.
    #[error("Unknown entity: {entity}")]
    UnknownEntity { entity: String },

    /// Repository not found.
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    /// Empty or malformed query string.
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Stored data violates an invariant (dangling edge, corrupt row).
    #[error("Data integrity error: {message}")]
    Integrity { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Embedding provider error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a capability-unavailable error.
    pub fn capability_unavailable(capability: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            capability: capability.into(),
        }
    }

    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an unknown entity error.
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }

    /// Create an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means "feature not provisioned" rather than a failure.
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable { .. })
    }

    /// Get the error code for protocol responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            Self::StrategyTimeout { .. } => "STRATEGY_TIMEOUT",
            Self::StrategyFailure { .. } => "STRATEGY_FAILURE",
            Self::AllStrategiesFailed { .. } => "ALL_STRATEGIES_FAILED",
            Self::UnknownEntity { .. } => "UNKNOWN_ENTITY",
            Self::RepositoryNotFound { .. } => "REPOSITORY_NOT_FOUND",
            Self::InvalidQuery { .. } => "INVALID_QUERY",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::unknown_entity("auth:UserService");
        assert!(err.to_string().contains("auth:UserService"));

        let err = RagError::AllStrategiesFailed {
            failures: vec!["dense: timed out".to_string(), "sparse: boom".to_string()],
        };
        assert!(err.to_string().contains("dense: timed out; sparse: boom"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RagError::unknown_entity("x").error_code(),
            "UNKNOWN_ENTITY"
        );
        assert_eq!(RagError::database("test").error_code(), "DATABASE_ERROR");
        assert_eq!(
            RagError::AllStrategiesFailed { failures: vec![] }.error_code(),
            "ALL_STRATEGIES_FAILED"
        );
    }

    #[test]
    fn test_capability_unavailable_is_not_a_failure() {
        assert!(RagError::capability_unavailable("vector_search").is_capability_unavailable());
        assert!(!RagError::database("locked").is_capability_unavailable());
    }
}
