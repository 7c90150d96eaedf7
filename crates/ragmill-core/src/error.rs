use std::fmt;
use serde::{Deserialize, Serialize};

/// Main error type for ragmill
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),

    /// Database errors (SQLx wrapped)
    Database(sqlx::Error),

    /// Persistence backend down, corrupt, or refusing to open
    StoreUnavailable(String),

    /// Validation errors (malformed id, unparseable cron, negative
    /// interval, past run date, duplicate id on create)
    Validation(String),

    /// Job or preset absent
    NotFound(String),

    /// Lost race with a concurrent mutation (retry-safe)
    Conflict(String),

    /// Child process could not start
    SpawnFailed(String),

    /// Firing exceeded its deadline
    Timeout(String),

    /// Worker pool saturated
    Overflow(String),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),

    /// IO errors
    Io(std::io::Error),

    /// Generic errors with description
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::StoreUnavailable(msg) => write!(f, "Job store unavailable: {}", msg),
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::SpawnFailed(msg) => write!(f, "Spawn failed: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::Overflow(msg) => write!(f, "Pool overflow: {}", msg),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

// Conversions from external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Database(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}

// Common error constructors
impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new conflict error
    pub fn conflict<T: Into<String>>(msg: T) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a new store-unavailable error
    pub fn store_unavailable<T: Into<String>>(msg: T) -> Self {
        Error::StoreUnavailable(msg.into())
    }

    /// Create a new spawn-failed error
    pub fn spawn_failed<T: Into<String>>(msg: T) -> Self {
        Error::SpawnFailed(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Timeout(_) => 504,
            Error::StoreUnavailable(_) => 503,
            Error::Overflow(_) => 503,
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::SpawnFailed(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::SpawnFailed(_) => "spawn_failed",
            Error::Timeout(_) => "timeout",
            Error::Overflow(_) => "overflow",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }

    /// Whether the scheduler loop should back off and retry on this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Database(_) | Error::Conflict(_))
    }
}

/// Wire-friendly error body returned by transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub category: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: err.to_string(),
            category: err.category().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::validation("bad id");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::store_unavailable("down").is_retryable());
        assert!(Error::conflict("raced").is_retryable());
        assert!(!Error::not_found("job x").is_retryable());
    }

    #[test]
    fn test_error_body() {
        let err = Error::not_found("job 'daily' not found");
        let body = ErrorBody::from(&err);
        assert!(body.error.contains("daily"));
        assert_eq!(body.category, "not_found");
    }
}
