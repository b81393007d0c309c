// Error handling framework
// Startup errors are fatal; pool errors propagate to the caller as typed failures

use crate::models::DatabaseIdentifier;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors, raised only while resolving settings at startup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for {variable}: {reason}")]
    InvalidFormat { variable: String, reason: String },

    #[error("Unknown database identifier '{name}' referenced by {variable}")]
    UnknownIdentifier { name: String, variable: String },

    #[error("Failed to load settings: {0}")]
    Settings(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Settings(err.to_string())
    }
}

/// Errors talking to the physical database
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Failed to connect to database '{identifier}': {reason}")]
    ConnectFailed {
        identifier: DatabaseIdentifier,
        reason: String,
    },

    #[error("Connection to database '{identifier}' timed out after {timeout:?}")]
    Timeout {
        identifier: DatabaseIdentifier,
        timeout: Duration,
    },

    #[error("Health check failed for database '{identifier}': {reason}")]
    HealthCheckFailed {
        identifier: DatabaseIdentifier,
        reason: String,
    },
}

impl ConnectionError {
    pub fn identifier(&self) -> DatabaseIdentifier {
        match self {
            ConnectionError::ConnectFailed { identifier, .. }
            | ConnectionError::Timeout { identifier, .. }
            | ConnectionError::HealthCheckFailed { identifier, .. } => *identifier,
        }
    }
}

/// Errors returned by `ConnectionPool::acquire`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool for database '{identifier}' exhausted: no connection within {timeout:?}")]
    Exhausted {
        identifier: DatabaseIdentifier,
        timeout: Duration,
    },

    #[error("Pool for database '{0}' is closed")]
    Closed(DatabaseIdentifier),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl PoolError {
    /// Whether the caller should surface a retry-later response
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. } | PoolError::Connection(_))
    }
}

/// Registry misuse. These indicate a programming error, not a runtime condition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Database '{0}' already has a registered pool")]
    DuplicateRegistration(DatabaseIdentifier),

    #[error("Database '{0}' has no registered pool")]
    UnregisteredDatabase(DatabaseIdentifier),

    #[error("Registration is closed; cannot register database '{0}' after startup")]
    RegistrationClosed(DatabaseIdentifier),

    #[error("Database registry has been terminated")]
    Terminated,
}

/// Anything that aborts startup
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Pool error during startup: {0}")]
    Pool(#[from] PoolError),
}

/// Failure of a single data-access operation through the facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Query failed on database '{identifier}': {reason}")]
    QueryFailed {
        identifier: DatabaseIdentifier,
        reason: String,
    },
}

impl From<ConnectionError> for DatabaseError {
    fn from(err: ConnectionError) -> Self {
        DatabaseError::Pool(PoolError::Connection(err))
    }
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let code = match err {
            PoolError::Exhausted { .. } => "RETRY_LATER",
            PoolError::Closed(_) => "SERVICE_UNAVAILABLE",
            PoolError::Connection(_) => "DATABASE_UNAVAILABLE",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let code = match err {
            RegistryError::Terminated => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Registry(e) => e.into(),
            DatabaseError::Pool(e) => e.into(),
            DatabaseError::QueryFailed { .. } => ApiError::new("QUERY_FAILED", err.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new("CONFIG_ERROR", err.to_string())
    }
}
