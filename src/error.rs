//! Error handling for the EPOCH client
//!
//! One error type covers configuration, connection, work decoding, capacity,
//! timeout and submission failures so that every engine operation can report
//! through the same `Result`.

use thiserror::Error;

/// Result type alias for EPOCH operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the EPOCH client
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration errors (bad port, thread count, hash ceiling)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Reward address rejected by the address validator
    #[error("Invalid address: {message}")]
    Address { message: String },

    /// Upstream endpoint could not be parsed
    #[error("Invalid endpoint: {message}")]
    Endpoint { message: String },

    /// A connection is already established
    #[error("already running")]
    AlreadyActive,

    /// No connection is established
    #[error("epoch is not active")]
    Inactive,

    /// Dial or stream failures on the upstream connection
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Work blob decoding and version errors
    #[error("Work error: {message}")]
    Work { message: String },

    /// Requested batch exceeds the configured ceiling
    #[error("requested {requested} exceeds maxHashes {limit}")]
    Capacity { requested: usize, limit: usize },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Outbound submission failures
    #[error("Submission error: {message}")]
    Submission { message: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an address error
    pub fn address(message: impl Into<String>) -> Self {
        Self::Address {
            message: message.into(),
        }
    }

    /// Create an endpoint error
    pub fn endpoint(message: impl Into<String>) -> Self {
        Self::Endpoint {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a work error
    pub fn work(message: impl Into<String>) -> Self {
        Self::Work {
            message: message.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(requested: usize, limit: usize) -> Self {
        Self::Capacity { requested, limit }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a submission error
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::WebSocket(_)
                | Error::Connection { .. }
                | Error::Timeout { .. }
                | Error::Submission { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::WebSocket(_) => "websocket",
            Error::Config { .. } => "config",
            Error::Address { .. } => "address",
            Error::Endpoint { .. } => "endpoint",
            Error::AlreadyActive => "already_active",
            Error::Inactive => "inactive",
            Error::Connection { .. } => "connection",
            Error::Work { .. } => "work",
            Error::Capacity { .. } => "capacity",
            Error::Timeout { .. } => "timeout",
            Error::Submission { .. } => "submission",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
