//! Error types for vigil.

use thiserror::Error;

/// Result type alias using vigil's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vigil operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A partition-scoped context arrived without a partition id.
    #[error("Misconfigured scope: {0}")]
    MisconfiguredScope(String),

    /// The data source refused or lost a stream subscription.
    #[error("Source subscription error on stream '{stream}': {message}")]
    SourceSubscription { stream: String, message: String },

    /// Metric computation failed for one cycle.
    #[error("Compute error: {0}")]
    Compute(String),

    /// The readiness barrier did not open in time.
    #[error("Initialization timed out waiting for streams: {}", pending.join(", "))]
    InitializationTimeout { pending: Vec<String> },

    /// A document failed validation at the ingestion boundary.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::SourceSubscription`] for the named stream.
    pub fn source(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SourceSubscription {
            stream: stream.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
