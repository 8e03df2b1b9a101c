//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
///
/// Every variant is fatal. The tool is meant to be re-run by a scheduler
/// once the operator has fixed the underlying condition.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Database not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal dispatch error: {0}")]
    InternalDispatch(String),

    #[error("Maintenance step failed: {0}")]
    Operation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Interrupted before deleting data")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a permission error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create a missing-database error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Wrap an adapter failure, naming the step that failed
    pub fn operation(step: &str, err: anyhow::Error) -> Self {
        Self::Operation(format!("{}: {:#}", step, err))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Permission(_) | Error::InvalidArgument(_) => 1,
            Error::ResourceNotFound(_) => 2,
            Error::Operation(_)
            | Error::Config(_)
            | Error::Interrupted
            | Error::Io(_)
            | Error::Json(_) => 3,
            Error::VerificationFailed(_) => 4,
            Error::InternalDispatch(_) => 9,
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
