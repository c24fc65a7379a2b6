//! Error types for signing-request dispatch.

use thiserror::Error;

/// Result type for facade operations.
pub type SigningResult<T> = Result<T, SigningError>;

/// Problems detected before any process or network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeouts(String),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("Missing setting: {0}")]
    MissingSetting(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// The underlying failure of a single facade operation.
///
/// Each variant carries the description produced where the failure happened;
/// `Display` prints it unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Non-zero exit, spawn failure, or process-level timeout.
    #[error("{0}")]
    CommandExecution(String),

    /// The process exited cleanly but did not report a usable result.
    #[error("{0}")]
    UnexpectedOutput(String),

    /// HTTP failure or a final-but-unsuccessful remote status.
    #[error("{0}")]
    TransportCall(String),

    /// The remote request did not reach a final status within its phase budget.
    #[error("{0}")]
    UpstreamTimeout(String),

    /// Local scratch-file handling failed.
    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for OperationError {
    fn from(error: std::io::Error) -> Self {
        OperationError::Io(error.to_string())
    }
}

/// Discriminant of an [`OperationError`], for callers that branch on the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CommandExecution,
    UnexpectedOutput,
    TransportCall,
    UpstreamTimeout,
    Io,
}

/// The caller-facing error of every facade operation.
///
/// Both variants display with the same `Signing operation failed:` prefix;
/// [`SigningError::kind`] separates a rejected request from a runtime failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Signing operation failed: {0}")]
    Failed(#[from] OperationError),

    /// The request was rejected before any process or network activity.
    #[error("Signing operation failed: {0}")]
    Configuration(#[from] ConfigError),
}

impl SigningError {
    /// The original description, without the facade-level prefix.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            SigningError::Failed(inner) => inner.to_string(),
            SigningError::Configuration(inner) => inner.to_string(),
        }
    }

    /// The underlying failure kind, `None` for configuration errors.
    #[must_use]
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            SigningError::Failed(inner) => Some(match inner {
                OperationError::CommandExecution(_) => FailureKind::CommandExecution,
                OperationError::UnexpectedOutput(_) => FailureKind::UnexpectedOutput,
                OperationError::TransportCall(_) => FailureKind::TransportCall,
                OperationError::UpstreamTimeout(_) => FailureKind::UpstreamTimeout,
                OperationError::Io(_) => FailureKind::Io,
            }),
            SigningError::Configuration(_) => None,
        }
    }
}
