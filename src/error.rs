use std::fmt;

use thiserror::Error;

/// Step of a control channel exchange that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStage {
    Connect,
    Authenticate,
    Signal,
    Protocol,
}

impl ControlStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStage::Connect => "connect",
            ControlStage::Authenticate => "authenticate",
            ControlStage::Signal => "signal",
            ControlStage::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ControlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the Rota application
#[derive(Error, Debug)]
pub enum RotaError {
    // Control channel errors
    #[error("Control channel {stage} failed: {message}")]
    ControlChannel { stage: ControlStage, message: String },

    // Address probe errors
    #[error("Address probe failed: {0}")]
    Probe(String),

    #[error("Identity rotation exhausted after {attempts} attempts")]
    RotationExhausted { attempts: u32 },

    // Request errors
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Proxy errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for Rota operations
pub type Result<T> = std::result::Result<T, RotaError>;

/// Coarse classification used by callers that branch on the kind of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ControlChannel,
    Probe,
    RotationExhausted,
    Request,
    Configuration,
    Internal,
}

impl RotaError {
    pub fn control(stage: ControlStage, message: impl Into<String>) -> Self {
        RotaError::ControlChannel {
            stage,
            message: message.into(),
        }
    }

    /// Get the category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            RotaError::ControlChannel { .. } => ErrorCategory::ControlChannel,

            RotaError::Probe(_) => ErrorCategory::Probe,

            RotaError::RotationExhausted { .. } => ErrorCategory::RotationExhausted,

            RotaError::Request(_)
            | RotaError::RequestTimeout
            | RotaError::ProxyConnectionFailed(_) => ErrorCategory::Request,

            RotaError::InvalidConfig(_) | RotaError::InvalidRequest(_) => {
                ErrorCategory::Configuration
            }

            RotaError::Io(_) | RotaError::Serialization(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a rotation cycle may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ControlChannel | ErrorCategory::Probe | ErrorCategory::Request
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidRequest(err.to_string())
    }
}
