//! Vision backend error types with transient/permanent classification.
//!
//! Every failure mode of the backend call collapses into one error surface:
//! the workflow treats any of these as "verification unavailable" and keeps
//! the task active, while the kind lets operators tell outages from
//! misconfiguration.

use thiserror::Error;

/// Error from a vision backend call.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    /// The caller handed us something unusable; never reaches the backend
    #[error("invalid verification input: {0}")]
    InvalidInput(String),

    /// HTTP 429 from the backend
    #[error("vision backend rate limited: {0}")]
    RateLimited(String),

    /// 5xx or unexpected status from the backend
    #[error("vision backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// Connection failure or timeout before any response
    #[error("vision backend unreachable: {0}")]
    Network(String),

    /// The backend answered, but not with a parseable verdict
    #[error("malformed vision backend response: {0}")]
    MalformedResponse(String),
}

impl VisionError {
    pub fn kind(&self) -> VisionErrorKind {
        match self {
            VisionError::InvalidInput(_) => VisionErrorKind::InvalidInput,
            VisionError::RateLimited(_) => VisionErrorKind::RateLimited,
            VisionError::Backend { .. } => VisionErrorKind::Backend,
            VisionError::Network(_) => VisionErrorKind::Network,
            VisionError::MalformedResponse(_) => VisionErrorKind::MalformedResponse,
        }
    }

    /// Whether a later retry with the same photo could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Map an HTTP error status to the matching error.
    pub fn from_status(status: u16, message: String) -> Self {
        match classify_http_status(status) {
            VisionErrorKind::RateLimited => VisionError::RateLimited(message),
            _ => VisionError::Backend { status, message },
        }
    }
}

/// Classification of vision backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionErrorKind {
    InvalidInput,
    RateLimited,
    Backend,
    Network,
    MalformedResponse,
}

impl VisionErrorKind {
    /// Transient errors may clear on a later attempt without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VisionErrorKind::RateLimited | VisionErrorKind::Backend | VisionErrorKind::Network
        )
    }
}

/// Classify an HTTP status from the backend.
pub fn classify_http_status(status: u16) -> VisionErrorKind {
    match status {
        429 => VisionErrorKind::RateLimited,
        _ => VisionErrorKind::Backend,
    }
}
