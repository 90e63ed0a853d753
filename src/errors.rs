use http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broad classes of failure surfaced to the user.
///
/// Every variant is non-fatal: callers degrade to a notification and carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Location permission was refused; retry by starting tracking again.
    PermissionDenied,
    /// A remote call failed (network, auth or server-side validation).
    Remote,
    /// Input was rejected before any remote call was issued.
    InvalidInput,
    /// Anything else, including local configuration problems.
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Remote call failed with status {status}: {message}")]
    RemoteStatus {
        #[serde(skip)]
        status: StatusCode,
        message: String,
    },

    #[error("Malformed record {id:?}: {reason}")]
    MalformedRecord { id: Option<Uuid>, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ServiceError::RemoteStatus {
                status,
                message: err.to_string(),
            },
            None => ServiceError::ExternalServiceError(err.to_string()),
        }
    }
}

impl ServiceError {
    /// Maps the error onto the user-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PermissionDenied | Self::LocationUnavailable(_) => {
                ErrorCategory::PermissionDenied
            }
            Self::ValidationError(_)
            | Self::InvalidInput(_)
            | Self::InvalidOperation(_)
            | Self::Forbidden(_) => ErrorCategory::InvalidInput,
            Self::NotFound(_)
            | Self::Unauthorized(_)
            | Self::ExternalServiceError(_)
            | Self::RemoteStatus { .. }
            | Self::MalformedRecord { .. }
            | Self::SubscriptionClosed => ErrorCategory::Remote,
            Self::SerializationError(_) | Self::ConfigError(_) | Self::Other(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// HTTP status equivalent, used when the error originates from or is
    /// reported back to the hosted backend.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidInput(_) | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::RemoteStatus { status, .. } => *status,
            Self::ExternalServiceError(_) | Self::MalformedRecord { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::LocationUnavailable(_) | Self::SubscriptionClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::SerializationError(_) | Self::ConfigError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for a transient notification.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::SerializationError(_) | Self::Other(_) => "Internal error".to_string(),
            Self::MalformedRecord { .. } => "Received an invalid record from the server".to_string(),
            Self::RemoteStatus { status, .. } => format!(
                "Server request failed ({})",
                status.canonical_reason().unwrap_or("unknown error")
            ),
            _ => self.to_string(),
        }
    }
}
