//! Engine error taxonomy.
//!
//! Every failure the pipeline can produce maps onto one variant here. The
//! variant decides the response status and the label of the exception
//! counter; the message is what gets translated and shown to the client.

use axum::http::StatusCode;

use crate::security::rate_limit::AdmissionScope;

/// Error type shared by the pipeline, endpoints and content providers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("rate limit exceeded ({0} scope)")]
    RateLimited(AdmissionScope),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// Declared by handler code: an explicit status plus a message meant for
    /// the client.
    #[error("{message}")]
    Application { status: StatusCode, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The client went away before the response was written.
    #[error("client disconnected")]
    Transport,
}

impl EngineError {
    /// Shorthand for [`EngineError::Application`].
    pub fn application(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Application {
            status,
            message: message.into(),
        }
    }

    /// Label used for the exception counters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::RangeNotSatisfiable(_) => "bad_range",
            Self::Application { .. } => "application",
            Self::Internal(_) => "internal",
            Self::Io(_) => "io",
            Self::Transport => "transport",
        }
    }

    /// HTTP status this error is answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Application { status, .. } => *status,
            Self::Internal(_) | Self::Io(_) | Self::Transport => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to the client. Unclassified faults only expose a
    /// generic text; the detail goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Io(_) | Self::Transport => {
                "Internal server error".to_string()
            }
            Self::Unauthorized => "Authentication required".to_string(),
            Self::RateLimited(_) => "Too many requests".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result alias used across the engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
