use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    Unauthorized,
    Validation,
    NotFound,
    Server,
    Network,
}

impl ApiErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single API call. Every variant maps onto one [`ApiErrorKind`].
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No token was available, or the backend rejected it with 401.
    #[error("{message}")]
    Unauthorized {
        status: Option<u16>,
        message: String,
    },
    #[error("{message}")]
    Validation {
        status: Option<u16>,
        message: String,
    },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Server {
        status: Option<u16>,
        message: String,
    },
    /// No response was received.
    #[error("network error: {message}")]
    Network { message: String },
}

impl ApiError {
    pub(crate) fn missing_token() -> Self {
        Self::Unauthorized {
            status: None,
            message: "Authentication required.".to_string(),
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::Validation {
            status: None,
            message: message.into(),
        }
    }

    pub(crate) fn malformed_response(message: impl Into<String>) -> Self {
        Self::Server {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Unauthorized { .. } => ApiErrorKind::Unauthorized,
            Self::Validation { .. } => ApiErrorKind::Validation,
            Self::NotFound { .. } => ApiErrorKind::NotFound,
            Self::Server { .. } => ApiErrorKind::Server,
            Self::Network { .. } => ApiErrorKind::Network,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. }
            | Self::Validation { status, .. }
            | Self::Server { status, .. } => *status,
            Self::NotFound { .. } => Some(404),
            Self::Network { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized { message, .. }
            | Self::Validation { message, .. }
            | Self::NotFound { message }
            | Self::Server { message, .. }
            | Self::Network { message } => message,
        }
    }

    /// True when the caller should send the user back to a login view.
    pub fn requires_login(&self) -> bool {
        self.kind() == ApiErrorKind::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ApiErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        assert_eq!(ApiErrorKind::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn missing_token_requires_login() {
        let err = ApiError::missing_token();
        assert_eq!(err.kind(), ApiErrorKind::Unauthorized);
        assert!(err.requires_login());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn server_error_does_not_require_login() {
        let err = ApiError::Server {
            status: Some(503),
            message: "Server error (503).".to_string(),
        };
        assert!(!err.requires_login());
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "Server error (503).");
    }
}
