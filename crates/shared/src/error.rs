use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes the protocol gateway attaches to failed HTTP calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    LoggedOut,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 422 => Self::Validation,
            429 => Self::RateLimited,
            503 => Self::Unavailable,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the gateway no longer accepts the credentials of this session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.code, ErrorCode::Unauthorized | ErrorCode::LoggedOut)
    }
}

#[derive(Debug, Error)]
#[error("gateway call failed with {status} ({code:?}): {message}")]
pub struct GatewayException {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayException {
    pub fn new(status: u16, body: Option<ApiError>) -> Self {
        match body {
            Some(body) => Self {
                status,
                code: body.code,
                message: body.message,
            },
            None => Self {
                status,
                code: ErrorCode::from_status(status),
                message: "no error body".to_string(),
            },
        }
    }
}

impl From<GatewayException> for ApiError {
    fn from(value: GatewayException) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}
