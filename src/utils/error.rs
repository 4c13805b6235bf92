//! Error types and handling
//!
//! Application-level error wrapping every subsystem error, plus the
//! serializable form handed to UI consumers.

use crate::capture::CaptureError;
use crate::compose::ComposerError;
use crate::config::ConfigError;
use crate::recorder::{EncoderError, SessionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Composition error: {0}")]
    Composer(#[from] ComposerError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Error response for UI consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Capture(CaptureError::PermissionDenied(_))
            | AppError::Session(SessionError::PermissionDenied(_)) => "PERMISSION_DENIED",
            AppError::Capture(CaptureError::SourceUnavailable(_))
            | AppError::Session(SessionError::Capture(CaptureError::SourceUnavailable(_))) => {
                "SOURCE_UNAVAILABLE"
            }
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Composer(_) | AppError::Session(SessionError::Composer(_)) => "COMPOSER_ERROR",
            AppError::Encoder(_) | AppError::Session(SessionError::Encoder(_)) => "ENCODER_ERROR",
            AppError::Session(SessionError::InvalidTransition { .. }) => "INVALID_STATE",
            AppError::Session(_) => "SESSION_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{SessionAction, SessionState};

    #[test]
    fn test_codes_follow_root_cause() {
        let nested: AppError = SessionError::Capture(CaptureError::SourceUnavailable("window:3".into())).into();
        let response = ErrorResponse::from(nested);
        assert_eq!(response.code, "SOURCE_UNAVAILABLE");
        assert!(response.message.contains("window:3"));

        let encoder: AppError = SessionError::from(EncoderError::NotStarted).into();
        assert_eq!(ErrorResponse::from(encoder).code, "ENCODER_ERROR");
    }

    #[test]
    fn test_invalid_transition_code() {
        let err: AppError = SessionError::InvalidTransition {
            from: SessionState::Idle,
            action: SessionAction::StopRecording,
        }
        .into();
        assert_eq!(ErrorResponse::from(err).code, "INVALID_STATE");
    }

    #[test]
    fn test_response_serializes() {
        let response = ErrorResponse::from(AppError::Composer(ComposerError::Disposed));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "COMPOSER_ERROR");
    }
}
