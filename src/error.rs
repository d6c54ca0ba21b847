//! Error taxonomy shared by every session component.

use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by capture, transcription, dialogue and playback.
///
/// The orchestrator absorbs all of these and degrades instead of failing
/// the interview; they only escape through the lower-level APIs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Microphone missing or access refused.
    #[error("Microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Missing credentials, unreachable service or malformed response.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The streaming socket failed mid-session.
    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transcription session already active")]
    AlreadyActive,

    #[error("Not supported in this environment: {0}")]
    Unsupported(String),

    #[error("Playback error: {0}")]
    Playback(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout(err.to_string())
        } else {
            SessionError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::StreamError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::BackendUnavailable(format!("Malformed payload: {}", err))
    }
}

impl From<cpal::DevicesError> for SessionError {
    fn from(err: cpal::DevicesError) -> Self {
        SessionError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for SessionError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        SessionError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for SessionError {
    fn from(err: cpal::BuildStreamError) -> Self {
        SessionError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for SessionError {
    fn from(err: cpal::PlayStreamError) -> Self {
        SessionError::PermissionDenied(err.to_string())
    }
}
