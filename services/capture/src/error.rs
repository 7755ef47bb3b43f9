use thiserror::Error;

/// Errors raised by the client-side recording pipeline
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Transcoder is still loading")]
    NotReady,

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Local cache error: {0}")]
    Cache(String),

    #[error("Transcoder failed: {0}")]
    Transcoder(String),

    #[error("Request to storage service failed: {0}")]
    Transport(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for CaptureError {
    fn from(error: reqwest::Error) -> Self {
        CaptureError::Transport(error.to_string())
    }
}

impl From<config::ConfigError> for CaptureError {
    fn from(error: config::ConfigError) -> Self {
        CaptureError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
