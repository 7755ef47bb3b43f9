//! Error taxonomy shared by the upload, delivery and analytics paths.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stage of a multi-step operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Transport,
    Signing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Transport => "transport",
            Stage::Signing => "signing",
        };
        f.write_str(name)
    }
}

/// Errors raised by the blob store adapter
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Storage is not configured: {0}")]
    Configuration(String),

    #[error("Storage transport failed: {0}")]
    Transport(String),

    #[error("Failed to sign access URL: {0}")]
    Signing(String),
}

/// Errors raised by the metadata and analytics stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store is not configured: {0}")]
    Configuration(String),
}

/// Errors surfaced by the HTTP API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage is not configured: {0}")]
    Configuration(String),

    #[error("Storage transport failed: {0}")]
    Transport(String),

    #[error("Failed to sign access URL: {0}")]
    Signing(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Transport(_) => StatusCode::BAD_GATEWAY,
            ApiError::Configuration(_) | ApiError::Signing(_) | ApiError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Configuration(_) => "CONFIG_ERROR",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
            ApiError::Signing(_) => "SIGNING_ERROR",
            ApiError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            ApiError::Configuration(_) => Some(Stage::Config),
            ApiError::Transport(_) => Some(Stage::Transport),
            ApiError::Signing(_) => Some(Stage::Signing),
            _ => None,
        }
    }

    fn into_error_response(self) -> ErrorResponse {
        let code = self.code().to_string();
        let stage = self.stage();
        match self {
            ApiError::Validation(message) | ApiError::NotFound(message) => ErrorResponse {
                error: message,
                code,
                stage,
                details: None,
            },
            ApiError::Store(_) => ErrorResponse {
                error: "Failed to access record store".to_string(),
                code,
                stage,
                details: None,
            },
            other => {
                let error = match stage {
                    Some(stage) => format!("Request failed at {} stage", stage),
                    None => "Request failed".to_string(),
                };
                ErrorResponse {
                    error,
                    code,
                    stage,
                    details: Some(other.to_string()),
                }
            }
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(error: BlobError) -> Self {
        match error {
            BlobError::Configuration(msg) => ApiError::Configuration(msg),
            BlobError::Transport(msg) => ApiError::Transport(msg),
            BlobError::Signing(msg) => ApiError::Signing(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.into_error_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("Video ID is required".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("Video not found".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Transport("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Signing("bad clock".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_blob_errors_are_never_not_found() {
        for err in [
            BlobError::Configuration("bucket is not set".into()),
            BlobError::Transport("timeout".into()),
            BlobError::Signing("bad clock".into()),
        ] {
            assert_ne!(ApiError::from(err).status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn test_stage_is_reported_for_configuration_errors() {
        let err: ApiError = BlobError::Configuration("bucket is not set".into()).into();
        assert_eq!(err.stage(), Some(Stage::Config));
        let body = err.into_error_response();
        assert_eq!(body.code, "CONFIG_ERROR");
        assert_eq!(body.details.as_deref(), Some("Storage is not configured: bucket is not set"));
    }
}
