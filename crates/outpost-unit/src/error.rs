use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Synchronization state mismatch: {0}")]
    OutOfSync(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl From<outpost_core::Error> for AppError {
    fn from(error: outpost_core::Error) -> Self {
        use outpost_core::Error;
        match error {
            // the caller must re-query and resynchronize, not retry
            Error::Protocol(message) => Self::OutOfSync(message),
            Error::UnknownDataset(name) => Self::NotFound(format!("dataset '{name}'")),
            Error::NotFound(message) => Self::NotFound(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfSync(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_map_to_conflict_status() {
        let app: AppError = outpost_core::Error::Protocol("stale fromVersion".to_string()).into();
        assert!(matches!(app, AppError::OutOfSync(_)));
    }

    #[test]
    fn unknown_dataset_maps_to_not_found() {
        let app: AppError = outpost_core::Error::UnknownDataset("roads".to_string()).into();
        assert!(matches!(app, AppError::NotFound(_)));
    }
}
