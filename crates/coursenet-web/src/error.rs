//! HTTP error mapping
//!
//! Every error response has the body `{"error": <message>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coursenet_core::CoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid request parameters
    #[error("{0}")]
    BadRequest(String),

    /// Unknown route, invalid route segment, or cache miss
    #[error("Not found")]
    NotFound,

    /// A delegated worker reported failure; its stderr is the message
    #[error("{0}")]
    Computation(String),

    #[error("Internal server error")]
    Internal(#[source] CoreError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Computation(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Computation { stderr, .. } => ApiError::Computation(stderr),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(source) = &self {
            error!(
                error = %source,
                suggestion = source.suggestion().as_deref().unwrap_or(""),
                "Request failed"
            );
        }

        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Computation("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_core_errors_split_into_computation_and_internal() {
        let computation: ApiError = CoreError::Computation {
            program: "search/query.py".to_string(),
            stderr: "ValueError".to_string(),
        }
        .into();
        assert!(matches!(&computation, ApiError::Computation(msg) if msg == "ValueError"));
        assert_eq!(computation.to_string(), "ValueError");

        let internal: ApiError = CoreError::Timeout {
            operation: "store lookup nav".to_string(),
            timeout: std::time::Duration::from_secs(5),
        }
        .into();
        assert!(matches!(internal, ApiError::Internal(_)));
        assert_eq!(internal.to_string(), "Internal server error");
    }
}
