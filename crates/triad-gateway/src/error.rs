//! HTTP error responses: `{error, message, statusCode}`.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use triad_agent::AgentError;

const SANITIZED: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad client input. The message is shown verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    NotFound(String),

    /// A pipeline failure whose message is safe to show.
    #[error("{0}")]
    Pipeline(String),

    /// Anything else. Logged in full, reported as a generic message.
    #[error("{0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(_) | ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Validation error",
            ApiError::PayloadTooLarge(_) => "Payload Too Large",
            ApiError::NotFound(_) => "Not Found",
            ApiError::Pipeline(_) | ApiError::Unexpected(_) => SANITIZED,
        }
    }

    /// Label for the `errors_total` counter.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::NotFound(_) => "not_found",
            ApiError::Pipeline(_) => "pipeline",
            ApiError::Unexpected(_) => "internal",
        }
    }

    /// The message sent to the client.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Unexpected(_) => SANITIZED.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Model { .. } | AgentError::Tool(_) | AgentError::MaxIterations { .. } => {
                ApiError::Pipeline(err.to_string())
            }
            AgentError::SessionNotFound(_) | AgentError::Session(_) | AgentError::Cancelled => {
                ApiError::Unexpected(err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::Validation(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
            #[cfg(feature = "metrics")]
            crate::metrics::record_error(self.kind());
        }
        let body = json!({
            "error": self.label(),
            "message": self.public_message(),
            "statusCode": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_errors_keep_their_message() {
        let err: ApiError = AgentError::Model {
            code: "500".into(),
            message: "deployment not found".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "deployment not found");
    }

    #[test]
    fn test_internal_failures_are_sanitised() {
        let err: ApiError = AgentError::Session("lock poisoned at store.rs:42".into()).into();
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_server_errors_are_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            let _ = ApiError::Pipeline("deployment not found".into()).into_response();
            let _ = ApiError::Validation("Message cannot be empty".into()).into_response();
        });
        let rendered = handle.render();
        assert!(rendered.contains(r#"errors_total{kind="pipeline"} 1"#));
        assert!(!rendered.contains(r#"kind="validation""#));
    }

    #[tokio::test]
    async fn test_response_shape() {
        let response = ApiError::Validation("Message cannot be empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            json!({"error": "Validation error", "message": "Message cannot be empty", "statusCode": 400})
        );
    }
}
