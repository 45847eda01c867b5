//! Maps engine errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use air_core::AirError;

/// Error returned by every handler. Renders as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Engine(AirError),
    /// The request body could not be read as the expected JSON.
    BadBody(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadBody(_) => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                AirError::NotFound { .. } => StatusCode::NOT_FOUND,
                AirError::Validation { .. } | AirError::Serialization(_) => {
                    StatusCode::BAD_REQUEST
                }
                AirError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadBody(_) => "bad_request",
            Self::Engine(e) => match e {
                AirError::NotFound { .. } => "not_found",
                AirError::Validation { .. } | AirError::Serialization(_) => "validation_error",
                AirError::UpstreamUnavailable { .. } => "upstream_unavailable",
                e if e.is_misconfiguration() => "misconfiguration",
                _ => "internal_error",
            },
        }
    }
}

impl From<AirError> for ApiError {
    fn from(e: AirError) -> Self {
        Self::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Engine(e) => e.to_string(),
            Self::BadBody(text) => text.clone(),
        };
        if status.is_server_error() {
            error!(code = self.code(), error = %message, "request failed");
        } else {
            warn!(code = self.code(), status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message, "code": self.code() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AirError::not_found("policy", "p"), StatusCode::NOT_FOUND, "not_found"),
            (AirError::validation("id", "empty"), StatusCode::BAD_REQUEST, "validation_error"),
            (AirError::UnknownTier("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "misconfiguration"),
            (AirError::UnknownOperator("~".into()), StatusCode::INTERNAL_SERVER_ERROR, "misconfiguration"),
            (AirError::upstream("store", "down"), StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            (AirError::Config("bad".into()), StatusCode::INTERNAL_SERVER_ERROR, "misconfiguration"),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
        assert_eq!(ApiError::BadBody("eof".into()).status(), StatusCode::BAD_REQUEST);
    }
}
