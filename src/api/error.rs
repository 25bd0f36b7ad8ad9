use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::AuthError;

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),

    ValidationError(String),

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "{err}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => err.status(),
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::ValidationError(_) => "VALIDATION_FAILED",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let error_message = match &self {
            Self::Auth(err) if err.is_internal() => {
                tracing::error!(code, error = %err, "Auth service failure");
                match err {
                    AuthError::EmailSendFailed(_) => "Failed to send email".to_string(),
                    AuthError::Database(_) => "A database error occurred".to_string(),
                    _ => "An internal error occurred".to_string(),
                }
            }
            Self::Auth(err) => err.to_string(),
            Self::ValidationError(msg) => msg.clone(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
        };

        let body = ApiResponse::<()>::error(error_message, code);
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => Self::ValidationError(msg),
            other => Self::Auth(other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn auth_errors_keep_code_and_status() {
        let (status, json) = body_json(ApiError::from(AuthError::TokenRefreshFailed)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "TOKEN_REFRESH_FAILED");
        assert_eq!(json["error"], "Token refresh failed");
    }

    #[tokio::test]
    async fn validation_maps_to_bad_request() {
        let (status, json) =
            body_json(ApiError::from(AuthError::Validation("bad email".into()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION_FAILED");
        assert_eq!(json["error"], "bad email");
    }

    #[tokio::test]
    async fn infrastructure_details_are_hidden() {
        let (status, json) =
            body_json(ApiError::from(AuthError::Database("disk I/O error at /var".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "A database error occurred");
        assert!(!json.to_string().contains("/var"));
    }
}
