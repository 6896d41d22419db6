//! API error taxonomy
//!
//! Client input errors map to 400, missing entities to 404 and everything
//! else to 500. Internal errors are logged before the response is built.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// 500 for a platform without OAuth credentials
    #[error("{0}")]
    NotConfigured(String),

    /// 500 that also exposes the underlying error as `details`
    #[error("{context}: {cause}")]
    Detailed {
        context: &'static str,
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotConfigured(_) | ApiError::Detailed { .. } | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::NotConfigured(msg) => {
                json!({ "error": msg })
            }
            ApiError::Detailed { context, cause } => {
                error!("{}: {:#}", context, cause);
                json!({ "error": INTERNAL_ERROR_MESSAGE, "details": cause.to_string() })
            }
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                json!({ "error": INTERNAL_ERROR_MESSAGE })
            }
        };

        (status, Json(body)).into_response()
    }
}
