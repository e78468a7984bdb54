// API error type and its HTTP mapping

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::metrics::{now_iso, CollectError};

/// Errors surfaced by request handlers and middleware
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error("Invalid container id: {0}")]
    InvalidContainerId(String),

    #[error("Invalid query: {0}")]
    BadQuery(String),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Too many requests, retry in {0}s")]
    RateLimited(u64),

    #[error("Failed to encode response: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub timestamp: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Collect(CollectError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Collect(CollectError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Collect(
                CollectError::Timeout(_) | CollectError::Source(_) | CollectError::Unavailable(_),
            ) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidContainerId(_) | ApiError::BadQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed with {}: {}", status, self);
        }

        let body = ErrorBody {
            error: self.to_string(),
            timestamp: now_iso(),
        };
        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited(retry_after) = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if let ApiError::Unauthorized = &self {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}
