//! Mapping of [`AppError`] onto HTTP responses
//!
//! Bodies are plain text and carry only client-safe messages; detail goes to
//! the log. Every error response allows any origin so browser players can read
//! the status.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::proxy::relay::ALLOWED_METHODS;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Unauthorized { message } => {
                debug!("Unauthorized request: {}", message);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::Token(e) => {
                debug!("Rejected user token: {}", e);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::NotFound { resource, id } => {
                debug!("{} {} not found", resource, id);
                (StatusCode::NOT_FOUND, format!("{resource} not found"))
            }
            AppError::UpstreamUnavailable { message } => {
                warn!("Upstream unavailable: {}", message);
                (StatusCode::BAD_GATEWAY, String::new())
            }
            AppError::Upstream(e) => {
                warn!("Upstream failure: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }
            AppError::BadGateway { message } => (StatusCode::BAD_GATEWAY, message.clone()),
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::UriTooLong { .. } => (StatusCode::URI_TOO_LONG, "URL too long".to_string()),
            AppError::Forbidden { message } => (StatusCode::FORBIDDEN, message.clone()),
            AppError::MethodNotAllowed { .. } => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
            }
            AppError::Target(rejection) => return rejection.clone().into_app_error().into_response(),
            AppError::Configuration { .. } | AppError::Internal { .. } | AppError::Database(_) => {
                error!("Request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let mut response = if body.is_empty() {
            status.into_response()
        } else {
            (status, body).into_response()
        };

        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        if status == StatusCode::METHOD_NOT_ALLOWED {
            headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        response
    }
}
