//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::CommerceError;
use crate::services::webhook::WebhookError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Order processing failed.
    #[error(transparent)]
    Commerce(#[from] CommerceError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Payment callback failed signature verification.
    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Commerce(err) => match err {
                CommerceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CommerceError::Unauthenticated => StatusCode::UNAUTHORIZED,
                CommerceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                CommerceError::OutOfStock { .. } | CommerceError::StockConflict(_) => {
                    StatusCode::CONFLICT
                }
                CommerceError::NotFound(_) => StatusCode::NOT_FOUND,
                CommerceError::InvalidStatus(_) => StatusCode::BAD_REQUEST,
                CommerceError::OrderCreationFailed(_)
                | CommerceError::Repository(_)
                | CommerceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Webhook(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Commerce(err) => match err {
                CommerceError::Validation(_) => "validation_failed",
                CommerceError::Unauthenticated => "unauthenticated",
                CommerceError::RateLimited { .. } => "rate_limited",
                CommerceError::OutOfStock { .. } => "out_of_stock",
                CommerceError::StockConflict(_) => "stock_conflict",
                CommerceError::OrderCreationFailed(_) => "order_creation_failed",
                CommerceError::NotFound(_) => "not_found",
                CommerceError::InvalidStatus(_) => "invalid_status",
                CommerceError::Repository(_) | CommerceError::Internal(_) => "internal_error",
            },
            Self::Database(_) | Self::Internal(_) => "internal_error",
            Self::Webhook(_) => "invalid_signature",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthenticated",
            Self::BadRequest(_) => "bad_request",
        }
    }

    fn body(&self) -> ErrorBody {
        let (message, details) = match self {
            // Don't expose internal error details to clients
            Self::Commerce(
                CommerceError::Repository(_)
                | CommerceError::Internal(_)
                | CommerceError::OrderCreationFailed(_),
            )
            | Self::Database(_)
            | Self::Internal(_) => ("Internal server error".to_string(), None),
            Self::Commerce(CommerceError::OutOfStock {
                product_id,
                restock_eta,
                message,
            }) => (
                message.clone(),
                Some(json!({ "product_id": product_id, "restock_eta": restock_eta })),
            ),
            Self::Commerce(CommerceError::StockConflict(checks)) => (
                "Some items in your cart are no longer available in the requested quantity"
                    .to_string(),
                Some(json!({ "items": checks })),
            ),
            Self::Commerce(CommerceError::Validation(msg) | CommerceError::InvalidStatus(msg)) => {
                (msg.clone(), None)
            }
            Self::Commerce(CommerceError::RateLimited { retry_after_secs }) => (
                "Too many requests, please try again later".to_string(),
                Some(json!({ "retry_after_secs": retry_after_secs })),
            ),
            Self::Webhook(_) => ("Invalid signature".to_string(), None),
            Self::NotFound(msg) | Self::Unauthorized(msg) | Self::BadRequest(msg) => {
                (msg.clone(), None)
            }
            Self::Commerce(err) => (err.to_string(), None),
        };
        ErrorBody {
            error: self.code(),
            message,
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let retry_after = match &self {
            Self::Commerce(CommerceError::RateLimited { retry_after_secs }) => {
                Some(HeaderValue::from(*retry_after_secs))
            }
            _ => None,
        };

        let mut response = (status, Json(self.body())).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Called when an authenticated user is extracted so errors are associated
/// with them.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for an order-processing step.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb
            .data
            .insert((*key).to_string(), Value::String((*value).to_string()));
    }

    sentry::add_breadcrumb(breadcrumb);
}
