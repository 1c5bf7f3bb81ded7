//! Unified error handling for the CRM server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use parts_crm_core::{MoneyError, TransitionRejected};

use crate::db::RepositoryError;
use crate::identity::IdentityError;
use crate::payments::PaymentGatewayError;

/// Application-level error type.
///
/// Records in another tenant are reported as [`AppError::NotFound`], never
/// [`AppError::Forbidden`], so callers cannot learn that they exist.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// The payment gateway could not be reached or answered garbage.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] PaymentGatewayError),

    /// Resource not found (or owned by another tenant).
    #[error("Not found: {0}")]
    NotFound(String),

    /// No valid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Principal lacks the role for this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Input or state rejected by a business rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Lost a race against a concurrent write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TransitionRejected> for AppError {
    fn from(err: TransitionRejected) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Store(e) => Self::Database(e),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Shorthand for a not-found error on a typed id.
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(self, Self::Database(_) | Self::Internal(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "CRM request error"
            );
        }

        let status = self.status();

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Gateway(_) => "Payment gateway unavailable, try again".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Set the Sentry user context from the authenticated principal.
pub fn set_sentry_user(user_id: i32, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}
