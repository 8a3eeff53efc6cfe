//! API error types and HTTP status mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use billtrack_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Database(e.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Billing(e) => billing_status(e),
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients; internals are logged, not leaked.
    fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) | ApiError::Internal(_) => {
                "internal server error".to_string()
            }
            ApiError::Billing(e) => match e {
                BillingError::Stripe(_) | BillingError::Database(_) | BillingError::Internal(_) => {
                    "internal server error".to_string()
                }
                other => other.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn billing_status(e: &BillingError) -> StatusCode {
    match e {
        BillingError::InvoiceNotFound(_)
        | BillingError::PaymentNotFound(_)
        | BillingError::SubscriptionNotFound(_)
        | BillingError::ClientNotFound(_) => StatusCode::NOT_FOUND,
        BillingError::Validation(_)
        | BillingError::InvalidStatusTransition { .. }
        | BillingError::CheckoutSessionCreationFailed(_)
        | BillingError::DuplicateInvoiceNumber(_)
        | BillingError::WebhookEventNotSupported(_)
        | BillingError::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
        BillingError::Stripe(_)
        | BillingError::Database(_)
        | BillingError::EmailFailed(_)
        | BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (
            status,
            Json(json!({ "success": false, "error": self.public_message() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Billing(BillingError::InvalidWebhookSignature).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Billing(BillingError::InvoiceNotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Database("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let e = ApiError::Database("password=hunter2 connection refused".into());
        assert_eq!(e.public_message(), "internal server error");
    }
}
