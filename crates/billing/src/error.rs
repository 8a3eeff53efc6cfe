//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Generated invoice number collided with an existing one (unique constraint)
    #[error("invoice number already exists: {0}")]
    DuplicateInvoiceNumber(String),

    #[error("invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Client code tried to move an invoice into a reconciler-only status,
    /// or out of a terminal status.
    #[error("invalid invoice status transition: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// Covers fully-paid/cancelled invoices, invalid partial amounts, and
    /// processor API failures during session creation.
    #[error("checkout session creation failed: {0}")]
    CheckoutSessionCreationFailed(String),

    /// The only failure that refuses webhook processing outright.
    #[error("webhook signature verification failed")]
    InvalidWebhookSignature,

    #[error("webhook event payload did not match its type: {0}")]
    WebhookEventNotSupported(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("Stripe API error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("database error: {0}")]
    Database(String),

    #[error("email delivery failed: {0}")]
    EmailFailed(String),

    #[error("internal billing error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl BillingError {
    /// Whether this error came from a range/shape check rejected before any
    /// external call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BillingError::Validation(_) | BillingError::InvalidStatusTransition { .. }
        )
    }
}
