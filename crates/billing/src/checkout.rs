//! Checkout session initiator
//!
//! Opens a Stripe-hosted checkout session for a full or partial invoice
//! payment. Creating a session mutates nothing locally: an abandoned session
//! leaves no trace, and all invoice state changes happen later in the
//! webhook reconciler.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData, CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionPaymentIntentData, Currency, StripeError,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::invoices::{InvoiceStatus, InvoiceStore};

/// Created checkout session handed back to the client UI
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

/// Whether a Stripe failure is worth one more attempt.
fn is_transient(e: &StripeError) -> bool {
    match e {
        StripeError::Stripe(req) => req.http_status >= 500,
        StripeError::ClientError(_) => true,
        _ => false,
    }
}

/// Creates processor-hosted checkout sessions for invoices
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a checkout session for an invoice.
    ///
    /// `amount_cents` of None means the full remaining balance. The partial
    /// amount is revalidated here against the remaining balance; the client
    /// side check alone is not trusted.
    pub async fn create_session(
        &self,
        invoice_id: Uuid,
        amount_cents: Option<i64>,
        success_url: &str,
        cancel_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        let store = InvoiceStore::new(self.pool.clone());
        let details = store.get(invoice_id).await?;
        let invoice = &details.invoice;

        if invoice.status == InvoiceStatus::Cancelled {
            return Err(BillingError::CheckoutSessionCreationFailed(format!(
                "invoice {} is cancelled",
                invoice.invoice_number
            )));
        }

        let remaining = details.remaining_cents;
        if remaining <= 0 {
            return Err(BillingError::CheckoutSessionCreationFailed(format!(
                "invoice {} is already fully paid",
                invoice.invoice_number
            )));
        }

        let amount = amount_cents.unwrap_or(remaining);
        if amount <= 0 || amount > remaining {
            return Err(BillingError::CheckoutSessionCreationFailed(format!(
                "payment amount {} is outside the remaining balance {}",
                amount, remaining
            )));
        }

        let currency = invoice
            .currency
            .to_lowercase()
            .parse::<Currency>()
            .unwrap_or(Currency::USD);

        // invoice_id rides on both the session and its payment intent so the
        // reconciler can link the charge back either way.
        let mut metadata = HashMap::new();
        metadata.insert("invoice_id".to_string(), invoice_id.to_string());

        let description = if amount < remaining {
            format!("Partial payment for invoice {}", invoice.invoice_number)
        } else {
            format!("Invoice {}", invoice.invoice_number)
        };

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Payment);
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.client_reference_id = Some(&invoice.invoice_number);
        params.metadata = Some(metadata.clone());
        params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
            metadata: Some(metadata),
            ..Default::default()
        });
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(amount),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: description,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        // One retry with backoff for transient 5xx from the processor.
        let strategy = ExponentialBackoff::from_millis(250).map(jitter).take(2);
        let session = RetryIf::spawn(
            strategy,
            || CheckoutSession::create(self.stripe.inner(), params.clone()),
            is_transient,
        )
        .await
        .map_err(|e| {
            tracing::error!(
                invoice_id = %invoice_id,
                error = %e,
                "Stripe checkout session creation failed"
            );
            BillingError::CheckoutSessionCreationFailed(e.to_string())
        })?;

        let url = session.url.clone().ok_or_else(|| {
            BillingError::CheckoutSessionCreationFailed(
                "processor returned a session without a redirect URL".to_string(),
            )
        })?;

        tracing::info!(
            invoice_id = %invoice_id,
            session_id = %session.id,
            amount_cents = amount,
            partial = amount < remaining,
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }
}
