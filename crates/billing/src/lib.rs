// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Billtrack Billing Module
//!
//! Handles the invoice and payment lifecycle backed by Stripe.
//!
//! ## Features
//!
//! - **Invoices**: Draft creation with integer-cent totals, allow-listed
//!   updates, date-prefixed invoice numbers
//! - **Checkout**: Stripe-hosted sessions for full or partial payment
//! - **Reconciliation**: Idempotent webhook processing is the sole writer
//!   of paid/partially-paid/refunded statuses
//! - **Subscriptions**: Recurring billing where every cycle becomes a
//!   brand-new paid invoice
//! - **Notifications**: In-app rows as the authoritative record with
//!   best-effort email

pub mod checkout;
pub mod client;
pub mod email;
pub mod error;
pub mod events;
pub mod invoices;
pub mod money;
pub mod notify;
pub mod payments;
pub mod render;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Email
pub use email::{BillingEmailService, EmailConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActivityEntry, ActivityLogger, ActivityType, ActorType};

// Invoices
pub use invoices::{
    derive_status, CyclePaymentRefs, Invoice, InvoiceDetails, InvoiceLineItem, InvoiceStatus,
    InvoiceStore, InvoiceUpdate, NewInvoice, NewLineItem, RecurringInterval,
};

// Money
pub use money::{compute_totals, line_total, InvoiceTotals};

// Notifications
pub use notify::{
    EmailSideEffect, NotificationIntent, NotificationService, NotificationType,
};

// Payments
pub use payments::{NewPayment, Payment, PaymentStatus, PaymentStore, Refund};

// Rendering
pub use render::{render_invoice, render_receipt, RenderedDocument};

// Subscriptions
pub use subscriptions::{
    Subscription, SubscriptionCreated, SubscriptionService, SubscriptionStatus,
};

// Webhooks
pub use webhooks::WebhookReconciler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub email: BillingEmailService,
    pub invoices: InvoiceStore,
    pub payments: PaymentStore,
    pub subscriptions: SubscriptionService,
    pub notifications: NotificationService,
    pub activity: ActivityLogger,
    pub webhooks: WebhookReconciler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::with_stripe(StripeClient::from_env()?, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_stripe(StripeClient::new(config), pool)
    }

    fn with_stripe(stripe: StripeClient, pool: PgPool) -> Self {
        let email_service = BillingEmailService::from_env();

        Self {
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            email: email_service.clone(),
            invoices: InvoiceStore::new(pool.clone()),
            payments: PaymentStore::new(pool.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            notifications: NotificationService::new(pool.clone(), email_service.clone()),
            activity: ActivityLogger::new(pool.clone()),
            webhooks: WebhookReconciler::new(stripe, pool, email_service),
        }
    }
}
