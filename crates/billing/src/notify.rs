//! Notification dispatcher
//!
//! Writes in-app notification rows and, for the emailing subset of types,
//! triggers the matching transactional email. The database row is the
//! authoritative record; a failed email send is logged and never rolls the
//! row back.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    InvoiceSent,
    PaymentReceived,
    RefundIssued,
    RecurringPayment,
    SubscriptionCanceled,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::InvoiceSent => "invoice_sent",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::RefundIssued => "refund_issued",
            NotificationType::RecurringPayment => "recurring_payment",
            NotificationType::SubscriptionCanceled => "subscription_canceled",
        }
    }
}

/// Email side effect carried on a notification intent.
///
/// Only some notification types email; the variant carries the template
/// arguments the plain notification row does not need.
#[derive(Debug, Clone)]
pub enum EmailSideEffect {
    Invoice {
        invoice_number: String,
        total_cents: i64,
        currency: String,
        pay_url: Option<String>,
    },
    PaymentReceived {
        invoice_number: String,
        amount_cents: i64,
        currency: String,
        remaining_cents: i64,
    },
    RefundIssued {
        invoice_number: String,
        amount_cents: i64,
        currency: String,
    },
    RecurringReceipt {
        invoice_number: String,
        amount_cents: i64,
        currency: String,
    },
}

/// A fully-formed notification to dispatch
#[derive(Debug, Clone)]
pub struct NotificationIntent {
    pub client_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub email: Option<EmailSideEffect>,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientContact {
    name: String,
    email: String,
}

/// Writes notification rows and triggers best-effort email
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    email: BillingEmailService,
}

impl NotificationService {
    pub fn new(pool: PgPool, email: BillingEmailService) -> Self {
        Self { pool, email }
    }

    /// Write the notification row, then attempt the email side effect.
    ///
    /// Returns the notification id. Email failures are logged here and do
    /// not surface to the caller.
    pub async fn dispatch(&self, intent: NotificationIntent) -> BillingResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, client_id, notification_type, title, message, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(intent.client_id)
        .bind(intent.notification_type.as_str())
        .bind(&intent.title)
        .bind(&intent.message)
        .bind(&intent.metadata)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            notification_id = %id,
            client_id = %intent.client_id,
            notification_type = intent.notification_type.as_str(),
            "Notification recorded"
        );

        if let Some(effect) = intent.email {
            if let Err(e) = self.send_email(intent.client_id, effect).await {
                tracing::error!(
                    client_id = %intent.client_id,
                    error = %e,
                    "Notification email failed (in-app row already written)"
                );
            }
        }

        Ok(id)
    }

    async fn send_email(&self, client_id: Uuid, effect: EmailSideEffect) -> BillingResult<()> {
        let contact: ClientContact =
            sqlx::query_as("SELECT name, email FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BillingError::ClientNotFound(client_id.to_string()))?;

        match effect {
            EmailSideEffect::Invoice {
                invoice_number,
                total_cents,
                currency,
                pay_url,
            } => {
                self.email
                    .send_invoice(
                        &contact.email,
                        &contact.name,
                        &invoice_number,
                        total_cents,
                        &currency,
                        pay_url.as_deref(),
                    )
                    .await
            }
            EmailSideEffect::PaymentReceived {
                invoice_number,
                amount_cents,
                currency,
                remaining_cents,
            } => {
                self.email
                    .send_payment_received(
                        &contact.email,
                        &contact.name,
                        &invoice_number,
                        amount_cents,
                        &currency,
                        remaining_cents,
                    )
                    .await
            }
            EmailSideEffect::RefundIssued {
                invoice_number,
                amount_cents,
                currency,
            } => {
                self.email
                    .send_refund_issued(
                        &contact.email,
                        &contact.name,
                        &invoice_number,
                        amount_cents,
                        &currency,
                    )
                    .await
            }
            EmailSideEffect::RecurringReceipt {
                invoice_number,
                amount_cents,
                currency,
            } => {
                self.email
                    .send_recurring_receipt(
                        &contact.email,
                        &contact.name,
                        &invoice_number,
                        amount_cents,
                        &currency,
                    )
                    .await
            }
        }
    }
}
