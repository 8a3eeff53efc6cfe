//! Payment and refund records
//!
//! Rows here are written only by the webhook reconciler; nothing in the
//! admin-facing surface inserts payments directly. Idempotency under
//! at-least-once webhook delivery comes from unique constraints on the
//! processor's own identifiers.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Pending,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

/// Confirmed payment against an invoice
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    /// Processor event that created this row; the replay-dedup key.
    pub stripe_event_id: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Refund against a payment, denormalized onto its invoice
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub stripe_refund_id: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
}

/// Fields for recording a confirmed payment
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub stripe_event_id: String,
}

/// Store for payment and refund rows
pub struct PaymentStore {
    pool: PgPool,
}

impl PaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a confirmed payment, idempotently.
    ///
    /// Returns None when the payment-intent id (or event id) was already
    /// recorded - a webhook replay - so callers skip the downstream side
    /// effects instead of duplicating them.
    pub async fn record_succeeded(&self, new: NewPayment) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> = sqlx::query_as(
            r#"
            INSERT INTO payments (
                id, invoice_id, amount_cents, currency, status,
                stripe_payment_intent_id, stripe_charge_id, stripe_event_id, paid_at
            )
            VALUES ($1, $2, $3, $4, 'succeeded', $5, $6, $7, NOW())
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.invoice_id)
        .bind(new.amount_cents)
        .bind(&new.currency)
        .bind(new.stripe_payment_intent_id.as_ref())
        .bind(new.stripe_charge_id.as_ref())
        .bind(&new.stripe_event_id)
        .fetch_optional(&self.pool)
        .await?;

        if payment.is_none() {
            tracing::info!(
                invoice_id = %new.invoice_id,
                event_id = %new.stripe_event_id,
                "Duplicate payment event, no row created"
            );
        }

        Ok(payment)
    }

    pub async fn find_by_charge_id(&self, charge_id: &str) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> =
            sqlx::query_as("SELECT * FROM payments WHERE stripe_charge_id = $1")
                .bind(charge_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payment)
    }

    pub async fn find_by_payment_intent_id(
        &self,
        payment_intent_id: &str,
    ) -> BillingResult<Option<Payment>> {
        let payment: Option<Payment> =
            sqlx::query_as("SELECT * FROM payments WHERE stripe_payment_intent_id = $1")
                .bind(payment_intent_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payment)
    }

    pub async fn get(&self, id: Uuid) -> BillingResult<Payment> {
        let payment: Option<Payment> = sqlx::query_as("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        payment.ok_or_else(|| BillingError::PaymentNotFound(id.to_string()))
    }

    /// Mark a payment refunded or partially refunded.
    pub async fn set_refund_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE payments SET status = $2 WHERE id = $1")
            .bind(payment_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a refund row, idempotently keyed on the processor refund id.
    pub async fn record_refund(
        &self,
        payment_id: Uuid,
        invoice_id: Uuid,
        amount_cents: i64,
        stripe_refund_id: Option<&str>,
    ) -> BillingResult<Option<Refund>> {
        let refund: Option<Refund> = sqlx::query_as(
            r#"
            INSERT INTO refunds (id, payment_id, invoice_id, amount_cents, stripe_refund_id, status)
            VALUES ($1, $2, $3, $4, $5, 'succeeded')
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment_id)
        .bind(invoice_id)
        .bind(amount_cents)
        .bind(stripe_refund_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(refund)
    }
}
