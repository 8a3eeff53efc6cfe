//! Activity log
//!
//! Append-only audit trail for billing side effects. Reconciler handlers log
//! here on every state change; failures to log are warned about but never
//! fail the handler.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Who caused an activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Admin,
    Client,
    Stripe,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Admin => "admin",
            ActorType::Client => "client",
            ActorType::Stripe => "stripe",
            ActorType::System => "system",
        }
    }
}

/// Activity entry types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    InvoiceCreated,
    InvoiceSent,
    InvoiceCancelled,
    PaymentReceived,
    PaymentRefunded,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCanceled,
    RecurringInvoiceGenerated,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::InvoiceCreated => "invoice_created",
            ActivityType::InvoiceSent => "invoice_sent",
            ActivityType::InvoiceCancelled => "invoice_cancelled",
            ActivityType::PaymentReceived => "payment_received",
            ActivityType::PaymentRefunded => "payment_refunded",
            ActivityType::SubscriptionCreated => "subscription_created",
            ActivityType::SubscriptionUpdated => "subscription_updated",
            ActivityType::SubscriptionCanceled => "subscription_canceled",
            ActivityType::RecurringInvoiceGenerated => "recurring_invoice_generated",
        }
    }
}

/// Builder for one activity entry
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    activity_type: ActivityType,
    actor_type: ActorType,
    client_id: Option<Uuid>,
    invoice_id: Option<Uuid>,
    stripe_event_id: Option<String>,
    data: serde_json::Value,
}

impl ActivityEntry {
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            actor_type: ActorType::System,
            client_id: None,
            invoice_id: None,
            stripe_event_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn actor(mut self, actor: ActorType) -> Self {
        self.actor_type = actor;
        self
    }

    pub fn client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn invoice(mut self, invoice_id: Uuid) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn stripe_event(mut self, event_id: &str) -> Self {
        self.stripe_event_id = Some(event_id.to_string());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Writes activity entries
#[derive(Clone)]
pub struct ActivityLogger {
    pool: PgPool,
}

impl ActivityLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, entry: ActivityEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (id, activity_type, actor_type, client_id, invoice_id, stripe_event_id, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.activity_type.as_str())
        .bind(entry.actor_type.as_str())
        .bind(entry.client_id)
        .bind(entry.invoice_id)
        .bind(entry.stripe_event_id.as_ref())
        .bind(&entry.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let entry = ActivityEntry::new(ActivityType::PaymentReceived);
        assert_eq!(entry.actor_type, ActorType::System);
        assert!(entry.client_id.is_none());
        assert!(entry.stripe_event_id.is_none());
    }

    #[test]
    fn test_activity_type_strings() {
        assert_eq!(ActivityType::PaymentReceived.as_str(), "payment_received");
        assert_eq!(ActivityType::RecurringInvoiceGenerated.as_str(), "recurring_invoice_generated");
        assert_eq!(ActorType::Stripe.as_str(), "stripe");
    }
}
