//! Subscription management
//!
//! Creates recurring billing on the processor from a recurring invoice and
//! keeps the local subscription projection in sync with processor events.
//! Each successful billing cycle synthesizes a brand-new paid invoice (see
//! the reconciler), so the local subscription row carries no balance itself.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CreateCustomer, CreatePrice, CreatePriceProductData, CreatePriceRecurring,
    CreatePriceRecurringInterval, CreateSubscription, CreateSubscriptionItems, Currency, Customer,
    Price, Subscription as StripeSubscription,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::invoices::{InvoiceStore, RecurringInterval};

/// Local subscription status, a three-state projection of the processor's
/// richer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

/// Map the processor's subscription state onto the local three states.
///
/// Scheduled-for-cancellation counts as canceled; unpaid counts as past_due.
pub fn map_subscription_status(
    status: stripe::SubscriptionStatus,
    cancel_at_period_end: bool,
) -> SubscriptionStatus {
    if cancel_at_period_end {
        return SubscriptionStatus::Canceled;
    }
    match status {
        stripe::SubscriptionStatus::Canceled | stripe::SubscriptionStatus::IncompleteExpired => {
            SubscriptionStatus::Canceled
        }
        stripe::SubscriptionStatus::PastDue | stripe::SubscriptionStatus::Unpaid => {
            SubscriptionStatus::PastDue
        }
        _ => SubscriptionStatus::Active,
    }
}

/// Stored subscription row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub stripe_subscription_id: String,
    pub stripe_price_id: String,
    pub status: SubscriptionStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub interval: RecurringInterval,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub canceled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Result of the create-subscription function
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionCreated {
    pub subscription_id: String,
    pub price_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub subscription_record: Subscription,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: Uuid,
    name: String,
    email: String,
    stripe_customer_id: Option<String>,
}

/// Subscription lifecycle service
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Turn an invoice into processor-side recurring billing.
    ///
    /// Creates (customer if needed +) price + subscription on the processor
    /// and a local subscription row. The invoice's total becomes the
    /// per-cycle amount.
    pub async fn create_from_invoice(
        &self,
        invoice_id: Uuid,
        interval: RecurringInterval,
    ) -> BillingResult<SubscriptionCreated> {
        let store = InvoiceStore::new(self.pool.clone());
        let details = store.get(invoice_id).await?;
        let invoice = &details.invoice;

        if invoice.total_cents <= 0 {
            return Err(BillingError::Validation(
                "cannot create a subscription from a zero-total invoice".to_string(),
            ));
        }

        let client = self.get_client(invoice.client_id).await?;
        let customer_id = self.ensure_customer(&client).await?;

        let currency = invoice
            .currency
            .to_lowercase()
            .parse::<Currency>()
            .unwrap_or(Currency::USD);

        let mut price_params = CreatePrice::new(currency);
        price_params.unit_amount = Some(invoice.total_cents);
        price_params.recurring = Some(CreatePriceRecurring {
            interval: match interval {
                RecurringInterval::Month => CreatePriceRecurringInterval::Month,
                RecurringInterval::Year => CreatePriceRecurringInterval::Year,
            },
            ..Default::default()
        });
        price_params.product_data = Some(CreatePriceProductData {
            name: invoice
                .title
                .clone()
                .unwrap_or_else(|| format!("Recurring billing for {}", client.name)),
            ..Default::default()
        });

        let price = Price::create(self.stripe.inner(), price_params).await?;

        let mut metadata = HashMap::new();
        metadata.insert("client_id".to_string(), client.id.to_string());
        metadata.insert("source_invoice_id".to_string(), invoice_id.to_string());
        if let Some(project_id) = invoice.project_id {
            metadata.insert("project_id".to_string(), project_id.to_string());
        }

        let customer: stripe::CustomerId = customer_id.parse().map_err(|_| {
            BillingError::Internal(format!("invalid stripe customer id: {customer_id}"))
        })?;
        let mut sub_params = CreateSubscription::new(customer);
        sub_params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price.id.to_string()),
            ..Default::default()
        }]);
        sub_params.metadata = Some(metadata);

        let stripe_sub = StripeSubscription::create(self.stripe.inner(), sub_params).await?;

        let status = map_subscription_status(stripe_sub.status, stripe_sub.cancel_at_period_end);
        let period_start =
            OffsetDateTime::from_unix_timestamp(stripe_sub.current_period_start).ok();
        let period_end = OffsetDateTime::from_unix_timestamp(stripe_sub.current_period_end).ok();

        let record: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                id, client_id, project_id, stripe_subscription_id, stripe_price_id,
                status, amount_cents, currency, interval,
                current_period_start, current_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(client.id)
        .bind(invoice.project_id)
        .bind(stripe_sub.id.as_str())
        .bind(price.id.as_str())
        .bind(status)
        .bind(invoice.total_cents)
        .bind(&invoice.currency)
        .bind(interval)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            client_id = %client.id,
            invoice_id = %invoice_id,
            stripe_subscription_id = %stripe_sub.id,
            amount_cents = invoice.total_cents,
            interval = interval.as_str(),
            "Subscription created"
        );

        Ok(SubscriptionCreated {
            subscription_id: stripe_sub.id.to_string(),
            price_id: price.id.to_string(),
            status,
            current_period_start: period_start,
            current_period_end: period_end,
            subscription_record: record,
        })
    }

    /// Upsert the local projection from a processor subscription object.
    ///
    /// Called by the reconciler on subscription created/updated events. A
    /// subscription with no local row is skipped, not an error, so replayed
    /// events for foreign subscriptions stay acknowledged.
    pub async fn sync_from_processor(
        &self,
        sub: &stripe::Subscription,
    ) -> BillingResult<Option<Subscription>> {
        let status = map_subscription_status(sub.status, sub.cancel_at_period_end);
        let period_start = OffsetDateTime::from_unix_timestamp(sub.current_period_start).ok();
        let period_end = OffsetDateTime::from_unix_timestamp(sub.current_period_end).ok();
        let canceled_at = sub
            .canceled_at
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = $2,
                current_period_start = $3,
                current_period_end = $4,
                canceled_at = $5,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(sub.id.as_str())
        .bind(status)
        .bind(period_start)
        .bind(period_end)
        .bind(canceled_at)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() {
            tracing::warn!(
                stripe_subscription_id = %sub.id,
                "Subscription event for unknown local subscription, skipping"
            );
        }

        Ok(updated)
    }

    /// Terminal cancellation from a subscription-deleted event.
    pub async fn mark_canceled(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let updated: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', canceled_at = NOW(), updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn find_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let sub: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE stripe_subscription_id = $1")
                .bind(stripe_subscription_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(sub)
    }

    async fn get_client(&self, client_id: Uuid) -> BillingResult<ClientRow> {
        let client: Option<ClientRow> = sqlx::query_as(
            "SELECT id, name, email, stripe_customer_id FROM clients WHERE id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        client.ok_or_else(|| BillingError::ClientNotFound(client_id.to_string()))
    }

    /// Return the client's processor customer id, creating the customer on
    /// first use.
    async fn ensure_customer(&self, client: &ClientRow) -> BillingResult<String> {
        if let Some(id) = &client.stripe_customer_id {
            return Ok(id.clone());
        }

        let mut params = CreateCustomer::new();
        params.email = Some(&client.email);
        params.name = Some(&client.name);
        let mut metadata = HashMap::new();
        metadata.insert("client_id".to_string(), client.id.to_string());
        params.metadata = Some(metadata);

        let customer = Customer::create(self.stripe.inner(), params).await?;

        sqlx::query("UPDATE clients SET stripe_customer_id = $2 WHERE id = $1")
            .bind(client.id)
            .bind(customer.id.as_str())
            .execute(&self.pool)
            .await?;

        tracing::info!(
            client_id = %client.id,
            stripe_customer_id = %customer.id,
            "Stripe customer created for client"
        );

        Ok(customer.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_status_active_family() {
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Active, false),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Trialing, false),
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn test_map_status_past_due_family() {
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::PastDue, false),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Unpaid, false),
            SubscriptionStatus::PastDue
        );
    }

    #[test]
    fn test_map_status_canceled_family() {
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Canceled, false),
            SubscriptionStatus::Canceled
        );
        // scheduled-for-cancellation maps to canceled even while active
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Active, true),
            SubscriptionStatus::Canceled
        );
    }
}
