//! Stripe webhook reconciliation
//!
//! The reconciler is the only writer of paid-family invoice statuses. Every
//! status change flows from a verified, idempotently-claimed event: payment
//! intents and completed checkout sessions record payments, charge refunds
//! record refunds, subscription events sync the local projection, and each
//! recurring billing cycle synthesizes a brand-new paid invoice.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Webhook};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActivityEntry, ActivityLogger, ActivityType, ActorType};
use crate::invoices::{derive_status, CyclePaymentRefs, InvoiceStore, InvoiceStatus};
use crate::notify::{EmailSideEffect, NotificationIntent, NotificationService, NotificationType};
use crate::payments::{NewPayment, PaymentStatus, PaymentStore};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Events stuck in "processing" longer than this are eligible for re-claim.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Maximum age of a signed payload before it is rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Atomic claim for exclusive processing of one event.
///
/// A row is re-claimable when its last attempt errored (the delivery was
/// NACKed, so the processor retries it) or when it sat in 'processing'
/// past the timeout. Successfully processed events never match, so a
/// redelivery of those is a silent ack.
const CLAIM_EVENT_SQL: &str = r#"
    INSERT INTO webhook_events
        (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
    VALUES ($1, $2, $3, 'processing', NOW())
    ON CONFLICT (stripe_event_id) DO UPDATE SET
        processing_result = 'processing',
        processing_started_at = NOW(),
        error_message = CONCAT('Re-claimed at ', NOW()::TEXT)
    WHERE webhook_events.processing_result = 'error'
       OR (webhook_events.processing_result = 'processing'
           AND webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
    RETURNING id
"#;

/// Reconciles verified Stripe events into local billing state
pub struct WebhookReconciler {
    stripe: StripeClient,
    pool: PgPool,
    invoices: InvoiceStore,
    payments: PaymentStore,
    subscriptions: SubscriptionService,
    notifications: NotificationService,
    activity: ActivityLogger,
}

impl WebhookReconciler {
    pub fn new(stripe: StripeClient, pool: PgPool, email: BillingEmailService) -> Self {
        let invoices = InvoiceStore::new(pool.clone());
        let payments = PaymentStore::new(pool.clone());
        let subscriptions = SubscriptionService::new(stripe.clone(), pool.clone());
        let notifications = NotificationService::new(pool.clone(), email);
        let activity = ActivityLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            invoices,
            payments,
            subscriptions,
            notifications,
            activity,
        }
    }

    /// Verify and parse a Stripe webhook payload.
    ///
    /// Tries the library's verification first, then falls back to manual
    /// signature verification, which tolerates Stripe API versions newer
    /// than the library knows how to parse strictly.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Signature header format: t=timestamp,v1=signature[,v0=signature]
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;
        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            BillingError::InvalidWebhookSignature
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            BillingError::InvalidWebhookSignature
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::InvalidWebhookSignature);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{timestamp}.{payload}");

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::InvalidWebhookSignature)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed.as_bytes().ct_eq(v1_signature.as_bytes()).into() {
            let event: Event = serde_json::from_str(payload).map_err(|e| {
                tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
                BillingError::InvalidWebhookSignature
            })?;
            Ok(event)
        } else {
            tracing::error!("Webhook signature mismatch");
            Err(BillingError::InvalidWebhookSignature)
        }
    }

    /// Handle a verified Stripe event exactly once.
    ///
    /// Uses INSERT...ON CONFLICT...RETURNING to atomically claim exclusive
    /// processing rights, so two concurrent deliveries of the same event
    /// cannot both pass an existence check. Failed events and events stuck
    /// in "processing" beyond the timeout are re-claimed on redelivery.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(CLAIM_EVENT_SQL)
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                stripe_event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                stripe_event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, already claimed or processed"
            );
            return Ok(());
        }

        tracing::info!(
            stripe_event_id = %event_id,
            event_type = %event_type_str,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            "UPDATE webhook_events SET processing_result = $1, error_message = $2 WHERE stripe_event_id = $3",
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                stripe_event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to record webhook processing result; event may appear stuck"
            );
        }

        result
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::PaymentIntentSucceeded => self.handle_payment_intent_succeeded(event).await,
            EventType::CheckoutSessionCompleted => self.handle_checkout_completed(event).await,
            EventType::ChargeRefunded => self.handle_charge_refunded(event).await,
            EventType::CustomerSubscriptionCreated => {
                self.handle_subscription_synced(event, ActivityType::SubscriptionCreated)
                    .await
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_synced(event, ActivityType::SubscriptionUpdated)
                    .await
            }
            EventType::CustomerSubscriptionDeleted => self.handle_subscription_deleted(event).await,
            EventType::InvoicePaid => self.handle_recurring_cycle(event).await,
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    "Unhandled webhook event type, acknowledging"
                );
                Ok(())
            }
        }
    }

    /// payment_intent.succeeded: record the payment and reconcile the invoice.
    async fn handle_payment_intent_succeeded(&self, event: &Event) -> BillingResult<()> {
        let EventObject::PaymentIntent(pi) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        let Some(invoice_id) = parse_invoice_id(pi.metadata.get("invoice_id")) else {
            tracing::info!(
                payment_intent_id = %pi.id,
                "Payment intent without invoice metadata, acknowledging"
            );
            return Ok(());
        };

        let charge_id = pi.latest_charge.as_ref().map(|c| c.id().to_string());
        let amount_cents = pi.amount_received;

        self.record_payment(
            invoice_id,
            NewPayment {
                invoice_id,
                amount_cents,
                currency: pi.currency.to_string(),
                stripe_payment_intent_id: Some(pi.id.to_string()),
                stripe_charge_id: charge_id,
                stripe_event_id: event.id.to_string(),
            },
        )
        .await
    }

    /// checkout.session.completed: same reconciliation path, deduplicated
    /// against the payment intent event which usually arrives first.
    async fn handle_checkout_completed(&self, event: &Event) -> BillingResult<()> {
        let EventObject::CheckoutSession(session) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        let invoice_id = session
            .metadata
            .as_ref()
            .and_then(|m| parse_invoice_id(m.get("invoice_id")));
        let Some(invoice_id) = invoice_id else {
            tracing::info!(
                session_id = %session.id,
                "Checkout session without invoice metadata, acknowledging"
            );
            return Ok(());
        };

        let payment_intent_id = session.payment_intent.as_ref().map(|pi| pi.id().to_string());
        if let Some(pi_id) = &payment_intent_id {
            if self.payments.find_by_payment_intent_id(pi_id).await?.is_some() {
                tracing::info!(
                    invoice_id = %invoice_id,
                    payment_intent_id = %pi_id,
                    "Payment already recorded from payment intent event, acknowledging"
                );
                return Ok(());
            }
        }

        let Some(amount_cents) = session.amount_total else {
            tracing::warn!(
                session_id = %session.id,
                "Completed checkout session missing amount_total, acknowledging"
            );
            return Ok(());
        };
        let currency = session
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string());

        self.record_payment(
            invoice_id,
            NewPayment {
                invoice_id,
                amount_cents,
                currency,
                stripe_payment_intent_id: payment_intent_id,
                stripe_charge_id: None,
                stripe_event_id: event.id.to_string(),
            },
        )
        .await
    }

    /// Shared payment recording path: insert the payment (idempotent on its
    /// Stripe identifiers), derive the invoice status from cumulative
    /// confirmed payments, then emit activity + notification.
    ///
    /// A metadata id that parses but matches no local invoice is acked
    /// without side effects rather than tripping the foreign key.
    async fn record_payment(&self, invoice_id: Uuid, new: NewPayment) -> BillingResult<()> {
        let Some(details) = ack_unmatched(self.invoices.get(invoice_id).await)? else {
            tracing::warn!(
                invoice_id = %invoice_id,
                "Payment references no local invoice, acknowledging"
            );
            return Ok(());
        };

        let Some(payment) = self.payments.record_succeeded(new).await? else {
            tracing::info!(
                invoice_id = %invoice_id,
                "Payment already recorded, skipping side effects"
            );
            return Ok(());
        };
        let paid = self.invoices.paid_total(invoice_id).await?;
        let remaining = (details.invoice.total_cents - paid).max(0);

        if let Some(status) = derive_status(details.invoice.total_cents, paid) {
            self.apply_paid_status(invoice_id, status).await?;
        }

        if let Err(e) = self
            .activity
            .log(
                ActivityEntry::new(ActivityType::PaymentReceived)
                    .actor(ActorType::Stripe)
                    .client(details.invoice.client_id)
                    .invoice(invoice_id)
                    .stripe_event(payment.stripe_event_id.as_deref().unwrap_or(""))
                    .data(serde_json::json!({
                        "amount_cents": payment.amount_cents,
                        "remaining_cents": remaining,
                    })),
            )
            .await
        {
            tracing::error!(invoice_id = %invoice_id, error = %e, "Failed to log payment activity");
        }

        self.notifications
            .dispatch(NotificationIntent {
                client_id: details.invoice.client_id,
                notification_type: NotificationType::PaymentReceived,
                title: "Payment received".to_string(),
                message: format!(
                    "A payment of {} cents was received for invoice {}",
                    payment.amount_cents, details.invoice.invoice_number
                ),
                metadata: serde_json::json!({
                    "invoice_id": invoice_id,
                    "payment_id": payment.id,
                    "amount_cents": payment.amount_cents,
                }),
                email: Some(EmailSideEffect::PaymentReceived {
                    invoice_number: details.invoice.invoice_number.clone(),
                    amount_cents: payment.amount_cents,
                    currency: payment.currency.clone(),
                    remaining_cents: remaining,
                }),
            })
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            payment_id = %payment.id,
            amount_cents = payment.amount_cents,
            remaining_cents = remaining,
            "Payment reconciled"
        );

        Ok(())
    }

    /// The reconciler is the sole writer of paid-family statuses; this is
    /// the only place they are set.
    async fn apply_paid_status(&self, invoice_id: Uuid, status: InvoiceStatus) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('cancelled', 'refunded')
            "#,
        )
        .bind(invoice_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// charge.refunded: record the refund, flip the payment's refund status,
    /// and on a full refund mark the invoice refunded.
    async fn handle_charge_refunded(&self, event: &Event) -> BillingResult<()> {
        let EventObject::Charge(charge) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        let payment = match self.payments.find_by_charge_id(charge.id.as_str()).await? {
            Some(p) => p,
            None => {
                let by_intent = match charge.payment_intent.as_ref() {
                    Some(pi) => {
                        self.payments
                            .find_by_payment_intent_id(pi.id().as_str())
                            .await?
                    }
                    None => None,
                };
                match by_intent {
                    Some(p) => p,
                    None => {
                        tracing::warn!(
                            charge_id = %charge.id,
                            "Refunded charge matches no local payment, acknowledging"
                        );
                        return Ok(());
                    }
                }
            }
        };

        let amount_refunded = charge.amount_refunded;
        let (payment_status, full_refund) = refund_disposition(amount_refunded, payment.amount_cents);
        let refund_id = charge
            .refunds
            .as_ref()
            .and_then(|list| list.data.first())
            .map(|r| r.id.to_string());

        let Some(refund) = self
            .payments
            .record_refund(
                payment.id,
                payment.invoice_id,
                amount_refunded,
                refund_id.as_deref(),
            )
            .await?
        else {
            tracing::info!(
                payment_id = %payment.id,
                "Refund already recorded, skipping side effects"
            );
            return Ok(());
        };

        self.payments
            .set_refund_status(payment.id, payment_status)
            .await?;

        let details = self.invoices.get(payment.invoice_id).await?;
        if full_refund {
            sqlx::query(
                "UPDATE invoices SET status = 'refunded', updated_at = NOW() WHERE id = $1",
            )
            .bind(payment.invoice_id)
            .execute(&self.pool)
            .await?;
        }

        if let Err(e) = self
            .activity
            .log(
                ActivityEntry::new(ActivityType::PaymentRefunded)
                    .actor(ActorType::Stripe)
                    .client(details.invoice.client_id)
                    .invoice(payment.invoice_id)
                    .stripe_event(event.id.as_str())
                    .data(serde_json::json!({
                        "payment_id": payment.id,
                        "amount_cents": refund.amount_cents,
                        "full_refund": full_refund,
                    })),
            )
            .await
        {
            tracing::error!(
                invoice_id = %payment.invoice_id,
                error = %e,
                "Failed to log refund activity"
            );
        }

        self.notifications
            .dispatch(NotificationIntent {
                client_id: details.invoice.client_id,
                notification_type: NotificationType::RefundIssued,
                title: "Refund issued".to_string(),
                message: format!(
                    "A refund of {} cents was issued for invoice {}",
                    refund.amount_cents, details.invoice.invoice_number
                ),
                metadata: serde_json::json!({
                    "invoice_id": payment.invoice_id,
                    "payment_id": payment.id,
                    "refund_id": refund.id,
                    "amount_cents": refund.amount_cents,
                }),
                email: Some(EmailSideEffect::RefundIssued {
                    invoice_number: details.invoice.invoice_number.clone(),
                    amount_cents: refund.amount_cents,
                    currency: details.invoice.currency.clone(),
                }),
            })
            .await?;

        tracing::info!(
            invoice_id = %payment.invoice_id,
            payment_id = %payment.id,
            amount_cents = refund.amount_cents,
            full_refund = full_refund,
            "Refund reconciled"
        );

        Ok(())
    }

    async fn handle_subscription_synced(
        &self,
        event: &Event,
        activity_type: ActivityType,
    ) -> BillingResult<()> {
        let EventObject::Subscription(sub) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        if let Some(record) = self.subscriptions.sync_from_processor(sub).await? {
            if let Err(e) = self
                .activity
                .log(
                    ActivityEntry::new(activity_type)
                        .actor(ActorType::Stripe)
                        .client(record.client_id)
                        .stripe_event(event.id.as_str())
                        .data(serde_json::json!({
                            "subscription_id": record.id,
                            "status": record.status.as_str(),
                        })),
                )
                .await
            {
                tracing::error!(error = %e, "Failed to log subscription activity");
            }
        }
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &Event) -> BillingResult<()> {
        let EventObject::Subscription(sub) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        let Some(record) = self.subscriptions.mark_canceled(sub.id.as_str()).await? else {
            tracing::warn!(
                stripe_subscription_id = %sub.id,
                "Deleted subscription has no local record, acknowledging"
            );
            return Ok(());
        };

        if let Err(e) = self
            .activity
            .log(
                ActivityEntry::new(ActivityType::SubscriptionCanceled)
                    .actor(ActorType::Stripe)
                    .client(record.client_id)
                    .stripe_event(event.id.as_str())
                    .data(serde_json::json!({ "subscription_id": record.id })),
            )
            .await
        {
            tracing::error!(error = %e, "Failed to log subscription cancellation");
        }

        self.notifications
            .dispatch(NotificationIntent {
                client_id: record.client_id,
                notification_type: NotificationType::SubscriptionCanceled,
                title: "Subscription canceled".to_string(),
                message: "Your recurring billing subscription has been canceled".to_string(),
                metadata: serde_json::json!({ "subscription_id": record.id }),
                email: None,
            })
            .await?;

        Ok(())
    }

    /// invoice.paid with a subscription: each successful billing cycle
    /// becomes a brand-new local invoice that is born paid, with its payment
    /// attached, rather than a mutation of the original invoice.
    async fn handle_recurring_cycle(&self, event: &Event) -> BillingResult<()> {
        let EventObject::Invoice(stripe_invoice) = &event.data.object else {
            return Err(BillingError::WebhookEventNotSupported(
                event.type_.to_string(),
            ));
        };

        let Some(stripe_sub_id) = stripe_invoice
            .subscription
            .as_ref()
            .map(|s| s.id().to_string())
        else {
            tracing::info!(
                stripe_invoice_id = %stripe_invoice.id,
                "Paid processor invoice without subscription, acknowledging"
            );
            return Ok(());
        };

        let Some(subscription) = self.subscriptions.find_by_stripe_id(&stripe_sub_id).await? else {
            tracing::warn!(
                stripe_subscription_id = %stripe_sub_id,
                "Recurring payment for unknown local subscription, acknowledging"
            );
            return Ok(());
        };

        let amount_cents = cycle_amount(stripe_invoice.amount_paid, subscription.amount_cents);
        let currency = stripe_invoice
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| subscription.currency.clone());
        let payment_intent_id = stripe_invoice
            .payment_intent
            .as_ref()
            .map(|pi| pi.id().to_string());
        let charge_id = stripe_invoice.charge.as_ref().map(|c| c.id().to_string());

        // Invoice and payment land in one transaction; a replayed event
        // inserts neither.
        let Some((cycle, payment)) = self
            .invoices
            .create_cycle_invoice(
                subscription.client_id,
                subscription.project_id,
                subscription.id,
                subscription.interval,
                amount_cents,
                &currency,
                CyclePaymentRefs {
                    stripe_payment_intent_id: payment_intent_id,
                    stripe_charge_id: charge_id,
                    stripe_event_id: event.id.to_string(),
                },
            )
            .await?
        else {
            tracing::info!(
                stripe_event_id = %event.id,
                "Recurring payment already recorded, skipping side effects"
            );
            return Ok(());
        };

        if let Err(e) = self
            .activity
            .log(
                ActivityEntry::new(ActivityType::RecurringInvoiceGenerated)
                    .actor(ActorType::Stripe)
                    .client(subscription.client_id)
                    .invoice(cycle.id)
                    .stripe_event(event.id.as_str())
                    .data(serde_json::json!({
                        "subscription_id": subscription.id,
                        "amount_cents": amount_cents,
                    })),
            )
            .await
        {
            tracing::error!(error = %e, "Failed to log recurring cycle activity");
        }

        self.notifications
            .dispatch(NotificationIntent {
                client_id: subscription.client_id,
                notification_type: NotificationType::RecurringPayment,
                title: "Recurring payment received".to_string(),
                message: format!(
                    "Recurring payment received, invoice {} generated",
                    cycle.invoice_number
                ),
                metadata: serde_json::json!({
                    "invoice_id": cycle.id,
                    "payment_id": payment.id,
                    "subscription_id": subscription.id,
                    "amount_cents": amount_cents,
                }),
                email: Some(EmailSideEffect::RecurringReceipt {
                    invoice_number: cycle.invoice_number.clone(),
                    amount_cents,
                    currency,
                }),
            })
            .await?;

        tracing::info!(
            invoice_id = %cycle.id,
            invoice_number = %cycle.invoice_number,
            subscription_id = %subscription.id,
            amount_cents = amount_cents,
            "Recurring billing cycle reconciled"
        );

        Ok(())
    }
}

fn parse_invoice_id(raw: Option<&String>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s).ok())
}

/// Flatten an invoice lookup so an unmatched id becomes an ack (None)
/// instead of an error; everything else still propagates.
fn ack_unmatched<T>(result: BillingResult<T>) -> BillingResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(BillingError::InvoiceNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Payment status after a refund, and whether the refund covers the
/// whole payment. Over-refunds (partial capture adjustments) count as full.
fn refund_disposition(amount_refunded_cents: i64, payment_amount_cents: i64) -> (PaymentStatus, bool) {
    if amount_refunded_cents >= payment_amount_cents {
        (PaymentStatus::Refunded, true)
    } else {
        (PaymentStatus::PartiallyRefunded, false)
    }
}

/// Amount for a recurring cycle: the processor's figure when present,
/// otherwise the subscription's configured amount.
fn cycle_amount(amount_paid: Option<i64>, subscription_amount_cents: i64) -> i64 {
    amount_paid.unwrap_or(subscription_amount_cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invoice_id() {
        let id = Uuid::new_v4();
        let raw = id.to_string();
        assert_eq!(parse_invoice_id(Some(&raw)), Some(id));
        assert_eq!(parse_invoice_id(Some(&"not a uuid".to_string())), None);
        assert_eq!(parse_invoice_id(None), None);
    }

    #[test]
    fn test_claim_reclaims_errored_and_stuck_rows() {
        // A failed attempt must stay retryable: the claim's conflict branch
        // has to match errored rows as well as timed-out 'processing' rows,
        // and must never touch completed ones.
        assert!(CLAIM_EVENT_SQL.contains("webhook_events.processing_result = 'error'"));
        assert!(CLAIM_EVENT_SQL.contains("webhook_events.processing_result = 'processing'"));
        assert!(CLAIM_EVENT_SQL.contains("processing_started_at < NOW()"));
        assert!(!CLAIM_EVENT_SQL.contains("'success'"));
    }

    #[test]
    fn test_unmatched_invoice_is_acknowledged() {
        // Metadata that parses as a UUID but matches nothing local is an
        // ack, not an error the processor would retry forever.
        let missing: BillingResult<i64> =
            Err(BillingError::InvoiceNotFound("gone".to_string()));
        assert!(matches!(ack_unmatched(missing), Ok(None)));

        let found: BillingResult<i64> = Ok(42);
        assert!(matches!(ack_unmatched(found), Ok(Some(42))));

        // Real failures still propagate so the event stays retryable.
        let db: BillingResult<i64> = Err(BillingError::Database("down".to_string()));
        assert!(matches!(ack_unmatched(db), Err(BillingError::Database(_))));
    }

    #[test]
    fn test_payment_application_partial_then_paid() {
        // Two payments against a 10000-cent invoice: the first drives
        // partially_paid, the second paid. A replayed first event records
        // no new row, leaves the paid total unchanged, and re-derives the
        // same status.
        let total = 10_000;
        assert_eq!(derive_status(total, 4_000), Some(InvoiceStatus::PartiallyPaid));
        assert_eq!(derive_status(total, 10_000), Some(InvoiceStatus::Paid));
        assert_eq!(derive_status(total, 10_000), Some(InvoiceStatus::Paid));
    }

    #[test]
    fn test_refund_disposition() {
        assert_eq!(
            refund_disposition(2_500, 10_000),
            (PaymentStatus::PartiallyRefunded, false)
        );
        assert_eq!(refund_disposition(10_000, 10_000), (PaymentStatus::Refunded, true));
        // processor-side adjustments can refund more than we recorded
        assert_eq!(refund_disposition(10_500, 10_000), (PaymentStatus::Refunded, true));
    }

    #[test]
    fn test_cycle_amount_prefers_processor_figure() {
        assert_eq!(cycle_amount(Some(2_900), 2_500), 2_900);
        assert_eq!(cycle_amount(None, 2_500), 2_500);
    }
}
