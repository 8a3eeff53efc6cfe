//! Invoice record store
//!
//! Create/update/get over the invoices and invoice_line_items tables. Status
//! changes into the paid family are reconciler-only; this store enforces that
//! as policy, not convention.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::money::{self, InvoiceTotals};
use crate::payments::Payment;

/// Attempts at generating a collision-free invoice number before giving up.
const NUMBER_GENERATION_ATTEMPTS: usize = 5;

const NUMBER_DATE_FORMAT: &[FormatItem<'_>] = format_description!("[year][month][day]");

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Refunded,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Refunded => "refunded",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses only the webhook reconciler may write.
    pub fn is_reconciler_only(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Paid | InvoiceStatus::PartiallyPaid | InvoiceStatus::Refunded
        )
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Refunded)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing interval for recurring invoices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecurringInterval {
    Month,
    Year,
}

impl RecurringInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringInterval::Month => "month",
            RecurringInterval::Year => "year",
        }
    }
}

/// Stored invoice row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub invoice_number: String,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub tax_rate_bps: Option<i64>,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: Option<Date>,
    pub is_recurring: bool,
    pub recurring_interval: Option<RecurringInterval>,
    pub subscription_id: Option<Uuid>,
    pub sent_at: Option<OffsetDateTime>,
    pub paid_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Stored line item row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    /// Quantity scaled by 100 (2.50 units -> 250)
    pub quantity_hundredths: i64,
    pub unit_price_cents: i64,
    pub total_cents: i64,
    pub phase_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub position: i32,
}

/// Line item as submitted by the admin UI
#[derive(Debug, Clone, Deserialize)]
pub struct NewLineItem {
    pub description: String,
    pub quantity_hundredths: i64,
    pub unit_price_cents: i64,
    /// Client-computed total; recomputed server-side, mismatches are rejected.
    pub total_cents: i64,
    pub phase_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

/// Fields for creating a draft invoice
#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub discount_cents: i64,
    pub tax_rate_bps: Option<i64>,
    pub currency: String,
    pub due_date: Option<Date>,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurring_interval: Option<RecurringInterval>,
}

/// Allow-listed fields for updating an invoice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceUpdate {
    pub title: Option<String>,
    /// Replacement invoice number; must stay unique across all invoices.
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub due_date: Option<Date>,
    pub discount_cents: Option<i64>,
    pub tax_rate_bps: Option<Option<i64>>,
    /// Replaces the full line item set when present.
    pub line_items: Option<Vec<NewLineItem>>,
    /// Never honored; present so direct status writes can be rejected
    /// explicitly instead of silently dropped.
    pub status: Option<InvoiceStatus>,
}

/// Processor identifiers for the payment attached to a recurring cycle
/// invoice; the event id is the replay-dedup key.
#[derive(Debug, Clone)]
pub struct CyclePaymentRefs {
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub stripe_event_id: String,
}

/// Invoice with its line items and payment history
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetails {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
    pub payments: Vec<Payment>,
    pub remaining_cents: i64,
}

/// Derive the paid-family status from the single source of truth: cumulative
/// confirmed payments vs invoice total.
///
/// Returns None when no payment has been confirmed yet, so callers never
/// regress a sent invoice to draft.
pub fn derive_status(total_cents: i64, paid_cents: i64) -> Option<InvoiceStatus> {
    if paid_cents <= 0 {
        None
    } else if paid_cents >= total_cents {
        Some(InvoiceStatus::Paid)
    } else {
        Some(InvoiceStatus::PartiallyPaid)
    }
}

fn validate_line(item: &NewLineItem) -> BillingResult<i64> {
    if item.description.trim().is_empty() {
        return Err(BillingError::Validation(
            "line item description must not be empty".to_string(),
        ));
    }
    if item.quantity_hundredths < 1 {
        return Err(BillingError::Validation(format!(
            "line item quantity must be at least 0.01, got {}",
            item.quantity_hundredths as f64 / 100.0
        )));
    }
    if item.unit_price_cents < 0 {
        return Err(BillingError::Validation(
            "line item unit price must not be negative".to_string(),
        ));
    }

    let computed = money::line_total(item.quantity_hundredths, item.unit_price_cents);
    if computed != item.total_cents {
        return Err(BillingError::Validation(format!(
            "line item total mismatch: client sent {} cents, server computed {}",
            item.total_cents, computed
        )));
    }
    Ok(computed)
}

/// Validate all lines, recompute totals server-side.
fn validate_and_total(
    items: &[NewLineItem],
    discount_cents: i64,
    tax_rate_bps: Option<i64>,
) -> BillingResult<InvoiceTotals> {
    if items.is_empty() {
        return Err(BillingError::Validation(
            "invoice requires at least one line item".to_string(),
        ));
    }
    if discount_cents < 0 {
        return Err(BillingError::Validation(
            "discount must not be negative".to_string(),
        ));
    }
    if let Some(rate) = tax_rate_bps {
        if rate < 0 {
            return Err(BillingError::Validation(
                "tax rate must not be negative".to_string(),
            ));
        }
    }

    let line_totals = items
        .iter()
        .map(validate_line)
        .collect::<BillingResult<Vec<i64>>>()?;

    let totals = money::compute_totals(&line_totals, discount_cents, tax_rate_bps);
    if totals.total_cents < 0 {
        return Err(BillingError::Validation(format!(
            "discount exceeds invoice subtotal: total would be {} cents",
            totals.total_cents
        )));
    }
    Ok(totals)
}

fn validate_number(number: &str) -> BillingResult<()> {
    if number.trim().is_empty() {
        return Err(BillingError::Validation(
            "invoice number must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

/// CRUD service for invoices and their line items
pub struct InvoiceStore {
    pool: PgPool,
}

impl InvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generate a date-prefixed invoice number: INV-20260829-K3QD
    fn generate_number() -> String {
        let date = OffsetDateTime::now_utc()
            .date()
            .format(NUMBER_DATE_FORMAT)
            .unwrap_or_else(|_| "00000000".to_string());
        format!("INV-{}-{}", date, billtrack_shared::invoice_number_suffix())
    }

    /// Persist a draft invoice with its line items in one transaction.
    ///
    /// Totals are recomputed server-side; the collision-checked invoice
    /// number is retried a bounded number of times against the unique
    /// constraint.
    pub async fn create(
        &self,
        new: NewInvoice,
        line_items: Vec<NewLineItem>,
    ) -> BillingResult<InvoiceDetails> {
        let totals = validate_and_total(&line_items, new.discount_cents, new.tax_rate_bps)?;

        let mut last_number = String::new();
        for attempt in 0..NUMBER_GENERATION_ATTEMPTS {
            let number = Self::generate_number();
            last_number = number.clone();

            match self.insert_invoice(&new, &number, &totals, &line_items).await {
                Ok(details) => return Ok(details),
                Err(BillingError::DuplicateInvoiceNumber(n)) => {
                    tracing::warn!(
                        invoice_number = %n,
                        attempt = attempt + 1,
                        "Invoice number collision, regenerating"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(BillingError::DuplicateInvoiceNumber(last_number))
    }

    async fn insert_invoice(
        &self,
        new: &NewInvoice,
        number: &str,
        totals: &InvoiceTotals,
        line_items: &[NewLineItem],
    ) -> BillingResult<InvoiceDetails> {
        let mut tx = self.pool.begin().await?;

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                id, client_id, project_id, invoice_number, title, notes,
                subtotal_cents, discount_cents, tax_cents, total_cents, tax_rate_bps,
                currency, status, due_date, is_recurring, recurring_interval
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'draft', $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.client_id)
        .bind(new.project_id)
        .bind(number)
        .bind(new.title.as_ref())
        .bind(new.notes.as_ref())
        .bind(totals.subtotal_cents)
        .bind(totals.discount_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(new.tax_rate_bps)
        .bind(&new.currency)
        .bind(new.due_date)
        .bind(new.is_recurring)
        .bind(new.recurring_interval)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::DuplicateInvoiceNumber(number.to_string())
            } else {
                BillingError::Database(e.to_string())
            }
        })?;

        let items = Self::replace_line_items(&mut tx, invoice.id, line_items).await?;

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total_cents = invoice.total_cents,
            line_items = items.len(),
            "Invoice created as draft"
        );

        Ok(InvoiceDetails {
            remaining_cents: invoice.total_cents,
            invoice,
            line_items: items,
            payments: Vec::new(),
        })
    }

    async fn replace_line_items(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: Uuid,
        line_items: &[NewLineItem],
    ) -> BillingResult<Vec<InvoiceLineItem>> {
        sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut **tx)
            .await?;

        let mut stored = Vec::with_capacity(line_items.len());
        for (position, item) in line_items.iter().enumerate() {
            let row: InvoiceLineItem = sqlx::query_as(
                r#"
                INSERT INTO invoice_line_items (
                    id, invoice_id, description, quantity_hundredths,
                    unit_price_cents, total_cents, phase_id, task_id, position
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity_hundredths)
            .bind(item.unit_price_cents)
            .bind(item.total_cents)
            .bind(item.phase_id)
            .bind(item.task_id)
            .bind(position as i32)
            .fetch_one(&mut **tx)
            .await?;
            stored.push(row);
        }
        Ok(stored)
    }

    /// Fetch an invoice with line items and payment history.
    pub async fn get(&self, id: Uuid) -> BillingResult<InvoiceDetails> {
        let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound(id.to_string()))?;

        let line_items: Vec<InvoiceLineItem> = sqlx::query_as(
            "SELECT * FROM invoice_line_items WHERE invoice_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let payments: Vec<Payment> = sqlx::query_as(
            "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let remaining_cents = self.remaining_balance(id).await?;

        Ok(InvoiceDetails {
            invoice,
            line_items,
            payments,
            remaining_cents,
        })
    }

    /// Mutate the allow-listed fields of a draft or sent invoice.
    ///
    /// Any attempted status write is rejected; paid/partially_paid/refunded
    /// are reconciler-only and the rest have dedicated operations.
    pub async fn update(&self, id: Uuid, update: InvoiceUpdate) -> BillingResult<InvoiceDetails> {
        if let Some(requested) = update.status {
            let current = self.get(id).await?.invoice.status;
            return Err(BillingError::InvalidStatusTransition {
                from: current.to_string(),
                to: requested.to_string(),
            });
        }

        let current = self.get(id).await?;
        if !matches!(
            current.invoice.status,
            InvoiceStatus::Draft | InvoiceStatus::Sent | InvoiceStatus::Overdue
        ) {
            return Err(BillingError::InvalidStatusTransition {
                from: current.invoice.status.to_string(),
                to: "edited".to_string(),
            });
        }

        if let Some(number) = &update.invoice_number {
            validate_number(number)?;
        }

        let discount_cents = update
            .discount_cents
            .unwrap_or(current.invoice.discount_cents);
        let tax_rate_bps = update
            .tax_rate_bps
            .unwrap_or(current.invoice.tax_rate_bps);

        // Rebuild the line item set either from the replacement payload or
        // the stored rows, then recompute totals from scratch.
        let items: Vec<NewLineItem> = match update.line_items {
            Some(items) => items,
            None => current
                .line_items
                .iter()
                .map(|li| NewLineItem {
                    description: li.description.clone(),
                    quantity_hundredths: li.quantity_hundredths,
                    unit_price_cents: li.unit_price_cents,
                    total_cents: li.total_cents,
                    phase_id: li.phase_id,
                    task_id: li.task_id,
                })
                .collect(),
        };

        let totals = validate_and_total(&items, discount_cents, tax_rate_bps)?;

        let mut tx = self.pool.begin().await?;

        let invoice: Invoice = sqlx::query_as(
            r#"
            UPDATE invoices
            SET title = COALESCE($2, title),
                invoice_number = COALESCE($3, invoice_number),
                notes = COALESCE($4, notes),
                due_date = COALESCE($5, due_date),
                subtotal_cents = $6,
                discount_cents = $7,
                tax_cents = $8,
                total_cents = $9,
                tax_rate_bps = $10,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.title.as_ref())
        .bind(update.invoice_number.as_ref())
        .bind(update.notes.as_ref())
        .bind(update.due_date)
        .bind(totals.subtotal_cents)
        .bind(totals.discount_cents)
        .bind(totals.tax_cents)
        .bind(totals.total_cents)
        .bind(tax_rate_bps)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BillingError::DuplicateInvoiceNumber(
                    update.invoice_number.clone().unwrap_or_default(),
                )
            } else {
                BillingError::Database(e.to_string())
            }
        })?;

        let line_items = Self::replace_line_items(&mut tx, id, &items).await?;

        tx.commit().await?;

        tracing::info!(invoice_id = %id, total_cents = invoice.total_cents, "Invoice updated");

        let remaining_cents = self.remaining_balance(id).await?;
        Ok(InvoiceDetails {
            invoice,
            line_items,
            payments: current.payments,
            remaining_cents,
        })
    }

    /// Transition draft -> sent after the invoice email was dispatched.
    pub async fn mark_sent(&self, id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            UPDATE invoices
            SET status = 'sent', sent_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match invoice {
            Some(inv) => Ok(inv),
            None => {
                let current = self.get(id).await?.invoice.status;
                Err(BillingError::InvalidStatusTransition {
                    from: current.to_string(),
                    to: InvoiceStatus::Sent.to_string(),
                })
            }
        }
    }

    /// Terminal admin-only transition, valid from draft or sent.
    pub async fn cancel(&self, id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            UPDATE invoices
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status IN ('draft', 'sent', 'overdue')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match invoice {
            Some(inv) => {
                tracing::info!(invoice_id = %id, "Invoice cancelled");
                Ok(inv)
            }
            None => {
                let current = self.get(id).await?.invoice.status;
                Err(BillingError::InvalidStatusTransition {
                    from: current.to_string(),
                    to: InvoiceStatus::Cancelled.to_string(),
                })
            }
        }
    }

    /// Synthesize a paid invoice for one recurring billing cycle.
    ///
    /// The reconciler calls this on each successful subscription payment:
    /// the cycle gets its own invoice number, a single line item for the
    /// cycle amount, and its payment row, all committed in one transaction
    /// so the invoice is never visible paid without its payment.
    ///
    /// Returns None when the payment's event id was already recorded - a
    /// replayed event - in which case nothing is inserted at all.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_cycle_invoice(
        &self,
        client_id: Uuid,
        project_id: Option<Uuid>,
        subscription_id: Uuid,
        interval: RecurringInterval,
        amount_cents: i64,
        currency: &str,
        payment_refs: CyclePaymentRefs,
    ) -> BillingResult<Option<(Invoice, Payment)>> {
        for attempt in 0..NUMBER_GENERATION_ATTEMPTS {
            let number = Self::generate_number();
            let mut tx = self.pool.begin().await?;

            let inserted: Result<Invoice, sqlx::Error> = sqlx::query_as(
                r#"
                INSERT INTO invoices (
                    id, client_id, project_id, invoice_number, title,
                    subtotal_cents, discount_cents, tax_cents, total_cents,
                    currency, status, is_recurring, recurring_interval,
                    subscription_id, paid_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $6, $7, 'paid', TRUE, $8, $9, NOW())
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(client_id)
            .bind(project_id)
            .bind(&number)
            .bind(format!("Recurring billing cycle ({})", interval.as_str()))
            .bind(amount_cents)
            .bind(currency)
            .bind(interval)
            .bind(subscription_id)
            .fetch_one(&mut *tx)
            .await;

            let invoice = match inserted {
                Ok(invoice) => invoice,
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(
                        invoice_number = %number,
                        attempt = attempt + 1,
                        "Invoice number collision on cycle invoice, regenerating"
                    );
                    tx.rollback().await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (
                    id, invoice_id, description, quantity_hundredths,
                    unit_price_cents, total_cents, position
                )
                VALUES ($1, $2, $3, 100, $4, $4, 0)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice.id)
            .bind(format!("Subscription billing cycle ({})", interval.as_str()))
            .bind(amount_cents)
            .execute(&mut *tx)
            .await?;

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
            .bind(invoice.id)
            .bind(amount_cents)
            .bind(currency)
            .bind(payment_refs.stripe_payment_intent_id.as_ref())
            .bind(payment_refs.stripe_charge_id.as_ref())
            .bind(&payment_refs.stripe_event_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(payment) = payment else {
                tx.rollback().await?;
                tracing::info!(
                    stripe_event_id = %payment_refs.stripe_event_id,
                    "Recurring payment already recorded, cycle invoice discarded"
                );
                return Ok(None);
            };

            tx.commit().await?;

            tracing::info!(
                invoice_id = %invoice.id,
                invoice_number = %invoice.invoice_number,
                subscription_id = %subscription_id,
                amount_cents = amount_cents,
                "Recurring cycle invoice created"
            );

            return Ok(Some((invoice, payment)));
        }

        Err(BillingError::DuplicateInvoiceNumber(
            "exhausted invoice number generation attempts".to_string(),
        ))
    }

    /// Cumulative confirmed payments for an invoice, in cents.
    ///
    /// The single source of truth for "is this invoice fully paid" - every
    /// reconciler branch and the checkout validator go through here rather
    /// than re-deriving the comparison.
    pub async fn paid_total(&self, invoice_id: Uuid) -> BillingResult<i64> {
        let (paid,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount_cents), 0)::BIGINT
            FROM payments
            WHERE invoice_id = $1 AND status = 'succeeded'
            "#,
        )
        .bind(invoice_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(paid)
    }

    /// Invoice total minus confirmed payments.
    pub async fn remaining_balance(&self, invoice_id: Uuid) -> BillingResult<i64> {
        let (remaining,): (i64,) = sqlx::query_as(
            r#"
            SELECT i.total_cents - COALESCE(
                (SELECT SUM(p.amount_cents) FROM payments p
                 WHERE p.invoice_id = i.id AND p.status = 'succeeded'), 0
            )::BIGINT
            FROM invoices i WHERE i.id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))?;
        Ok(remaining)
    }

    /// Sweep sent invoices past their due date into overdue.
    ///
    /// Run nightly by the worker; returns the number of invoices flagged.
    pub async fn mark_overdue(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'overdue', updated_at = NOW()
            WHERE status = 'sent' AND due_date IS NOT NULL AND due_date < CURRENT_DATE
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_status_progression() {
        // total 5000: payments of 2000 then 3000
        assert_eq!(derive_status(5000, 2000), Some(InvoiceStatus::PartiallyPaid));
        assert_eq!(derive_status(5000, 5000), Some(InvoiceStatus::Paid));
        // overpayment still counts as paid
        assert_eq!(derive_status(5000, 6000), Some(InvoiceStatus::Paid));
    }

    #[test]
    fn test_derive_status_no_payments_is_none() {
        assert_eq!(derive_status(5000, 0), None);
        assert_eq!(derive_status(5000, -100), None);
    }

    #[test]
    fn test_generate_number_shape() {
        let n = InvoiceStore::generate_number();
        // INV-YYYYMMDD-XXXX
        assert_eq!(n.len(), 17, "unexpected length for {n}");
        assert!(n.starts_with("INV-"));
        let parts: Vec<&str> = n.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
    }

    #[test]
    fn test_validate_line_rejects_total_mismatch() {
        let item = NewLineItem {
            description: "Design work".to_string(),
            quantity_hundredths: 200,
            unit_price_cents: 1000,
            total_cents: 1999, // should be 2000
            phase_id: None,
            task_id: None,
        };
        let err = validate_line(&item).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_validate_line_rejects_bad_ranges() {
        let zero_qty = NewLineItem {
            description: "x".to_string(),
            quantity_hundredths: 0,
            unit_price_cents: 100,
            total_cents: 0,
            phase_id: None,
            task_id: None,
        };
        assert!(validate_line(&zero_qty).is_err());

        let negative_price = NewLineItem {
            description: "x".to_string(),
            quantity_hundredths: 100,
            unit_price_cents: -5,
            total_cents: -5,
            phase_id: None,
            task_id: None,
        };
        assert!(validate_line(&negative_price).is_err());
    }

    #[test]
    fn test_update_allow_list_accepts_invoice_number() {
        let update: InvoiceUpdate = serde_json::from_str(
            r#"{"invoice_number": "INV-20260815-CUSTM", "notes": "net 15"}"#,
        )
        .unwrap();
        assert_eq!(update.invoice_number.as_deref(), Some("INV-20260815-CUSTM"));
        assert!(update.status.is_none());
    }

    #[test]
    fn test_validate_number_rejects_blank() {
        assert!(validate_number("INV-20260815-CUSTM").is_ok());
        assert!(matches!(
            validate_number("   "),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_and_total_rejects_overdiscount() {
        let items = vec![NewLineItem {
            description: "Consulting".to_string(),
            quantity_hundredths: 100,
            unit_price_cents: 1000,
            total_cents: 1000,
            phase_id: None,
            task_id: None,
        }];
        // discount larger than subtotal would drive the total negative
        let err = validate_and_total(&items, 2000, None).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_reconciler_only_statuses() {
        assert!(InvoiceStatus::Paid.is_reconciler_only());
        assert!(InvoiceStatus::PartiallyPaid.is_reconciler_only());
        assert!(InvoiceStatus::Refunded.is_reconciler_only());
        assert!(!InvoiceStatus::Sent.is_reconciler_only());
        assert!(!InvoiceStatus::Cancelled.is_reconciler_only());
    }
}
