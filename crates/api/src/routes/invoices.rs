//! Admin invoice management routes

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use billtrack_billing::{
    ActivityEntry, ActivityType, ActorType, EmailSideEffect, Invoice, InvoiceDetails,
    InvoiceUpdate, NewInvoice, NewLineItem, NotificationIntent, NotificationType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    #[serde(flatten)]
    pub invoice: NewInvoice,
    pub line_items: Vec<NewLineItem>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateInvoiceRequest>,
) -> ApiResult<Json<InvoiceDetails>> {
    let details = state
        .billing
        .invoices
        .create(req.invoice, req.line_items)
        .await?;

    if let Err(e) = state
        .billing
        .activity
        .log(
            ActivityEntry::new(ActivityType::InvoiceCreated)
                .actor(ActorType::Admin)
                .client(details.invoice.client_id)
                .invoice(details.invoice.id)
                .data(json!({
                    "invoice_number": details.invoice.invoice_number,
                    "total_cents": details.invoice.total_cents,
                    "created_by": user.user_id,
                })),
        )
        .await
    {
        tracing::error!(invoice_id = %details.invoice.id, error = %e, "Failed to log invoice creation");
    }

    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<Invoice>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListInvoicesQuery>,
) -> ApiResult<Json<InvoiceListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let invoices: Vec<Invoice> = sqlx::query_as(
        r#"
        SELECT * FROM invoices
        WHERE ($1::uuid IS NULL OR client_id = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(query.client_id)
    .bind(query.status.as_deref())
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(&state.pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM invoices
        WHERE ($1::uuid IS NULL OR client_id = $1)
          AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(query.client_id)
    .bind(query.status.as_deref())
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(InvoiceListResponse {
        invoices,
        total,
        page,
        limit,
    }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InvoiceDetails>> {
    Ok(Json(state.billing.invoices.get(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<InvoiceUpdate>,
) -> ApiResult<Json<InvoiceDetails>> {
    Ok(Json(state.billing.invoices.update(id, update).await?))
}

/// Send an invoice to its client: transition draft -> sent, then record the
/// notification (email best-effort).
pub async fn send(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let invoice = state.billing.invoices.mark_sent(id).await?;

    let pay_url = format!("{}/pay/{}", state.config.app_url, invoice.id);
    state
        .billing
        .notifications
        .dispatch(NotificationIntent {
            client_id: invoice.client_id,
            notification_type: NotificationType::InvoiceSent,
            title: "New invoice".to_string(),
            message: format!("Invoice {} has been sent to you", invoice.invoice_number),
            metadata: json!({
                "invoice_id": invoice.id,
                "total_cents": invoice.total_cents,
            }),
            email: Some(EmailSideEffect::Invoice {
                invoice_number: invoice.invoice_number.clone(),
                total_cents: invoice.total_cents,
                currency: invoice.currency.clone(),
                pay_url: Some(pay_url),
            }),
        })
        .await?;

    if let Err(e) = state
        .billing
        .activity
        .log(
            ActivityEntry::new(ActivityType::InvoiceSent)
                .actor(ActorType::Admin)
                .client(invoice.client_id)
                .invoice(invoice.id),
        )
        .await
    {
        tracing::error!(invoice_id = %invoice.id, error = %e, "Failed to log invoice send");
    }

    Ok(Json(invoice))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let invoice = state.billing.invoices.cancel(id).await?;

    if let Err(e) = state
        .billing
        .activity
        .log(
            ActivityEntry::new(ActivityType::InvoiceCancelled)
                .actor(ActorType::Admin)
                .client(invoice.client_id)
                .invoice(invoice.id),
        )
        .await
    {
        tracing::error!(invoice_id = %invoice.id, error = %e, "Failed to log invoice cancellation");
    }

    Ok(Json(invoice))
}
