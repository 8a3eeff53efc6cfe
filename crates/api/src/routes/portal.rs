//! Client-facing tracking portal
//!
//! A tracking code is an unguessable capability: anyone holding it can see
//! the project's status and its invoices, with no account required. Codes
//! use an ambiguity-free alphabet and carry no other meaning.

use axum::{
    extract::{Path, State},
    Json,
};
use billtrack_billing::CheckoutResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Serialize, FromRow)]
pub struct PortalProject {
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub client_name: String,
    #[serde(skip)]
    pub id: Uuid,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PortalInvoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub status: String,
    pub total_cents: i64,
    pub remaining_cents: i64,
    pub currency: String,
    pub due_date: Option<Date>,
    pub created_at: OffsetDateTime,
}

pub async fn track(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let project: Option<PortalProject> = sqlx::query_as(
        r#"
        SELECT p.id, p.name, p.description, p.status, c.name AS client_name
        FROM projects p
        JOIN clients c ON c.id = p.client_id
        WHERE p.tracking_code = $1
        "#,
    )
    .bind(&code)
    .fetch_optional(&state.pool)
    .await?;

    let project = project.ok_or_else(|| ApiError::NotFound("unknown tracking code".to_string()))?;

    // Drafts stay invisible until sent; the portal never leaks work in
    // progress.
    let invoices: Vec<PortalInvoice> = sqlx::query_as(
        r#"
        SELECT i.id, i.invoice_number, i.status, i.total_cents,
               i.total_cents - COALESCE(
                   (SELECT SUM(p.amount_cents) FROM payments p
                    WHERE p.invoice_id = i.id AND p.status = 'succeeded'), 0
               )::BIGINT AS remaining_cents,
               i.currency, i.due_date, i.created_at
        FROM invoices i
        WHERE i.project_id = $1 AND i.status <> 'draft'
        ORDER BY i.created_at DESC
        "#,
    )
    .bind(project.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "project": project,
        "invoices": invoices,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PortalCheckoutRequest {
    pub invoice_id: Uuid,
    /// None pays the full remaining balance
    pub amount_cents: Option<i64>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Start a hosted checkout for an invoice visible through the tracking code.
///
/// The code is the client's only credential, so the invoice must belong to
/// the code's project and be visible there (not a draft). An invoice outside
/// that scope gets the same 404 as an unknown code.
pub async fn checkout(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<PortalCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let visible: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT i.id
        FROM invoices i
        JOIN projects p ON p.id = i.project_id
        WHERE p.tracking_code = $1 AND i.id = $2 AND i.status <> 'draft'
        "#,
    )
    .bind(&code)
    .bind(req.invoice_id)
    .fetch_optional(&state.pool)
    .await?;

    if visible.is_none() {
        return Err(ApiError::NotFound("unknown tracking code".to_string()));
    }

    let response = state
        .billing
        .checkout
        .create_session(
            req.invoice_id,
            req.amount_cents,
            &req.success_url,
            &req.cancel_url,
        )
        .await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_request_amount_defaults_to_full_balance() {
        let req: PortalCheckoutRequest = serde_json::from_str(
            r#"{
                "invoice_id": "5e9cbb9e-26da-44bc-8b6e-33e562092c5b",
                "success_url": "https://example.com/ok",
                "cancel_url": "https://example.com/back"
            }"#,
        )
        .unwrap();
        assert!(req.amount_cents.is_none());
    }
}
